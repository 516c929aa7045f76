//! Ensemble commands: create, list, pause/activate/hold, config.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use ensemble_types::ensemble::{CreateEnsembleRequest, Ensemble, EnsembleState};

use super::format_time;
use crate::state::AppState;

pub async fn create_ensemble(
    state: &AppState,
    name: String,
    max_planning: Option<u32>,
    max_running: Option<u32>,
    json: bool,
) -> Result<()> {
    let request = CreateEnsembleRequest {
        username: state.service.username().to_string(),
        name,
        max_planning,
        max_running,
    };
    let ensemble = state.service.create_ensemble(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ensemble)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Ensemble {} created",
        style("✓").green().bold(),
        style(&ensemble.name).cyan()
    );
    print_limits(&ensemble);
    println!();
    Ok(())
}

pub async fn list_ensembles(state: &AppState, json: bool) -> Result<()> {
    let ensembles = state.service.list_ensembles().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ensembles)?);
        return Ok(());
    }

    if ensembles.is_empty() {
        println!();
        println!(
            "  {} No ensembles found. Create one with: {}",
            style("i").blue().bold(),
            style("ensemble create NAME").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Created").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
        Cell::new("Max Planning").fg(Color::White),
        Cell::new("Max Running").fg(Color::White),
    ]);

    for e in &ensembles {
        table.add_row(vec![
            Cell::new(&e.name).fg(Color::Cyan),
            state_cell(e.state),
            Cell::new(format_time(&e.created)).fg(Color::DarkGrey),
            Cell::new(format_time(&e.updated)).fg(Color::DarkGrey),
            Cell::new(e.max_planning),
            Cell::new(e.max_running),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// Pause, activate or hold.
pub async fn set_state(
    state: &AppState,
    name: &str,
    new_state: EnsembleState,
    json: bool,
) -> Result<()> {
    let ensemble = state.service.set_ensemble_state(name, new_state).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ensemble)?);
    } else {
        println!("  {} {}", style("State:").bold(), ensemble.state);
    }
    Ok(())
}

pub async fn configure(
    state: &AppState,
    name: &str,
    max_planning: Option<u32>,
    max_running: Option<u32>,
    json: bool,
) -> Result<()> {
    let ensemble = state
        .service
        .configure_ensemble(name, max_planning, max_running)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ensemble)?);
    } else {
        print_limits(&ensemble);
    }
    Ok(())
}

fn print_limits(ensemble: &Ensemble) {
    println!("  {}  {}", style("Max Planning:").bold(), ensemble.max_planning);
    println!("  {}   {}", style("Max Running:").bold(), ensemble.max_running);
}

fn state_cell(state: EnsembleState) -> Cell {
    match state {
        EnsembleState::Active => Cell::new("● ACTIVE").fg(Color::Green),
        EnsembleState::Paused => Cell::new("○ PAUSED").fg(Color::Yellow),
        EnsembleState::Held => Cell::new("◌ HELD").fg(Color::DarkGrey),
    }
}
