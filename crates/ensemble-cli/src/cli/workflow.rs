//! Workflow commands: submit, list, status, replan/rerun/abort, priority.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use ensemble_infra::process::environment::{is_executable, pathfind};
use ensemble_infra::process::{quote_path, shell_quote};
use ensemble_types::ensemble::{
    EnsembleWorkflow, SubmitWorkflowRequest, WorkflowCommand, WorkflowState,
};

use super::{WorkflowRef, format_time};
use crate::state::AppState;

/// Submit a workflow whose planning command runs in the current directory.
pub async fn submit(
    state: &AppState,
    target: &WorkflowRef,
    priority: i32,
    command: &[String],
    json: bool,
) -> Result<()> {
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    let plan_command = build_plan_command(command, &search_path)?;
    let basedir = std::env::current_dir().context("unable to determine current directory")?;

    let request = SubmitWorkflowRequest {
        name: target.workflow.clone(),
        plan_command,
        basedir,
        priority,
    };
    let workflow = state.service.submit_workflow(&target.ensemble, request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow {} submitted",
        style("✓").green().bold(),
        style(target).cyan()
    );
    println!("  {}  {}", style("Command:").bold(), workflow.plan_command);
    println!(
        "  {}      {}",
        style("Log:").bold(),
        style(workflow.logfile().display()).dim()
    );
    println!();
    Ok(())
}

pub async fn list_workflows(state: &AppState, ensemble: &str, long: bool, json: bool) -> Result<()> {
    let workflows = state.service.list_workflows(ensemble).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!(
            "  {} No workflows in {}. Submit one with: {}",
            style("i").blue().bold(),
            style(ensemble).cyan(),
            style(format!("ensemble submit {ensemble}.NAME -- COMMAND")).yellow()
        );
        println!();
        return Ok(());
    }

    if long {
        for wf in &workflows {
            print_workflow(wf);
            println!();
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Priority").fg(Color::White),
        Cell::new("Created").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for wf in &workflows {
        table.add_row(vec![
            Cell::new(&wf.name).fg(Color::Cyan),
            state_cell(wf.state),
            Cell::new(wf.priority),
            Cell::new(format_time(&wf.created)).fg(Color::DarkGrey),
            Cell::new(format_time(&wf.updated)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} workflow{}",
        style(workflows.len()).bold(),
        if workflows.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

pub async fn status(state: &AppState, target: &WorkflowRef, json: bool) -> Result<()> {
    let wf = state
        .service
        .get_workflow(&target.ensemble, &target.workflow)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&wf)?);
    } else {
        println!();
        print_workflow(&wf);
        println!();
    }
    Ok(())
}

/// Replan, rerun or abort.
pub async fn change_state(
    state: &AppState,
    target: &WorkflowRef,
    command: WorkflowCommand,
    json: bool,
) -> Result<()> {
    let wf = state
        .service
        .change_workflow_state(&target.ensemble, &target.workflow, command)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&wf)?);
    } else {
        println!("  {} {}", style("State:").bold(), wf.state);
    }
    Ok(())
}

pub async fn set_priority(
    state: &AppState,
    target: &WorkflowRef,
    priority: i32,
    json: bool,
) -> Result<()> {
    let wf = state
        .service
        .set_priority(&target.ensemble, &target.workflow, priority)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&wf)?);
    } else {
        println!("  {} {}", style("Priority:").bold(), wf.priority);
    }
    Ok(())
}

/// Turn `COMMAND ARG...` into a shell command line.
///
/// A bare command name is looked up on `search_path`; anything containing a
/// `/` must name an executable file. The resolved command is absolute and
/// every word is quoted.
fn build_plan_command(command: &[String], search_path: &std::ffi::OsStr) -> Result<String> {
    let Some((exe, args)) = command.split_first() else {
        bail!("missing planning command");
    };

    let resolved = resolve_command(exe, search_path)
        .with_context(|| format!("invalid planning command: {exe}"))?;

    let mut words = vec![quote_path(&resolved)];
    words.extend(args.iter().map(|a| shell_quote(a)));
    Ok(words.join(" "))
}

fn resolve_command(exe: &str, search_path: &std::ffi::OsStr) -> Result<PathBuf> {
    if exe.contains('/') {
        let path = Path::new(exe);
        if !is_executable(path) {
            bail!("{exe} is not an executable file");
        }
        return std::path::absolute(path).with_context(|| format!("unable to resolve {exe}"));
    }
    pathfind(exe, search_path).with_context(|| format!("{exe} not found on PATH"))
}

fn print_workflow(wf: &EnsembleWorkflow) {
    let optional = |v: Option<String>| v.unwrap_or_default();
    let rows = [
        ("ID", wf.id.to_string()),
        ("Name", wf.name.clone()),
        ("Plan Command", wf.plan_command.clone()),
        ("Created", format_time(&wf.created)),
        ("Updated", format_time(&wf.updated)),
        ("State", wf.state.to_string()),
        ("UUID", optional(wf.wf_uuid.map(|u| u.to_string()))),
        ("Priority", wf.priority.to_string()),
        ("Base Dir", wf.basedir.display().to_string()),
        (
            "Submit Dir",
            optional(wf.submitdir.as_ref().map(|d| d.display().to_string())),
        ),
        ("Log", wf.logfile().display().to_string()),
    ];
    for (label, value) in rows {
        println!("  {:<14}{}", style(format!("{label}:")).bold(), value);
    }
}

fn state_cell(state: WorkflowState) -> Cell {
    let cell = Cell::new(state.as_str());
    match state {
        WorkflowState::Successful => cell.fg(Color::Green),
        WorkflowState::PlanFailed | WorkflowState::RunFailed | WorkflowState::Failed => {
            cell.fg(Color::Red)
        }
        WorkflowState::Aborted => cell.fg(Color::DarkGrey),
        WorkflowState::Ready | WorkflowState::Queued => cell.fg(Color::White),
        WorkflowState::Planning | WorkflowState::Running => cell.fg(Color::Yellow),
    }
}
