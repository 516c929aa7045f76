//! `ensemble server`: run the ensemble manager loop.

use anyhow::{Context, Result, bail};
use console::style;
use tokio_util::sync::CancellationToken;

use ensemble_core::workflow::context::{CyclePolicy, CycleReport};
use ensemble_core::workflow::manager::EnsembleManager;
use ensemble_infra::config::resolve_interval;
use ensemble_infra::process::environment::ToolEnvironment;
use ensemble_infra::processor::LocalLifecycleFactory;
use ensemble_infra::sqlite::monitoring::SqliteMonitoringSource;
use ensemble_infra::sqlite::pool::connect_read_only;

use crate::state::AppState;

/// Check the environment, then run cycles until Ctrl+C / SIGTERM, or a
/// single cycle with `once`.
pub async fn serve(state: &AppState, interval: Option<u64>, once: bool, json: bool) -> Result<()> {
    refuse_root()?;

    let tools = ToolEnvironment::discover(&state.config.tools)
        .context("ensemble manager environment check failed")?;

    let monitoring_pool = match &state.config.database.monitoring_url {
        Some(url) => connect_read_only(url)
            .await
            .with_context(|| format!("unable to open monitoring database {url}"))?,
        None => state.db_pool.reader.clone(),
    };
    let factory = LocalLifecycleFactory::new(
        tools.launcher(),
        SqliteMonitoringSource::new(monitoring_pool),
        &state.config.tools,
    );

    let policy = CyclePolicy {
        run_after_planning: state.config.manager.run_after_planning,
        work_root: state.data_dir.clone(),
    };
    let interval = resolve_interval(&state.config, interval);
    let mut manager = EnsembleManager::new(state.repo.clone(), factory, policy, interval);

    if once {
        let report = manager.loop_once().await;
        print_report(&report, json)?;
        return Ok(());
    }

    if !json {
        println!(
            "  {} Ensemble manager running every {}s",
            style("⚡").bold(),
            style(interval.as_secs()).cyan()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        trigger.cancel();
    });

    manager.run(shutdown).await;

    if !json {
        println!("\n  Manager stopped after {} cycles.", manager.cycles());
    }
    Ok(())
}

#[cfg(unix)]
fn refuse_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        bail!("the ensemble manager should not be run as root");
    }
    Ok(())
}

#[cfg(not(unix))]
fn refuse_root() -> Result<()> {
    Ok(())
}

fn print_report(report: &CycleReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Cycle {}: {} ensemble{}, {} transition{}",
        style("✓").green().bold(),
        report.cycle,
        report.ensembles,
        if report.ensembles == 1 { "" } else { "s" },
        report.transitions.len(),
        if report.transitions.len() == 1 { "" } else { "s" },
    );
    for t in &report.transitions {
        println!(
            "    {} {}.{}: {} → {}",
            style("•").dim(),
            t.ensemble,
            style(&t.workflow).cyan(),
            t.from,
            t.to
        );
    }
    for f in &report.failures {
        println!(
            "    {} {}.{}: {}",
            style("✗").red(),
            f.ensemble,
            style(&f.workflow).cyan(),
            f.error
        );
    }
    println!();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
