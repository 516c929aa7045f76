//! Ensemble manager CLI and daemon entry point.
//!
//! Binary name: `ensemble`
//!
//! Parses CLI arguments, opens the database and dispatches to the command
//! handler, or starts the manager loop with `ensemble server`.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use ensemble_observe::tracing_setup::{LogOptions, init_tracing, shutdown_tracing};
use ensemble_types::ensemble::{EnsembleState, WorkflowCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need logging or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "ensemble", &mut std::io::stdout());
        return Ok(());
    }

    let otel = matches!(cli.command, Commands::Server { otel: true, .. });
    init_tracing(&LogOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        json: cli.json,
        otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;
    let json = cli.json;

    match cli.command {
        Commands::Server { interval, once, .. } => {
            cli::server::serve(&state, interval, once, json).await?;
        }

        Commands::Create {
            name,
            max_planning,
            max_running,
        } => {
            cli::ensemble::create_ensemble(&state, name, max_planning, max_running, json).await?;
        }

        Commands::Ensembles => cli::ensemble::list_ensembles(&state, json).await?,

        Commands::Pause { name } => {
            cli::ensemble::set_state(&state, &name, EnsembleState::Paused, json).await?;
        }
        Commands::Activate { name } => {
            cli::ensemble::set_state(&state, &name, EnsembleState::Active, json).await?;
        }
        Commands::Hold { name } => {
            cli::ensemble::set_state(&state, &name, EnsembleState::Held, json).await?;
        }

        Commands::Config {
            name,
            max_planning,
            max_running,
        } => {
            cli::ensemble::configure(&state, &name, max_planning, max_running, json).await?;
        }

        Commands::Submit {
            target,
            priority,
            command,
        } => {
            cli::workflow::submit(&state, &target, priority, &command, json).await?;
        }

        Commands::Workflows { ensemble, long } => {
            cli::workflow::list_workflows(&state, &ensemble, long, json).await?;
        }

        Commands::Status { target } => cli::workflow::status(&state, &target, json).await?,

        Commands::Replan { target } => {
            cli::workflow::change_state(&state, &target, WorkflowCommand::Replan, json).await?;
        }
        Commands::Rerun { target } => {
            cli::workflow::change_state(&state, &target, WorkflowCommand::Rerun, json).await?;
        }
        Commands::Abort { target } => {
            cli::workflow::change_state(&state, &target, WorkflowCommand::Abort, json).await?;
        }

        Commands::Priority { target, priority } => {
            cli::workflow::set_priority(&state, &target, priority, json).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
