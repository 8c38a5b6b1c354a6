//! `actionflow`: workflow trigger server, action executors and stream tools.

mod cli;
mod http;
mod state;

use clap::Parser;

use actionflow_infra::config::load_config;
use actionflow_infra::handlers::SIMULATION_LOG_DIRECTIVE;
use actionflow_observe::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands, StreamCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        default_filter: default_filter(&cli),
        json: cli.log_json,
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let loaded = load_config(cli.config.as_deref()).await?;
    tracing::debug!(
        config = ?loaded.path,
        data_dir = %loaded.data_dir.display(),
        "configuration loaded"
    );

    let result = match cli.command {
        Commands::Serve { host, port } => cli::serve::serve(&loaded, host, port).await,

        Commands::Executor {
            action_type,
            workers,
            durable,
        } => cli::executor::run(&loaded, action_type, workers, durable, cli.json).await,

        Commands::Trigger {
            workflow_id,
            entity_type,
            entity_id,
            attrs,
        } => {
            cli::trigger::trigger(&loaded, &workflow_id, entity_type, entity_id, attrs, cli.json)
                .await
        }

        Commands::Stream { command } => match command {
            StreamCommand::Info => cli::stream::info(&loaded, cli.json).await,
            StreamCommand::DeadLetters { durable } => {
                cli::stream::dead_letters(&loaded, &durable, cli.json).await
            }
        },
    };

    shutdown_tracing();
    result
}

/// Log filter used when `RUST_LOG` is unset. Executors keep simulated
/// deliveries visible at the default verbosity.
fn default_filter(cli: &Cli) -> String {
    let base = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,actionflow=debug",
        _ => "trace",
    };
    match cli.command {
        Commands::Executor { .. } if cli.verbose == 0 && !cli.quiet => {
            format!("{base},{SIMULATION_LOG_DIRECTIVE}")
        }
        _ => base.to_string(),
    }
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
