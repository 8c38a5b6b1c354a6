//! `actionflow executor`: run one action type's consume loops until Ctrl+C.

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use actionflow_core::executor::{ActionHandler, ExecutorRuntime, ExecutorSettings, StatsSnapshot};
use actionflow_infra::config::LoadedConfig;
use actionflow_infra::handlers::{ApiCallHandler, EmailHandler, PublishHandler, WebhookHandler};
use actionflow_infra::sqlite::SqliteStream;
use actionflow_observe::attrs::SPAN_EXECUTOR;
use actionflow_types::action::ActionType;

use crate::shutdown_signal;
use crate::state::open_stream;

pub async fn run(
    loaded: &LoadedConfig,
    action_type: ActionType,
    workers: Option<usize>,
    durable: Option<String>,
    json: bool,
) -> Result<()> {
    let stream = open_stream(loaded).await?;

    let mut settings = ExecutorSettings::from_config(&loaded.config.executor, &loaded.config.stream);
    if let Some(workers) = workers {
        settings.workers = workers.max(1);
    }
    let durable = durable.unwrap_or_else(|| action_type.default_durable());

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    if !json {
        println!(
            "  {} {} executor consuming {} as {} ({} worker{})",
            style("⚡").bold(),
            style(action_type).bold(),
            style(action_type.subject()).cyan(),
            style(&durable).cyan(),
            settings.workers,
            if settings.workers == 1 { "" } else { "s" }
        );
    }

    let executors = &loaded.config.executors;
    let stats = match action_type {
        ActionType::Webhook => {
            let handler = WebhookHandler::new(&executors.webhook)?;
            drive(handler, settings, &stream, &durable, cancel).await?
        }
        ActionType::Email => {
            let handler = EmailHandler::new(&executors.email)?;
            if handler.is_simulated() && !json {
                print_simulated("executors.email.relay_url");
            }
            drive(handler, settings, &stream, &durable, cancel).await?
        }
        ActionType::NatsPublish => {
            let handler = PublishHandler::new(stream.clone());
            drive(handler, settings, &stream, &durable, cancel).await?
        }
        ActionType::CustomApiCall => {
            let handler = ApiCallHandler::new(&executors.custom_api_call)?;
            if handler.is_simulated() && !json {
                print_simulated("executors.custom_api_call.base_url");
            }
            drive(handler, settings, &stream, &durable, cancel).await?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats);
    }
    Ok(())
}

async fn drive<H: ActionHandler + 'static>(
    handler: H,
    settings: ExecutorSettings,
    stream: &SqliteStream,
    durable: &str,
    cancel: CancellationToken,
) -> Result<StatsSnapshot> {
    let span = info_span!(
        SPAN_EXECUTOR,
        actionflow.action_type = %handler.action_type(),
        actionflow.durable = %durable,
    );
    let runtime = ExecutorRuntime::new(handler, settings);
    let stats = runtime.run(stream, durable, cancel).instrument(span).await?;
    Ok(stats)
}

fn print_simulated(setting: &str) {
    println!(
        "  {} No {} configured: tasks are logged and acknowledged without being sent.",
        style("!").yellow().bold(),
        style(setting).yellow()
    );
}

fn print_stats(stats: &StatsSnapshot) {
    println!();
    println!("  {}", style("── Executor stopped ──").dim());
    println!("  Received:      {}", style(stats.received).bold());
    println!("  Succeeded:     {}", style(stats.succeeded).green());
    if stats.simulated > 0 {
        println!("  Simulated:     {}", stats.simulated);
    }
    println!("  Retried:       {}", style(stats.retried).yellow());
    println!("  Dead-lettered: {}", style(stats.dead_lettered).red());
    println!("  Permanent:     {}", style(stats.permanent_failures).red());
    if stats.duplicates > 0 {
        println!("  Duplicates:    {}", stats.duplicates);
    }
    println!();
}
