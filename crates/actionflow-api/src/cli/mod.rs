//! CLI command definitions for the `actionflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod executor;
pub mod serve;
pub mod stream;
pub mod trigger;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use actionflow_types::action::ActionType;
use actionflow_types::attribute::AttributeValue;

/// Dispatch workflow actions onto a durable stream and execute them.
#[derive(Parser)]
#[command(name = "actionflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (overrides ACTIONFLOW_CONFIG).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit log records as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP trigger server.
    Serve {
        /// Bind address (defaults to server.host from the config).
        #[arg(long)]
        host: Option<String>,

        /// Port (defaults to server.port from the config).
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Consume and execute tasks of one action type until interrupted.
    Executor {
        /// webhook, email, nats_publish or custom_api_call.
        #[arg(value_parser = parse_action_type)]
        action_type: ActionType,

        /// Concurrent consume loops (defaults to executor.workers).
        #[arg(long, short)]
        workers: Option<usize>,

        /// Durable consumer name (defaults to `<type>-executor`).
        #[arg(long)]
        durable: Option<String>,
    },

    /// Trigger a workflow once and print the dispatch report.
    Trigger {
        workflow_id: String,

        #[arg(long)]
        entity_type: Option<String>,

        #[arg(long)]
        entity_id: Option<String>,

        /// Trigger attribute as key=value (repeatable).
        #[arg(long = "attr", value_name = "KEY=VALUE", value_parser = parse_attr)]
        attrs: Vec<(String, AttributeValue)>,
    },

    /// Inspect the durable stream.
    Stream {
        #[command(subcommand)]
        command: StreamCommand,
    },
}

#[derive(Subcommand)]
pub enum StreamCommand {
    /// Show message counts and consumer progress.
    Info,

    /// List messages a durable consumer gave up on.
    DeadLetters {
        durable: String,
    },
}

/// Accepts both `custom_api_call` and `custom-api-call`.
fn parse_action_type(raw: &str) -> Result<ActionType, String> {
    raw.replace('-', "_")
        .parse::<ActionType>()
        .map_err(|e| e.to_string())
}

/// Parse `key=value`. JSON scalars (`true`, `42`, `null`, `"quoted"`) keep
/// their type; anything else is a plain string.
fn parse_attr(raw: &str) -> Result<(String, AttributeValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty attribute key in '{raw}'"));
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .ok()
        .and_then(|v| AttributeValue::from_json(&v))
        .unwrap_or_else(|| AttributeValue::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_attr_types() {
        assert_eq!(
            parse_attr("name=Acme").unwrap(),
            ("name".to_string(), AttributeValue::from("Acme"))
        );
        assert_eq!(
            parse_attr("active=true").unwrap(),
            ("active".to_string(), AttributeValue::Bool(true))
        );
        assert_eq!(
            parse_attr("count=3").unwrap(),
            ("count".to_string(), AttributeValue::from(3i64))
        );
        assert_eq!(
            parse_attr("url=https://x.io/?a=b").unwrap(),
            ("url".to_string(), AttributeValue::from("https://x.io/?a=b"))
        );
        assert_eq!(
            parse_attr("empty=").unwrap(),
            ("empty".to_string(), AttributeValue::from(""))
        );
        assert!(parse_attr("novalue").is_err());
        assert!(parse_attr("=x").is_err());
    }

    #[test]
    fn test_parse_action_type_accepts_dashes() {
        assert_eq!(
            parse_action_type("custom-api-call").unwrap(),
            ActionType::CustomApiCall
        );
        assert_eq!(parse_action_type("email").unwrap(), ActionType::Email);
        assert!(parse_action_type("sms").is_err());
    }

    #[test]
    fn test_trigger_command_parses() {
        let cli = Cli::try_parse_from([
            "actionflow",
            "trigger",
            "onboard",
            "--entity-type",
            "customer",
            "--entity-id",
            "c-1",
            "--attr",
            "tier=gold",
            "--attr",
            "seats=5",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Trigger {
                workflow_id,
                entity_type,
                entity_id,
                attrs,
            } => {
                assert_eq!(workflow_id, "onboard");
                assert_eq!(entity_type.as_deref(), Some("customer"));
                assert_eq!(entity_id.as_deref(), Some("c-1"));
                assert_eq!(attrs.len(), 2);
            }
            _ => panic!("expected trigger"),
        }
    }

    #[test]
    fn test_executor_command_parses() {
        let cli = Cli::try_parse_from(["actionflow", "-vv", "executor", "webhook", "--workers", "4"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Executor {
                action_type,
                workers,
                durable,
            } => {
                assert_eq!(action_type, ActionType::Webhook);
                assert_eq!(workers, Some(4));
                assert!(durable.is_none());
            }
            _ => panic!("expected executor"),
        }
    }
}
