//! `actionflow trigger`: dispatch one workflow from the command line.

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use actionflow_core::orchestrator::DispatchReport;
use actionflow_infra::config::LoadedConfig;
use actionflow_types::attribute::{AttributeMap, AttributeValue};
use actionflow_types::workflow::TriggerPayload;

use crate::state::ServerState;

pub async fn trigger(
    loaded: &LoadedConfig,
    workflow_id: &str,
    entity_type: Option<String>,
    entity_id: Option<String>,
    attrs: Vec<(String, AttributeValue)>,
    json: bool,
) -> Result<()> {
    let state = ServerState::init(loaded).await?;
    let payload = TriggerPayload {
        entity_type,
        entity_id,
        attributes: attrs.into_iter().collect::<AttributeMap>(),
    };

    let report = state
        .orchestrator
        .trigger_workflow(workflow_id, payload)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_success() {
        bail!(
            "{} of {} steps failed",
            report.failures.len(),
            report.failures.len() + report.published.len()
        );
    }
    Ok(())
}

fn print_report(report: &DispatchReport) {
    println!();
    println!(
        "  {} Workflow {} (trigger {})",
        style("▶").bold(),
        style(&report.workflow_id).cyan(),
        style(report.trigger_id).dim()
    );
    println!();

    if report.published.is_empty() && report.failures.is_empty() {
        println!("  {} Workflow has no steps.", style("i").blue().bold());
        println!();
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Step").fg(Color::White),
        Cell::new("Template").fg(Color::White),
        Cell::new("Result").fg(Color::White),
        Cell::new("Detail").fg(Color::White),
    ]);

    let mut rows: Vec<(usize, Vec<Cell>)> = Vec::new();
    for step in &report.published {
        rows.push((
            step.step_index,
            vec![
                Cell::new(step.step_index),
                Cell::new(&step.action_template_id).fg(Color::Cyan),
                Cell::new("● published").fg(Color::Green),
                Cell::new(format!("{} seq {} task {}", step.subject, step.stream_seq, step.task_id))
                    .fg(Color::DarkGrey),
            ],
        ));
    }
    for failure in &report.failures {
        let result = if failure.is_retryable() {
            Cell::new("○ retryable").fg(Color::Yellow)
        } else {
            Cell::new("✗ failed").fg(Color::Red)
        };
        let detail = failure.to_string();
        let detail = detail
            .split_once(": ")
            .map(|(_, reason)| reason.to_string())
            .unwrap_or(detail);
        rows.push((
            failure.step_index,
            vec![
                Cell::new(failure.step_index),
                Cell::new(&failure.action_template_id).fg(Color::Cyan),
                result,
                Cell::new(detail),
            ],
        ));
    }
    rows.sort_by_key(|(index, _)| *index);
    for (_, row) in rows {
        table.add_row(row);
    }

    println!("{table}");
    println!();
    println!(
        "  {} published, {} failed",
        style(report.published.len()).green().bold(),
        style(report.failures.len()).red().bold()
    );
    println!();
}
