//! `actionflow stream`: inspect the durable stream.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use actionflow_core::channel::{DeadLetter, MessageChannel, StreamInfo};
use actionflow_infra::config::LoadedConfig;

use crate::state::open_stream;

/// Longest payload excerpt shown in the dead-letter table.
const PAYLOAD_PREVIEW_CHARS: usize = 60;

pub async fn info(loaded: &LoadedConfig, json: bool) -> Result<()> {
    let stream = open_stream(loaded).await?;
    let info = stream.stream_info().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    print_info(&info, &loaded.stream_database_path().display().to_string());
    Ok(())
}

pub async fn dead_letters(loaded: &LoadedConfig, durable: &str, json: bool) -> Result<()> {
    let stream = open_stream(loaded).await?;
    let letters = stream.dead_letters(durable).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&letters)?);
        return Ok(());
    }

    if letters.is_empty() {
        println!();
        println!(
            "  {} No dead letters for {}.",
            style("i").blue().bold(),
            style(durable).cyan()
        );
        println!();
        return Ok(());
    }

    print_dead_letters(&letters);
    Ok(())
}

fn print_info(info: &StreamInfo, location: &str) {
    println!();
    println!("  {} Stream {}", style("⚡").bold(), style(location).dim());
    println!();
    println!("  {}", style("── Messages ──").dim());
    println!("  Subjects: {}", info.subjects.join(", "));
    println!("  Count:    {}", style(info.messages).bold());
    println!("  Bytes:    {}", info.bytes);
    match (info.first_seq, info.last_seq) {
        (Some(first), Some(last)) => println!("  Seq:      {first}..={last}"),
        _ => println!("  Seq:      {}", style("empty").dim()),
    }
    println!();

    if info.consumers.is_empty() {
        println!(
            "  {} No consumers yet. Start one with: {}",
            style("i").blue().bold(),
            style("actionflow executor <action_type>").yellow()
        );
        println!();
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Durable").fg(Color::White),
        Cell::new("Filter").fg(Color::White),
        Cell::new("Pending").fg(Color::White),
        Cell::new("In Flight").fg(Color::White),
        Cell::new("Dead Letters").fg(Color::White),
    ]);
    for consumer in &info.consumers {
        let dead = if consumer.dead_letters > 0 {
            Cell::new(consumer.dead_letters).fg(Color::Red)
        } else {
            Cell::new(consumer.dead_letters).fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&consumer.durable).fg(Color::Cyan),
            Cell::new(&consumer.filter),
            Cell::new(consumer.pending),
            Cell::new(consumer.in_flight),
            dead,
        ]);
    }
    println!("{table}");
    println!();
}

fn print_dead_letters(letters: &[DeadLetter]) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Seq").fg(Color::White),
        Cell::new("Subject").fg(Color::White),
        Cell::new("Attempts").fg(Color::White),
        Cell::new("Reason").fg(Color::White),
        Cell::new("Dead At").fg(Color::White),
        Cell::new("Payload").fg(Color::White),
    ]);
    for letter in letters {
        table.add_row(vec![
            Cell::new(letter.seq),
            Cell::new(&letter.subject).fg(Color::Cyan),
            Cell::new(letter.attempts),
            Cell::new(&letter.reason).fg(Color::Yellow),
            Cell::new(letter.dead_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(preview(&letter.payload)).fg(Color::DarkGrey),
        ]);
    }
    println!();
    println!("{table}");
    println!();
}

fn preview(payload: &str) -> String {
    if payload.chars().count() > PAYLOAD_PREVIEW_CHARS {
        let cut: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        payload.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(80);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PAYLOAD_PREVIEW_CHARS);
    }
}
