//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use lab_core::NotificationLevel;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table, or a warning when there is nothing to show
pub fn print_table<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_warning(empty_message);
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Render a lab notification the way the shell shows toasts
pub fn print_notification(level: NotificationLevel, title: &str, message: &str) {
    let text = format!("{title}: {message}");
    match level {
        NotificationLevel::Success => print_success(&text),
        NotificationLevel::Info => print_info(&text),
        NotificationLevel::Warning => print_warning(&text),
        NotificationLevel::Error => print_error(&text),
    }
}

/// Format milliseconds as seconds with one decimal
pub fn format_duration_ms(ms: Option<u64>) -> String {
    ms.map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
        .unwrap_or_else(|| "-".to_string())
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "queued" | "idle" | "pending" => status.dimmed().to_string(),
        "in_progress" | "deploying" | "investigating" => status.yellow().to_string(),
        "paused_canary" => status.blue().bold().to_string(),
        "success" | "completed" | "resolved" | "running" | "healthy" => status.green().to_string(),
        "failed" | "error" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color a canary comparison: green when better, red when worse
pub fn color_trend(label: &str, worse: bool) -> String {
    if worse {
        label.red().to_string()
    } else {
        label.green().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(Some(2500)), "2.5s");
        assert_eq!(format_duration_ms(None), "-");
    }

    #[test]
    fn test_color_status_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(color_status("paused_canary"), "paused_canary");
        assert_eq!(color_trend("Worse", true), "Worse");
    }
}
