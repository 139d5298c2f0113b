//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use pipeline_lib::registry::SlotStatus;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse a format name from the config file
    pub fn from_config(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Print a rounded table, or a notice when there is nothing to show
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

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a model slot state
pub fn color_slot(status: &SlotStatus) -> String {
    match status {
        SlotStatus::Loaded { .. } => "loaded".green().to_string(),
        SlotStatus::NotConfigured => "not configured".yellow().to_string(),
        SlotStatus::Failed { .. } => "failed".red().to_string(),
    }
}

/// Color an anomaly label: -1 outlier, 1 inlier
pub fn color_anomaly(label: &str) -> String {
    match label {
        "-1" => "outlier".red().to_string(),
        "1" => "inlier".green().to_string(),
        other => other.to_string(),
    }
}

/// Format a scaled prediction
pub fn format_scaled(value: f64) -> String {
    format!("{:.4}", value)
}

/// Format an RFC 3339 timestamp for display
pub fn format_timestamp(ts: &str) -> String {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(ts) {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        ts.to_string()
    }
}

/// Shorten a checksum for display
pub fn short_checksum(checksum: &str) -> String {
    if checksum.len() > 12 {
        format!("{}...", &checksum[..12])
    } else {
        checksum.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_config() {
        assert_eq!(OutputFormat::from_config("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_config("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_config("yaml"), None);
    }

    #[test]
    fn test_short_checksum() {
        assert_eq!(short_checksum("abc"), "abc");
        assert_eq!(
            short_checksum("ba7816bf8f01cfea414140de5dae2223"),
            "ba7816bf8f01..."
        );
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp("2024-05-01T08:30:00+00:00"), "2024-05-01 08:30:00");
        assert_eq!(format_timestamp("yesterday"), "yesterday");
    }

    #[test]
    fn test_format_scaled() {
        assert_eq!(format_scaled(0.9), "0.9000");
    }
}
