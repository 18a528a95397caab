//! Terminal output: tables for people, JSON for scripts.
//!
//! JSON goes out as `{"schemaVersion": "roster.cli.v1", "data": ...}` with
//! object keys in sorted order so diffs between runs stay small.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

const JSON_SCHEMA: &str = "roster.cli.v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Serialize)]
struct Envelope<'a, T: ?Sized> {
    #[serde(rename = "schemaVersion")]
    schema: &'static str,
    data: &'a T,
}

/// Print a list of rows as a table, or as a JSON array.
pub fn print_output<T: Serialize + Tabled>(rows: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table if rows.is_empty() => println!("{}", "Nothing to show.".dimmed()),
        OutputFormat::Table => println!("{}", Table::new(rows)),
        OutputFormat::Json => println!("{}", to_json(rows)),
    }
}

/// Print one document as JSON. Used for reports and `--format json` views
/// that don't fit a single table.
pub fn print_single<T: Serialize>(value: &T) {
    println!("{}", to_json(value));
}

pub fn print_success(message: &str) {
    println!("{} {message}", "Done:".green().bold());
}

pub fn print_info(message: &str) {
    println!("{} {message}", "Note:".blue().bold());
}

/// Warnings go to stderr so JSON on stdout stays parseable.
pub fn print_warning(message: &str) {
    eprintln!("{} {message}", "Warning:".yellow().bold());
}

/// Table cell for an optional value; `-` when absent.
pub fn display_option<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string)
}

fn to_json<T: Serialize + ?Sized>(data: &T) -> String {
    // Going through `Value` sorts object keys (serde_json's default map).
    serde_json::to_value(Envelope {
        schema: JSON_SCHEMA,
        data,
    })
    .and_then(|value| serde_json::to_string_pretty(&value))
    .unwrap_or_else(|err| format!(r#"{{"error": "{err}"}}"#))
}
