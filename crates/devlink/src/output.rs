use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use devlink_exec::{BatchOutcome, TaskSpec};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct ReplyOutput<'a> {
    pub address: String,
    pub service: &'a str,
    pub method: &'a str,
    pub ack: bool,
    pub payload: Value,
}

pub fn print_reply(reply: &ReplyOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(reply),
        OutputFormat::Table => {
            let mut table = new_table(vec!["SERVICE", "METHOD", "ACK", "PAYLOAD"]);
            table.add_row(vec![
                reply.service.to_string(),
                reply.method.to_string(),
                reply.ack.to_string(),
                value_preview(&reply.payload),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{}.{} ack={} payload={}",
                reply.service,
                reply.method,
                reply.ack,
                value_preview(&reply.payload)
            );
        }
    }
}

#[derive(Serialize)]
struct LogLineOutput<'a> {
    address: &'a str,
    line: &'a str,
}

pub fn print_log_line(address: &str, line: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&LogLineOutput { address, line }),
        // Log lines stream; a table per line would be noise.
        OutputFormat::Table | OutputFormat::Pretty => println!("{line}"),
    }
}

#[derive(Serialize)]
struct TaskRow<'a> {
    index: usize,
    entry_point: &'a str,
    result: Value,
    error: Option<String>,
}

pub fn print_outcome(specs: &[TaskSpec], outcome: &BatchOutcome, format: OutputFormat) {
    let rows: Vec<TaskRow<'_>> = specs
        .iter()
        .zip(outcome.results.iter().zip(&outcome.errors))
        .enumerate()
        .map(|(index, (spec, (result, error)))| TaskRow {
            index,
            entry_point: &spec.entry_point,
            result: serde_json::to_value(result).unwrap_or(Value::Null),
            error: error.as_ref().map(ToString::to_string),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            let mut table = new_table(vec!["#", "TASK", "RESULT", "ERROR"]);
            for row in &rows {
                table.add_row(vec![
                    row.index.to_string(),
                    row.entry_point.to_string(),
                    value_preview(&row.result),
                    row.error.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                match &row.error {
                    None => println!(
                        "[{}] {} -> {}",
                        row.index,
                        row.entry_point,
                        value_preview(&row.result)
                    ),
                    Some(error) => println!("[{}] {} !! {error}", row.index, row.entry_point),
                }
            }
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Strings print bare, everything else as compact JSON.
fn value_preview(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn previews_strings_without_quotes() {
        assert_eq!(
            value_preview(&json!("< No result received >")),
            "< No result received >"
        );
        assert_eq!(value_preview(&json!({ "level": 10 })), r#"{"level":10}"#);
        assert_eq!(value_preview(&Value::Null), "null");
    }
}
