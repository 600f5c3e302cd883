use anyhow::Result;
use colored::Colorize;
use octofhir_bundle::{ResponseBundle, ResponseEntry};
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_value(value: &Value, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Table => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            println!("{}", format_yaml(value, 0));
        }
    }
    Ok(())
}

/// Prints a response bundle; the table format lists one row per entry.
pub fn print_response(response: &ResponseBundle, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            print_entry_table(&response.entry);
            Ok(())
        }
        _ => print_value(&response.to_value(), format),
    }
}

/// Status lines go to stderr so stdout stays a clean document.
pub fn print_success(msg: &str) {
    eprintln!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

fn print_entry_table(entries: &[ResponseEntry]) {
    if entries.is_empty() {
        println!("No entries.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["#", "Status", "Location", "ETag", "Details"]);
    for (index, entry) in entries.iter().enumerate() {
        let status = entry.response.status.as_deref().unwrap_or("-");
        let location = entry.response.location.as_deref().unwrap_or("-");
        let etag = entry.response.etag.as_deref().unwrap_or("-");
        builder.push_record([
            index.to_string(),
            status.to_string(),
            location.to_string(),
            etag.to_string(),
            details(entry),
        ]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}

/// Short description of an entry body: the first outcome diagnostic, the
/// size of a result bundle, or the resource reference.
fn details(entry: &ResponseEntry) -> String {
    let Some(body) = entry.resource.as_ref() else {
        return "-".to_string();
    };
    match body.get("resourceType").and_then(Value::as_str) {
        Some("OperationOutcome") => body
            .pointer("/issue/0/diagnostics")
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string(),
        Some("Bundle") => {
            let kind = body.get("type").and_then(Value::as_str).unwrap_or("bundle");
            let total = body.get("total").and_then(Value::as_u64).unwrap_or(0);
            format!("{kind}, total {total}")
        }
        Some(rt) => {
            let id = body.get("id").and_then(Value::as_str).unwrap_or("-");
            format!("{rt}/{id}")
        }
        None => "-".to_string(),
    }
}

fn format_yaml(value: &Value, indent: usize) -> String {
    let prefix = " ".repeat(indent);
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if s.contains('\n') || s.contains(':') || s.contains('#') {
                format!(
                    "|\n{}{}",
                    " ".repeat(indent + 2),
                    s.replace('\n', &format!("\n{}", " ".repeat(indent + 2)))
                )
            } else {
                format!("\"{s}\"")
            }
        }
        Value::Array(arr) => {
            if arr.is_empty() {
                return "[]".to_string();
            }
            let items: Vec<String> = arr
                .iter()
                .map(|v| format!("{prefix}- {}", format_yaml(v, indent + 2).trim_start()))
                .collect();
            format!("\n{}", items.join("\n"))
        }
        Value::Object(obj) => {
            if obj.is_empty() {
                return "{}".to_string();
            }
            let items: Vec<String> = obj
                .iter()
                .map(|(k, v)| {
                    let val = format_yaml(v, indent + 2);
                    if val.starts_with('\n') {
                        format!("{prefix}{k}:{val}")
                    } else {
                        format!("{prefix}{k}: {val}")
                    }
                })
                .collect();
            if indent == 0 {
                items.join("\n")
            } else {
                format!("\n{}", items.join("\n"))
            }
        }
    }
}
