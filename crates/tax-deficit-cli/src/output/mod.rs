pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::Value;

/// Fields that hold the row-per-entity part of a result.
const ROW_KEYS: [&str; 5] = ["rows", "records", "entries", "countries", "checks"];

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// The `result` of an output envelope, or the value itself.
fn result_of(value: &Value) -> &Value {
    value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value)
}

/// Row sections of a result, looking one level into nested objects
/// (the reconcile output nests its totals and report).
fn row_sections(result: &Value) -> Vec<(String, &[Value])> {
    match result {
        Value::Array(arr) => vec![("result".to_string(), arr.as_slice())],
        Value::Object(map) => {
            let mut sections = Vec::new();
            for (key, val) in map {
                match val {
                    Value::Array(arr) if ROW_KEYS.contains(&key.as_str()) => {
                        sections.push((key.clone(), arr.as_slice()));
                    }
                    Value::Object(inner) => {
                        for (k, v) in inner {
                            if let Value::Array(arr) = v {
                                if ROW_KEYS.contains(&k.as_str()) {
                                    sections.push((format!("{key}.{k}"), arr.as_slice()));
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            sections
        }
        _ => Vec::new(),
    }
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
