use serde_json::Value;

use super::{format_scalar, result_of, row_sections};

/// Identifier fields, in order of priority.
const KEY_FIELDS: [&str; 5] = [
    "COLLECTING_COUNTRY_CODE",
    "parent_code",
    "code",
    "name",
    "PARENT_COUNTRY_CODE",
];

/// Amount fields, in order of priority.
const AMOUNT_FIELDS: [&str; 6] = [
    "TAX_DEFICIT_total",
    "ALLOCATED_TAX_DEFICIT",
    "tax_deficit",
    "total",
    "max_difference",
    "change_pct",
];

/// Print one `key: amount` line per row of the first row section.
pub fn print_minimal(value: &Value) {
    let result = result_of(value);
    if let Some((_, rows)) = row_sections(result).first() {
        for row in rows.iter() {
            println!("{}", minimal_line(row));
        }
        return;
    }

    match result {
        Value::Object(map) => {
            if let Some((key, val)) = map.iter().next() {
                println!("{}: {}", key, format_scalar(val));
            }
        }
        other => println!("{}", format_scalar(other)),
    }
}

fn minimal_line(row: &Value) -> String {
    let Value::Object(map) = row else {
        return format_scalar(row);
    };
    let key = KEY_FIELDS.iter().find_map(|k| map.get(*k));
    let amount = AMOUNT_FIELDS
        .iter()
        .find_map(|k| map.get(*k).filter(|v| !v.is_null()));
    match (key, amount) {
        (Some(k), Some(a)) => format!("{}: {}", format_scalar(k), format_scalar(a)),
        (Some(k), None) => format_scalar(k),
        (None, Some(a)) => format_scalar(a),
        (None, None) => serde_json::to_string(row).unwrap_or_default(),
    }
}
