//! json2Csv: flatten JSON records into rows.

use serde_json::Value;

use super::ComputeContext;
use crate::core::table::{table_to_csv, SourceTable};
use crate::error::Result;

/// Text the document is read from: raw data, else the first cell.
pub(super) fn document_text(table: &SourceTable) -> Option<&str> {
    match table.raw_data.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(raw),
        _ => table
            .table
            .first()
            .and_then(|row| row.first())
            .map(String::as_str),
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Collect `(path, node)` pairs reached by the entry key, expanding arrays.
fn collect_entries<'v>(node: &'v Value, path: &[&str], prefix: String, out: &mut Vec<(String, &'v Value)>) {
    match (node, path.split_first()) {
        (Value::Array(items), _) => {
            for (i, item) in items.iter().enumerate() {
                collect_entries(item, path, format!("{}[{}]", prefix, i), out);
            }
        }
        (_, None) => out.push((if prefix.is_empty() { "/".to_string() } else { prefix }, node)),
        (Value::Object(map), Some((head, rest))) => {
            if let Some(child) = map.get(*head) {
                collect_entries(child, rest, format!("{}/{}", prefix, head), out);
            }
        }
        _ => {}
    }
}

fn property_value(entry: &Value, property: &str) -> String {
    let mut node = entry;
    for segment in segments(property) {
        match node {
            Value::Object(map) => match map.get(segment) {
                Some(child) => node = child,
                None => return String::new(),
            },
            _ => return String::new(),
        }
    }
    match node {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Flatten `json` into rows: entry path first, then each property.
pub fn json_to_csv(json: &str, entry_key: &str, properties: &str) -> Result<Vec<Vec<String>>> {
    let document: Value = serde_json::from_str(json)?;
    let properties: Vec<&str> = properties
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut entries = Vec::new();
    collect_entries(&document, &segments(entry_key), String::new(), &mut entries);

    Ok(entries
        .into_iter()
        .map(|(path, entry)| {
            std::iter::once(path)
                .chain(properties.iter().map(|p| property_value(entry, p)))
                .collect()
        })
        .collect())
}

pub(super) fn json2csv(
    table: &SourceTable,
    entry_key: &str,
    properties: &str,
    separator: &str,
    ctx: &ComputeContext<'_>,
) -> SourceTable {
    let text = match document_text(table) {
        Some(text) => text,
        None => return SourceTable::empty(),
    };

    match json_to_csv(text, entry_key, properties) {
        Ok(rows) => {
            let raw = table_to_csv(&rows, separator);
            SourceTable {
                table: rows,
                raw_data: Some(raw),
            }
        }
        Err(e) => {
            log::warn!(
                "Hostname {} - Unable to flatten JSON with entry key {}: {}",
                ctx.hostname,
                entry_key,
                e
            );
            SourceTable::empty()
        }
    }
}
