//! Per-entry source execution (`executeForEachEntryOf`) and the merge of the
//! per-entry results.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::connector::{EntryConcatMethod, Source};
use crate::core::table::{replace_column_references, SourceTable, TABLE_SEP};
use crate::error::Result;

const ATTRIBUTE_REF_PREFIX: &str = "${attribute::";

/// Apply `f` to every string inside a JSON value.
fn map_strings(value: &mut Value, f: &dyn Fn(&str) -> String) {
    match value {
        Value::String(s) => *s = f(s),
        Value::Array(items) => items.iter_mut().for_each(|v| map_strings(v, f)),
        Value::Object(map) => map.values_mut().for_each(|v| map_strings(v, f)),
        _ => {}
    }
}

/// Rebuild a source with every string field rewritten by `f`.
fn rewrite_source(source: &Source, f: &dyn Fn(&str) -> String) -> Result<Source> {
    let mut value = serde_json::to_value(source)?;
    map_strings(&mut value, f);
    let mut rewritten: Source = serde_json::from_value(value)?;
    rewritten.index = source.index;
    Ok(rewritten)
}

/// Copy of `source` for one entry: `$n` resolved against the row, computes
/// and the per-entry directive removed.
pub(crate) fn entry_source(source: &Source, row: &[String]) -> Result<Source> {
    let mut template = source.clone();
    template.computes.clear();
    template.execute_for_each_entry_of = None;
    rewrite_source(&template, &|s| replace_column_references(s, row))
}

/// Replace `${attribute::name}` with the monitor's attribute value.
pub(crate) fn replace_attribute_references(text: &str, attributes: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(ATTRIBUTE_REF_PREFIX) {
        let after = &rest[start + ATTRIBUTE_REF_PREFIX.len()..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&rest[..start]);
                let name = &after[..end];
                out.push_str(attributes.get(name).map(String::as_str).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Copy of `source` with attribute references resolved, or `None` when it
/// has none.
pub(crate) fn with_attributes(source: &Source, attributes: &BTreeMap<String, String>) -> Result<Option<Source>> {
    let json = serde_json::to_string(source)?;
    if !json.contains(ATTRIBUTE_REF_PREFIX) {
        return Ok(None);
    }
    rewrite_source(source, &|s| replace_attribute_references(s, attributes)).map(Some)
}

/// Merge per-entry results in entry order.
pub(crate) fn concat_results(results: Vec<(Vec<String>, SourceTable)>, method: &EntryConcatMethod) -> SourceTable {
    match method {
        EntryConcatMethod::List => {
            let mut rows = Vec::new();
            let mut raws = Vec::new();
            for (_, table) in results {
                if let Some(raw) = table.raw_data.filter(|r| !r.is_empty()) {
                    raws.push(raw);
                }
                rows.extend(table.table);
            }
            SourceTable {
                table: rows,
                raw_data: if raws.is_empty() { None } else { Some(raws.join("\n")) },
            }
        }
        EntryConcatMethod::JsonArray => {
            let items: Vec<String> = results
                .iter()
                .map(|(_, table)| table.text())
                .filter(|text| !text.trim().is_empty())
                .collect();
            SourceTable::from_raw(format!("[{}]", items.join(",\n")))
        }
        EntryConcatMethod::JsonArrayExtended => {
            let items: Vec<String> = results
                .iter()
                .map(|(row, table)| {
                    let entry = serde_json::to_string(&format!("{}{}", row.join(TABLE_SEP), TABLE_SEP))
                        .unwrap_or_else(|_| "\"\"".to_string());
                    let text = table.text();
                    let result = if text.trim().is_empty() { "null".to_string() } else { text };
                    format!("{{\"entry\": {}, \"result\": {}}}", entry, result)
                })
                .collect();
            SourceTable::from_raw(format!("[{}]", items.join(",\n")))
        }
        EntryConcatMethod::Custom {
            concat_start,
            concat_end,
        } => {
            let text: String = results
                .iter()
                .map(|(row, table)| {
                    format!(
                        "{}{}{}",
                        replace_column_references(concat_start, row),
                        table.text(),
                        replace_column_references(concat_end, row)
                    )
                })
                .collect();
            SourceTable::from_raw(text)
        }
    }
}
