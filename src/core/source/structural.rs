//! Sources executed by the engine itself: copy, static, tableUnion, tableJoin.

use std::collections::HashMap;

use crate::core::connector::source::TableJoinSource;
use crate::core::connector::SourceKind;
use crate::core::table::{line_to_row, SourceNamespace, SourceTable, TABLE_SEP};

fn resolve(value: &str, namespace: &SourceNamespace, hostname: &str) -> Option<SourceTable> {
    let table = SourceTable::lookup(value, namespace);
    if table.is_none() {
        log::debug!("Hostname {} - Table {} is not available yet", hostname, value);
    }
    table
}

/// Execute a structural kind. Returns `None` for protocol kinds.
pub(crate) fn execute(kind: &SourceKind, namespace: &SourceNamespace, hostname: &str) -> Option<SourceTable> {
    let table = match kind {
        SourceKind::Copy(copy) => resolve(&copy.from, namespace, hostname).unwrap_or_default(),
        SourceKind::Static(value) => resolve(&value.value, namespace, hostname).unwrap_or_default(),
        SourceKind::TableUnion(union) => table_union(&union.tables, namespace, hostname),
        SourceKind::TableJoin(join) => table_join(join, namespace, hostname),
        _ => return None,
    };
    Some(table)
}

pub(crate) fn table_union(tables: &[String], namespace: &SourceNamespace, hostname: &str) -> SourceTable {
    let mut rows = Vec::new();
    let mut raws = Vec::new();

    for table in tables.iter().filter_map(|t| resolve(t, namespace, hostname)) {
        if let Some(raw) = table.raw_data.as_deref().filter(|r| !r.is_empty()) {
            raws.push(raw.to_string());
        }
        rows.extend(table.table);
    }

    SourceTable {
        table: rows,
        raw_data: if raws.is_empty() { None } else { Some(raws.join("\n")) },
    }
}

fn join_key(value: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}

pub(crate) fn table_join(join: &TableJoinSource, namespace: &SourceNamespace, hostname: &str) -> SourceTable {
    let (left, right) = match (
        resolve(&join.left_table, namespace, hostname),
        resolve(&join.right_table, namespace, hostname),
    ) {
        (Some(left), Some(right)) => (left, right),
        _ => return SourceTable::empty(),
    };

    if join.left_key_column == 0 || join.right_key_column == 0 {
        log::warn!(
            "Hostname {} - tableJoin key columns are 1-based, got {} and {}",
            hostname,
            join.left_key_column,
            join.right_key_column
        );
        return SourceTable::empty();
    }

    let wbem = join
        .key_type
        .as_deref()
        .map_or(false, |k| k.eq_ignore_ascii_case("wbem"));

    let mut index: HashMap<String, Vec<&Vec<String>>> = HashMap::new();
    for row in &right.table {
        if let Some(key) = row.get(join.right_key_column - 1) {
            index.entry(join_key(key, wbem)).or_default().push(row);
        }
    }

    let default_right = join
        .default_right_line
        .as_deref()
        .map(|line| line_to_row(line, TABLE_SEP));

    let mut rows = Vec::new();
    for left_row in &left.table {
        let key = match left_row.get(join.left_key_column - 1) {
            Some(key) => join_key(key, wbem),
            None => continue,
        };

        match index.get(&key) {
            Some(matches) => {
                for right_row in matches {
                    let mut row = left_row.clone();
                    row.extend(right_row.iter().cloned());
                    rows.push(row);
                }
            }
            None => {
                if let Some(default) = &default_right {
                    let mut row = left_row.clone();
                    row.extend(default.iter().cloned());
                    rows.push(row);
                }
            }
        }
    }

    SourceTable::from_rows(rows)
}
