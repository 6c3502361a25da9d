//! String and column-shape operators. None of these coerce numbers except
//! for substring bounds.

use super::{rows_table, set_cell, ComputeContext, Operand};
use crate::core::connector::Concat;
use crate::core::table::{has_column_reference, replace_column_references, source_reference_key, SourceTable};

fn map_rows<F>(table: &SourceTable, mut f: F) -> SourceTable
where
    F: FnMut(&mut Vec<String>),
{
    let rows = table
        .table
        .iter()
        .map(|row| {
            let mut row = row.clone();
            f(&mut row);
            row
        })
        .collect();
    rows_table(rows)
}

fn parse_bound(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

/// Characters `[start, start + length)` of a cell, 1-based and clamped.
pub(crate) fn substring_of(cell: &str, start: i64, length: i64) -> String {
    if length <= 0 {
        return String::new();
    }
    let begin = (start.max(1) - 1) as usize;
    cell.chars().skip(begin).take(length as usize).collect()
}

pub(super) fn substring(table: &SourceTable, column: usize, start: &str, length: &str) -> SourceTable {
    if column == 0 {
        return table.clone();
    }
    let start = Operand::parse(start);
    let length = Operand::parse(length);
    let index = column - 1;

    map_rows(table, |row| {
        let bounds = start
            .resolve(row)
            .and_then(parse_bound)
            .zip(length.resolve(row).and_then(parse_bound));
        if let (Some(cell), Some((start, length))) = (row.get(index), bounds) {
            let value = substring_of(cell, start, length);
            row[index] = value;
        }
    })
}

pub(super) fn duplicate_column(table: &SourceTable, column: usize) -> SourceTable {
    if column == 0 {
        return table.clone();
    }
    let index = column - 1;
    map_rows(table, |row| {
        if let Some(cell) = row.get(index).cloned() {
            row.insert(index, cell);
        }
    })
}

/// Value to concatenate for this row: a column, the first cell of a
/// `${source::key}` table, or a literal with embedded `$n` references resolved.
fn concat_value(value: &str, row: &[String], ctx: &ComputeContext<'_>) -> Option<String> {
    if let Some(key) = source_reference_key(value) {
        return ctx
            .namespace
            .get(key)
            .and_then(|t| t.table.first())
            .and_then(|r| r.first())
            .cloned();
    }
    match Operand::parse(value) {
        Operand::Column(column) => row.get(column - 1).cloned(),
        Operand::Literal(literal) if has_column_reference(&literal) || literal.contains("$$") => {
            Some(replace_column_references(&literal, row))
        }
        Operand::Literal(literal) => Some(literal),
    }
}

pub(super) fn concat(table: &SourceTable, params: &Concat, prepend: bool, ctx: &ComputeContext<'_>) -> SourceTable {
    if params.column == 0 {
        return table.clone();
    }
    let index = params.column - 1;

    map_rows(table, |row| {
        let value = match concat_value(&params.value, row, ctx) {
            Some(value) => value,
            None => return,
        };
        if index < row.len() {
            let joined = if prepend {
                format!("{}{}", value, row[index])
            } else {
                format!("{}{}", row[index], value)
            };
            set_cell(row, index, joined);
        } else if index == row.len() {
            row.push(String::new());
            set_cell(row, index, value);
        }
    })
}

pub(super) fn replace(table: &SourceTable, column: usize, existing: &str, new_value: &str) -> SourceTable {
    if column == 0 {
        return table.clone();
    }
    let existing = Operand::parse(existing);
    let new_value = Operand::parse(new_value);
    let index = column - 1;

    map_rows(table, |row| {
        let (from, to) = match (existing.resolve(row), new_value.resolve(row)) {
            (Some(from), Some(to)) if !from.is_empty() => (from.to_string(), to.to_string()),
            _ => return,
        };
        if let Some(cell) = row.get(index) {
            let replaced = cell.replace(&from, &to);
            set_cell(row, index, replaced);
        }
    })
}

pub(super) fn extract(table: &SourceTable, column: usize, sub_column: usize, separators: &str) -> SourceTable {
    if column == 0 || sub_column == 0 || separators.is_empty() {
        return table.clone();
    }
    let index = column - 1;

    map_rows(table, |row| {
        if let Some(cell) = row.get(index) {
            let value = cell
                .split(|c: char| separators.contains(c))
                .filter(|part| !part.is_empty())
                .nth(sub_column - 1)
                .unwrap_or("")
                .to_string();
            row[index] = value;
        }
    })
}

/// Value of `property` in a WBEM object path such as
/// `root/cimv2:CIM_Disk.DeviceID="disk0",SystemName="srv"`.
pub(crate) fn wbem_path_property(path: &str, property: &str) -> Option<String> {
    let property = property.to_lowercase();
    let suffix = format!(".{}", property);

    path.split(',').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?.trim().to_lowercase();
        let value = parts.next()?;
        if key == property || key.ends_with(&suffix) {
            Some(value.trim().trim_matches('"').trim().to_string())
        } else {
            None
        }
    })
}

pub(super) fn extract_property_from_wbem_path(table: &SourceTable, column: usize, property: &str) -> SourceTable {
    if column == 0 || property.is_empty() {
        return table.clone();
    }
    let index = column - 1;

    map_rows(table, |row| {
        if let Some(value) = row.get(index).and_then(|cell| wbem_path_property(cell, property)) {
            row[index] = value;
        }
    })
}

pub(super) fn keep_columns(table: &SourceTable, column_numbers: &str, ctx: &ComputeContext<'_>) -> SourceTable {
    let parsed: Option<Vec<usize>> = column_numbers
        .split(',')
        .map(|n| n.trim().parse::<usize>().ok().filter(|n| *n > 0))
        .collect();

    let mut columns = match parsed {
        Some(columns) if !columns.is_empty() => columns,
        _ => {
            log::warn!(
                "Hostname {} - Invalid keepColumns list {:?}, table unchanged",
                ctx.hostname,
                column_numbers
            );
            return table.clone();
        }
    };
    columns.sort_unstable();
    columns.dedup();

    let width = columns.last().copied().unwrap_or(0);
    let rows = table
        .table
        .iter()
        .filter(|row| row.len() >= width)
        .map(|row| columns.iter().map(|c| row[c - 1].clone()).collect())
        .collect();

    rows_table(rows)
}
