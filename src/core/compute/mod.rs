//! Compute operators.
//!
//! Every operator is a pure function from a [`SourceTable`] to a new
//! [`SourceTable`]. Column references are 1-based. A reference past the end of
//! a row, or a cell that cannot be coerced, leaves that row as it was.

mod arithmetic;
mod awk;
mod filter;
mod json;
mod structure;
mod translate;
mod xml;

use std::collections::BTreeMap;

use crate::core::connector::{Compute, TranslationTableRef, TranslationTables};
use crate::core::extension::AwkExecutor;
use crate::core::table::{line_to_row, SourceNamespace, SourceTable, TABLE_SEP};
use crate::error::SentryError;

pub use arithmetic::ArithmeticOp;
pub use json::json_to_csv;
pub use xml::xml_to_rows;

/// Everything an operator may read besides its input table.
#[derive(Clone, Copy)]
pub struct ComputeContext<'a> {
    pub hostname: &'a str,
    pub translations: &'a TranslationTables,
    pub namespace: &'a SourceNamespace,
    pub awk: Option<&'a dyn AwkExecutor>,
}

impl<'a> ComputeContext<'a> {
    pub fn new(
        hostname: &'a str,
        translations: &'a TranslationTables,
        namespace: &'a SourceNamespace,
    ) -> Self {
        Self {
            hostname,
            translations,
            namespace,
            awk: None,
        }
    }

    pub fn with_awk(mut self, awk: Option<&'a dyn AwkExecutor>) -> Self {
        self.awk = awk;
        self
    }

    /// A row the operator leaves as it was. Logged, never fatal.
    pub(crate) fn malformed_row(&self, operator: &str, row: &[String]) -> SentryError {
        let error = SentryError::malformed_table_data(format!("{} skipped row {:?}", operator, row));
        log::debug!("Hostname {} - {}", self.hostname, error);
        error
    }

    /// Resolve a translation table reference, lower-casing the keys.
    pub(crate) fn translation_table(&self, table: &TranslationTableRef) -> Option<BTreeMap<String, String>> {
        let raw = match table {
            TranslationTableRef::Named(name) => match self.translations.get(name) {
                Some(found) => found,
                None => {
                    log::warn!(
                        "Hostname {} - Translation table {} not found in connector",
                        self.hostname,
                        name
                    );
                    return None;
                }
            },
            TranslationTableRef::Inline(inline) => inline,
        };

        Some(
            raw.iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
        )
    }
}

/// Apply one operator.
pub fn apply(compute: &Compute, table: &SourceTable, ctx: &ComputeContext<'_>) -> SourceTable {
    match compute {
        Compute::Add(p) => arithmetic::arithmetic(table, p, ArithmeticOp::Add, ctx),
        Compute::Subtract(p) => arithmetic::arithmetic(table, p, ArithmeticOp::Subtract, ctx),
        Compute::Multiply(p) => arithmetic::arithmetic(table, p, ArithmeticOp::Multiply, ctx),
        Compute::Divide(p) => arithmetic::arithmetic(table, p, ArithmeticOp::Divide, ctx),
        Compute::And(p) => arithmetic::bitwise(table, p, true, ctx),
        Compute::Or(p) => arithmetic::bitwise(table, p, false, ctx),
        Compute::Substring {
            column,
            start,
            length,
        } => structure::substring(table, *column, start, length),
        Compute::Translate {
            column,
            translation_table,
        } => translate::translate(table, *column, translation_table, ctx),
        Compute::ArrayTranslate {
            column,
            translation_table,
            array_separator,
            result_separator,
        } => translate::array_translate(
            table,
            *column,
            translation_table,
            array_separator.as_deref().unwrap_or("|"),
            result_separator.as_deref().unwrap_or("|"),
            ctx,
        ),
        Compute::KeepOnlyMatchingLines(p) => filter::matching_lines(table, p, true, ctx),
        Compute::ExcludeMatchingLines(p) => filter::matching_lines(table, p, false, ctx),
        Compute::DuplicateColumn { column } => structure::duplicate_column(table, *column),
        Compute::Append(p) => structure::concat(table, p, false, ctx),
        Compute::Prepend(p) => structure::concat(table, p, true, ctx),
        Compute::Replace {
            column,
            existing_value,
            new_value,
        } => structure::replace(table, *column, existing_value, new_value),
        Compute::Extract {
            column,
            sub_column,
            sub_separators,
        } => structure::extract(table, *column, *sub_column, sub_separators),
        Compute::ExtractPropertyFromWbemPath { column, property } => {
            structure::extract_property_from_wbem_path(table, *column, property)
        }
        Compute::KeepColumns { column_numbers } => structure::keep_columns(table, column_numbers, ctx),
        Compute::Convert { column, conversion } => translate::convert(table, *column, *conversion),
        Compute::PerBitTranslation {
            column,
            bit_list,
            translation_table,
        } => translate::per_bit_translation(table, *column, bit_list, translation_table, ctx),
        Compute::Json2Csv {
            entry_key,
            properties,
            separator,
        } => json::json2csv(
            table,
            entry_key,
            properties.as_deref().unwrap_or(""),
            separator.as_deref().unwrap_or(TABLE_SEP),
            ctx,
        ),
        Compute::Xml2Csv {
            record_tag,
            properties,
        } => xml::xml2csv(table, record_tag, properties, ctx),
        Compute::Awk(p) => awk::awk(table, p, ctx),
    }
}

/// Fold a table through a compute chain in declared order.
pub fn apply_all(computes: &[Compute], table: SourceTable, ctx: &ComputeContext<'_>) -> SourceTable {
    computes.iter().fold(table, |current, compute| {
        let next = apply(compute, &current, ctx);
        log::trace!(
            "Hostname {} - Compute {} produced {} rows",
            ctx.hostname,
            compute.name(),
            next.len()
        );
        next
    })
}

/// Rows-only result: raw text no longer matches once rows changed.
pub(crate) fn rows_table(rows: Vec<Vec<String>>) -> SourceTable {
    SourceTable {
        table: rows,
        raw_data: None,
    }
}

/// Parse a numeric cell; NaN and infinities are not numbers here.
pub(crate) fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Render a double the way connector output expects (`2.0`, `0.5`).
pub(crate) fn format_double(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Set a cell, re-splitting the row when the new value carries separators.
pub(crate) fn set_cell(row: &mut Vec<String>, index: usize, value: String) {
    if value.contains(TABLE_SEP) {
        let parts = line_to_row(&value, TABLE_SEP);
        row.splice(index..=index, parts);
    } else {
        row[index] = value;
    }
}

/// Column reference or literal operand, resolved per row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Column(usize),
    Literal(String),
}

impl Operand {
    pub(crate) fn parse(value: &str) -> Self {
        match crate::core::table::parse_column(value) {
            Some(column) => Operand::Column(column),
            None => Operand::Literal(value.to_string()),
        }
    }

    pub(crate) fn resolve<'r>(&'r self, row: &'r [String]) -> Option<&'r str> {
        match self {
            Operand::Column(column) => row.get(column - 1).map(String::as_str),
            Operand::Literal(value) => Some(value.as_str()),
        }
    }
}
