//! Lookup-driven operators: translate, arrayTranslate, perBitTranslation and convert.

use std::collections::BTreeMap;

use super::{parse_number, rows_table, set_cell, ComputeContext};
use crate::core::connector::{ConversionType, TranslationTableRef};
use crate::core::table::SourceTable;

const DEFAULT_KEY: &str = "default";

fn lookup<'t>(table: &'t BTreeMap<String, String>, value: &str) -> Option<&'t String> {
    table
        .get(&value.to_lowercase())
        .or_else(|| table.get(DEFAULT_KEY))
}

pub(super) fn translate(
    table: &SourceTable,
    column: usize,
    translation_table: &TranslationTableRef,
    ctx: &ComputeContext<'_>,
) -> SourceTable {
    let translations = match (column, ctx.translation_table(translation_table)) {
        (column, Some(translations)) if column > 0 => translations,
        _ => return table.clone(),
    };
    let index = column - 1;

    let rows = table
        .table
        .iter()
        .map(|row| {
            let mut row = row.clone();
            if let Some(translated) = row.get(index).and_then(|cell| lookup(&translations, cell)).cloned() {
                set_cell(&mut row, index, translated);
            }
            row
        })
        .collect();

    rows_table(rows)
}

pub(super) fn array_translate(
    table: &SourceTable,
    column: usize,
    translation_table: &TranslationTableRef,
    array_separator: &str,
    result_separator: &str,
    ctx: &ComputeContext<'_>,
) -> SourceTable {
    let translations = match (column, ctx.translation_table(translation_table)) {
        (column, Some(translations)) if column > 0 && !array_separator.is_empty() => translations,
        _ => return table.clone(),
    };
    let index = column - 1;

    let rows = table
        .table
        .iter()
        .map(|row| {
            let mut row = row.clone();
            if let Some(cell) = row.get(index) {
                let translated = cell
                    .split(array_separator)
                    .map(|element| {
                        lookup(&translations, element)
                            .cloned()
                            .unwrap_or_else(|| element.to_string())
                    })
                    .filter(|element| !element.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join(result_separator);
                row[index] = translated;
            }
            row
        })
        .collect();

    rows_table(rows)
}

pub(super) fn per_bit_translation(
    table: &SourceTable,
    column: usize,
    bit_list: &str,
    translation_table: &TranslationTableRef,
    ctx: &ComputeContext<'_>,
) -> SourceTable {
    let bits: Option<Vec<u32>> = bit_list
        .split(',')
        .map(|bit| bit.trim().parse::<u32>().ok().filter(|b| *b < 63))
        .collect();

    let (bits, translations) = match (column, bits, ctx.translation_table(translation_table)) {
        (column, Some(bits), Some(translations)) if column > 0 => (bits, translations),
        _ => {
            log::warn!(
                "Hostname {} - Invalid perBitTranslation on column {} with bits {:?}, table unchanged",
                ctx.hostname,
                column,
                bit_list
            );
            return table.clone();
        }
    };
    let index = column - 1;

    let rows = table
        .table
        .iter()
        .map(|row| {
            let mut row = row.clone();
            let value = row.get(index).and_then(|cell| parse_number(cell)).map(|v| v as i64);
            if let Some(value) = value {
                row[index] = bits
                    .iter()
                    .filter_map(|bit| {
                        let state = (value >> bit) & 1;
                        translations.get(&format!("{},{}", bit, state))
                    })
                    .filter(|t| !t.trim().is_empty())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" - ");
            }
            row
        })
        .collect();

    rows_table(rows)
}

/// Worst of ok/degraded/failed, `UNKNOWN` when none is present.
pub(crate) fn worst_status<'a, I: IntoIterator<Item = &'a str>>(values: I) -> &'static str {
    let mut status = "UNKNOWN";
    for value in values {
        let value = value.trim();
        if value.eq_ignore_ascii_case("failed") {
            return "failed";
        } else if value.eq_ignore_ascii_case("degraded") {
            status = "degraded";
        } else if value.eq_ignore_ascii_case("ok") && status == "UNKNOWN" {
            status = "ok";
        }
    }
    status
}

fn hex_to_decimal(value: &str) -> Option<String> {
    let cleaned: String = value
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    u64::from_str_radix(&cleaned, 16).ok().map(|v| v.to_string())
}

pub(super) fn convert(table: &SourceTable, column: usize, conversion: ConversionType) -> SourceTable {
    if column == 0 {
        return table.clone();
    }
    let index = column - 1;

    let rows = table
        .table
        .iter()
        .map(|row| {
            let mut row = row.clone();
            let converted = row.get(index).map(|cell| match conversion {
                ConversionType::Hex2Dec => hex_to_decimal(cell),
                ConversionType::Array2SimpleStatus => {
                    Some(worst_status(cell.split(|c: char| c == '|' || c == '\n')).to_string())
                }
            });
            match converted {
                Some(Some(value)) => row[index] = value,
                Some(None) => log::debug!("Could not convert {:?} with {:?}", row[index], conversion),
                None => {}
            }
            row
        })
        .collect();

    rows_table(rows)
}
