//! awk: the script runs in an external executor; line filtering and column
//! selection of its output happen here.

use regex::{Regex, RegexBuilder};

use super::{rows_table, ComputeContext};
use crate::core::connector::AwkCompute;
use crate::core::table::{SourceTable, TABLE_SEP};

fn build_regex(pattern: Option<&str>, ctx: &ComputeContext<'_>) -> Option<Regex> {
    let pattern = pattern.filter(|p| !p.is_empty())?;
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            log::warn!(
                "Hostname {} - Ignoring invalid awk line filter {:?}: {}",
                ctx.hostname,
                pattern,
                e
            );
            None
        }
    }
}

/// Parse `1,3,5-7` into 1-based column numbers.
pub(crate) fn parse_select_columns(spec: &str) -> Option<Vec<usize>> {
    let mut columns = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((from, to)) => {
                let from = from.trim().parse::<usize>().ok().filter(|n| *n > 0)?;
                let to = to.trim().parse::<usize>().ok().filter(|n| *n >= from)?;
                columns.extend(from..=to);
            }
            None => columns.push(part.parse::<usize>().ok().filter(|n| *n > 0)?),
        }
    }
    Some(columns)
}

/// Split output lines into rows after keep/exclude filtering.
pub(crate) fn lines_to_rows(
    output: &str,
    keep: Option<&Regex>,
    exclude: Option<&Regex>,
    separators: Option<&str>,
    select_columns: Option<&[usize]>,
) -> Vec<Vec<String>> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .filter(|line| keep.map_or(true, |r| r.is_match(line)))
        .filter(|line| !exclude.map_or(false, |r| r.is_match(line)))
        .map(|line| {
            let cells: Vec<String> = match separators.filter(|s| !s.is_empty()) {
                Some(seps) => line
                    .split(|c: char| seps.contains(c))
                    .map(str::to_string)
                    .collect(),
                None => crate::core::table::line_to_row(line, TABLE_SEP),
            };
            match select_columns {
                Some(columns) if !columns.is_empty() => columns
                    .iter()
                    .map(|c| cells.get(c - 1).cloned().unwrap_or_default())
                    .collect(),
                _ => cells,
            }
        })
        .collect()
}

pub(super) fn awk(table: &SourceTable, params: &AwkCompute, ctx: &ComputeContext<'_>) -> SourceTable {
    let executor = match ctx.awk {
        Some(executor) => executor,
        None => {
            log::warn!(
                "Hostname {} - No awk executor registered, awk compute yields an empty table",
                ctx.hostname
            );
            return SourceTable::empty();
        }
    };

    let input = table.text();
    let output = match executor.execute(&params.script, &input) {
        Ok(output) => output,
        Err(e) => {
            log::warn!("Hostname {} - Awk script execution failed: {}", ctx.hostname, e);
            return SourceTable::empty();
        }
    };

    if output.trim().is_empty() {
        return SourceTable::empty();
    }

    let keep = build_regex(params.keep.as_deref(), ctx);
    let exclude = build_regex(params.exclude.as_deref(), ctx);
    let select = params
        .select_columns
        .as_deref()
        .and_then(parse_select_columns);

    let rows = lines_to_rows(
        &output,
        keep.as_ref(),
        exclude.as_ref(),
        params.separators.as_deref(),
        select.as_deref(),
    );

    let mut result = rows_table(rows);
    result.raw_data = Some(output);
    result
}
