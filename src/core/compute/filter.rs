//! Row filters: keepOnlyMatchingLines / excludeMatchingLines.

use regex::RegexBuilder;
use std::collections::HashSet;

use super::{rows_table, ComputeContext};
use crate::core::connector::MatchingLines;
use crate::core::table::{SourceTable, TABLE_SEP};

/// Keep rows whose column matches the regex and the value list, or drop rows
/// whose column matches either of them.
///
/// Without a column the whole row, joined by `;`, is tested. A row too narrow
/// for the column cannot match.
pub(super) fn matching_lines(
    table: &SourceTable,
    params: &MatchingLines,
    keep: bool,
    ctx: &ComputeContext<'_>,
) -> SourceTable {
    let regex = match params.reg_exp.as_deref().filter(|r| !r.is_empty()) {
        Some(pattern) => match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => Some(regex),
            Err(e) => {
                log::warn!(
                    "Hostname {} - Invalid regular expression {:?}: {}. Table unchanged",
                    ctx.hostname,
                    pattern,
                    e
                );
                return table.clone();
            }
        },
        None => None,
    };

    let values: Option<HashSet<String>> = params
        .value_list
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|list| list.split(',').map(|v| v.trim().to_lowercase()).collect());

    if regex.is_none() && values.is_none() {
        return table.clone();
    }
    if params.column == Some(0) {
        log::warn!("Hostname {} - Matching lines on column 0, table unchanged", ctx.hostname);
        return table.clone();
    }

    let rows = table
        .table
        .iter()
        .filter(|row| {
            let subject = match params.column {
                Some(column) => row.get(column - 1).cloned(),
                None => Some(row.join(TABLE_SEP)),
            };
            let subject = match subject {
                Some(subject) => subject,
                None => return !keep,
            };
            let regex_hit = regex.as_ref().map(|r| r.is_match(&subject));
            let value_hit = values.as_ref().map(|set| set.contains(&subject.to_lowercase()));
            if keep {
                regex_hit.unwrap_or(true) && value_hit.unwrap_or(true)
            } else {
                !(regex_hit.unwrap_or(false) || value_hit.unwrap_or(false))
            }
        })
        .cloned()
        .collect();

    rows_table(rows)
}
