//! Tabular data flowing between sources, computes and mappings.
//!
//! A [`SourceTable`] is an ordered list of rows of string cells, optionally
//! paired with the raw text a probe returned. Tables are values: every
//! operator takes a shared reference and builds a new table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default cell separator used by the connector language.
pub const TABLE_SEP: &str = ";";

const SOURCE_REF_PREFIX: &str = "${source::";

/// Source tables produced during a run, keyed by source key.
pub type SourceNamespace = HashMap<String, SourceTable>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    pub table: Vec<Vec<String>>,
    #[serde(default)]
    pub raw_data: Option<String>,
}

impl SourceTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from rows of anything string-like.
    pub fn from_rows<R, S>(rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
            raw_data: None,
        }
    }

    /// Build a table that only carries raw text.
    pub fn from_raw<S: Into<String>>(raw: S) -> Self {
        Self {
            table: Vec::new(),
            raw_data: Some(raw.into()),
        }
    }

    pub fn with_raw_data<S: Into<String>>(mut self, raw: S) -> Self {
        self.raw_data = Some(raw.into());
        self
    }

    /// An empty table is the "absent result" of a source.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty() && self.raw_data.as_deref().map_or(true, str::is_empty)
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Serialize rows as `a;b;\nc;d;`: every cell followed by the separator.
    pub fn to_csv(&self, separator: &str) -> String {
        table_to_csv(&self.table, separator)
    }

    /// Raw text if present, otherwise the CSV form of the rows.
    pub fn text(&self) -> String {
        match &self.raw_data {
            Some(raw) if !raw.is_empty() => raw.clone(),
            _ => self.to_csv(TABLE_SEP),
        }
    }

    /// Parse CSV text into a table. Blank lines are skipped.
    pub fn from_csv(text: &str, separator: &str) -> Self {
        let table = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line_to_row(line, separator))
            .collect();

        Self {
            table,
            raw_data: Some(text.to_string()),
        }
    }

    /// Resolve `${source::key}` against the namespace, or parse the text as
    /// a literal CSV table.
    pub fn lookup(value: &str, namespace: &SourceNamespace) -> Option<SourceTable> {
        if let Some(key) = source_reference_key(value) {
            let found = namespace.get(key).cloned();
            if found.is_none() {
                log::debug!("Source table {} not found in namespace", key);
            }
            return found;
        }

        Some(Self::from_csv(value, TABLE_SEP))
    }
}

/// Join cells with the separator, appending it after every cell.
pub fn table_to_csv(rows: &[Vec<String>], separator: &str) -> String {
    rows.iter()
        .map(|row| {
            let mut line = String::new();
            for cell in row {
                line.push_str(cell);
                line.push_str(separator);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split a line into cells. A trailing separator does not add a cell.
pub fn line_to_row(line: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return vec![line.to_string()];
    }
    let trimmed = line.strip_suffix(separator).unwrap_or(line);
    trimmed.split(separator).map(str::to_string).collect()
}

/// Extract the key from a `${source::key}` reference, if the whole value is one.
pub fn source_reference_key(value: &str) -> Option<&str> {
    let rest = value.trim().strip_prefix(SOURCE_REF_PREFIX)?;
    let key = rest.strip_suffix('}')?;
    if key.is_empty() || key.contains(char::is_whitespace) || key.contains('}') {
        return None;
    }
    Some(key)
}

/// All source keys referenced anywhere in the text.
pub fn find_source_references(text: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(SOURCE_REF_PREFIX) {
        let after = &rest[start + SOURCE_REF_PREFIX.len()..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                if !key.is_empty() && !key.contains(char::is_whitespace) {
                    keys.push(key.to_string());
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    keys
}

/// Parse a `$n` column reference (1-based). `$0` is not a column.
pub fn parse_column(value: &str) -> Option<usize> {
    let digits = value.trim().strip_prefix('$')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<usize>().ok().filter(|n| *n > 0)
}

/// Replace every `$n` in `text` with the matching cell of `row`.
///
/// `$$` is an escaped dollar. References beyond the row width become empty.
pub fn replace_column_references(text: &str, row: &[String]) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut last = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        if i + 1 < bytes.len() && bytes[i + 1] == b'$' {
            out.push_str(&text[last..i]);
            out.push('$');
            i += 2;
            last = i;
            continue;
        }
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > i + 1 && bytes[i + 1] != b'0' {
            out.push_str(&text[last..i]);
            if let Ok(column) = text[i + 1..j].parse::<usize>() {
                if let Some(cell) = row.get(column - 1) {
                    out.push_str(cell);
                }
            }
            last = j;
        }
        i = j.max(i + 1);
    }
    out.push_str(&text[last..]);
    out
}

/// Whether the text contains a `$n` reference not preceded by another `$`.
pub fn has_column_reference(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' {
            if bytes[i + 1] == b'$' {
                i += 2;
                continue;
            }
            if (b'1'..=b'9').contains(&bytes[i + 1]) {
                return true;
            }
        }
        i += 1;
    }
    false
}
