//! Compute definitions: one pure table transformation per variant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Compute {
    Add(Arithmetic),
    #[serde(alias = "substract")]
    Subtract(Arithmetic),
    Multiply(Arithmetic),
    Divide(Arithmetic),
    And(Bitwise),
    Or(Bitwise),
    #[serde(rename_all = "camelCase")]
    Substring {
        column: usize,
        start: String,
        length: String,
    },
    #[serde(rename_all = "camelCase")]
    Translate {
        column: usize,
        translation_table: TranslationTableRef,
    },
    #[serde(rename_all = "camelCase")]
    ArrayTranslate {
        column: usize,
        translation_table: TranslationTableRef,
        array_separator: Option<String>,
        result_separator: Option<String>,
    },
    KeepOnlyMatchingLines(MatchingLines),
    ExcludeMatchingLines(MatchingLines),
    DuplicateColumn {
        column: usize,
    },
    #[serde(alias = "rightConcat")]
    Append(Concat),
    #[serde(alias = "leftConcat")]
    Prepend(Concat),
    #[serde(rename_all = "camelCase")]
    Replace {
        column: usize,
        existing_value: String,
        new_value: String,
    },
    #[serde(rename_all = "camelCase")]
    Extract {
        column: usize,
        sub_column: usize,
        sub_separators: String,
    },
    ExtractPropertyFromWbemPath {
        column: usize,
        property: String,
    },
    #[serde(rename_all = "camelCase")]
    KeepColumns {
        column_numbers: String,
    },
    Convert {
        column: usize,
        conversion: ConversionType,
    },
    #[serde(rename_all = "camelCase")]
    PerBitTranslation {
        column: usize,
        bit_list: String,
        translation_table: TranslationTableRef,
    },
    #[serde(rename_all = "camelCase")]
    Json2Csv {
        entry_key: String,
        properties: Option<String>,
        separator: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Xml2Csv {
        record_tag: String,
        properties: String,
    },
    Awk(AwkCompute),
}

impl Compute {
    pub fn name(&self) -> &'static str {
        match self {
            Compute::Add(_) => "add",
            Compute::Subtract(_) => "subtract",
            Compute::Multiply(_) => "multiply",
            Compute::Divide(_) => "divide",
            Compute::And(_) => "and",
            Compute::Or(_) => "or",
            Compute::Substring { .. } => "substring",
            Compute::Translate { .. } => "translate",
            Compute::ArrayTranslate { .. } => "arrayTranslate",
            Compute::KeepOnlyMatchingLines(_) => "keepOnlyMatchingLines",
            Compute::ExcludeMatchingLines(_) => "excludeMatchingLines",
            Compute::DuplicateColumn { .. } => "duplicateColumn",
            Compute::Append(_) => "append",
            Compute::Prepend(_) => "prepend",
            Compute::Replace { .. } => "replace",
            Compute::Extract { .. } => "extract",
            Compute::ExtractPropertyFromWbemPath { .. } => "extractPropertyFromWbemPath",
            Compute::KeepColumns { .. } => "keepColumns",
            Compute::Convert { .. } => "convert",
            Compute::PerBitTranslation { .. } => "perBitTranslation",
            Compute::Json2Csv { .. } => "json2Csv",
            Compute::Xml2Csv { .. } => "xml2Csv",
            Compute::Awk(_) => "awk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arithmetic {
    pub column: usize,
    /// Literal number or `$n`.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bitwise {
    pub column: usize,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concat {
    pub column: usize,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingLines {
    pub column: Option<usize>,
    pub reg_exp: Option<String>,
    pub value_list: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwkCompute {
    pub script: String,
    pub exclude: Option<String>,
    pub keep: Option<String>,
    pub separators: Option<String>,
    pub select_columns: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversionType {
    Hex2Dec,
    Array2SimpleStatus,
}

/// A translation table given by name (resolved against the connector) or inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranslationTableRef {
    Named(String),
    Inline(BTreeMap<String, String>),
}
