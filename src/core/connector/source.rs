//! Source definitions: one data-retrieval step and its compute chain.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::compute::Compute;
use crate::core::table::find_source_references;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Unique handle within the connector, referenced as `${source::key}`.
    pub key: String,
    #[serde(skip)]
    pub index: usize,
    #[serde(default)]
    pub force_serialization: bool,
    #[serde(default)]
    pub computes: Vec<Compute>,
    #[serde(default)]
    pub execute_for_each_entry_of: Option<ExecuteForEachEntryOf>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceKind {
    Http(HttpSource),
    SnmpGet(SnmpGetSource),
    SnmpTable(SnmpTableSource),
    Wmi(WqlSource),
    Wbem(WqlSource),
    CommandLine(CommandLineSource),
    Ipmi(IpmiSource),
    Sql(SqlSource),
    #[serde(alias = "reference")]
    Copy(CopySource),
    Static(StaticSource),
    TableUnion(TableUnionSource),
    TableJoin(TableJoinSource),
}

/// Tag of a source kind, used for extension lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceType {
    Http,
    SnmpGet,
    SnmpTable,
    Wmi,
    Wbem,
    CommandLine,
    Ipmi,
    Sql,
    Copy,
    Static,
    TableUnion,
    TableJoin,
}

impl SourceType {
    /// Structural kinds are executed by the engine itself.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            SourceType::Copy | SourceType::Static | SourceType::TableUnion | SourceType::TableJoin
        )
    }
}

impl SourceKind {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceKind::Http(_) => SourceType::Http,
            SourceKind::SnmpGet(_) => SourceType::SnmpGet,
            SourceKind::SnmpTable(_) => SourceType::SnmpTable,
            SourceKind::Wmi(_) => SourceType::Wmi,
            SourceKind::Wbem(_) => SourceType::Wbem,
            SourceKind::CommandLine(_) => SourceType::CommandLine,
            SourceKind::Ipmi(_) => SourceType::Ipmi,
            SourceKind::Sql(_) => SourceType::Sql,
            SourceKind::Copy(_) => SourceType::Copy,
            SourceKind::Static(_) => SourceType::Static,
            SourceKind::TableUnion(_) => SourceType::TableUnion,
            SourceKind::TableJoin(_) => SourceType::TableJoin,
        }
    }
}

impl Source {
    pub fn source_type(&self) -> SourceType {
        self.kind.source_type()
    }

    /// Protocol name used to pick the host timeout.
    pub fn protocol(&self) -> Option<&'static str> {
        match self.kind {
            SourceKind::Http(_) => Some("http"),
            SourceKind::SnmpGet(_) | SourceKind::SnmpTable(_) => Some("snmp"),
            SourceKind::Wmi(_) => Some("wmi"),
            SourceKind::Wbem(_) => Some("wbem"),
            SourceKind::CommandLine(_) => Some("ssh"),
            SourceKind::Ipmi(_) => Some("ipmi"),
            SourceKind::Sql(_) => Some("jdbc"),
            SourceKind::Copy(_)
            | SourceKind::Static(_)
            | SourceKind::TableUnion(_)
            | SourceKind::TableJoin(_) => None,
        }
    }

    /// Keys of the other sources this one reads, in order of appearance.
    pub fn references(&self) -> Vec<String> {
        let serialized = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(_) => return Vec::new(),
        };
        let mut seen = HashSet::new();
        find_source_references(&serialized)
            .into_iter()
            .filter(|key| key != &self.key && seen.insert(key.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteForEachEntryOf {
    pub source: String,
    #[serde(default)]
    pub concat_method: EntryConcatMethod,
}

/// How per-entry results are merged back into one table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryConcatMethod {
    #[default]
    List,
    JsonArray,
    JsonArrayExtended,
    #[serde(rename_all = "camelCase")]
    Custom {
        concat_start: String,
        concat_end: String,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultContent {
    #[default]
    Body,
    Header,
    HttpStatus,
    All,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    #[serde(default = "default_http_method")]
    pub method: String,
    pub url: Option<String>,
    pub path: Option<String>,
    pub header: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub result_content: ResultContent,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnmpGetSource {
    pub oid: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnmpTableSource {
    pub oid: String,
    pub select_columns: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WqlSource {
    pub query: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLineSource {
    pub command_line: String,
    #[serde(default)]
    pub execute_locally: bool,
    pub timeout: Option<u64>,
    pub exclude: Option<String>,
    pub keep: Option<String>,
    pub begin_at_line_number: Option<usize>,
    pub end_at_line_number: Option<usize>,
    pub separators: Option<String>,
    pub select_columns: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpmiSource {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlSource {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopySource {
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticSource {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUnionSource {
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableJoinSource {
    pub left_table: String,
    pub right_table: String,
    pub left_key_column: usize,
    pub right_key_column: usize,
    pub default_right_line: Option<String>,
    pub key_type: Option<String>,
}

fn default_http_method() -> String {
    "GET".to_string()
}
