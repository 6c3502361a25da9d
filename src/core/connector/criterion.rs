//! Detection criteria.

use serde::{Deserialize, Serialize};

use crate::core::config::DeviceKind;

/// One detection test. Header fields shared by every kind live here, the
/// probe parameters live in [`CriterionKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    /// Position within the detection block, assigned on load.
    #[serde(skip)]
    pub index: usize,
    #[serde(default)]
    pub force_serialization: bool,
    #[serde(flatten)]
    pub kind: CriterionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CriterionKind {
    Http(HttpCriterion),
    SnmpGet(SnmpCriterion),
    SnmpGetNext(SnmpCriterion),
    Wmi(WqlCriterion),
    Wbem(WqlCriterion),
    CommandLine(CommandLineCriterion),
    Ipmi(IpmiCriterion),
    Sql(SqlCriterion),
    Process(ProcessCriterion),
    Service(ServiceCriterion),
    DeviceType(DeviceTypeCriterion),
    ProductRequirements(ProductRequirementsCriterion),
}

/// Tag of a criterion kind, used for extension lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CriterionType {
    Http,
    SnmpGet,
    SnmpGetNext,
    Wmi,
    Wbem,
    CommandLine,
    Ipmi,
    Sql,
    Process,
    Service,
    DeviceType,
    ProductRequirements,
}

impl CriterionKind {
    pub fn criterion_type(&self) -> CriterionType {
        match self {
            CriterionKind::Http(_) => CriterionType::Http,
            CriterionKind::SnmpGet(_) => CriterionType::SnmpGet,
            CriterionKind::SnmpGetNext(_) => CriterionType::SnmpGetNext,
            CriterionKind::Wmi(_) => CriterionType::Wmi,
            CriterionKind::Wbem(_) => CriterionType::Wbem,
            CriterionKind::CommandLine(_) => CriterionType::CommandLine,
            CriterionKind::Ipmi(_) => CriterionType::Ipmi,
            CriterionKind::Sql(_) => CriterionType::Sql,
            CriterionKind::Process(_) => CriterionType::Process,
            CriterionKind::Service(_) => CriterionType::Service,
            CriterionKind::DeviceType(_) => CriterionType::DeviceType,
            CriterionKind::ProductRequirements(_) => CriterionType::ProductRequirements,
        }
    }
}

impl Criterion {
    pub fn criterion_type(&self) -> CriterionType {
        self.kind.criterion_type()
    }

    /// Protocol name used to pick the host timeout. Engine-local kinds have none.
    pub fn protocol(&self) -> Option<&'static str> {
        match self.kind {
            CriterionKind::Http(_) => Some("http"),
            CriterionKind::SnmpGet(_) | CriterionKind::SnmpGetNext(_) => Some("snmp"),
            CriterionKind::Wmi(_) => Some("wmi"),
            CriterionKind::Wbem(_) => Some("wbem"),
            CriterionKind::CommandLine(_) | CriterionKind::Process(_) | CriterionKind::Service(_) => {
                Some("ssh")
            }
            CriterionKind::Ipmi(_) => Some("ipmi"),
            CriterionKind::Sql(_) => Some("jdbc"),
            CriterionKind::DeviceType(_) | CriterionKind::ProductRequirements(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCriterion {
    #[serde(default = "default_http_method")]
    pub method: String,
    pub url: Option<String>,
    pub path: Option<String>,
    pub header: Option<String>,
    pub body: Option<String>,
    pub expected_result: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnmpCriterion {
    pub oid: String,
    pub expected_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WqlCriterion {
    pub query: String,
    pub namespace: Option<String>,
    pub expected_result: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLineCriterion {
    pub command_line: String,
    #[serde(default)]
    pub execute_locally: bool,
    pub expected_result: Option<String>,
    pub error_message: Option<String>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpmiCriterion {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlCriterion {
    pub query: String,
    pub expected_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCriterion {
    pub command_line: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCriterion {
    pub name: String,
}

/// Host kinds this connector applies to, or must not apply to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTypeCriterion {
    #[serde(default)]
    pub keep: Vec<DeviceKind>,
    #[serde(default)]
    pub exclude: Vec<DeviceKind>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequirementsCriterion {
    pub engine_version: Option<String>,
    pub kb_version: Option<String>,
}

fn default_http_method() -> String {
    "GET".to_string()
}
