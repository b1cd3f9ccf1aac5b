//! JSON wire shapes for the v1 and v2 response formats (§4.2, §6).
//!
//! Grounded on the column-type aliasing and frame-tagging conventions of the public
//! `azure-kusto-data` crate's response models, generalized to this spec's wire rules
//! (notably `dataSetHeader`'s lower-case `d`, which is not a `PascalCase` rename).

use kusto_core::ScalarKind;
use serde::Deserialize;

/// The wire spelling of a column's scalar type, with the aliases real Kusto responses
/// are known to send (`SByte` for `bool`, `Object`/`dynamic` interchangeably, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum WireColumnType {
    #[serde(alias = "Boolean", alias = "bool", alias = "boolean", alias = "SByte")]
    Bool,
    #[serde(alias = "DateTime", alias = "datetime", alias = "Date", alias = "date")]
    Datetime,
    #[serde(alias = "dynamic", alias = "Object", alias = "object")]
    Dynamic,
    #[serde(alias = "GUID", alias = "guid", alias = "UUID", alias = "uuid", alias = "Uuid")]
    Guid,
    #[serde(alias = "Int32", alias = "int32", alias = "int")]
    Int,
    #[serde(alias = "Int64", alias = "int64", alias = "long")]
    Long,
    #[serde(
        alias = "Real",
        alias = "real",
        alias = "float",
        alias = "Float",
        alias = "Double",
        alias = "double"
    )]
    Real,
    #[serde(alias = "string")]
    String,
    #[serde(alias = "TimeSpan", alias = "timespan", alias = "Time", alias = "time")]
    Timespan,
    #[serde(alias = "decimal")]
    Decimal,
}

impl From<WireColumnType> for ScalarKind {
    fn from(w: WireColumnType) -> Self {
        match w {
            WireColumnType::Bool => ScalarKind::Bool,
            WireColumnType::Datetime => ScalarKind::Datetime,
            WireColumnType::Dynamic => ScalarKind::Dynamic,
            WireColumnType::Guid => ScalarKind::Guid,
            WireColumnType::Int => ScalarKind::Int,
            WireColumnType::Long => ScalarKind::Long,
            WireColumnType::Real => ScalarKind::Real,
            WireColumnType::String => ScalarKind::String,
            WireColumnType::Timespan => ScalarKind::Timespan,
            WireColumnType::Decimal => ScalarKind::Decimal,
        }
    }
}

/// Maps a CLR `DataType` name (the v1 management-command alternative to `ColumnType`)
/// to a scalar kind, per §4.2's "`DataType` (a mapped name such as `System.String` →
/// `string`)".
pub fn data_type_to_kind(data_type: &str) -> Option<ScalarKind> {
    Some(match data_type {
        "System.Boolean" | "System.SByte" => ScalarKind::Bool,
        "System.Int32" => ScalarKind::Int,
        "System.Int64" => ScalarKind::Long,
        "System.Double" | "System.Single" => ScalarKind::Real,
        "System.String" => ScalarKind::String,
        "System.DateTime" => ScalarKind::Datetime,
        "System.TimeSpan" => ScalarKind::Timespan,
        "System.Guid" => ScalarKind::Guid,
        "System.Object" => ScalarKind::Dynamic,
        "System.Data.SqlTypes.SqlDecimal" | "System.Decimal" => ScalarKind::Decimal,
        _ => return None,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireColumn {
    pub column_name: String,
    pub column_type: WireColumnType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireDataSetHeader {
    pub is_progressive: bool,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireDataTable {
    pub table_id: i64,
    pub table_name: String,
    pub table_kind: String,
    pub columns: Vec<WireColumn>,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireTableHeader {
    pub table_id: i64,
    pub table_name: String,
    pub table_kind: String,
    pub columns: Vec<WireColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum WireTableFragmentType {
    DataAppend,
    DataReplace,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireTableFragment {
    pub table_id: i64,
    #[serde(default)]
    pub field_count: Option<i32>,
    pub table_fragment_type: WireTableFragmentType,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireTableProgress {
    pub table_id: i64,
    pub table_progress: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireTableCompletion {
    pub table_id: i64,
    pub row_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireOneApiError {
    pub error: WireServiceError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireServiceError {
    pub code: String,
    pub message: String,
    #[serde(rename = "@type", default)]
    pub error_type: Option<String>,
    #[serde(rename = "@message", default)]
    pub at_message: Option<String>,
    #[serde(rename = "@context", default)]
    pub context: Option<serde_json::Value>,
    #[serde(rename = "@permanent", default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireOneApiErrors {
    #[serde(rename = "OneApiErrors")]
    pub one_api_errors: Vec<WireOneApiError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireDataSetCompletion {
    pub has_errors: bool,
    pub cancelled: bool,
    #[serde(default)]
    pub one_api_errors: Option<Vec<WireOneApiError>>,
}

/// The closed set of v2 frames (§4.2), tagged by `FrameType`. `dataSetHeader` is the
/// one frame whose wire tag is not `PascalCase` -- a historical quirk of the real
/// protocol preserved here rather than "fixed", since the server actually sends it
/// this way.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "FrameType")]
pub enum Frame {
    #[serde(rename = "dataSetHeader")]
    DataSetHeader(WireDataSetHeader),
    DataTable(WireDataTable),
    TableHeader(WireTableHeader),
    TableFragment(WireTableFragment),
    TableProgress(WireTableProgress),
    TableCompletion(WireTableCompletion),
    DataSetCompletion(WireDataSetCompletion),
}

/// The v1 whole-response envelope (§4.2 "v1 variant", §6).
#[derive(Debug, Clone, Deserialize)]
pub struct WireV1Column {
    #[serde(rename = "ColumnName")]
    pub column_name: String,
    #[serde(rename = "ColumnType", default)]
    pub column_type: Option<WireColumnType>,
    #[serde(rename = "DataType", default)]
    pub data_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireV1Table {
    #[serde(rename = "TableName")]
    pub table_name: String,
    #[serde(rename = "Columns")]
    pub columns: Vec<WireV1Column>,
    #[serde(rename = "Rows")]
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WireV1Response {
    #[serde(rename = "Tables", default)]
    pub tables: Vec<WireV1Table>,
}
