//! The per-blob ingestion job descriptor (§3, §6): a JSON object, base64-encoded
//! before it is enqueued onto the queue the resource manager hands out.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportLevel {
    None,
    FailuresOnly,
    FailuresAndSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportMethod {
    Queue,
    Table,
    QueueAndTable,
}

/// `AdditionalProperties` (§6): key names preserved exactly as the wire expects them,
/// independent of this crate's own naming conventions.
#[derive(Debug, Clone, Serialize)]
pub struct AdditionalProperties {
    #[serde(rename = "authorizationContext")]
    pub authorization_context: String,
    #[serde(rename = "ingestionMapping", skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping: Option<String>,
    #[serde(rename = "ingestionMappingReference", skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping_reference: Option<String>,
    #[serde(rename = "ingestionMappingType", skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping_type: Option<String>,
    #[serde(rename = "validationPolicy", skip_serializing_if = "Option::is_none")]
    pub validation_policy: Option<String>,
    pub format: String,
    #[serde(rename = "ignoreFirstRecord", skip_serializing_if = "Option::is_none")]
    pub ignore_first_record: Option<bool>,
    /// JSON-stringified array, per §6 -- not a native JSON array.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(rename = "ingestIfNotExists", skip_serializing_if = "Option::is_none")]
    pub ingest_if_not_exists: Option<String>,
    #[serde(rename = "creationTime", with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
}

/// Where to write ingestion status when `report_method` includes `Table` (§3
/// `status_table_ref`).
#[derive(Debug, Clone, Serialize)]
pub struct StatusTableRef {
    #[serde(rename = "TableConnectionString")]
    pub table_connection_string: String,
    #[serde(rename = "PartitionKey")]
    pub partition_key: String,
    #[serde(rename = "RowKey")]
    pub row_key: String,
}

/// The full descriptor (§3). `Id` doubles as the ingestion id the status tracker
/// polls for.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionDescriptor {
    #[serde(rename = "Id")]
    pub id: Uuid,
    #[serde(rename = "BlobPath")]
    pub blob_path: String,
    #[serde(rename = "RawDataSize", skip_serializing_if = "Option::is_none")]
    pub raw_data_size: Option<i64>,
    #[serde(rename = "DatabaseName")]
    pub database_name: String,
    #[serde(rename = "TableName")]
    pub table_name: String,
    #[serde(rename = "FlushImmediately")]
    pub flush_immediately: bool,
    #[serde(rename = "ReportLevel")]
    pub report_level: ReportLevel,
    #[serde(rename = "ReportMethod")]
    pub report_method: ReportMethod,
    #[serde(rename = "AdditionalProperties")]
    pub additional_properties: AdditionalProperties,
    #[serde(rename = "IngestionStatusInTable", skip_serializing_if = "Option::is_none")]
    pub status_table_ref: Option<StatusTableRef>,
}

impl IngestionDescriptor {
    /// Serializes and base64-encodes the descriptor, ready to hand to
    /// `QueueClient::enqueue` (§6).
    pub fn to_base64_message(&self) -> String {
        let json = serde_json::to_vec(self).expect("descriptor is always JSON-serializable");
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64_json() {
        let descriptor = IngestionDescriptor {
            id: Uuid::nil(),
            blob_path: "https://acct.blob.core.windows.net/c/b.csv.gz?sv=1".to_string(),
            raw_data_size: Some(42),
            database_name: "db".to_string(),
            table_name: "t".to_string(),
            flush_immediately: false,
            report_level: ReportLevel::FailuresOnly,
            report_method: ReportMethod::Queue,
            additional_properties: AdditionalProperties {
                authorization_context: "ctx".to_string(),
                ingestion_mapping: None,
                ingestion_mapping_reference: None,
                ingestion_mapping_type: None,
                validation_policy: None,
                format: "csv".to_string(),
                ignore_first_record: None,
                tags: None,
                ingest_if_not_exists: None,
                creation_time: OffsetDateTime::UNIX_EPOCH,
            },
            status_table_ref: None,
        };

        let encoded = descriptor.to_base64_message();
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["BlobPath"], "https://acct.blob.core.windows.net/c/b.csv.gz?sv=1");
        assert_eq!(value["AdditionalProperties"]["format"], "csv");
    }
}
