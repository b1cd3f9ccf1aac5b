//! The concrete [`ManagementExecutor`](kusto_resources::ManagementExecutor): runs the
//! two management commands the resource manager needs through the same query path as
//! any other command, and pulls its rows back out of the resulting dataset (§4.4).

use async_trait::async_trait;
use bytes::Bytes;
use kusto_core::error::{KustoError, Operation, Result};
use kusto_core::model::Table;
use kusto_core::transport::{Credentials, HttpTransport, Method};
use kusto_core::value::{ScalarPayload, Value};
use kusto_data::{Dataset, DatasetOptions};
use kusto_resources::ManagementExecutor;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const INGESTION_RESOURCES_COMMAND: &str = ".get ingestion resources";
const IDENTITY_TOKEN_COMMAND: &str = ".get kusto identity token";

fn cell_as_string(op: Operation, value: Option<&Value>) -> Result<String> {
    match value.and_then(|v| v.payload()) {
        Some(ScalarPayload::String(s)) => Ok(s.clone()),
        _ => Err(KustoError::decode(op, "expected a non-null string cell in a management response")),
    }
}

fn column_index(table: &Table, op: Operation, name: &str) -> Result<usize> {
    table
        .column_index()
        .get(name)
        .copied()
        .ok_or_else(|| KustoError::decode(op, format!("management response missing column {name:?}")))
}

/// Runs `.get ingestion resources` / `.get kusto identity token` against the engine's
/// management endpoint (`v1/rest/mgmt`), authenticating via the same [`Credentials`]
/// collaborator every other request uses.
pub struct EngineManagementExecutor {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn Credentials>,
    mgmt_url: String,
    default_database: String,
}

impl EngineManagementExecutor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn Credentials>,
        query_endpoint: &url::Url,
        default_database: impl Into<String>,
    ) -> Self {
        let mgmt_url = query_endpoint
            .join("v1/rest/mgmt")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}v1/rest/mgmt", query_endpoint));
        EngineManagementExecutor { transport, credentials, mgmt_url, default_database: default_database.into() }
    }

    async fn run_command(&self, command: &str, cancel: CancellationToken) -> Result<Vec<Table>> {
        let token = self.credentials.token(cancel.clone()).await?;
        let body = serde_json::json!({ "db": self.default_database, "csl": command });

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        headers.insert("x-ms-client-request-id".to_string(), format!("KCR.execute;{}", uuid::Uuid::new_v4()));

        let response = self
            .transport
            .do_request(Method::Post, &self.mgmt_url, headers, Some(Bytes::from(body.to_string())), cancel)
            .await?;

        if !response.is_success() {
            return Err(KustoError::HttpError {
                op: Operation::Query,
                message: format!("management command {command:?} failed with status {}", response.status),
                source: None,
            });
        }

        let dataset = Dataset::from_v1_body(Operation::Query, response.body.to_vec(), DatasetOptions::default());
        dataset.to_full_dataset().await
    }
}

#[async_trait]
impl ManagementExecutor for EngineManagementExecutor {
    async fn resources(&self, cancel: CancellationToken) -> Result<Vec<(String, String)>> {
        let tables = self.run_command(INGESTION_RESOURCES_COMMAND, cancel).await?;
        let table = tables
            .into_iter()
            .find(|t| !t.rows.is_empty())
            .ok_or_else(|| KustoError::decode(Operation::Query, "ingestion resources response had no rows"))?;

        let name_idx = column_index(&table, Operation::Query, "ResourceTypeName")?;
        let root_idx = column_index(&table, Operation::Query, "StorageRoot")?;

        table
            .rows
            .iter()
            .map(|row| {
                let name = cell_as_string(Operation::Query, row.get(name_idx))?;
                let root = cell_as_string(Operation::Query, row.get(root_idx))?;
                Ok((name, root))
            })
            .collect()
    }

    async fn identity_token(&self, cancel: CancellationToken) -> Result<String> {
        let tables = self.run_command(IDENTITY_TOKEN_COMMAND, cancel).await?;
        let table = tables
            .into_iter()
            .next()
            .ok_or_else(|| KustoError::decode(Operation::Query, "identity token response had no tables"))?;

        let idx = column_index(&table, Operation::Query, "AuthorizationContext")?;
        let row = table
            .rows
            .first()
            .ok_or_else(|| KustoError::decode(Operation::Query, "identity token response had no rows"))?;
        cell_as_string(Operation::Query, row.get(idx))
    }
}
