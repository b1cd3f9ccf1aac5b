//! The top-level facade bundling the query path, the ingestion dispatcher, and the
//! shared resource manager behind one constructor (§2 "Data flow").
//!
//! Grounded on `flow-client::Client::new`'s pattern of building one shared underlying
//! resource once and handing clones/references of it to each sub-client -- here the
//! shared resource is the [`ResourceManager`], not a `gazette::Router`, and the
//! sub-clients are the query path (this struct's own methods) and the
//! [`Dispatcher`] rather than `flow-client`'s shard/journal pair.

use crate::management::EngineManagementExecutor;
use bytes::Bytes;
use kusto_core::error::{KustoError, Operation, Result, ServiceErrorPayload};
use kusto_core::transport::{BlobUploader, Credentials, HttpResponse, HttpTransport, Method, QueueClient, TableClient};
use kusto_data::{Dataset, DatasetOptions};
use kusto_ingest::endpoint_correction;
use kusto_ingest::{
    Dispatcher, IngestSource, IngestionProperties, IngestionResult, ManagedIngestOptions, QueuedIngestOptions,
    StatusTracker, StatusTrackerOptions,
};
use kusto_resources::{ResourceManager, ResourceManagerOptions};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// Which kind of client is being built (§4.7): determines whether the caller's
/// endpoint gets the `ingest-` prefix inserted or removed on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Query,
    Ingest,
}

/// Request deadlines and buffering knobs the client applies on top of the
/// dispatcher/dataset's own defaults (§5 "Timeouts").
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub query_deadline: Duration,
    pub streaming_ingest_deadline: Duration,
    pub queued_ingest_deadline: Duration,
    pub dataset_options: DatasetOptions,
    pub resource_manager_options: ResourceManagerOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            query_deadline: Duration::from_secs(600),
            streaming_ingest_deadline: Duration::from_secs(600),
            queued_ingest_deadline: Duration::from_secs(30),
            dataset_options: DatasetOptions::default(),
            resource_manager_options: ResourceManagerOptions::default(),
        }
    }
}

/// Bundles the query path, the ingestion dispatcher, and the shared resource manager
/// behind one handle. Built once per cluster connection and cheaply cloned via `Arc`
/// fields if the embedding application wants multiple owners.
pub struct Client {
    kind: ClientKind,
    query_endpoint: Url,
    ingest_endpoint: Url,
    default_database: String,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn Credentials>,
    tables: Arc<dyn TableClient>,
    resources: Arc<ResourceManager>,
    dispatcher: Dispatcher,
    options: ClientOptions,
}

impl Client {
    /// Builds a client of the given `kind` around `endpoint`, auto-correcting it
    /// (§4.7) so that both the query path and the ingestion dispatcher end up
    /// pointed at the right host regardless of which form the caller passed in.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ClientKind,
        endpoint: Url,
        default_database: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        blobs: Arc<dyn BlobUploader>,
        queues: Arc<dyn QueueClient>,
        tables: Arc<dyn TableClient>,
        credentials: Arc<dyn Credentials>,
        options: ClientOptions,
    ) -> Self {
        let default_database = default_database.into();
        let query_endpoint = endpoint_correction::to_query_endpoint(&endpoint);
        let ingest_endpoint = endpoint_correction::to_ingest_endpoint(&endpoint);

        // Management commands (resource listing, identity token) always run against
        // the engine's query endpoint (§4.4), independent of which kind of client
        // this is.
        let executor = Arc::new(EngineManagementExecutor::new(
            transport.clone(),
            credentials.clone(),
            &query_endpoint,
            default_database.clone(),
        ));
        let resources = Arc::new(ResourceManager::new(executor, options.resource_manager_options));
        let dispatcher = Dispatcher {
            transport: transport.clone(),
            blobs,
            queues,
            resources: resources.clone(),
            streaming_endpoint: ingest_endpoint.as_str().trim_end_matches('/').to_string(),
        };

        Client {
            kind,
            query_endpoint,
            ingest_endpoint,
            default_database,
            transport,
            credentials,
            tables,
            resources,
            dispatcher,
            options,
        }
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn query_endpoint(&self) -> &Url {
        &self.query_endpoint
    }

    pub fn ingest_endpoint(&self) -> &Url {
        &self.ingest_endpoint
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    async fn authenticated_headers(&self, cancel: CancellationToken) -> Result<HashMap<String, String>> {
        let token = self.credentials.token(cancel).await?;
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        headers.insert("x-ms-client-request-id".to_string(), format!("KCR.execute;{}", Uuid::new_v4()));
        Ok(headers)
    }

    /// Runs a query against the engine's v2 endpoint (§4.2), returning an iterative
    /// dataset the caller drains table-by-table (§4.3). `database` overrides the
    /// client's default database for this one call.
    pub async fn query(&self, database: &str, query_text: &str, cancel: CancellationToken) -> Result<Dataset> {
        let headers = self.authenticated_headers(cancel.clone()).await?;
        let body = serde_json::json!({ "db": database, "csl": query_text });
        let url = self
            .query_endpoint
            .join("v2/rest/query")
            .map_err(|e| KustoError::client_args(Operation::Query, format!("invalid query endpoint: {e}")))?;

        let response = match tokio::time::timeout(
            self.options.query_deadline,
            self.transport.do_request(Method::Post, url.as_str(), headers, Some(Bytes::from(body.to_string())), cancel.clone()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(KustoError::timeout(Operation::Query)),
        };

        if !response.is_success() {
            return Err(error_from_response(Operation::Query, &response));
        }

        let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(response.body) });
        let reader = tokio_util::io::StreamReader::new(stream);
        Ok(Dataset::from_v2_reader(Operation::Query, reader, self.options.dataset_options, cancel))
    }

    /// Queries with the client's configured default database.
    pub async fn query_default(&self, query_text: &str, cancel: CancellationToken) -> Result<Dataset> {
        let database = self.default_database.clone();
        self.query(&database, query_text, cancel).await
    }

    pub async fn ingest_file(
        &self,
        path: &Path,
        props: &IngestionProperties,
        opts: &QueuedIngestOptions,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        with_deadline(
            self.options.queued_ingest_deadline,
            Operation::FileIngest,
            self.dispatcher.ingest_file_queued(path, props, opts, cancel),
        )
        .await
    }

    pub async fn ingest_reader(
        &self,
        reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
        basename: &str,
        props: &IngestionProperties,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        with_deadline(
            self.options.queued_ingest_deadline,
            Operation::ReaderIngest,
            self.dispatcher.ingest_reader_queued(reader, basename, props, cancel),
        )
        .await
    }

    pub async fn ingest_blob(
        &self,
        blob_url: &str,
        raw_size: Option<i64>,
        props: &IngestionProperties,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        with_deadline(
            self.options.queued_ingest_deadline,
            Operation::BlobIngest,
            self.dispatcher.ingest_blob_queued(blob_url, raw_size, props, cancel),
        )
        .await
    }

    /// Managed ingestion (§4.5 "Managed"): streams with retry, falls back to queued.
    pub async fn ingest_managed(
        &self,
        payload: Bytes,
        source: IngestSource,
        props: &IngestionProperties,
        opts: &ManagedIngestOptions,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        with_deadline(
            self.options.streaming_ingest_deadline,
            Operation::StreamIngest,
            self.dispatcher.ingest_managed(payload, source, props, opts, cancel),
        )
        .await
    }

    /// Builds a [`StatusTracker`] for an ingestion result that requested table
    /// reporting (§4.6); `None` if the result carries no status-table reference.
    pub fn status_tracker(&self, result: &IngestionResult, opts: StatusTrackerOptions) -> Option<StatusTracker> {
        let (table_url, _partition_key, row_key) = result.status_table_ref.clone()?;
        Some(StatusTracker::new(self.tables.clone(), table_url, row_key, opts))
    }
}

async fn with_deadline<T>(deadline: Duration, op: Operation, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(KustoError::timeout(op)),
    }
}

/// Translates a non-2xx response into the closed error taxonomy (§7): a
/// service-structured `{"error": {...}}` body becomes `ServiceError`, anything else
/// becomes a generic `HttpError` carrying the status code.
fn error_from_response(op: Operation, response: &HttpResponse) -> KustoError {
    if let Ok(envelope) = serde_json::from_slice::<serde_json::Value>(&response.body) {
        if let Some(err) = envelope.get("error") {
            if let Ok(payload) = serde_json::from_value::<ServiceErrorPayload>(err.clone()) {
                return KustoError::ServiceError { op, payload };
            }
        }
    }
    KustoError::HttpError { op, message: format!("request failed with status {}", response.status), source: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kusto_core::model::Row;
    use kusto_core::value::Value;
    use std::sync::Mutex;

    struct FakeCredentials;

    #[async_trait]
    impl Credentials for FakeCredentials {
        async fn token(&self, _cancel: CancellationToken) -> Result<String> {
            Ok("tok".to_string())
        }
    }

    struct FakeBlobs;
    #[async_trait]
    impl BlobUploader for FakeBlobs {
        async fn upload_stream(
            &self,
            _reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
            _container_url: &str,
            _blob_name: &str,
            _opts: kusto_core::transport::BlobUploadOptions,
            _cancel: CancellationToken,
        ) -> Result<()> {
            unimplemented!("not exercised in this test")
        }
        async fn upload_file(
            &self,
            _path: &Path,
            _container_url: &str,
            _blob_name: &str,
            _opts: kusto_core::transport::BlobUploadOptions,
            _cancel: CancellationToken,
        ) -> Result<()> {
            unimplemented!("not exercised in this test")
        }
    }

    struct FakeQueues;
    #[async_trait]
    impl QueueClient for FakeQueues {
        async fn enqueue(&self, _queue_url: &str, _message: &str, _cancel: CancellationToken) -> Result<()> {
            unimplemented!("not exercised in this test")
        }
    }

    struct FakeTables;
    #[async_trait]
    impl TableClient for FakeTables {
        async fn read(&self, _table_url: &str, _row_key: &str, _cancel: CancellationToken) -> Result<Option<serde_json::Value>> {
            unimplemented!("not exercised in this test")
        }
    }

    struct ScriptedQueryTransport {
        v2_body: Vec<u8>,
        resources_body: Vec<u8>,
        requested_urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpTransport for ScriptedQueryTransport {
        async fn do_request(
            &self,
            _method: Method,
            url: &str,
            _headers: HashMap<String, String>,
            _body: Option<Bytes>,
            _cancel: CancellationToken,
        ) -> Result<HttpResponse> {
            self.requested_urls.lock().unwrap().push(url.to_string());
            let body = if url.ends_with("v1/rest/mgmt") { self.resources_body.clone() } else { self.v2_body.clone() };
            Ok(HttpResponse { status: 200, headers: HashMap::new(), body: Bytes::from(body) })
        }
    }

    fn v2_happy_path_body() -> Vec<u8> {
        serde_json::json!([
            {"FrameType": "dataSetHeader", "IsProgressive": false, "Version": "v2.0"},
            {
                "FrameType": "DataTable",
                "TableId": 1,
                "TableName": "Table_0",
                "TableKind": "PrimaryResult",
                "Columns": [{"ColumnName": "x", "ColumnType": "long"}],
                "Rows": [[1], [2], [3]]
            },
            {"FrameType": "DataSetCompletion", "HasErrors": false, "Cancelled": false}
        ])
        .to_string()
        .into_bytes()
    }

    fn empty_resources_body() -> Vec<u8> {
        serde_json::json!({
            "Tables": [{
                "TableName": "Table_0",
                "Columns": [
                    {"ColumnName": "ResourceTypeName", "ColumnType": "string"},
                    {"ColumnName": "StorageRoot", "ColumnType": "string"}
                ],
                "Rows": [["SecuredReadyForAggregationQueue", "https://a.queue.core.windows.net/q?sv=1"]]
            }]
        })
        .to_string()
        .into_bytes()
    }

    fn test_client(transport: Arc<ScriptedQueryTransport>) -> Client {
        Client::new(
            ClientKind::Query,
            Url::parse("https://help.example.net").unwrap(),
            "TestDb",
            transport,
            Arc::new(FakeBlobs),
            Arc::new(FakeQueues),
            Arc::new(FakeTables),
            Arc::new(FakeCredentials),
            ClientOptions::default(),
        )
    }

    #[test]
    fn query_kind_auto_corrects_to_ingest_endpoint() {
        let transport = Arc::new(ScriptedQueryTransport {
            v2_body: Vec::new(),
            resources_body: Vec::new(),
            requested_urls: Mutex::new(Vec::new()),
        });
        let client = test_client(transport);
        assert_eq!(client.query_endpoint().as_str(), "https://help.example.net/");
        assert_eq!(client.ingest_endpoint().as_str(), "https://ingest-help.example.net/");
    }

    #[test]
    fn reserved_host_is_never_rewritten() {
        let transport = Arc::new(ScriptedQueryTransport {
            v2_body: Vec::new(),
            resources_body: Vec::new(),
            requested_urls: Mutex::new(Vec::new()),
        });
        let client = Client::new(
            ClientKind::Ingest,
            Url::parse("https://localhost:8080").unwrap(),
            "TestDb",
            transport,
            Arc::new(FakeBlobs),
            Arc::new(FakeQueues),
            Arc::new(FakeTables),
            Arc::new(FakeCredentials),
            ClientOptions::default(),
        );
        assert_eq!(client.query_endpoint().as_str(), "https://localhost:8080/");
        assert_eq!(client.ingest_endpoint().as_str(), "https://localhost:8080/");
    }

    #[tokio::test]
    async fn query_decodes_v2_happy_path_into_one_table() {
        let transport = Arc::new(ScriptedQueryTransport {
            v2_body: v2_happy_path_body(),
            resources_body: empty_resources_body(),
            requested_urls: Mutex::new(Vec::new()),
        });
        let client = test_client(transport);

        let mut dataset = client.query_default("Table_0 | take 3", CancellationToken::new()).await.unwrap();
        let meta = dataset.next_table().await.unwrap().unwrap();
        assert_eq!(meta.name, "Table_0");

        let mut rows: Vec<Row> = Vec::new();
        while let Some(row) = dataset.next_row().await {
            rows.push(row.unwrap());
        }
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get(0), Some(&Value::long(1)));
        assert!(dataset.next_table().await.is_none());
    }
}
