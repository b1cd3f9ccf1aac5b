//! Queued / streaming / managed ingestion dispatch (§4.5).
//!
//! The three entry points (`from_file`, `from_reader`, `from_blob`) share one
//! descriptor-building and retry core; they differ only in how a payload reader is
//! (re)obtained for each attempt. A plain `Reader` source can be read exactly once --
//! retrying it would silently send a truncated payload, so the dispatcher refuses
//! instead (§9 "Reader retry via seek").

use crate::descriptor::{AdditionalProperties, IngestionDescriptor, ReportLevel, ReportMethod, StatusTableRef};
use crate::format::{infer_format, should_compress, DataFormat};
use crate::retry::{cancellable_sleep, ExponentialBackoff, Retry};
use async_compression::tokio::bufread::GzipEncoder;
use kusto_core::error::{KustoError, Operation, Result};
use kusto_core::transport::{BlobUploadOptions, BlobUploader, HttpTransport, Method, QueueClient};
use kusto_resources::{EndpointKind, ResourceManager};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Caller-supplied properties for one ingestion, independent of source (§3, §6).
#[derive(Debug, Clone)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
    pub format: Option<DataFormat>,
    pub dont_compress: bool,
    pub flush_immediately: bool,
    pub report_level: ReportLevel,
    pub report_method: ReportMethod,
    pub authorization_context: String,
    pub ingestion_mapping_reference: Option<String>,
    pub ingestion_mapping: Option<String>,
    pub ingestion_mapping_type: Option<String>,
    pub validation_policy: Option<String>,
    pub ignore_first_record: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub ingest_if_not_exists: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct QueuedIngestOptions {
    /// Upper bound on distinct containers tried before giving up (§8 scenario 6).
    pub max_upload_attempts: u32,
}

impl Default for QueuedIngestOptions {
    fn default() -> Self {
        QueuedIngestOptions { max_upload_attempts: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct StreamingIngestOptions {
    pub client_request_id: Option<String>,
}

impl Default for StreamingIngestOptions {
    fn default() -> Self {
        StreamingIngestOptions { client_request_id: None }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ManagedIngestOptions {
    pub max_streaming_attempts: u32,
    pub streaming_size_limit_bytes: u64,
}

impl Default for ManagedIngestOptions {
    fn default() -> Self {
        ManagedIngestOptions { max_streaming_attempts: 3, streaming_size_limit_bytes: 4 * 1024 * 1024 }
    }
}

/// Where the status table row for a submitted ingestion can be found, handed to
/// `status::StatusTracker` by the caller.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub ingestion_id: Uuid,
    pub status_table_ref: Option<(String, String, String)>,
}

/// A payload source. `Reader` carries `seekable: false` always -- a dispatcher that
/// wants retry support must supply `File` or `Blob` instead.
type BoxAsyncRead = Box<dyn AsyncRead + Send + Unpin>;

pub enum IngestSource {
    File(PathBuf),
    Reader(BoxAsyncRead),
    Blob(String),
}

async fn open_file(path: &Path) -> Result<(BoxAsyncRead, Option<i64>)> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| KustoError::LocalFileSystem { op: Operation::FileIngest, path: path.to_path_buf(), source: e })?;
    let len = file
        .metadata()
        .await
        .map_err(|e| KustoError::LocalFileSystem { op: Operation::FileIngest, path: path.to_path_buf(), source: e })?
        .len();
    Ok((Box::new(file), Some(len as i64)))
}

fn maybe_gzip(reader: BoxAsyncRead, compress: bool) -> BoxAsyncRead {
    if compress {
        Box::new(GzipEncoder::new(BufReader::new(reader)))
    } else {
        reader
    }
}

fn blob_name(database: &str, table: &str, basename: &str, compressed: bool) -> String {
    let id = Uuid::new_v4();
    if compressed {
        format!("{database}__{table}__{id}__{basename}.gz")
    } else {
        format!("{database}__{table}__{id}__{basename}")
    }
}

fn endpoint_url_with_sas(url: &str, sas_token: &str) -> String {
    if sas_token.is_empty() {
        url.to_string()
    } else {
        format!("{url}?{sas_token}")
    }
}

/// Bundles the three external collaborators + resource manager the dispatcher needs.
/// Owned by whoever builds a full client; kept generic over trait objects so tests
/// can supply fakes.
pub struct Dispatcher {
    pub transport: Arc<dyn HttpTransport>,
    pub blobs: Arc<dyn BlobUploader>,
    pub queues: Arc<dyn QueueClient>,
    pub resources: Arc<ResourceManager>,
    /// Base URL of the service's streaming-ingestion endpoint, already auto-corrected
    /// (§4.7) by whoever constructs this dispatcher.
    pub streaming_endpoint: String,
}

impl Dispatcher {
    pub async fn ingest_file_queued(
        &self,
        path: &Path,
        props: &IngestionProperties,
        opts: &QueuedIngestOptions,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        let basename =
            path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "payload".to_string());
        let (format, already_compressed) = infer_format(path, props.format)?;
        let compress = should_compress(format, already_compressed, false, props.dont_compress);

        let mut last_err = None;
        for attempt in 0..opts.max_upload_attempts {
            let (reader, raw_size) = open_file(path).await?;
            let reader = maybe_gzip(reader, compress);
            let endpoint = self.resources.next(EndpointKind::BlobContainer, cancel.clone()).await?;
            let name = blob_name(&props.database, &props.table, &basename, compress);

            match self
                .blobs
                .upload_stream(
                    reader,
                    &endpoint_url_with_sas(&endpoint.url, &endpoint.sas_token),
                    &name,
                    BlobUploadOptions::default(),
                    cancel.clone(),
                )
                .await
            {
                Ok(()) => {
                    endpoint.report(true);
                    let blob_path = format!("{}/{}?{}", endpoint.url, name, endpoint.sas_token);
                    return self.enqueue_descriptor(props, format, blob_path, raw_size, cancel).await;
                }
                Err(e) => {
                    endpoint.report(false);
                    tracing::warn!(attempt, error = %e, "blob upload attempt failed, trying another container");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| KustoError::internal(Operation::FileIngest, "no upload attempts made")))
    }

    /// A `Reader` source can only ever be attempted once: on failure the bytes it has
    /// already emitted cannot be replayed, so the dispatcher surfaces that fact
    /// explicitly instead of silently retrying with a fresh (truncated) stream.
    pub async fn ingest_reader_queued(
        &self,
        reader: BoxAsyncRead,
        basename: &str,
        props: &IngestionProperties,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        let format = props
            .format
            .ok_or_else(|| KustoError::client_args(Operation::ReaderIngest, "format must be given explicitly for reader sources"))?;
        let compress = should_compress(format, false, false, props.dont_compress);
        let reader = maybe_gzip(reader, compress);

        let endpoint = self.resources.next(EndpointKind::BlobContainer, cancel.clone()).await?;
        let name = blob_name(&props.database, &props.table, basename, compress);
        match self
            .blobs
            .upload_stream(
                reader,
                &endpoint_url_with_sas(&endpoint.url, &endpoint.sas_token),
                &name,
                BlobUploadOptions::default(),
                cancel.clone(),
            )
            .await
        {
            Ok(()) => {
                endpoint.report(true);
                let blob_path = format!("{}/{}?{}", endpoint.url, name, endpoint.sas_token);
                self.enqueue_descriptor(props, format, blob_path, None, cancel).await
            }
            Err(e) => {
                endpoint.report(false);
                Err(KustoError::client_args(
                    Operation::ReaderIngest,
                    format!("non-seekable reader failed mid-upload and cannot be retried: {e}"),
                ))
            }
        }
    }

    pub async fn ingest_blob_queued(
        &self,
        blob_url: &str,
        raw_size: Option<i64>,
        props: &IngestionProperties,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        let format = props.format.unwrap_or(DataFormat::Csv);
        self.enqueue_descriptor(props, format, blob_url.to_string(), raw_size, cancel).await
    }

    async fn enqueue_descriptor(
        &self,
        props: &IngestionProperties,
        format: DataFormat,
        blob_path: String,
        raw_data_size: Option<i64>,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        let id = Uuid::new_v4();

        let status_table_ref = if matches!(props.report_method, ReportMethod::Table | ReportMethod::QueueAndTable) {
            let table_endpoint = self.resources.next(EndpointKind::StatusTable, cancel.clone()).await?;
            Some(StatusTableRef {
                table_connection_string: endpoint_url_with_sas(&table_endpoint.url, &table_endpoint.sas_token),
                partition_key: props.table.clone(),
                row_key: id.to_string(),
            })
        } else {
            None
        };

        let descriptor = IngestionDescriptor {
            id,
            blob_path,
            raw_data_size,
            database_name: props.database.clone(),
            table_name: props.table.clone(),
            flush_immediately: props.flush_immediately,
            report_level: props.report_level,
            report_method: props.report_method,
            additional_properties: AdditionalProperties {
                authorization_context: props.authorization_context.clone(),
                ingestion_mapping: props.ingestion_mapping.clone(),
                ingestion_mapping_reference: props.ingestion_mapping_reference.clone(),
                ingestion_mapping_type: props.ingestion_mapping_type.clone(),
                validation_policy: props.validation_policy.clone(),
                format: format.wire_name().to_string(),
                ignore_first_record: props.ignore_first_record,
                tags: props.tags.as_ref().map(|t| serde_json::to_string(t).expect("tags are always JSON-serializable")),
                ingest_if_not_exists: props.ingest_if_not_exists.clone(),
                creation_time: now(),
            },
            status_table_ref: status_table_ref.clone(),
        };

        let queue = self.resources.next(EndpointKind::Queue, cancel.clone()).await?;
        let message = descriptor.to_base64_message();
        match self.queues.enqueue(&endpoint_url_with_sas(&queue.url, &queue.sas_token), &message, cancel).await {
            Ok(()) => {
                queue.report(true);
                Ok(IngestionResult {
                    ingestion_id: id,
                    status_table_ref: status_table_ref
                        .map(|r| (r.table_connection_string, r.partition_key, r.row_key)),
                })
            }
            Err(e) => {
                queue.report(false);
                Err(e)
            }
        }
    }

    /// Streaming (§4.5 "Streaming"): one POST, no queue, no status polling.
    pub async fn ingest_stream(
        &self,
        payload: bytes::Bytes,
        format: DataFormat,
        props: &IngestionProperties,
        opts: &StreamingIngestOptions,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut headers = HashMap::new();
        headers.insert("x-ms-client-database".to_string(), props.database.clone());
        headers.insert("x-ms-client-table".to_string(), props.table.clone());
        headers.insert("x-ms-client-format".to_string(), format.wire_name().to_string());
        if let Some(mapping) = &props.ingestion_mapping_reference {
            headers.insert("x-ms-client-mapping".to_string(), mapping.clone());
        }
        if let Some(id) = &opts.client_request_id {
            headers.insert("x-ms-client-request-id".to_string(), id.clone());
        }

        let url = format!(
            "{}/v1/rest/ingest/{}/{}?streamFormat={}",
            self.streaming_endpoint.trim_end_matches('/'),
            props.database,
            props.table,
            format.wire_name()
        );
        let response = self.transport.do_request(Method::Post, &url, headers, Some(payload), cancel).await?;
        if !response.is_success() {
            return Err(KustoError::HttpError {
                op: Operation::StreamIngest,
                message: format!("streaming ingest returned status {}", response.status),
                source: None,
            });
        }
        Ok(())
    }

    /// Managed (§4.5 "Managed"): retries streaming with backoff, falls back to queued
    /// on oversize/non-retryable/blob-source. `source_is_blob_url` forces immediate
    /// fallback per §8 scenario "a blob URL input produces exactly one queued
    /// submission and zero streaming attempts".
    pub async fn ingest_managed(
        &self,
        payload: bytes::Bytes,
        source: IngestSource,
        props: &IngestionProperties,
        opts: &ManagedIngestOptions,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        if matches!(source, IngestSource::Blob(_)) {
            return self.fall_back_to_queued(source, props, cancel).await;
        }

        if payload.len() as u64 > opts.streaming_size_limit_bytes {
            return self.fall_back_to_queued(source, props, cancel).await;
        }

        let format = match &source {
            IngestSource::File(path) => infer_format(path, props.format)?.0,
            _ => props.format.unwrap_or(DataFormat::Csv),
        };

        let mut backoff = ExponentialBackoff::new(opts.max_streaming_attempts);
        let stream_opts = StreamingIngestOptions::default();
        loop {
            match self.ingest_stream(payload.clone(), format, props, &stream_opts, cancel.clone()).await {
                Ok(()) => {
                    return Ok(IngestionResult { ingestion_id: Uuid::new_v4(), status_table_ref: None });
                }
                Err(e) if !e.is_retryable() => {
                    return self.fall_back_to_queued(source, props, cancel).await;
                }
                Err(e) => match backoff.next_backoff(&e) {
                    Some(d) => cancellable_sleep(d, &cancel, Operation::StreamIngest).await?,
                    None => return self.fall_back_to_queued(source, props, cancel).await,
                },
            }
        }
    }

    async fn fall_back_to_queued(
        &self,
        source: IngestSource,
        props: &IngestionProperties,
        cancel: CancellationToken,
    ) -> Result<IngestionResult> {
        match source {
            IngestSource::File(path) => self.ingest_file_queued(&path, props, &QueuedIngestOptions::default(), cancel).await,
            IngestSource::Reader(r) => {
                self.ingest_reader_queued(r, "payload", props, cancel).await
            }
            IngestSource::Blob(url) => self.ingest_blob_queued(&url, None, props, cancel).await,
        }
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kusto_resources::ManagementExecutor;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    struct FakeExecutor;

    #[async_trait]
    impl ManagementExecutor for FakeExecutor {
        async fn resources(&self, _cancel: CancellationToken) -> Result<Vec<(String, String)>> {
            let mut rows: Vec<(String, String)> = (0..6)
                .map(|i| ("TempStorage".to_string(), format!("https://acct.blob.core.windows.net/c{i}?sv=1")))
                .collect();
            rows.push((
                "SecuredReadyForAggregationQueue".to_string(),
                "https://acct.queue.core.windows.net/q?sv=1".to_string(),
            ));
            Ok(rows)
        }

        async fn identity_token(&self, _cancel: CancellationToken) -> Result<String> {
            Ok("token".to_string())
        }
    }

    /// Fails the first `fail_first` upload attempts (regardless of which container was
    /// chosen), then records the fully-read payload on the attempt that succeeds.
    struct FlakyBlobUploader {
        attempts: AtomicUsize,
        fail_first: usize,
        uploaded: Mutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl BlobUploader for FlakyBlobUploader {
        async fn upload_stream(
            &self,
            mut reader: Box<dyn AsyncRead + Send + Unpin>,
            _container_url: &str,
            _blob_name: &str,
            _opts: BlobUploadOptions,
            _cancel: CancellationToken,
        ) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.unwrap();
            if attempt < self.fail_first {
                return Err(KustoError::Blobstore {
                    op: Operation::FileIngest,
                    message: "simulated failure".to_string(),
                    source: None,
                });
            }
            *self.uploaded.lock().unwrap() = Some(buf);
            Ok(())
        }

        async fn upload_file(
            &self,
            _path: &Path,
            _container_url: &str,
            _blob_name: &str,
            _opts: BlobUploadOptions,
            _cancel: CancellationToken,
        ) -> Result<()> {
            unimplemented!("not exercised by these tests")
        }
    }

    struct RecordingQueue {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueueClient for RecordingQueue {
        async fn enqueue(&self, _queue_url: &str, message: &str, _cancel: CancellationToken) -> Result<()> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct UnusedTransport;

    #[async_trait]
    impl HttpTransport for UnusedTransport {
        async fn do_request(
            &self,
            _method: Method,
            _url: &str,
            _headers: HashMap<String, String>,
            _body: Option<bytes::Bytes>,
            _cancel: CancellationToken,
        ) -> Result<kusto_core::transport::HttpResponse> {
            panic!("streaming must not be invoked for a blob-URL source")
        }
    }

    fn test_props() -> IngestionProperties {
        IngestionProperties {
            database: "db".to_string(),
            table: "t".to_string(),
            format: Some(DataFormat::Csv),
            dont_compress: false,
            flush_immediately: false,
            report_level: ReportLevel::FailuresOnly,
            report_method: ReportMethod::Queue,
            authorization_context: "ctx".to_string(),
            ingestion_mapping_reference: None,
            ingestion_mapping: None,
            ingestion_mapping_type: None,
            validation_policy: None,
            ignore_first_record: None,
            tags: None,
            ingest_if_not_exists: None,
        }
    }

    #[tokio::test]
    async fn queued_file_ingestion_retries_across_containers_and_gzips() {
        let path = std::env::temp_dir().join(format!("kusto-ingest-test-{}.csv", Uuid::new_v4()));
        std::fs::File::create(&path).unwrap().write_all(b"The quick brown fox").unwrap();

        let blobs =
            Arc::new(FlakyBlobUploader { attempts: AtomicUsize::new(0), fail_first: 2, uploaded: Mutex::new(None) });
        let queues = Arc::new(RecordingQueue { messages: Mutex::new(Vec::new()) });
        let resources = Arc::new(ResourceManager::new(Arc::new(FakeExecutor), Default::default()));

        let dispatcher = Dispatcher {
            transport: Arc::new(UnusedTransport),
            blobs: blobs.clone(),
            queues: queues.clone(),
            resources,
            streaming_endpoint: "https://ingest-cluster.example.net".to_string(),
        };

        let result = dispatcher
            .ingest_file_queued(
                &path,
                &test_props(),
                &QueuedIngestOptions { max_upload_attempts: 3 },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(blobs.attempts.load(Ordering::SeqCst), 3);
        let uploaded = blobs.uploaded.lock().unwrap().clone().unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&uploaded[..]);
        let mut text = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut text).unwrap();
        assert_eq!(text, "The quick brown fox");
        assert_eq!(queues.messages.lock().unwrap().len(), 1);
        assert!(result.status_table_ref.is_none());

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn queued_file_ingestion_reports_the_extension_inferred_format() {
        let path = std::env::temp_dir().join(format!("kusto-ingest-test-{}.json", Uuid::new_v4()));
        std::fs::File::create(&path).unwrap().write_all(b"{}").unwrap();

        let blobs =
            Arc::new(FlakyBlobUploader { attempts: AtomicUsize::new(0), fail_first: 0, uploaded: Mutex::new(None) });
        let queues = Arc::new(RecordingQueue { messages: Mutex::new(Vec::new()) });
        let resources = Arc::new(ResourceManager::new(Arc::new(FakeExecutor), Default::default()));

        let dispatcher = Dispatcher {
            transport: Arc::new(UnusedTransport),
            blobs,
            queues: queues.clone(),
            resources,
            streaming_endpoint: "https://ingest-cluster.example.net".to_string(),
        };

        let mut props = test_props();
        props.format = None;

        dispatcher
            .ingest_file_queued(&path, &props, &QueuedIngestOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        let message = queues.messages.lock().unwrap()[0].clone();
        let json_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, message).unwrap();
        let descriptor: serde_json::Value = serde_json::from_slice(&json_bytes).unwrap();
        assert_eq!(descriptor["AdditionalProperties"]["format"], "json");

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn managed_ingestion_with_blob_source_never_streams() {
        let queues = Arc::new(RecordingQueue { messages: Mutex::new(Vec::new()) });
        let resources = Arc::new(ResourceManager::new(Arc::new(FakeExecutor), Default::default()));
        let dispatcher = Dispatcher {
            transport: Arc::new(UnusedTransport),
            blobs: Arc::new(FlakyBlobUploader { attempts: AtomicUsize::new(0), fail_first: 0, uploaded: Mutex::new(None) }),
            queues: queues.clone(),
            resources,
            streaming_endpoint: "https://ingest-cluster.example.net".to_string(),
        };

        let result = dispatcher
            .ingest_managed(
                bytes::Bytes::from_static(b"irrelevant"),
                IngestSource::Blob("https://acct.blob.core.windows.net/c/already-uploaded.csv?sv=1".to_string()),
                &test_props(),
                &ManagedIngestOptions::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(queues.messages.lock().unwrap().len(), 1);
        assert!(result.status_table_ref.is_none());
    }
}
