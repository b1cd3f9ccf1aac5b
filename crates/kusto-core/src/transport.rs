//! Narrow interfaces to external collaborators the core consumes but never
//! implements (§6): HTTP transport, blob/queue/table storage, and credentials.
//! Concrete adapters (reqwest, an Azure SDK, ...) live in the embedding application.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// An HTTP method, kept minimal: the core only ever issues GET/POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// The response to a transport request. The core never inspects anything about
/// `status`/`headers` beyond what §7's error taxonomy requires (retryable 5xx/429
/// detection, structured-error bodies); no retry semantics live here (§6: "no retry
/// semantics; the core layers retry").
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_transient_failure(&self) -> bool {
        self.status >= 500 || self.status == 429
    }
}

/// `HttpTransport.do_request` (§6): the sole HTTP collaborator. No retry, no auth
/// injection beyond the headers the caller supplies -- both are layered by the core.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn do_request(
        &self,
        method: Method,
        url: &str,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
        cancel: CancellationToken,
    ) -> Result<HttpResponse>;
}

/// Options accompanying a blob upload, threaded through unmodified to the adapter.
#[derive(Debug, Clone, Default)]
pub struct BlobUploadOptions {
    pub content_type: Option<String>,
}

/// `BlobUploader.upload_stream` / `upload_file` (§6).
#[async_trait]
pub trait BlobUploader: Send + Sync {
    async fn upload_stream(
        &self,
        reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
        container_url: &str,
        blob_name: &str,
        opts: BlobUploadOptions,
        cancel: CancellationToken,
    ) -> Result<()>;

    async fn upload_file(
        &self,
        path: &std::path::Path,
        container_url: &str,
        blob_name: &str,
        opts: BlobUploadOptions,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// `QueueClient.enqueue` (§6): `message` is the already base64-encoded descriptor.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn enqueue(&self, queue_url: &str, message: &str, cancel: CancellationToken) -> Result<()>;
}

/// `TableClient.read` (§6): `None` means "row not present yet" (still in flight),
/// distinct from an error.
#[async_trait]
pub trait TableClient: Send + Sync {
    async fn read(
        &self,
        table_url: &str,
        row_key: &str,
        cancel: CancellationToken,
    ) -> Result<Option<serde_json::Value>>;
}

/// `Credentials.token` (§6).
#[async_trait]
pub trait Credentials: Send + Sync {
    async fn token(&self, cancel: CancellationToken) -> Result<String>;
}
