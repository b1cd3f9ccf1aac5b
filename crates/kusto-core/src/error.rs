//! The closed error taxonomy shared by every crate in this workspace (§7).

use std::fmt;

/// Which high-level operation an error occurred during, carried for user-visible
/// rendering (§7 "User-visible behavior").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    FileIngest,
    ReaderIngest,
    BlobIngest,
    StreamIngest,
    ResourceRefresh,
    StatusPoll,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Query => "Query",
            Operation::FileIngest => "FileIngest",
            Operation::ReaderIngest => "ReaderIngest",
            Operation::BlobIngest => "BlobIngest",
            Operation::StreamIngest => "StreamIngest",
            Operation::ResourceRefresh => "ResourceRefresh",
            Operation::StatusPoll => "StatusPoll",
        };
        f.write_str(s)
    }
}

/// A structured error returned by the service itself, distinct from transport failures.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ServiceErrorPayload {
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

impl fmt::Display for ServiceErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// The closed taxonomy of §7, independent of HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum KustoError {
    #[error("[{op}] caller violated the API contract: {message}")]
    ClientArgs { op: Operation, message: String },

    #[error("[{op}] local file system error for {path:?}: {source}")]
    LocalFileSystem {
        op: Operation,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{op}] blob upload failed: {message}")]
    Blobstore {
        op: Operation,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[{op}] queue enqueue failed: {message}")]
    Queue {
        op: Operation,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[{op}] transport error: {message}")]
    HttpError {
        op: Operation,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[{op}] service error: {payload}")]
    ServiceError {
        op: Operation,
        payload: ServiceErrorPayload,
    },

    #[error("[{op}] response violated the frame contract: {message}")]
    Decode { op: Operation, message: String },

    #[error("[{op}] deadline exceeded")]
    Timeout { op: Operation },

    #[error("[{op}] cancelled")]
    Cancelled { op: Operation },

    #[error("[{op}] internal error (should not happen): {message}")]
    Internal { op: Operation, message: String },
}

impl KustoError {
    pub fn operation(&self) -> Operation {
        match self {
            KustoError::ClientArgs { op, .. }
            | KustoError::LocalFileSystem { op, .. }
            | KustoError::Blobstore { op, .. }
            | KustoError::Queue { op, .. }
            | KustoError::HttpError { op, .. }
            | KustoError::ServiceError { op, .. }
            | KustoError::Decode { op, .. }
            | KustoError::Timeout { op, .. }
            | KustoError::Cancelled { op, .. }
            | KustoError::Internal { op, .. } => *op,
        }
    }

    /// §7's "Inspect `@permanent`" rule for `ServiceError`; every other retryable kind
    /// (`Blobstore`, `Queue`, `HttpError`) is always retryable, and everything else never is.
    pub fn is_retryable(&self) -> bool {
        match self {
            KustoError::Blobstore { .. } | KustoError::Queue { .. } | KustoError::HttpError { .. } => true,
            KustoError::ServiceError { payload, .. } => !payload.permanent,
            _ => false,
        }
    }

    pub fn client_args(op: Operation, message: impl Into<String>) -> Self {
        KustoError::ClientArgs { op, message: message.into() }
    }

    pub fn decode(op: Operation, message: impl Into<String>) -> Self {
        KustoError::Decode { op, message: message.into() }
    }

    pub fn internal(op: Operation, message: impl Into<String>) -> Self {
        KustoError::Internal { op, message: message.into() }
    }

    pub fn cancelled(op: Operation) -> Self {
        KustoError::Cancelled { op }
    }

    pub fn timeout(op: Operation) -> Self {
        KustoError::Timeout { op }
    }
}

pub type Result<T> = std::result::Result<T, KustoError>;
