//! Top-level facade bundling the query path, the ingestion dispatcher, and the
//! shared resource manager behind one constructor (§2).

pub mod client;
pub mod management;

pub use client::{Client, ClientKind, ClientOptions};
pub use management::EngineManagementExecutor;
