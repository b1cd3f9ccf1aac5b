//! Shared data model, query builder, and error taxonomy for the kusto client crates.
//!
//! This crate has no I/O: it models the wire-independent pieces (§3, §4.1, §7) that
//! `kusto-data`, `kusto-ingest`, and `kusto-resources` all build on.

pub mod builder;
pub mod error;
pub mod model;
pub mod transport;
pub mod value;

pub use builder::{Literal, StatementBuilder};
pub use error::{KustoError, Operation, Result, ServiceErrorPayload};
pub use model::{Column, Row, RowError, RowMapper, Table, TableKind, TryFromRow};
pub use value::{KustoDateTime, KustoTimespan, ScalarKind, ScalarPayload, Value};
