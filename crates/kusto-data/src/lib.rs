//! Streaming v1/v2 frame decoding and the iterative dataset built on top of it (§4.2, §4.3).

pub mod assemble;
pub mod convert;
pub mod dataset;
pub mod events;
pub mod stream_decode;
pub mod wire;

pub use dataset::{Dataset, DatasetCompletion, DatasetOptions, TableMeta};
pub use events::RawEvent;
