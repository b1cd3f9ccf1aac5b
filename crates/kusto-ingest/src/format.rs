//! Format inference and the compress/don't-compress decision (§4.5).

use kusto_core::error::{KustoError, Operation};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Tsv,
    Json,
    Parquet,
    Avro,
    Orc,
    Raw,
    W3cLogFile,
}

impl DataFormat {
    /// The fixed suffix table (§4.5). Formats that are themselves a compressed
    /// container (`parquet`, `avro`, `orc`) are never gzipped on top.
    pub fn is_precompressed(self) -> bool {
        matches!(self, DataFormat::Parquet | DataFormat::Avro | DataFormat::Orc)
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix.to_ascii_lowercase().as_str() {
            "csv" => DataFormat::Csv,
            "tsv" => DataFormat::Tsv,
            "json" => DataFormat::Json,
            "parquet" => DataFormat::Parquet,
            "avro" => DataFormat::Avro,
            "orc" => DataFormat::Orc,
            "raw" => DataFormat::Raw,
            "w3clogfile" => DataFormat::W3cLogFile,
            _ => return None,
        })
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Tsv => "tsv",
            DataFormat::Json => "json",
            DataFormat::Parquet => "parquet",
            DataFormat::Avro => "avro",
            DataFormat::Orc => "orc",
            DataFormat::Raw => "raw",
            DataFormat::W3cLogFile => "w3clogfile",
        }
    }
}

/// Infers the format (and whether the file name already indicates gzip/zip
/// compression) from a path's suffix chain, falling back to `explicit` and finally
/// failing if neither is available (§4.5 "Unknown extensions default to
/// caller-provided format or an error if none given").
pub fn infer_format(path: &Path, explicit: Option<DataFormat>) -> Result<(DataFormat, bool), KustoError> {
    let mut already_compressed = false;
    let mut name = path.to_string_lossy().to_string();

    loop {
        let Some(dot) = name.rfind('.') else { break };
        let ext = name[dot + 1..].to_ascii_lowercase();
        match ext.as_str() {
            "gz" | "zip" => {
                already_compressed = true;
                name.truncate(dot);
                continue;
            }
            other => {
                if let Some(format) = DataFormat::from_suffix(other) {
                    return Ok((format, already_compressed));
                }
                break;
            }
        }
    }

    explicit
        .map(|f| (f, already_compressed))
        .ok_or_else(|| KustoError::client_args(Operation::FileIngest, format!("cannot infer format for {path:?}")))
}

/// §4.5's compress/don't-compress decision.
pub fn should_compress(format: DataFormat, already_compressed: bool, is_blob_url: bool, dont_compress: bool) -> bool {
    !(format.is_precompressed() || already_compressed || is_blob_url || dont_compress)
}
