//! Error taxonomy for the ingestion pipeline.
//!
//! Three classes of trouble exist and only one of them is an `Err`:
//!
//! - **Skippable input problems** (empty export, wrong geometry kind,
//!   unrecognised schema, missing sidecar report, missing block-area entry)
//!   are logged with `warn!`/`error!` and processing continues with the next
//!   item. They never surface as a Rust error.
//! - **Preconditions** ("nothing new to process") short-circuit a stage with a
//!   zero/empty sentinel (`Ok(0)`, `Ok(None)`).
//! - **Real failures** (I/O, malformed CSV, unparseable canonical timestamps,
//!   bad configuration) abort the ingestion run for the current download via
//!   [`IngestError`].
//!
//! Dedup-key collisions and concurrent-writer clobbering are not detected at
//! runtime; prevention relies on the single-writer discipline documented on
//! [`FlightStore`](crate::store::FlightStore).

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error for an ingestion stage.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed export file: {0}")]
    Csv(#[from] csv::Error),

    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),

    #[error("corrupt export {path}: {detail}")]
    BadExport { path: PathBuf, detail: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Errors raised by the typed tool-settings map and project configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing settings key {0:?}")]
    MissingKey(String),

    #[error("settings key {key:?} is not a {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Errors raised by the sidecar application-report parser.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unrecognised report layout, first line {0:?}")]
    UnrecognisedLayout(String),

    #[error("report is truncated: expected at least 4 lines")]
    Truncated,

    #[error("report line {0:?} has no numeric value")]
    BadValue(String),
}
