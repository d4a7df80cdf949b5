//! # Airtrack
//!
//! Ingestion pipeline for raw GPS track exports from aerial-application
//! tracking units. Each download session from a machine is merged into
//! cumulative canonical stores, missing transit geometry is reconstructed
//! from secondary telemetry, and coverage is rolled up per treatment block.
//!
//! The pipeline runs three stages in order for every new download:
//!
//! 1. **Merge** ([`merge`]) - normalise the two raw schema variants into one
//!    canonical record shape and append the non-duplicate rows to the line
//!    and point stores.
//! 2. **Segmentation** ([`segmentation`]) - scan the newly added secondary
//!    points against the start anchors of the newly merged application lines
//!    and emit reconstructed transit-leg polylines.
//! 3. **Rollup** ([`rollup`]) - aggregate the new coverage polygons into
//!    per-block summary rows and maintain the running-totals ledger, with a
//!    full-history dissolve and CSV export on demand.
//!
//! All stages are single-threaded and run to completion; callers must
//! serialise ingestion runs against the same [`FlightStore`].
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use airtrack::{FlightStore, ProjectConfig, TrackKey};
//!
//! let cfg = ProjectConfig::default();
//! let mut store = FlightStore::new();
//! let key = TrackKey::new("JKC", "0910");
//!
//! let root = Path::new("exports/JKC/0910");
//! airtrack::merge::merge_into_lines(root, &mut store, &cfg).unwrap();
//! airtrack::merge::merge_into_points(root, &mut store, &cfg).unwrap();
//! airtrack::merge::stamp_new_points(&mut store, &key);
//! airtrack::coverage::finalize_lines(&mut store, &key, false);
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod coverage;
pub mod error;
pub mod merge;
pub mod raw;
pub mod report;
pub mod rollup;
pub mod segmentation;
pub mod store;

pub use config::{ProjectConfig, ToolSettings};
pub use error::{ConfigError, IngestError, ReportError};
pub use merge::{merge_into_lines, merge_into_points, stamp_new_points, MergeOutcome};
pub use report::ApplicationReport;
pub use rollup::{summarize_download, summarize_history, HistoryRollup};
pub use segmentation::reconstruct_flight_paths;
pub use store::{
    CoveragePolygon, FlightPathSegment, FlightStore, SummaryRow, TrackLine, TrackPoint,
    TreatmentBlock,
};

// ============================================================================
// Core Types
// ============================================================================

/// Identity of one download session: the machine that produced the data and
/// the time the unit was downloaded (e.g. `"0910"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackKey {
    pub machine: String,
    pub download: String,
}

impl TrackKey {
    pub fn new(machine: impl Into<String>, download: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            download: download.into(),
        }
    }

    /// True when a canonical row carrying optional machine/download fields
    /// belongs to this session.
    pub fn matches(&self, machine: Option<&str>, download: Option<&str>) -> bool {
        machine == Some(self.machine.as_str()) && download == Some(self.download.as_str())
    }
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.machine, self.download)
    }
}

/// Application-rate category derived from the aircraft's swath width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    Broadcast,
    Narrow,
    Trickle,
    Sprayboom,
}

/// End-cap style used when buffering an application line into a swath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapStyle {
    Round,
    Flat,
}

impl Bucket {
    /// Classify a swath width in metres. Widths of zero or less carry no
    /// bucket (the row is left unclassified and produces no coverage).
    pub fn from_width(width: f64) -> Option<Self> {
        if width >= 120.0 {
            Some(Bucket::Broadcast)
        } else if width >= 40.0 {
            Some(Bucket::Narrow)
        } else if width >= 4.0 {
            Some(Bucket::Trickle)
        } else if width > 0.0 {
            Some(Bucket::Sprayboom)
        } else {
            None
        }
    }

    /// Buffer distance for a swath of this bucket. Trickle buckets use a
    /// fixed 15 m swath, everything else buffers half the recorded width.
    pub fn swath_buffer(&self, width: f64) -> f64 {
        match self {
            Bucket::Trickle => 15.0,
            _ => width / 2.0,
        }
    }

    pub fn cap_style(&self) -> CapStyle {
        match self {
            Bucket::Broadcast | Bucket::Narrow => CapStyle::Round,
            Bucket::Trickle | Bucket::Sprayboom => CapStyle::Flat,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Broadcast => "Broadcast",
            Bucket::Narrow => "Narrow",
            Bucket::Trickle => "Trickle",
            Bucket::Sprayboom => "Sprayboom",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// Parse the leading `YYYY-MM-DDTHH:MM:SS` of a canonical timestamp string.
///
/// Canonical rows keep the tracking unit's ISO-like text verbatim (including
/// any UTC offset); only the first 19 characters take part in temporal
/// comparisons.
pub fn parse_track_time(text: &str) -> Result<NaiveDateTime, IngestError> {
    let head = text
        .get(0..19)
        .ok_or_else(|| IngestError::Timestamp(text.to_string()))?;
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| IngestError::Timestamp(text.to_string()))
}

/// Time-of-day portion (`HH:MM:SS`) of a canonical timestamp string.
pub fn time_of_day(text: &str) -> Result<&str, IngestError> {
    text.get(11..19)
        .ok_or_else(|| IngestError::Timestamp(text.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
