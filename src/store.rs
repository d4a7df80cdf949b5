//! In-memory canonical stores and geometry helpers.
//!
//! This module is the geometry/store adapter: it owns the tabular+spatial
//! record types, sequential filtered scans, append and controlled update,
//! geometry construction and area computation. Ingestion stages never touch
//! coordinate systems or storage layout directly.
//!
//! `FlightStore` is a **single-writer** structure. Dedup-key snapshots and
//! the running-totals ledger are not transaction-isolated, so callers must
//! serialise ingestion runs per store - one run per operation at a time.

use std::collections::HashSet;

use geo::{Area, Coord, LineString, MultiPolygon, Point};
use serde::{Deserialize, Serialize};

use crate::{Bucket, TrackKey};

// ============================================================================
// Canonical Records
// ============================================================================

/// One canonical secondary GPS fix.
///
/// `machine`/`download` are unset until [`crate::merge::stamp_new_points`]
/// runs for the session; rows with `None` are "new" rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub position: Point<f64>,
    /// ISO-like timestamp text, kept verbatim from the export.
    pub time: String,
    pub speed: f64,
    pub block: String,
    pub machine: Option<String>,
    pub download: Option<String>,
}

/// One canonical application line.
///
/// Bucket and swath buffer stay unset until the coverage stage classifies
/// the row; rows with `swath_buffer == None` are "new" rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackLine {
    pub path: LineString<f64>,
    /// Timestamp of the line start, verbatim export text.
    pub time: String,
    pub speed: f64,
    /// Swath width in metres as recorded by the tracking unit.
    pub width: f64,
    pub block: String,
    pub machine: Option<String>,
    pub download: Option<String>,
    pub bucket: Option<Bucket>,
    pub swath_buffer: Option<f64>,
}

/// Buffer-generated coverage swath for one application line.
#[derive(Debug, Clone)]
pub struct CoveragePolygon {
    pub geometry: MultiPolygon<f64>,
    pub time: String,
    pub machine: String,
    pub download: String,
    pub block: String,
    pub bucket: String,
    pub hectares: f64,
}

/// Reconstructed transit leg between application lines.
#[derive(Debug, Clone)]
pub struct FlightPathSegment {
    pub path: LineString<f64>,
    pub start_time: chrono::NaiveDateTime,
    pub end_time: chrono::NaiveDateTime,
    pub machine: String,
    pub download: String,
    pub block: String,
}

/// One aggregated row of the running-totals ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub machine: String,
    pub download: String,
    pub block: String,
    pub bucket: String,
    pub hectares: f64,
    /// `HH:MM:SS` of the last point logged for the block in this download.
    pub last_log_time: String,
    pub nominal_area: Option<f64>,
    pub real_area: Option<f64>,
    pub distance_flown: Option<f64>,
    pub distance_applied: Option<f64>,
    /// Planned block area from the treatment-area table, 0 when unknown.
    pub block_area: f64,
}

/// Planned treatment block and its surveyed area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentBlock {
    pub name: String,
    pub hectares: f64,
}

// ============================================================================
// Store
// ============================================================================

/// Cumulative per-operation dataset: canonical line/point stores, coverage
/// polygons, reconstructed flight paths, the running-totals ledger and the
/// planned treatment blocks.
#[derive(Debug, Default)]
pub struct FlightStore {
    /// EPSG code of the stored geometry, set on first merge.
    pub epsg: Option<u32>,
    pub points: Vec<TrackPoint>,
    pub lines: Vec<TrackLine>,
    pub polygons: Vec<CoveragePolygon>,
    pub flight_paths: Vec<FlightPathSegment>,
    pub sum_totals: Vec<SummaryRow>,
    pub treatment_blocks: Vec<TreatmentBlock>,
}

impl FlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the store's coordinate system if undefined. An already-defined
    /// system is never overwritten.
    pub fn define_projection(&mut self, epsg: u32) {
        if self.epsg.is_none() {
            self.epsg = Some(epsg);
        }
    }

    /// Snapshot of every line dedup key. Taken once at merge start, not per
    /// row; concurrent merges against the same store are unsupported.
    pub fn line_key_set(&self) -> HashSet<String> {
        self.lines
            .iter()
            .map(|l| dedup_key(&l.time, l.speed))
            .collect()
    }

    /// Snapshot of every point dedup key.
    pub fn point_key_set(&self) -> HashSet<String> {
        self.points
            .iter()
            .map(|p| dedup_key(&p.time, p.speed))
            .collect()
    }

    /// Point rows belonging to a download session, in store (time) order.
    pub fn points_for(&self, key: &TrackKey) -> impl Iterator<Item = &TrackPoint> {
        let key = key.clone();
        self.points
            .iter()
            .filter(move |p| key.matches(p.machine.as_deref(), p.download.as_deref()))
    }

    /// Line rows belonging to a download session, in store order.
    pub fn lines_for(&self, key: &TrackKey) -> impl Iterator<Item = &TrackLine> {
        let key = key.clone();
        self.lines
            .iter()
            .filter(move |l| key.matches(l.machine.as_deref(), l.download.as_deref()))
    }

    /// Coverage polygons belonging to a download session.
    pub fn polygons_for(&self, key: &TrackKey) -> impl Iterator<Item = &CoveragePolygon> {
        let key = key.clone();
        self.polygons
            .iter()
            .filter(move |p| p.machine == key.machine && p.download == key.download)
    }

    /// Flight-path segments belonging to a download session.
    pub fn flight_paths_for(&self, key: &TrackKey) -> impl Iterator<Item = &FlightPathSegment> {
        let key = key.clone();
        self.flight_paths
            .iter()
            .filter(move |s| s.machine == key.machine && s.download == key.download)
    }
}

// ============================================================================
// Keys and Geometry Helpers
// ============================================================================

/// Composite dedup key guarding idempotent re-merge of a download.
///
/// The key is the timestamp text concatenated with the speed's display form,
/// so two speeds that format identically are the same key. This string
/// equality is deliberate - it mirrors how the canonical stores have always
/// been deduplicated - and is pinned by tests.
pub fn dedup_key(time: &str, speed: f64) -> String {
    format!("{time}_{speed}")
}

/// Build a polyline from an ordered coordinate run.
pub fn polyline_from(coords: Vec<Coord<f64>>) -> LineString<f64> {
    LineString::new(coords)
}

/// Area of a geometry in hectares, rounded to 4 decimal places.
pub fn hectares(geometry: &MultiPolygon<f64>) -> f64 {
    round4(geometry.unsigned_area() / 10_000.0)
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
