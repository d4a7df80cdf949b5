//! Record Merge Engine.
//!
//! Merges a download session's raw export files into the canonical line and
//! point stores. Merging is idempotent: the composite dedup key
//! (`timestamp_speed`, see [`crate::store::dedup_key`]) guards every append,
//! so re-merging the same download adds nothing. Existing rows are never
//! rewritten or deleted.
//!
//! The dedup-key snapshot is collected once per merge call, not per row;
//! concurrent merges against the same store are unsupported (single-writer
//! model).

use std::path::Path;

use geo::Point;
use log::{error, info, warn};

use crate::config::ProjectConfig;
use crate::error::IngestError;
use crate::raw::{self, ExportOutcome, RawFile, ShapeKind, SkipReason};
use crate::store::{dedup_key, polyline_from, FlightStore, TrackLine, TrackPoint};
use crate::TrackKey;

/// What one merge call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub files_seen: usize,
    pub files_skipped: usize,
    pub rows_added: usize,
}

/// Merge every application-line export under `root` into the canonical line
/// store.
pub fn merge_into_lines(
    root: &Path,
    store: &mut FlightStore,
    cfg: &ProjectConfig,
) -> Result<MergeOutcome, IngestError> {
    merge_exports(root, &cfg.line_suffix, ShapeKind::Polyline, store, cfg)
}

/// Merge every secondary-point export under `root` into the canonical point
/// store.
pub fn merge_into_points(
    root: &Path,
    store: &mut FlightStore,
    cfg: &ProjectConfig,
) -> Result<MergeOutcome, IngestError> {
    merge_exports(root, &cfg.point_suffix, ShapeKind::Point, store, cfg)
}

fn merge_exports(
    root: &Path,
    suffix: &str,
    target: ShapeKind,
    store: &mut FlightStore,
    cfg: &ProjectConfig,
) -> Result<MergeOutcome, IngestError> {
    let files = raw::discover_exports(root, suffix)?;

    // One key-set snapshot for the whole merge call.
    let mut seen_keys = match target {
        ShapeKind::Polyline => store.line_key_set(),
        ShapeKind::Point => store.point_key_set(),
    };

    let mut outcome = MergeOutcome::default();
    for path in files {
        outcome.files_seen += 1;

        let parsed = match raw::read_export(&path, cfg)? {
            ExportOutcome::Parsed(file) if file.kind != target => {
                warn!(
                    "{}: {}, skipped",
                    path.display(),
                    SkipReason::WrongGeometry(file.kind)
                );
                outcome.files_skipped += 1;
                continue;
            }
            ExportOutcome::Parsed(file) => file,
            ExportOutcome::Skipped(reason @ SkipReason::UnrecognisedSchema(_)) => {
                error!("{}: {}, check your data", path.display(), reason);
                outcome.files_skipped += 1;
                continue;
            }
            ExportOutcome::Skipped(reason) => {
                warn!("{}: {}, skipped", path.display(), reason);
                outcome.files_skipped += 1;
                continue;
            }
        };

        // Assign the coordinate system when undefined; never overwrite.
        store.define_projection(parsed.epsg.unwrap_or(cfg.default_epsg));

        let block = raw::derive_block_name(&path, root, cfg);
        let added = match target {
            ShapeKind::Polyline => append_lines(store, &parsed, &block, &mut seen_keys),
            ShapeKind::Point => append_points(store, &parsed, &block, &mut seen_keys),
        };
        info!("{} rows added from {}", added, path.display());
        outcome.rows_added += added;
    }

    Ok(outcome)
}

fn append_lines(
    store: &mut FlightStore,
    file: &RawFile,
    block: &str,
    seen_keys: &mut std::collections::HashSet<String>,
) -> usize {
    let mut added = 0;
    for record in &file.records {
        let key = dedup_key(&record.time, record.speed);
        if !seen_keys.insert(key) {
            continue;
        }
        store.lines.push(TrackLine {
            path: polyline_from(record.vertices.clone()),
            time: record.time.clone(),
            speed: record.speed,
            width: record.width.unwrap_or(0.0),
            block: block.to_string(),
            machine: None,
            download: None,
            bucket: None,
            swath_buffer: None,
        });
        added += 1;
    }
    added
}

fn append_points(
    store: &mut FlightStore,
    file: &RawFile,
    block: &str,
    seen_keys: &mut std::collections::HashSet<String>,
) -> usize {
    let mut added = 0;
    for record in &file.records {
        let key = dedup_key(&record.time, record.speed);
        if !seen_keys.insert(key) {
            continue;
        }
        let vertex = record.vertices[0];
        store.points.push(TrackPoint {
            position: Point::new(vertex.x, vertex.y),
            time: record.time.clone(),
            speed: record.speed,
            block: block.to_string(),
            machine: None,
            download: None,
        });
        added += 1;
    }
    added
}

/// Stamp machine and download-session identity onto freshly merged point
/// rows, then return how many rows now belong to the session.
pub fn stamp_new_points(store: &mut FlightStore, key: &TrackKey) -> usize {
    for point in store.points.iter_mut().filter(|p| p.download.is_none()) {
        point.machine = Some(key.machine.clone());
        point.download = Some(key.download.clone());
    }

    let selected = store.points_for(key).count();
    if selected == 0 {
        info!("there are no new point records to add for {key}");
    }
    selected
}
