//! Flight-path reconstruction from secondary telemetry.
//!
//! Tracking units log two point streams: primary fixes during application and
//! secondary fixes in transit. Secondary points carry no start/end grouping,
//! so transit legs are inferred with a single-pass greedy line-breaking scan:
//! a segment boundary is declared whenever a point both lies within a
//! proximity threshold of an as-yet-unused application-line start anchor and
//! precedes that anchor in time within a five-second window - the aircraft is
//! re-approaching a known application line, so the transit leg just ended.
//!
//! Anchor candidates are indexed in an R-tree. When several anchors fall
//! inside the threshold the minimum distance wins, and equidistant anchors
//! tie-break on the earliest anchor timestamp so reconstruction is
//! deterministic.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use geo::Coord;
use log::info;
use rstar::{primitives::GeomWithData, RTree};

use crate::error::IngestError;
use crate::store::{polyline_from, FlightPathSegment, FlightStore};
use crate::{parse_track_time, TrackKey};

/// Start vertex and time of a newly merged application line.
#[derive(Debug, Clone)]
struct Anchor {
    position: Coord<f64>,
    time: NaiveDateTime,
}

/// Maximum seconds a point may precede its anchor and still cut a segment.
const ANCHOR_TIME_WINDOW_SECS: i64 = 5;

/// Reconstruct transit-leg polylines for one download session.
///
/// Consumes the session's secondary points in store (time) order, cutting at
/// unused line-start anchors, and appends the resulting segments to the
/// flight-path store. Returns the number of segments created; zero new
/// secondary points is a no-op.
pub fn reconstruct_flight_paths(
    store: &mut FlightStore,
    key: &TrackKey,
    operation_start: NaiveDateTime,
) -> Result<usize, IngestError> {
    let new_points: Vec<_> = store.points_for(key).cloned().collect();
    if new_points.is_empty() {
        return Ok(0);
    }

    // Proximity threshold scales with how fast the aircraft was moving.
    let mean_speed =
        new_points.iter().map(|p| p.speed).sum::<f64>() / new_points.len() as f64;
    let threshold = if mean_speed < 40.0 { 5.0 } else { 10.0 };

    let anchors = collect_anchors(store, key)?;
    let index: RTree<GeomWithData<[f64; 2], usize>> = RTree::bulk_load(
        anchors
            .iter()
            .enumerate()
            .map(|(i, a)| GeomWithData::new([a.position.x, a.position.y], i))
            .collect(),
    );

    let mut used_anchors: HashSet<usize> = HashSet::new();
    let mut buffer: Vec<Coord<f64>> = Vec::new();
    let mut accumulating = true;
    let mut start_time = parse_track_time(&new_points[0].time)?;
    let mut end_time = start_time;
    let mut block = new_points[0].block.clone();
    let mut segments = Vec::new();

    for point in &new_points {
        let time = parse_track_time(&point.time)?;
        if time <= operation_start {
            continue;
        }
        block = point.block.clone();
        let coord = Coord {
            x: point.position.x(),
            y: point.position.y(),
        };

        if !accumulating {
            start_time = time;
        }

        let cut_anchor = nearest_unused_anchor(&index, &anchors, &used_anchors, coord, threshold)
            .filter(|(_, anchor)| {
                let gap = (anchor.time - time).num_seconds();
                accumulating && time <= anchor.time && gap < ANCHOR_TIME_WINDOW_SECS
            });

        match cut_anchor {
            Some((anchor_idx, _)) if !buffer.is_empty() => {
                buffer.push(coord);
                end_time = time;
                segments.push(FlightPathSegment {
                    path: polyline_from(std::mem::take(&mut buffer)),
                    start_time,
                    end_time,
                    machine: key.machine.clone(),
                    download: key.download.clone(),
                    block: block.clone(),
                });
                used_anchors.insert(anchor_idx);
                accumulating = false;
                start_time = time;
            }
            Some(_) => {
                // Matched an anchor but there is nothing to cut yet.
                buffer.push(coord);
                end_time = time;
            }
            None => {
                buffer.push(coord);
                accumulating = true;
                end_time = time;
            }
        }
    }

    // Flush the trailing run as a final segment.
    if !buffer.is_empty() {
        segments.push(FlightPathSegment {
            path: polyline_from(buffer),
            start_time,
            end_time,
            machine: key.machine.clone(),
            download: key.download.clone(),
            block,
        });
    }

    let created = segments.len();
    store.flight_paths.extend(segments);
    info!("{created} transit legs reconstructed for {key}");
    Ok(created)
}

fn collect_anchors(store: &FlightStore, key: &TrackKey) -> Result<Vec<Anchor>, IngestError> {
    let mut anchors = Vec::new();
    for line in store.lines_for(key) {
        let start = match line.path.0.first() {
            Some(c) => *c,
            None => continue,
        };
        anchors.push(Anchor {
            position: start,
            time: parse_track_time(&line.time)?,
        });
    }
    Ok(anchors)
}

/// Closest unused anchor strictly within `(0, threshold)` of the point.
/// Equidistant candidates resolve to the earliest anchor time.
fn nearest_unused_anchor(
    index: &RTree<GeomWithData<[f64; 2], usize>>,
    anchors: &[Anchor],
    used: &HashSet<usize>,
    point: Coord<f64>,
    threshold: f64,
) -> Option<(usize, Anchor)> {
    let origin = [point.x, point.y];
    index
        .locate_within_distance(origin, threshold * threshold)
        .filter(|c| !used.contains(&c.data))
        .map(|c| {
            let dx = c.geom()[0] - point.x;
            let dy = c.geom()[1] - point.y;
            (c.data, dx * dx + dy * dy)
        })
        .filter(|&(_, d2)| d2 > 0.0)
        .min_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| anchors[a.0].time.cmp(&anchors[b.0].time))
        })
        .map(|(idx, _)| (idx, anchors[idx].clone()))
}
