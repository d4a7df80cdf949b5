//! Swath classification and coverage-polygon generation.
//!
//! When a download session's application lines have been merged, each new
//! line row is classified into an application-rate bucket from its recorded
//! swath width, stamped with the session identity, and buffered into a
//! coverage polygon whose hectares feed the rollup stage.
//!
//! Buffering is a polygonal approximation: one quadrilateral per line
//! segment, unioned with octagonal joins at interior vertices (and octagonal
//! end caps for round-cap buckets). A deflector machine spreads to one side
//! only, so its lines buffer the right-hand side of travel with flat ends.

use geo::{BooleanOps, Coord, LineString, MultiPolygon, Polygon};
use log::{info, warn};

use crate::store::{hectares, CoveragePolygon, FlightStore};
use crate::{Bucket, CapStyle, TrackKey};

/// Which side of the line the swath extends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Both,
    Right,
}

/// Classify, stamp and buffer the new application-line rows for a session.
///
/// Returns the number of line rows finalized; 0 when there is nothing new.
/// Rows with a non-positive width are stamped but stay unclassified and
/// produce no coverage (reported).
pub fn finalize_lines(store: &mut FlightStore, key: &TrackKey, deflector: bool) -> usize {
    let new_rows: Vec<usize> = store
        .lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.swath_buffer.is_none() && l.download.is_none())
        .map(|(i, _)| i)
        .collect();
    if new_rows.is_empty() {
        return 0;
    }

    for &idx in &new_rows {
        let line = &mut store.lines[idx];
        line.machine = Some(key.machine.clone());
        line.download = Some(key.download.clone());
        match Bucket::from_width(line.width) {
            Some(bucket) => {
                line.bucket = Some(bucket);
                line.swath_buffer = Some(bucket.swath_buffer(line.width));
            }
            None => {
                warn!(
                    "line at {} has swath width {}, left unclassified",
                    line.time, line.width
                );
            }
        }
    }

    // Buffer the finalized rows in time order into the coverage store.
    let mut ordered = new_rows.clone();
    ordered.sort_by(|&a, &b| store.lines[a].time.cmp(&store.lines[b].time));

    let mut swaths = Vec::new();
    for idx in ordered {
        let line = &store.lines[idx];
        let (bucket, buffer) = match (line.bucket, line.swath_buffer) {
            (Some(b), Some(w)) => (b, w),
            _ => continue,
        };
        let (side, cap) = if deflector {
            (Side::Right, CapStyle::Flat)
        } else {
            (Side::Both, bucket.cap_style())
        };
        let geometry = buffer_line(&line.path, buffer, side, cap);
        if geometry.0.is_empty() {
            warn!("line at {} produced no swath geometry", line.time);
            continue;
        }
        let area = hectares(&geometry);
        swaths.push(CoveragePolygon {
            geometry,
            time: line.time.clone(),
            machine: key.machine.clone(),
            download: key.download.clone(),
            block: line.block.clone(),
            bucket: bucket.as_str().to_string(),
            hectares: area,
        });
    }

    info!(
        "{} line rows finalized, {} coverage polygons added for {key}",
        new_rows.len(),
        swaths.len()
    );
    store.polygons.extend(swaths);
    new_rows.len()
}

/// Buffer a polyline by `distance` on the requested side.
pub fn buffer_line(
    line: &LineString<f64>,
    distance: f64,
    side: Side,
    cap: CapStyle,
) -> MultiPolygon<f64> {
    let coords = &line.0;
    let mut swath: Option<MultiPolygon<f64>> = None;

    for pair in coords.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let len = (dx * dx + dy * dy).sqrt();
        if len == 0.0 {
            continue;
        }
        // Unit normals: left of travel and right of travel.
        let left = Coord {
            x: -dy / len * distance,
            y: dx / len * distance,
        };
        let right = Coord {
            x: dy / len * distance,
            y: -dx / len * distance,
        };
        let quad = match side {
            Side::Both => ring(vec![
                plus(a, left),
                plus(b, left),
                plus(b, right),
                plus(a, right),
            ]),
            Side::Right => ring(vec![a, b, plus(b, right), plus(a, right)]),
        };
        swath = Some(merge_into(swath, quad));
    }

    // Fill elbow gaps at interior vertices; round caps also cover the ends.
    if coords.len() >= 2 && side == Side::Both {
        let interior = &coords[1..coords.len() - 1];
        for &c in interior {
            swath = Some(merge_into(swath, octagon(c, distance)));
        }
        if cap == CapStyle::Round {
            swath = Some(merge_into(swath, octagon(coords[0], distance)));
            swath = Some(merge_into(
                swath,
                octagon(coords[coords.len() - 1], distance),
            ));
        }
    }

    swath.unwrap_or_else(|| MultiPolygon::new(vec![]))
}

fn plus(c: Coord<f64>, offset: Coord<f64>) -> Coord<f64> {
    Coord {
        x: c.x + offset.x,
        y: c.y + offset.y,
    }
}

fn ring(corners: Vec<Coord<f64>>) -> Polygon<f64> {
    Polygon::new(LineString::new(corners), vec![])
}

/// Eight-sided approximation of a radius-`r` disc.
fn octagon(center: Coord<f64>, r: f64) -> Polygon<f64> {
    let corners = (0..8)
        .map(|i| {
            let angle = std::f64::consts::FRAC_PI_4 * i as f64;
            Coord {
                x: center.x + r * angle.cos(),
                y: center.y + r * angle.sin(),
            }
        })
        .collect();
    ring(corners)
}

fn merge_into(acc: Option<MultiPolygon<f64>>, polygon: Polygon<f64>) -> MultiPolygon<f64> {
    let addition = MultiPolygon::new(vec![polygon]);
    match acc {
        None => addition,
        Some(existing) => existing.union(&addition),
    }
}
