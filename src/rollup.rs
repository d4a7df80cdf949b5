//! Per-download summary rows and the full-history dissolve.
//!
//! `summarize_download` turns a session's coverage polygons into rows of the
//! running-totals ledger: grouped by block and bucket, cross-referenced with
//! the sidecar application report and the planned treatment-block areas, and
//! collapsed so repeated passes over one block fold into a single ledger
//! line per batch.
//!
//! `summarize_history` is the whole-operation view: it dissolves every
//! coverage polygon by block, computes sown percentage against the dissolved
//! block area and writes one CSV per run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use geo::{BooleanOps, MultiPolygon};
use log::{info, warn};

use crate::error::IngestError;
use crate::report::{locate_report, parse_report};
use crate::store::{hectares, round2, round4, FlightStore, SummaryRow};
use crate::{time_of_day, TrackKey};

/// Result of a full-history summarization run.
#[derive(Debug)]
pub struct HistoryRollup {
    /// Dissolved per-block coverage, name and hectares, block-name order.
    pub blocks: Vec<(String, f64)>,
    /// Hectares of the all-blocks dissolve.
    pub total_hectares: f64,
    /// The CSV written for this run.
    pub csv_path: PathBuf,
}

// ============================================================================
// Per-download Summary
// ============================================================================

/// Aggregate a session's coverage polygons into the running-totals ledger.
///
/// `raw_root` is the export tree root, used to locate the sidecar report for
/// each block. Returns the number of ledger rows appended; a session with no
/// coverage polygons is a no-op returning `Ok(0)`.
pub fn summarize_download(
    store: &mut FlightStore,
    raw_root: &Path,
    key: &TrackKey,
) -> Result<usize, IngestError> {
    // (block, bucket) -> summed hectares, in (block, bucket) order.
    let mut groups: BTreeMap<(String, String), f64> = BTreeMap::new();
    for poly in store.polygons_for(key) {
        *groups
            .entry((poly.block.clone(), poly.bucket.clone()))
            .or_insert(0.0) += poly.hectares;
    }
    if groups.is_empty() {
        info!("no new coverage for {key}, nothing to summarize");
        return Ok(0);
    }

    let mut rows: Vec<SummaryRow> = Vec::new();
    for ((block, bucket), sown) in groups {
        let last_log_time = last_log_time(store, key, &block)?;

        let report = match locate_report(raw_root, key, &block) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)?;
                match parse_report(&text) {
                    Ok((report, _)) => Some(report),
                    Err(err) => {
                        warn!("sidecar report {} not usable: {err}", path.display());
                        None
                    }
                }
            }
            None => {
                warn!("no sidecar report for {key} block {block:?}");
                None
            }
        };

        let block_area = planned_block_area(store, &block).unwrap_or_else(|| {
            warn!("block {block:?} has no planned-area entry, using 0");
            0.0
        });

        let row = SummaryRow {
            machine: key.machine.clone(),
            download: key.download.clone(),
            block,
            bucket,
            hectares: round4(sown),
            last_log_time,
            nominal_area: report.map(|r| r.nominal_area),
            real_area: report.map(|r| r.real_area),
            distance_flown: report.map(|r| r.distance_flown),
            distance_applied: report.map(|r| r.distance_applied),
            block_area,
        };

        // Repeated passes over one block fold into a single ledger line; the
        // later row survives with the summed hectares.
        match rows.last_mut() {
            Some(prev) if prev.machine == row.machine && prev.block == row.block => {
                let mut merged = row;
                merged.hectares = round4(merged.hectares + prev.hectares);
                *prev = merged;
            }
            _ => rows.push(row),
        }
    }

    let appended = rows.len();
    store.sum_totals.extend(rows);
    info!("appended {appended} summary rows for {key}");
    Ok(appended)
}

/// `HH:MM:SS` of the last point logged for the block in this session,
/// falling back to the last coverage polygon's time when the session has no
/// secondary points for the block.
fn last_log_time(store: &FlightStore, key: &TrackKey, block: &str) -> Result<String, IngestError> {
    let from_points = store
        .points_for(key)
        .filter(|p| p.block == block)
        .last()
        .map(|p| p.time.clone());
    let time = match from_points {
        Some(t) => t,
        None => store
            .polygons_for(key)
            .filter(|p| p.block == block)
            .last()
            .map(|p| p.time.clone())
            .unwrap_or_default(),
    };
    Ok(time_of_day(&time)?.to_string())
}

/// Planned area lookup against the treatment-block table, case-insensitive
/// on the title-cased block name.
fn planned_block_area(store: &FlightStore, block: &str) -> Option<f64> {
    let wanted = title_case(block);
    store
        .treatment_blocks
        .iter()
        .find(|b| b.name.eq_ignore_ascii_case(&wanted))
        .map(|b| b.hectares)
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.extend(chars.flat_map(|c| c.to_lowercase()));
        }
    }
    out
}

// ============================================================================
// Full-history Rollup
// ============================================================================

/// Dissolve all coverage history by block and write the summary CSV.
///
/// Any polygon with an empty block name poisons the per-block dissolve, so
/// the run is skipped with a warning and `Ok(None)`. Otherwise returns the
/// dissolved blocks, the all-blocks total and the path of the CSV written
/// under `output_dir`.
pub fn summarize_history(
    store: &FlightStore,
    output_dir: &Path,
) -> Result<Option<HistoryRollup>, IngestError> {
    if store.polygons.is_empty() {
        warn!("no coverage history to summarize");
        return Ok(None);
    }
    if store.polygons.iter().any(|p| p.block.is_empty()) {
        warn!("coverage history contains polygons without a block name, skipping rollup");
        return Ok(None);
    }

    // Block -> dissolved geometry.
    let mut dissolved: BTreeMap<String, MultiPolygon<f64>> = BTreeMap::new();
    let mut total: Option<MultiPolygon<f64>> = None;
    for poly in &store.polygons {
        dissolved
            .entry(poly.block.clone())
            .and_modify(|d| *d = d.union(&poly.geometry))
            .or_insert_with(|| poly.geometry.clone());
        total = Some(match total {
            Some(t) => t.union(&poly.geometry),
            None => poly.geometry.clone(),
        });
    }
    let blocks: Vec<(String, f64)> = dissolved
        .iter()
        .map(|(name, geom)| (name.clone(), hectares(geom)))
        .collect();
    let total_hectares = total.as_ref().map(hectares).unwrap_or(0.0);

    // Ledger rows in (block, last-log-time) order, consecutive same-block
    // rows collapsed by summing sown hectares.
    let mut rows: Vec<SummaryRow> = store.sum_totals.clone();
    rows.sort_by(|a, b| {
        (a.block.as_str(), a.last_log_time.as_str())
            .cmp(&(b.block.as_str(), b.last_log_time.as_str()))
    });
    let mut collapsed: Vec<SummaryRow> = Vec::new();
    for row in rows {
        match collapsed.last_mut() {
            Some(prev) if prev.block == row.block => {
                let mut merged = row;
                merged.hectares = round4(merged.hectares + prev.hectares);
                *prev = merged;
            }
            _ => collapsed.push(row),
        }
    }

    let csv_path = output_dir.join(format!(
        "sum_totals_{}.csv",
        chrono::Local::now().format("%H%M")
    ));
    let mut writer = csv::Writer::from_path(&csv_path)?;
    writer.write_record([
        "block",
        "last_log_time",
        "hectares_sown",
        "dissolved_area",
        "percentage_sown",
    ])?;

    let mut sown_total = 0.0;
    for row in &collapsed {
        let dissolved_area = dissolved.get(&row.block).map(hectares).unwrap_or(0.0);
        sown_total += row.hectares;
        writer.write_record([
            row.block.clone(),
            row.last_log_time.clone(),
            row.hectares.to_string(),
            round4(dissolved_area).to_string(),
            percentage_sown(row.hectares, dissolved_area).to_string(),
        ])?;
    }
    writer.write_record([
        "Total".to_string(),
        String::new(),
        round4(sown_total).to_string(),
        total_hectares.to_string(),
        percentage_sown(sown_total, total_hectares).to_string(),
    ])?;
    writer.flush()?;

    info!(
        "full-history rollup: {} blocks, {total_hectares} ha dissolved, wrote {}",
        blocks.len(),
        csv_path.display()
    );
    Ok(Some(HistoryRollup {
        blocks,
        total_hectares,
        csv_path,
    }))
}

/// Sown coverage as a percentage of the dissolved block area, 2 dp. A zero
/// dissolved area yields 0 rather than a division by zero.
fn percentage_sown(sown: f64, dissolved: f64) -> f64 {
    if dissolved == 0.0 {
        0.0
    } else {
        round2(sown / dissolved * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CoveragePolygon, TreatmentBlock};
    use geo::polygon;

    fn square(x0: f64, y0: f64, side: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
        ]])
    }

    fn poly(block: &str, bucket: &str, ha: f64, geometry: MultiPolygon<f64>) -> CoveragePolygon {
        CoveragePolygon {
            geometry,
            time: "2023-09-01T08:15:00+1300".to_string(),
            machine: "JKC".to_string(),
            download: "0910".to_string(),
            block: block.to_string(),
            bucket: bucket.to_string(),
            hectares: ha,
        }
    }

    #[test]
    fn test_no_new_polygons_is_a_sentinel() {
        let mut store = FlightStore::new();
        let dir = tempfile::tempdir().unwrap();
        let key = TrackKey::new("JKC", "0910");
        assert_eq!(summarize_download(&mut store, dir.path(), &key).unwrap(), 0);
        assert!(store.sum_totals.is_empty());
    }

    #[test]
    fn test_same_block_rows_collapse_by_summing() {
        let mut store = FlightStore::new();
        // Two buckets in one block collapse to a single ledger line.
        store
            .polygons
            .push(poly("North", "Narrow", 3.2, square(0.0, 0.0, 100.0)));
        store
            .polygons
            .push(poly("North", "Trickle", 4.8, square(500.0, 0.0, 100.0)));
        store.treatment_blocks.push(TreatmentBlock {
            name: "North".to_string(),
            hectares: 12.0,
        });

        let dir = tempfile::tempdir().unwrap();
        let key = TrackKey::new("JKC", "0910");
        let n = summarize_download(&mut store, dir.path(), &key).unwrap();
        assert_eq!(n, 1);
        let row = &store.sum_totals[0];
        assert_eq!(row.hectares, 8.0);
        assert_eq!(row.block, "North");
        assert_eq!(row.block_area, 12.0);
        assert_eq!(row.last_log_time, "08:15:00");
    }

    #[test]
    fn test_distinct_blocks_stay_separate() {
        let mut store = FlightStore::new();
        store
            .polygons
            .push(poly("North", "Narrow", 3.2, square(0.0, 0.0, 100.0)));
        store
            .polygons
            .push(poly("South", "Narrow", 4.8, square(500.0, 0.0, 100.0)));

        let dir = tempfile::tempdir().unwrap();
        let key = TrackKey::new("JKC", "0910");
        let n = summarize_download(&mut store, dir.path(), &key).unwrap();
        assert_eq!(n, 2);
        // No planned-area table, so both default to 0.
        assert!(store.sum_totals.iter().all(|r| r.block_area == 0.0));
    }

    #[test]
    fn test_sidecar_report_feeds_summary_fields() {
        let dir = tempfile::tempdir().unwrap();
        let dl = dir.path().join("JKC/0910");
        std::fs::create_dir_all(&dl).unwrap();
        std::fs::write(
            dl.join("report.txt"),
            "Area nominal: 85.1 ha\nArea real: 81.7 ha\nDistance flown: 102.4 km\nDistance spread: 74.0 km\n",
        )
        .unwrap();

        let mut store = FlightStore::new();
        store
            .polygons
            .push(poly("North", "Narrow", 3.2, square(0.0, 0.0, 100.0)));
        let key = TrackKey::new("JKC", "0910");
        summarize_download(&mut store, dir.path(), &key).unwrap();
        let row = &store.sum_totals[0];
        assert_eq!(row.nominal_area, Some(85.1));
        assert_eq!(row.distance_applied, Some(74.0));
    }

    #[test]
    fn test_title_cased_block_area_lookup() {
        let mut store = FlightStore::new();
        store.treatment_blocks.push(TreatmentBlock {
            name: "North Face".to_string(),
            hectares: 9.5,
        });
        assert_eq!(planned_block_area(&store, "north face"), Some(9.5));
        assert_eq!(planned_block_area(&store, "NORTH FACE"), Some(9.5));
        assert_eq!(planned_block_area(&store, "west"), None);
    }

    #[test]
    fn test_percentage_sown_rounding_and_zero_area() {
        assert_eq!(percentage_sown(4.0, 10.0), 40.0);
        assert_eq!(percentage_sown(1.0, 3.0), 33.33);
        assert_eq!(percentage_sown(4.0, 0.0), 0.0);
    }

    #[test]
    fn test_history_rollup_writes_csv() {
        let mut store = FlightStore::new();
        // 100 m squares, 1 ha each, overlapping halves dissolve to 1.5 ha.
        store
            .polygons
            .push(poly("North", "Narrow", 1.0, square(0.0, 0.0, 100.0)));
        store
            .polygons
            .push(poly("North", "Narrow", 1.0, square(50.0, 0.0, 100.0)));
        store.sum_totals.push(SummaryRow {
            machine: "JKC".to_string(),
            download: "0910".to_string(),
            block: "North".to_string(),
            bucket: "Narrow".to_string(),
            hectares: 2.0,
            last_log_time: "08:15:00".to_string(),
            nominal_area: None,
            real_area: None,
            distance_flown: None,
            distance_applied: None,
            block_area: 0.0,
        });

        let out = tempfile::tempdir().unwrap();
        let rollup = summarize_history(&store, out.path()).unwrap().unwrap();
        assert_eq!(rollup.blocks.len(), 1);
        assert_eq!(rollup.blocks[0], ("North".to_string(), 1.5));
        assert_eq!(rollup.total_hectares, 1.5);

        let text = std::fs::read_to_string(&rollup.csv_path).unwrap();
        assert!(text.contains("North,08:15:00,2,1.5,133.33"));
        assert!(text.contains("Total,"));
    }

    #[test]
    fn test_history_rollup_collapses_same_block_ledger_rows() {
        let mut store = FlightStore::new();
        store
            .polygons
            .push(poly("North", "Narrow", 8.0, square(0.0, 0.0, 100.0)));
        for (dl, ha, t) in [("0910", 3.2, "08:15:00"), ("1120", 4.8, "11:30:00")] {
            store.sum_totals.push(SummaryRow {
                machine: "JKC".to_string(),
                download: dl.to_string(),
                block: "North".to_string(),
                bucket: "Narrow".to_string(),
                hectares: ha,
                last_log_time: t.to_string(),
                nominal_area: None,
                real_area: None,
                distance_flown: None,
                distance_applied: None,
                block_area: 0.0,
            });
        }

        let out = tempfile::tempdir().unwrap();
        let rollup = summarize_history(&store, out.path()).unwrap().unwrap();
        let text = std::fs::read_to_string(&rollup.csv_path).unwrap();
        // Two ledger rows for North fold into one CSV line of 8 ha.
        assert!(text.contains("North,11:30:00,8,1,800"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_empty_block_name_skips_history_rollup() {
        let mut store = FlightStore::new();
        store
            .polygons
            .push(poly("", "Narrow", 1.0, square(0.0, 0.0, 100.0)));
        let out = tempfile::tempdir().unwrap();
        assert!(summarize_history(&store, out.path()).unwrap().is_none());
    }
}
