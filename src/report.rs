//! Sidecar application-report parsing.
//!
//! Every download ships a small plain-text summary written by the tracking
//! unit. Two layouts exist in the field, distinguished by the first line's
//! leading token:
//!
//! ```text
//! Distance flown: 102.4 km          Area nominal: 85.1 ha
//! Distance spread: 74.0 km          Area real: 81.7 ha
//! Area nominal: 85.1 ha             Distance flown: 102.4 km
//! Area real: 81.7 ha                Distance spread: 74.0 km
//! ```
//!
//! Each line is `label: value unit`; the parser keeps the layouts as two
//! explicit variants instead of relying on character offsets, and anything
//! else comes back as a typed "format not recognised" outcome.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::TrackKey;

/// Per-download application figures from the sidecar report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApplicationReport {
    pub nominal_area: f64,
    pub real_area: f64,
    pub distance_flown: f64,
    pub distance_applied: f64,
}

/// Which of the two known report layouts a file used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLayout {
    /// Distances first (lines 1-2), areas after (lines 3-4).
    DistanceFirst,
    /// Areas first (lines 1-2), distances after (lines 3-4).
    AreaFirst,
}

/// Parse a sidecar report, accepting either layout.
pub fn parse_report(text: &str) -> Result<(ApplicationReport, ReportLayout), ReportError> {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.first().copied().unwrap_or_default();

    let layout = if first.starts_with("Distance") {
        ReportLayout::DistanceFirst
    } else if first.starts_with("Area") {
        ReportLayout::AreaFirst
    } else {
        return Err(ReportError::UnrecognisedLayout(first.to_string()));
    };

    if lines.len() < 4 {
        return Err(ReportError::Truncated);
    }

    let report = match layout {
        ReportLayout::DistanceFirst => ApplicationReport {
            distance_flown: line_value(lines[0])?,
            distance_applied: line_value(lines[1])?,
            nominal_area: line_value(lines[2])?,
            real_area: line_value(lines[3])?,
        },
        ReportLayout::AreaFirst => ApplicationReport {
            nominal_area: line_value(lines[0])?,
            real_area: line_value(lines[1])?,
            distance_flown: line_value(lines[2])?,
            distance_applied: line_value(lines[3])?,
        },
    };
    Ok((report, layout))
}

/// Locate the sidecar report for a session, preferring the block directory
/// and falling back to the download directory. The lexicographically first
/// `*.txt` wins so the choice is deterministic.
pub fn locate_report(base: &Path, key: &TrackKey, block: &str) -> Option<PathBuf> {
    let block_dir = base.join(&key.machine).join(&key.download).join(block);
    let download_dir = base.join(&key.machine).join(&key.download);

    for dir in [block_dir, download_dir] {
        if let Some(path) = first_txt(&dir) {
            return Some(path);
        }
    }
    None
}

fn first_txt(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut txts: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("txt"))
                    .unwrap_or(false)
        })
        .collect();
    txts.sort();
    txts.into_iter().next()
}

/// Numeric value of a `label: value unit` line.
fn line_value(line: &str) -> Result<f64, ReportError> {
    let value = line
        .split_once(':')
        .map(|(_, v)| v)
        .ok_or_else(|| ReportError::BadValue(line.to_string()))?;
    value
        .split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| ReportError::BadValue(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_distance_first_layout() {
        let text = "Distance flown: 102.4 km\n\
                    Distance spread: 74.0 km\n\
                    Area nominal: 85.1 ha\n\
                    Area real: 81.7 ha\n";
        let (report, layout) = parse_report(text).unwrap();
        assert_eq!(layout, ReportLayout::DistanceFirst);
        assert_eq!(report.distance_flown, 102.4);
        assert_eq!(report.distance_applied, 74.0);
        assert_eq!(report.nominal_area, 85.1);
        assert_eq!(report.real_area, 81.7);
    }

    #[test]
    fn test_area_first_layout() {
        let text = "Area nominal: 85.1 ha\n\
                    Area real: 81.7 ha\n\
                    Distance flown: 102.4 km\n\
                    Distance spread: 74.0 km\n";
        let (report, layout) = parse_report(text).unwrap();
        assert_eq!(layout, ReportLayout::AreaFirst);
        assert_eq!(report.nominal_area, 85.1);
        assert_eq!(report.distance_flown, 102.4);
    }

    #[test]
    fn test_unrecognised_layout() {
        match parse_report("Flight summary for JKC\n") {
            Err(ReportError::UnrecognisedLayout(first)) => {
                assert_eq!(first, "Flight summary for JKC");
            }
            other => panic!("expected layout error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_report() {
        assert!(matches!(
            parse_report("Distance flown: 102.4 km\n"),
            Err(ReportError::Truncated)
        ));
    }

    #[test]
    fn test_bad_value_line() {
        let text = "Distance flown: lots\n\
                    Distance spread: 74.0 km\n\
                    Area nominal: 85.1 ha\n\
                    Area real: 81.7 ha\n";
        assert!(matches!(parse_report(text), Err(ReportError::BadValue(_))));
    }

    #[test]
    fn test_locate_prefers_block_directory() {
        let dir = tempfile::tempdir().unwrap();
        let key = TrackKey::new("JKC", "0910");
        let block_dir = dir.path().join("JKC/0910/North");
        fs::create_dir_all(&block_dir).unwrap();
        let mut f = fs::File::create(block_dir.join("summary.txt")).unwrap();
        f.write_all(b"Area nominal: 1.0 ha\n").unwrap();
        let mut g = fs::File::create(dir.path().join("JKC/0910/other.txt")).unwrap();
        g.write_all(b"Area nominal: 2.0 ha\n").unwrap();

        let found = locate_report(dir.path(), &key, "North").unwrap();
        assert!(found.ends_with("JKC/0910/North/summary.txt"));
    }

    #[test]
    fn test_locate_falls_back_to_download_directory() {
        let dir = tempfile::tempdir().unwrap();
        let key = TrackKey::new("JKC", "0910");
        let dl_dir = dir.path().join("JKC/0910");
        fs::create_dir_all(&dl_dir).unwrap();
        fs::File::create(dl_dir.join("summary.txt")).unwrap();

        let found = locate_report(dir.path(), &key, "North").unwrap();
        assert!(found.ends_with("JKC/0910/summary.txt"));
    }

    #[test]
    fn test_locate_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        let key = TrackKey::new("JKC", "0910");
        assert!(locate_report(dir.path(), &key, "North").is_none());
    }
}
