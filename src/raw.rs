//! Raw tracking-unit export discovery and parsing.
//!
//! Exports arrive as CSV files, one record per row, with the vertex list in
//! the leading `Shape` column (`x y` pairs separated by `;`) and an optional
//! `#epsg=<code>` directive on the first line. Two schema variants exist in
//! the field:
//!
//! - **split** - the unit writes separate `Date` and `Time` columns. A single
//!   canonical timestamp is synthesised as `date + "T" + HH:MM:SS + offset`.
//! - **combined** - the unit writes one ISO-like `Time` column, used as-is.
//!
//! The variant is decided by the *second* column header. Any other shape is
//! rejected per file (reported, not fatal).

use std::fs;
use std::path::{Path, PathBuf};

use geo::Coord;
use walkdir::WalkDir;

use crate::config::ProjectConfig;
use crate::error::IngestError;

/// Geometry kind of a raw export file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Point,
    Polyline,
}

/// One normalised raw record: ordered vertices plus the canonical timestamp,
/// speed and (for line exports) the recorded swath width.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub vertices: Vec<Coord<f64>>,
    pub time: String,
    pub speed: f64,
    pub width: Option<f64>,
}

/// A parsed raw export file.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: PathBuf,
    pub kind: ShapeKind,
    pub epsg: Option<u32>,
    pub records: Vec<RawRecord>,
}

/// Why a raw file was left out of a merge. Skippable per spec taxonomy:
/// reported, processing continues with the next file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No records (or none survived geometry repair).
    Empty,
    /// Second column is neither `Date` nor `Time`.
    UnrecognisedSchema(Vec<String>),
    /// File geometry kind does not match the destination store.
    WrongGeometry(ShapeKind),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Empty => write!(f, "contains no records"),
            SkipReason::UnrecognisedSchema(headers) => {
                write!(f, "does not contain the required fields ({headers:?})")
            }
            SkipReason::WrongGeometry(kind) => {
                write!(f, "geometry kind {kind:?} does not match the destination")
            }
        }
    }
}

/// Outcome of reading one export file.
#[derive(Debug)]
pub enum ExportOutcome {
    Parsed(RawFile),
    Skipped(SkipReason),
}

// ============================================================================
// Discovery
// ============================================================================

/// Recursively collect export files under `root` whose filename ends with
/// `suffix` (case-insensitive). Results are sorted for deterministic merge
/// order.
pub fn discover_exports(root: &Path, suffix: &str) -> Result<Vec<PathBuf>, IngestError> {
    let suffix = suffix.to_ascii_lowercase();
    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("unreadable directory entry"))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        if name.ends_with(&suffix) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Derive the block label for every record of an export file.
///
/// Files sitting directly in the download root take a trimmed filename token
/// (the known export suffix stripped); files inside a sub-block directory
/// take the immediate parent directory name.
pub fn derive_block_name(path: &Path, root: &Path, cfg: &ProjectConfig) -> String {
    let parent = path.parent();
    if parent != Some(root) {
        return parent
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    for suffix in [&cfg.line_suffix, &cfg.point_suffix] {
        let suffix = suffix.to_ascii_lowercase();
        if lower.ends_with(&suffix) {
            return name[..name.len() - suffix.len()].to_string();
        }
    }
    name
}

// ============================================================================
// Parsing
// ============================================================================

/// Read and normalise one raw export file.
///
/// Empty files and unrecognised schemas come back as [`ExportOutcome::Skipped`];
/// I/O problems and corrupt values abort with an error.
pub fn read_export(path: &Path, cfg: &ProjectConfig) -> Result<ExportOutcome, IngestError> {
    let text = fs::read_to_string(path)?;
    let (epsg, body) = split_epsg_directive(&text);

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    // Column layout per schema variant, decided by the second header.
    let (time_col, speed_col, date_col) = match headers.get(1).map(String::as_str) {
        Some("Date") => (2usize, 3usize, Some(1usize)),
        Some("Time") => (1usize, 2usize, None),
        _ => {
            return Ok(ExportOutcome::Skipped(SkipReason::UnrecognisedSchema(
                headers,
            )))
        }
    };
    let width_col = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("width"));

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let shape = row.get(0).unwrap_or_default();
        let vertices = repair_vertices(parse_vertices(shape, path)?);
        if vertices.is_empty() {
            continue; // null geometry, dropped by repair
        }

        let time = match date_col {
            Some(dc) => synthesize_timestamp(
                field(&row, dc, path)?,
                field(&row, time_col, path)?,
                &cfg.utc_offset,
            ),
            None => field(&row, time_col, path)?.to_string(),
        };
        let speed = numeric(&row, speed_col, path)?;
        let width = match width_col {
            Some(wc) => Some(numeric(&row, wc, path)?),
            None => None,
        };

        records.push(RawRecord {
            vertices,
            time,
            speed,
            width,
        });
    }

    if records.is_empty() {
        return Ok(ExportOutcome::Skipped(SkipReason::Empty));
    }

    // A file where every record is a single fix is a point export; anything
    // else is a polyline export, in which degenerate single-vertex records
    // do not survive repair.
    let kind = if records.iter().all(|r| r.vertices.len() == 1) {
        ShapeKind::Point
    } else {
        records.retain(|r| r.vertices.len() >= 2);
        ShapeKind::Polyline
    };
    if records.is_empty() {
        return Ok(ExportOutcome::Skipped(SkipReason::Empty));
    }

    Ok(ExportOutcome::Parsed(RawFile {
        path: path.to_path_buf(),
        kind,
        epsg,
        records,
    }))
}

/// Synthesise the combined timestamp for the split schema variant: the time
/// token keeps its leading `HH:MM:SS` and the configured fixed offset is
/// appended.
fn synthesize_timestamp(date: &str, time_token: &str, offset: &str) -> String {
    let truncated = time_token.get(0..8).unwrap_or(time_token);
    format!("{date}T{truncated}{offset}")
}

fn split_epsg_directive(text: &str) -> (Option<u32>, &str) {
    if let Some(first) = text.lines().next() {
        if let Some(code) = first.trim().strip_prefix("#epsg=") {
            if let Ok(epsg) = code.trim().parse::<u32>() {
                let rest = &text[first.len()..];
                return (Some(epsg), rest.trim_start_matches(['\r', '\n']));
            }
        }
    }
    (None, text)
}

fn parse_vertices(shape: &str, path: &Path) -> Result<Vec<Coord<f64>>, IngestError> {
    let mut coords = Vec::new();
    for pair in shape.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.split_whitespace();
        let (x, y) = match (parts.next(), parts.next()) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(IngestError::BadExport {
                    path: path.to_path_buf(),
                    detail: format!("malformed vertex {pair:?}"),
                })
            }
        };
        let x: f64 = x.parse().map_err(|_| IngestError::BadExport {
            path: path.to_path_buf(),
            detail: format!("malformed vertex {pair:?}"),
        })?;
        let y: f64 = y.parse().map_err(|_| IngestError::BadExport {
            path: path.to_path_buf(),
            detail: format!("malformed vertex {pair:?}"),
        })?;
        coords.push(Coord { x, y });
    }
    Ok(coords)
}

/// Geometry repair: drop non-finite vertices and collapse consecutive
/// duplicates.
fn repair_vertices(raw: Vec<Coord<f64>>) -> Vec<Coord<f64>> {
    let mut repaired: Vec<Coord<f64>> = Vec::with_capacity(raw.len());
    for c in raw {
        if !c.x.is_finite() || !c.y.is_finite() {
            continue;
        }
        if repaired.last() == Some(&c) {
            continue;
        }
        repaired.push(c);
    }
    repaired
}

fn field<'a>(
    row: &'a csv::StringRecord,
    idx: usize,
    path: &Path,
) -> Result<&'a str, IngestError> {
    row.get(idx).ok_or_else(|| IngestError::BadExport {
        path: path.to_path_buf(),
        detail: format!("missing column {idx}"),
    })
}

fn numeric(row: &csv::StringRecord, idx: usize, path: &Path) -> Result<f64, IngestError> {
    let raw = field(row, idx, path)?;
    raw.parse().map_err(|_| IngestError::BadExport {
        path: path.to_path_buf(),
        detail: format!("non-numeric value {raw:?} in column {idx}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, rel: &str, body: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn cfg() -> ProjectConfig {
        ProjectConfig::default()
    }

    #[test]
    fn test_combined_schema_point_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "northsecondary.csv",
            "Shape,Time,Speed\n\
             12.0 5.0,2023-09-01T08:00:00+1300,31.5\n\
             13.0 6.0,2023-09-01T08:00:02+1300,32.0\n",
        );
        let parsed = match read_export(&path, &cfg()).unwrap() {
            ExportOutcome::Parsed(f) => f,
            other => panic!("expected parse, got {other:?}"),
        };
        assert_eq!(parsed.kind, ShapeKind::Point);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].time, "2023-09-01T08:00:00+1300");
        assert_eq!(parsed.records[0].speed, 31.5);
        assert_eq!(parsed.records[0].width, None);
    }

    #[test]
    fn test_split_schema_synthesises_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "northlog.csv",
            "Shape,Date,Time,Speed,Width\n\
             0.0 0.0; 10.0 0.0,2023-09-01,08:00:00.000,30.0,120.0\n",
        );
        let parsed = match read_export(&path, &cfg()).unwrap() {
            ExportOutcome::Parsed(f) => f,
            other => panic!("expected parse, got {other:?}"),
        };
        assert_eq!(parsed.kind, ShapeKind::Polyline);
        assert_eq!(parsed.records[0].time, "2023-09-01T08:00:00+1300");
        assert_eq!(parsed.records[0].width, Some(120.0));
    }

    #[test]
    fn test_unrecognised_schema_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "oddlog.csv",
            "Shape,Altitude,Speed\n0.0 0.0,12.0,30.0\n",
        );
        match read_export(&path, &cfg()).unwrap() {
            ExportOutcome::Skipped(SkipReason::UnrecognisedSchema(_)) => {}
            other => panic!("expected schema skip, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_export_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "emptysecondary.csv", "Shape,Time,Speed\n");
        match read_export(&path, &cfg()).unwrap() {
            ExportOutcome::Skipped(SkipReason::Empty) => {}
            other => panic!("expected empty skip, got {other:?}"),
        }
    }

    #[test]
    fn test_geometry_repair_drops_degenerates() {
        let dir = tempfile::tempdir().unwrap();
        // Second record collapses to a single vertex and is dropped from the
        // polyline export; the duplicated middle vertex is collapsed.
        let path = write_file(
            dir.path(),
            "blk/applog.csv",
            "Shape,Time,Speed,Width\n\
             0.0 0.0; 5.0 0.0; 5.0 0.0; 10.0 0.0,2023-09-01T08:00:00+1300,30.0,50.0\n\
             3.0 3.0; 3.0 3.0,2023-09-01T08:00:05+1300,30.0,50.0\n",
        );
        let parsed = match read_export(&path, &cfg()).unwrap() {
            ExportOutcome::Parsed(f) => f,
            other => panic!("expected parse, got {other:?}"),
        };
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].vertices.len(), 3);
    }

    #[test]
    fn test_epsg_directive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "asecondary.csv",
            "#epsg=2193\nShape,Time,Speed\n1.0 1.0,2023-09-01T08:00:00+1300,30.0\n",
        );
        let parsed = match read_export(&path, &cfg()).unwrap() {
            ExportOutcome::Parsed(f) => f,
            other => panic!("expected parse, got {other:?}"),
        };
        assert_eq!(parsed.epsg, Some(2193));
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn test_block_name_from_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let nested = root.join("NorthBlock").join("applog.csv");
        assert_eq!(derive_block_name(&nested, root, &cfg()), "NorthBlock");
    }

    #[test]
    fn test_block_name_from_filename_at_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        assert_eq!(
            derive_block_name(&root.join("Northlog.csv"), root, &cfg()),
            "North"
        );
        assert_eq!(
            derive_block_name(&root.join("Northsecondary.csv"), root, &cfg()),
            "North"
        );
    }

    #[test]
    fn test_discover_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "b/zlog.csv", "Shape,Time,Speed\n");
        write_file(dir.path(), "a/alog.csv", "Shape,Time,Speed\n");
        write_file(dir.path(), "a/asecondary.csv", "Shape,Time,Speed\n");
        let found = discover_exports(dir.path(), "log.csv").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a/alog.csv"));
        assert!(found[1].ends_with("b/zlog.csv"));
    }
}
