//! Stage configuration and typed tool settings.
//!
//! Every pipeline stage receives an explicit [`ProjectConfig`] reference;
//! there is no ambient project object or global state. Tool presets and
//! folder templates arrive as plain JSON key/value documents and are exposed
//! through [`ToolSettings`], a typed map validated at lookup time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Settings shared by the ingestion stages for one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Filename suffix of raw application-line exports.
    pub line_suffix: String,
    /// Filename suffix of raw secondary-point exports.
    pub point_suffix: String,
    /// EPSG code assigned to raw files that declare none. An already-declared
    /// code is never overwritten.
    pub default_epsg: u32,
    /// Fixed UTC offset appended when synthesising a combined timestamp from
    /// the split date/time schema variant.
    pub utc_offset: String,
    /// First time application work is considered valid. Secondary points at
    /// or before this time are ignored during flight-path reconstruction.
    pub operation_start: Option<NaiveDateTime>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            line_suffix: "log.csv".to_string(),
            point_suffix: "secondary.csv".to_string(),
            default_epsg: 4326,
            utc_offset: "+1300".to_string(),
            operation_start: None,
        }
    }
}

impl ProjectConfig {
    /// Fallback operation start used when the operation times table has no
    /// record yet.
    pub fn operation_start_or_default(&self) -> NaiveDateTime {
        self.operation_start.unwrap_or_else(|| {
            NaiveDateTime::parse_from_str("2014-11-30T07:45:10", "%Y-%m-%dT%H:%M:%S")
                .expect("literal timestamp")
        })
    }
}

/// Key/value tool settings merged from a directory of JSON documents.
///
/// Later documents override earlier ones (lexicographic file order). Values
/// keep their JSON shape; the typed accessors validate at lookup time and
/// return [`ConfigError::MissingKey`] / [`ConfigError::WrongType`] instead of
/// silently coercing.
#[derive(Debug, Clone, Default)]
pub struct ToolSettings {
    values: HashMap<String, Value>,
}

impl ToolSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and merge every `*.json` document directly under `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut settings = Self::new();
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("json"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            settings.merge_file(&path)?;
        }
        Ok(settings)
    }

    /// Merge one JSON document into the map, overriding existing keys.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path)?;
        let doc: HashMap<String, Value> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("loaded {} settings keys from {}", doc.len(), path.display());
        self.values.extend(doc);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<&Value, ConfigError> {
        self.values
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    pub fn string(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)?.as_str().ok_or(ConfigError::WrongType {
            key: key.to_string(),
            expected: "string",
        })
    }

    pub fn number(&self, key: &str) -> Result<f64, ConfigError> {
        self.get(key)?.as_f64().ok_or(ConfigError::WrongType {
            key: key.to_string(),
            expected: "number",
        })
    }

    pub fn list(&self, key: &str) -> Result<&[Value], ConfigError> {
        self.get(key)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or(ConfigError::WrongType {
                key: key.to_string(),
                expected: "list",
            })
    }

    pub fn object(&self, key: &str) -> Result<&serde_json::Map<String, Value>, ConfigError> {
        self.get(key)?.as_object().ok_or(ConfigError::WrongType {
            key: key.to_string(),
            expected: "object",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_json(dir: &Path, name: &str, body: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_settings_merge_and_typed_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write_json(
            dir.path(),
            "a_folders.json",
            r#"{"data_folder": "Data", "swath_default": 120.5}"#,
        );
        write_json(
            dir.path(),
            "b_tools.json",
            r#"{"data_folder": "DataV2", "layers": ["points", "lines"]}"#,
        );

        let settings = ToolSettings::from_dir(dir.path()).unwrap();
        // Later file wins for the duplicated key.
        assert_eq!(settings.string("data_folder").unwrap(), "DataV2");
        assert_eq!(settings.number("swath_default").unwrap(), 120.5);
        assert_eq!(settings.list("layers").unwrap().len(), 2);
    }

    #[test]
    fn test_missing_key_is_typed_error() {
        let settings = ToolSettings::new();
        match settings.string("nope") {
            Err(ConfigError::MissingKey(key)) => assert_eq!(key, "nope"),
            other => panic!("expected MissingKey, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_type_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        write_json(dir.path(), "t.json", r#"{"swath_default": 12.0}"#);
        let settings = ToolSettings::from_dir(dir.path()).unwrap();
        match settings.string("swath_default") {
            Err(ConfigError::WrongType { key, expected }) => {
                assert_eq!(key, "swath_default");
                assert_eq!(expected, "string");
            }
            other => panic!("expected WrongType, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_document_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write_json(dir.path(), "bad.json", "{not json");
        match ToolSettings::from_dir(dir.path()) {
            Err(ConfigError::Malformed { path, .. }) => {
                assert!(path.ends_with("bad.json"));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }
}
