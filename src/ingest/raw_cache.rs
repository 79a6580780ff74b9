//! Per-activity raw JSON file cache.
//!
//! Layout:
//! ```text
//! <data>/raw/activity/<activity_id>/{activity, activity_details, splits,
//!                                    weather, gear, hr_zones, vo2_max,
//!                                    lactate_threshold}.json
//! <data>/raw/weight/<YYYY-MM-DD>.json
//! ```
//! Files present are loaded; files missing are fetched and persisted.
//! Partially-populated directories are valid and serve as resume points.

use chrono::NaiveDate;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Config;
use crate::error::IngestError;

/// The eight per-activity document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFileKind {
    Activity,
    ActivityDetails,
    Splits,
    Weather,
    Gear,
    HrZones,
    Vo2Max,
    LactateThreshold,
}

impl RawFileKind {
    pub const ALL: [RawFileKind; 8] = [
        RawFileKind::Activity,
        RawFileKind::ActivityDetails,
        RawFileKind::Splits,
        RawFileKind::Weather,
        RawFileKind::Gear,
        RawFileKind::HrZones,
        RawFileKind::Vo2Max,
        RawFileKind::LactateThreshold,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            RawFileKind::Activity => "activity.json",
            RawFileKind::ActivityDetails => "activity_details.json",
            RawFileKind::Splits => "splits.json",
            RawFileKind::Weather => "weather.json",
            RawFileKind::Gear => "gear.json",
            RawFileKind::HrZones => "hr_zones.json",
            RawFileKind::Vo2Max => "vo2_max.json",
            RawFileKind::LactateThreshold => "lactate_threshold.json",
        }
    }
}

/// Filesystem cache under the configured data directory.
#[derive(Debug, Clone)]
pub struct RawFileCache {
    activity_root: PathBuf,
    weight_root: PathBuf,
}

impl RawFileCache {
    pub fn new(config: &Config) -> Self {
        RawFileCache {
            activity_root: config.raw_activity_dir(),
            weight_root: config.raw_weight_dir(),
        }
    }

    pub fn with_roots(activity_root: PathBuf, weight_root: PathBuf) -> Self {
        RawFileCache {
            activity_root,
            weight_root,
        }
    }

    pub fn activity_dir(&self, activity_id: i64) -> PathBuf {
        self.activity_root.join(activity_id.to_string())
    }

    fn activity_file(&self, activity_id: i64, kind: RawFileKind) -> PathBuf {
        self.activity_dir(activity_id).join(kind.file_name())
    }

    fn weight_file(&self, date: NaiveDate) -> PathBuf {
        self.weight_root.join(format!("{date}.json"))
    }

    fn read(path: &Path) -> Result<Option<Value>, IngestError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let value = serde_json::from_str(&text).map_err(|e| IngestError::InvalidDocument {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Some(value))
    }

    fn write(path: &Path, value: &Value) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(value).map_err(|e| {
            IngestError::InvalidDocument {
                path: path.display().to_string(),
                source: e,
            }
        })?;
        fs::write(path, text)?;
        debug!(path = %path.display(), "cached raw document");
        Ok(())
    }

    /// Load a cached document, `None` when absent.
    pub fn load(&self, activity_id: i64, kind: RawFileKind) -> Result<Option<Value>, IngestError> {
        Self::read(&self.activity_file(activity_id, kind))
    }

    /// Persist a fetched document.
    pub fn store(
        &self,
        activity_id: i64,
        kind: RawFileKind,
        value: &Value,
    ) -> Result<(), IngestError> {
        Self::write(&self.activity_file(activity_id, kind), value)
    }

    pub fn load_weight(&self, date: NaiveDate) -> Result<Option<Value>, IngestError> {
        Self::read(&self.weight_file(date))
    }

    pub fn store_weight(&self, date: NaiveDate, value: &Value) -> Result<(), IngestError> {
        Self::write(&self.weight_file(date), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn cache() -> (TempDir, RawFileCache) {
        let dir = TempDir::new().unwrap();
        let cache = RawFileCache::with_roots(
            dir.path().join("raw/activity"),
            dir.path().join("raw/weight"),
        );
        (dir, cache)
    }

    #[test]
    fn test_round_trip_activity_document() {
        let (_dir, cache) = cache();
        assert!(cache.load(42, RawFileKind::Splits).unwrap().is_none());

        let doc = json!({"lapDTOs": [{"distance": 1000.0}]});
        cache.store(42, RawFileKind::Splits, &doc).unwrap();

        let loaded = cache.load(42, RawFileKind::Splits).unwrap().unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_weight_document_path_by_date() {
        let (dir, cache) = cache();
        let date = NaiveDate::from_ymd_opt(2025, 8, 10).unwrap();
        cache
            .store_weight(date, &json!({"dateWeightList": [{"weight": 62100}]}))
            .unwrap();

        assert!(dir.path().join("raw/weight/2025-08-10.json").exists());
        assert!(cache.load_weight(date).unwrap().is_some());
    }

    #[test]
    fn test_invalid_cached_json_is_an_error() {
        let (dir, cache) = cache();
        let file = dir.path().join("raw/activity/7");
        fs::create_dir_all(&file).unwrap();
        fs::write(file.join("weather.json"), "{not json").unwrap();

        let err = cache.load(7, RawFileKind::Weather).unwrap_err();
        assert!(matches!(err, IngestError::InvalidDocument { .. }));
    }

    #[test]
    fn test_file_names_cover_all_kinds() {
        let names: Vec<&str> = RawFileKind::ALL.iter().map(|k| k.file_name()).collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"activity.json"));
        assert!(names.contains(&"lactate_threshold.json"));
    }
}
