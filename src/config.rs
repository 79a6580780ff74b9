//! Application configuration.
//!
//! Settings load from an optional TOML file and are then overridden by
//! environment variables (`GARMIN_DATA_DIR`, `GARMIN_RESULT_DIR`). Provider
//! credentials are *not* part of this struct; they are read from
//! `GARMIN_EMAIL` / `GARMIN_PASSWORD` when the API client is constructed.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RunformError};
use crate::logging::LogConfig;

/// Environment variable naming the data directory.
pub const ENV_DATA_DIR: &str = "GARMIN_DATA_DIR";
/// Environment variable naming the rendered-report directory.
pub const ENV_RESULT_DIR: &str = "GARMIN_RESULT_DIR";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for raw, performance, precheck, and database data
    pub data_dir: PathBuf,

    /// Base directory for rendered reports
    pub result_dir: PathBuf,

    /// Athlete tag carried on baseline rows
    pub user_id: String,

    /// Environmental label partitioning baselines
    pub condition_group: String,

    /// Baseline training settings
    pub training: TrainingSettings,

    /// Ingest pipeline settings
    pub ingest: IngestSettings,

    /// Logging settings
    pub log: LogConfig,
}

/// Baseline training tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Rolling window in calendar months
    pub window_months: u32,

    /// Minimum post-filter samples for the form metrics
    pub min_form_samples: usize,

    /// Minimum samples for the power->speed baseline
    pub min_power_samples: usize,

    /// Baselines older than this many days trigger auto-retrain
    pub freshness_days: i64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        TrainingSettings {
            window_months: 2,
            min_form_samples: 50,
            min_power_samples: 10,
            freshness_days: 7,
        }
    }
}

/// Ingest pipeline tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Delay between remote requests during batch ingest, in seconds
    pub request_delay_secs: f64,

    /// `maxchart` passed to the activity-details endpoint
    pub max_chart_points: u32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            request_delay_secs: 2.0,
            max_chart_points: 2000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("runform");
        Config {
            data_dir: base.join("data"),
            result_dir: base.join("results"),
            user_id: "default".to_string(),
            condition_group: "flat_road".to_string(),
            training: TrainingSettings::default(),
            ingest: IngestSettings::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file (if given), then
    /// environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    RunformError::Configuration(format!(
                        "cannot read config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                toml::from_str(&text).map_err(|e| {
                    RunformError::Configuration(format!(
                        "invalid config file {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => Config::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `GARMIN_DATA_DIR` / `GARMIN_RESULT_DIR` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var(ENV_DATA_DIR) {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = env::var(ENV_RESULT_DIR) {
            if !dir.is_empty() {
                self.result_dir = PathBuf::from(dir);
            }
        }
    }

    /// SQLite database path under the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("database").join("garmin_performance.db")
    }

    /// Per-activity raw JSON cache root.
    pub fn raw_activity_dir(&self) -> PathBuf {
        self.data_dir.join("raw").join("activity")
    }

    /// Per-date raw weight cache root.
    pub fn raw_weight_dir(&self) -> PathBuf {
        self.data_dir.join("raw").join("weight")
    }

    /// Computed performance documents.
    pub fn performance_dir(&self) -> PathBuf {
        self.data_dir.join("performance")
    }

    /// Ingest precheck documents.
    pub fn precheck_dir(&self) -> PathBuf {
        self.data_dir.join("precheck")
    }
}
