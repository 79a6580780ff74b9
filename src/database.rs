//! Analytical store over SQLite.
//!
//! Holds activities, splits, trained baselines, evaluations, the derived
//! summary tables, the eleven-section result cache, and compressed
//! time-series blobs. Reads share one connection; writes run in short-lived
//! transactions and never span a network call.

use chrono::NaiveDate;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::io::{Read, Write};
use std::path::Path;

use crate::baseline::evaluator::EvaluationRecord;
use crate::baseline::regression::{GctPowerModel, LinearModel, PowerSpeedModel};
use crate::baseline::BaselineSet;
use crate::error::{BaselineError, StoreError};
use crate::ingest::sections::{
    ActivitySections, FormEfficiencySummary, HrEfficiencyAnalysis, HrZoneDwell,
    LactateThresholdSection, PerformanceTrends, Vo2MaxSection, SECTION_NAMES,
};
use crate::models::{
    ActivityRow, BaselineRow, IntensityType, Metric, ModelKind, RolePhase, SplitRow, TerrainType,
    TimeSeriesPoint,
};

/// A joined splits+activities row used for form baseline training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormSample {
    pub pace_seconds_per_km: f64,
    pub gct_ms: f64,
    pub vo_cm: f64,
    pub vr_pct: f64,
}

/// The averaged observation pulled for evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormObservationRow {
    pub pace_seconds_per_km: f64,
    pub gct_ms: f64,
    pub vo_cm: f64,
    pub vr_pct: f64,
    pub cadence: Option<f64>,
}

/// Compact view of a stored evaluation, for status output and idempotence
/// checks.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSummary {
    pub activity_id: i64,
    pub overall_score: f64,
    pub overall_star_rating: String,
    pub integrated_score: Option<f64>,
    pub training_mode: Option<String>,
    pub evaluated_at: String,
}

/// Gzip-compressed bincode blob for an activity's time series.
#[derive(Debug, Clone)]
struct CompressedTimeSeries {
    compressed_data: Vec<u8>,
    original_size: usize,
    point_count: usize,
}

impl CompressedTimeSeries {
    fn compress(points: &[TimeSeriesPoint]) -> Result<Self, StoreError> {
        let serialized = bincode::serialize(points)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let original_size = serialized.len();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        let compressed_data = encoder.finish()?;

        Ok(Self {
            compressed_data,
            original_size,
            point_count: points.len(),
        })
    }

    fn decompress(data: &[u8]) -> Result<Vec<TimeSeriesPoint>, StoreError> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;

        bincode::deserialize(&decompressed).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn compression_ratio(&self) -> f64 {
        self.original_size as f64 / self.compressed_data.len().max(1) as f64
    }
}

/// Database connection and schema management.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                activity_id INTEGER PRIMARY KEY,
                activity_date TEXT NOT NULL,
                activity_name TEXT,
                location_name TEXT,
                body_mass_kg REAL,
                body_mass_source TEXT,
                body_mass_method TEXT,
                distance_km REAL,
                duration_seconds REAL,
                avg_pace_seconds_per_km REAL,
                avg_heart_rate REAL,
                external_temp_c REAL,
                humidity REAL,
                wind_speed_ms REAL,
                wind_direction_compass TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_activities_date ON activities(activity_date);

            CREATE TABLE IF NOT EXISTS splits (
                activity_id INTEGER NOT NULL,
                split_index INTEGER NOT NULL,
                role_phase TEXT NOT NULL,
                distance REAL,
                duration_seconds REAL,
                start_time_s REAL,
                end_time_s REAL,
                intensity_type TEXT NOT NULL,
                pace_seconds_per_km REAL,
                heart_rate REAL,
                max_heart_rate REAL,
                cadence REAL,
                max_cadence REAL,
                power REAL,
                max_power REAL,
                normalized_power REAL,
                stride_length REAL,
                ground_contact_time REAL,
                vertical_oscillation REAL,
                vertical_ratio REAL,
                elevation_gain REAL,
                elevation_loss REAL,
                terrain_type TEXT,
                average_speed REAL,
                grade_adjusted_speed REAL,
                PRIMARY KEY (activity_id, split_index)
            );

            CREATE TABLE IF NOT EXISTS form_baseline_history (
                history_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                condition_group TEXT NOT NULL,
                metric TEXT NOT NULL,
                model_type TEXT NOT NULL,
                coef_alpha REAL,
                coef_d REAL,
                coef_a REAL,
                coef_b REAL,
                power_a REAL,
                power_b REAL,
                power_rmse REAL,
                period_start TEXT NOT NULL,
                period_end TEXT NOT NULL,
                trained_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                n_samples INTEGER NOT NULL,
                rmse REAL,
                speed_range_min REAL,
                speed_range_max REAL,
                UNIQUE (user_id, condition_group, metric, period_start, period_end)
            );

            CREATE TABLE IF NOT EXISTS form_evaluations (
                eval_id INTEGER PRIMARY KEY AUTOINCREMENT,
                activity_id INTEGER NOT NULL UNIQUE,
                gct_ms_expected REAL,
                vo_cm_expected REAL,
                vr_pct_expected REAL,
                gct_ms_actual REAL,
                vo_cm_actual REAL,
                vr_pct_actual REAL,
                gct_delta_pct REAL,
                vo_delta_cm REAL,
                vo_delta_pct REAL,
                vr_delta_pct REAL,
                gct_penalty REAL,
                gct_star_rating TEXT,
                gct_score REAL,
                gct_needs_improvement INTEGER,
                gct_evaluation_text TEXT,
                vo_penalty REAL,
                vo_star_rating TEXT,
                vo_score REAL,
                vo_needs_improvement INTEGER,
                vo_evaluation_text TEXT,
                vr_penalty REAL,
                vr_star_rating TEXT,
                vr_score REAL,
                vr_needs_improvement INTEGER,
                vr_evaluation_text TEXT,
                cadence_actual REAL,
                cadence_minimum REAL,
                cadence_achieved INTEGER,
                overall_score REAL,
                overall_star_rating TEXT,
                power_avg_w REAL,
                power_wkg REAL,
                speed_actual_mps REAL,
                speed_expected_mps REAL,
                power_efficiency_score REAL,
                power_efficiency_rating TEXT,
                power_efficiency_needs_improvement INTEGER,
                integrated_score REAL,
                training_mode TEXT,
                evaluated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS performance_sections (
                activity_id INTEGER NOT NULL,
                section TEXT NOT NULL,
                payload TEXT,
                PRIMARY KEY (activity_id, section)
            );

            CREATE TABLE IF NOT EXISTS form_efficiency (
                activity_id INTEGER PRIMARY KEY,
                gct_avg REAL, gct_min REAL, gct_max REAL, gct_std REAL, gct_rating TEXT,
                vo_avg REAL, vo_min REAL, vo_max REAL, vo_std REAL, vo_rating TEXT,
                vr_avg REAL, vr_min REAL, vr_max REAL, vr_std REAL, vr_rating TEXT
            );

            CREATE TABLE IF NOT EXISTS heart_rate_zones (
                activity_id INTEGER NOT NULL,
                zone_number INTEGER NOT NULL,
                low_boundary REAL,
                secs_in_zone REAL,
                PRIMARY KEY (activity_id, zone_number)
            );

            CREATE TABLE IF NOT EXISTS hr_efficiency (
                activity_id INTEGER PRIMARY KEY,
                activity_date TEXT,
                avg_heart_rate REAL,
                training_type TEXT,
                hr_stability TEXT
            );

            CREATE TABLE IF NOT EXISTS performance_trends (
                activity_id INTEGER PRIMARY KEY,
                warmup_splits TEXT,
                run_splits TEXT,
                recovery_splits TEXT,
                cooldown_splits TEXT,
                warmup_avg_pace REAL, warmup_avg_hr REAL,
                run_avg_pace REAL, run_avg_hr REAL,
                recovery_avg_pace REAL, recovery_avg_hr REAL,
                cooldown_avg_pace REAL, cooldown_avg_hr REAL,
                pace_consistency REAL,
                hr_drift_percentage REAL,
                cadence_consistency TEXT,
                fatigue_pattern TEXT
            );

            CREATE TABLE IF NOT EXISTS vo2_max (
                activity_id INTEGER PRIMARY KEY,
                vo2_max REAL,
                vo2_max_precise REAL,
                measurement_date TEXT
            );

            CREATE TABLE IF NOT EXISTS lactate_threshold (
                activity_id INTEGER PRIMARY KEY,
                threshold_heart_rate REAL,
                threshold_speed_mps REAL,
                functional_threshold_power REAL
            );

            CREATE TABLE IF NOT EXISTS time_series_metrics (
                activity_id INTEGER PRIMARY KEY,
                compressed_data BLOB NOT NULL,
                original_size INTEGER NOT NULL,
                point_count INTEGER NOT NULL,
                compression_ratio REAL NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Activities and splits
    // ------------------------------------------------------------------

    /// Upsert one activity row.
    pub fn upsert_activity(&mut self, row: &ActivityRow) -> Result<(), StoreError> {
        put_activity(&self.conn, row)
    }

    /// Replace the splits of one activity inside a transaction.
    pub fn upsert_splits(&mut self, splits: &[SplitRow]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for split in splits {
            put_split(&tx, split)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_activity(&self, activity_id: i64) -> Result<Option<ActivityRow>, StoreError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT activity_id, activity_date, activity_name, location_name,
                       body_mass_kg, body_mass_source, body_mass_method,
                       distance_km, duration_seconds, avg_pace_seconds_per_km,
                       avg_heart_rate, external_temp_c, humidity, wind_speed_ms,
                       wind_direction_compass
                FROM activities WHERE activity_id = ?1
                "#,
                params![activity_id],
                |row| {
                    Ok(ActivityRow {
                        activity_id: row.get(0)?,
                        activity_date: row.get(1)?,
                        activity_name: row.get(2)?,
                        location_name: row.get(3)?,
                        body_mass_kg: row.get(4)?,
                        body_mass_source: row.get(5)?,
                        body_mass_method: row.get(6)?,
                        distance_km: row.get(7)?,
                        duration_seconds: row.get(8)?,
                        avg_pace_seconds_per_km: row.get(9)?,
                        avg_heart_rate: row.get(10)?,
                        external_temp_c: row.get(11)?,
                        humidity: row.get(12)?,
                        wind_speed_ms: row.get(13)?,
                        wind_direction_compass: row.get(14)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_activity_date(&self, activity_id: i64) -> Result<Option<NaiveDate>, StoreError> {
        let date = self
            .conn
            .query_row(
                "SELECT activity_date FROM activities WHERE activity_id = ?1",
                params![activity_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(date)
    }

    /// All activity ids recorded for a calendar day.
    pub fn activities_on(&self, date: NaiveDate) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT activity_id FROM activities WHERE activity_date = ?1 ORDER BY activity_id")?;
        let ids = stmt
            .query_map(params![date], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn load_splits(&self, activity_id: i64) -> Result<Vec<SplitRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT activity_id, split_index, role_phase, distance, duration_seconds,
                   start_time_s, end_time_s, intensity_type, pace_seconds_per_km,
                   heart_rate, max_heart_rate, cadence, max_cadence, power, max_power,
                   normalized_power, stride_length, ground_contact_time,
                   vertical_oscillation, vertical_ratio, elevation_gain, elevation_loss,
                   terrain_type, average_speed, grade_adjusted_speed
            FROM splits WHERE activity_id = ?1 ORDER BY split_index
            "#,
        )?;

        let rows = stmt.query_map(params![activity_id], |row| {
            let role: String = row.get(2)?;
            let intensity: String = row.get(7)?;
            let terrain: Option<String> = row.get(22)?;
            Ok((row_to_split_parts(row)?, role, intensity, terrain))
        })?;

        let mut splits = Vec::new();
        for row in rows {
            let (mut split, role, intensity, terrain) = row?;
            split.role_phase =
                RolePhase::from_str(&role).ok_or_else(|| StoreError::CorruptRow {
                    table: "splits".to_string(),
                    reason: format!("unknown role_phase {role:?}"),
                })?;
            split.intensity_type =
                IntensityType::from_provider(&intensity).ok_or_else(|| StoreError::CorruptRow {
                    table: "splits".to_string(),
                    reason: format!("unknown intensity_type {intensity:?}"),
                })?;
            split.terrain_type = terrain.as_deref().and_then(TerrainType::from_str);
            splits.push(split);
        }
        Ok(splits)
    }

    // ------------------------------------------------------------------
    // Training data pulls
    // ------------------------------------------------------------------

    /// Joined splits+activities rows carrying complete form data inside the
    /// window, with strictly positive pace.
    pub fn form_training_samples(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Vec<FormSample>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.pace_seconds_per_km, s.ground_contact_time,
                   s.vertical_oscillation, s.vertical_ratio
            FROM splits s
            JOIN activities a ON s.activity_id = a.activity_id
            WHERE a.activity_date >= ?1
              AND a.activity_date <= ?2
              AND s.ground_contact_time IS NOT NULL
              AND s.vertical_oscillation IS NOT NULL
              AND s.vertical_ratio IS NOT NULL
              AND s.pace_seconds_per_km > 0
            "#,
        )?;

        let samples = stmt
            .query_map(params![period_start, period_end], |row| {
                Ok(FormSample {
                    pace_seconds_per_km: row.get(0)?,
                    gct_ms: row.get(1)?,
                    vo_cm: row.get(2)?,
                    vr_pct: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    /// `(power_wkg, speed_mps)` pairs for the power baseline window.
    pub fn power_training_samples(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Vec<(f64, f64)>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.average_speed, s.power, a.body_mass_kg
            FROM splits s
            JOIN activities a ON s.activity_id = a.activity_id
            WHERE a.activity_date >= ?1
              AND a.activity_date <= ?2
              AND s.power IS NOT NULL
              AND a.body_mass_kg IS NOT NULL
              AND s.average_speed IS NOT NULL
            "#,
        )?;

        let rows = stmt
            .query_map(params![period_start, period_end], |row| {
                let speed: f64 = row.get(0)?;
                let power: f64 = row.get(1)?;
                let mass: f64 = row.get(2)?;
                Ok((speed, power, mass))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|&(_, _, mass)| mass > 0.0)
            .map(|(speed, power, mass)| (power / mass, speed))
            .collect())
    }

    /// Averaged form observation for one activity, optionally restricted to
    /// an index list. The variable-width `IN` clause binds every index as a
    /// parameter.
    pub fn form_observation(
        &self,
        activity_id: i64,
        split_indices: Option<&[u32]>,
    ) -> Result<Option<FormObservationRow>, StoreError> {
        let base = r#"
            SELECT AVG(pace_seconds_per_km), AVG(ground_contact_time),
                   AVG(vertical_oscillation), AVG(vertical_ratio), AVG(cadence)
            FROM splits
            WHERE activity_id = ?1
              AND ground_contact_time IS NOT NULL
              AND vertical_oscillation IS NOT NULL
              AND vertical_ratio IS NOT NULL
        "#;

        let mut values: Vec<i64> = vec![activity_id];
        let sql = match split_indices {
            Some(indices) if !indices.is_empty() => {
                let placeholders: Vec<String> = indices
                    .iter()
                    .enumerate()
                    .map(|(i, _)| format!("?{}", i + 2))
                    .collect();
                values.extend(indices.iter().map(|&i| i as i64));
                format!("{base} AND split_index IN ({})", placeholders.join(","))
            }
            _ => base.to_string(),
        };

        let row = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| {
                let pace: Option<f64> = row.get(0)?;
                let gct: Option<f64> = row.get(1)?;
                let vo: Option<f64> = row.get(2)?;
                let vr: Option<f64> = row.get(3)?;
                let cadence: Option<f64> = row.get(4)?;
                Ok((pace, gct, vo, vr, cadence))
            })
            .optional()?;

        Ok(match row {
            Some((Some(pace), Some(gct), Some(vo), Some(vr), cadence)) => {
                Some(FormObservationRow {
                    pace_seconds_per_km: pace,
                    gct_ms: gct,
                    vo_cm: vo,
                    vr_pct: vr,
                    cadence,
                })
            }
            _ => None,
        })
    }

    /// The activity's average power and average speed over powered splits.
    pub fn splits_power_speed(&self, activity_id: i64) -> Result<Option<(f64, f64)>, StoreError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT AVG(power), AVG(average_speed)
                FROM splits
                WHERE activity_id = ?1 AND power IS NOT NULL
                "#,
                params![activity_id],
                |row| {
                    let power: Option<f64> = row.get(0)?;
                    let speed: Option<f64> = row.get(1)?;
                    Ok((power, speed))
                },
            )
            .optional()?;

        Ok(match row {
            Some((Some(power), Some(speed))) => Some((power, speed)),
            _ => None,
        })
    }

    /// The run-split index list recorded in the performance trends, when
    /// present.
    pub fn run_splits_list(&self, activity_id: i64) -> Result<Option<Vec<u32>>, StoreError> {
        let text: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT run_splits FROM performance_trends WHERE activity_id = ?1",
                params![activity_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(Some(text)) = text else {
            return Ok(None);
        };
        if text.trim().is_empty() {
            return Ok(None);
        }

        let indices: Vec<u32> = text
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        Ok(if indices.is_empty() { None } else { Some(indices) })
    }

    /// The hr_efficiency training-type label, if recorded.
    pub fn training_type(&self, activity_id: i64) -> Result<Option<String>, StoreError> {
        let label: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT training_type FROM hr_efficiency WHERE activity_id = ?1",
                params![activity_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(label.flatten())
    }

    // ------------------------------------------------------------------
    // Baselines
    // ------------------------------------------------------------------

    /// Write a baseline row; the logical key replaces all numeric fields.
    pub fn upsert_baseline(&mut self, row: &BaselineRow) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO form_baseline_history (
                user_id, condition_group, metric, model_type,
                coef_alpha, coef_d, coef_a, coef_b,
                power_a, power_b, power_rmse,
                period_start, period_end, n_samples, rmse,
                speed_range_min, speed_range_max
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT (user_id, condition_group, metric, period_start, period_end)
            DO UPDATE SET
                model_type = excluded.model_type,
                coef_alpha = excluded.coef_alpha,
                coef_d = excluded.coef_d,
                coef_a = excluded.coef_a,
                coef_b = excluded.coef_b,
                power_a = excluded.power_a,
                power_b = excluded.power_b,
                power_rmse = excluded.power_rmse,
                n_samples = excluded.n_samples,
                rmse = excluded.rmse,
                speed_range_min = excluded.speed_range_min,
                speed_range_max = excluded.speed_range_max,
                trained_at = CURRENT_TIMESTAMP
            "#,
            params![
                row.user_id,
                row.condition_group,
                row.metric.as_str(),
                row.model_kind.as_str(),
                row.coef_alpha,
                row.coef_d,
                row.coef_a,
                row.coef_b,
                row.power_a,
                row.power_b,
                row.power_rmse,
                row.period_start,
                row.period_end,
                row.n_samples,
                row.rmse,
                row.speed_range_min,
                row.speed_range_max,
            ],
        )?;
        Ok(())
    }

    /// Load the three form models covering an activity date: the period with
    /// the largest `period_end <= activity_date`. All three metrics must be
    /// present.
    pub fn load_models_covering(
        &self,
        user_id: &str,
        condition_group: &str,
        activity_date: NaiveDate,
    ) -> Result<BaselineSet, BaselineError> {
        let max_period_end: Option<NaiveDate> = self
            .conn
            .query_row(
                r#"
                SELECT MAX(period_end) FROM form_baseline_history
                WHERE user_id = ?1 AND condition_group = ?2 AND period_end <= ?3
                  AND metric IN ('gct', 'vo', 'vr')
                "#,
                params![user_id, condition_group, activity_date],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;

        let Some(period_end) = max_period_end else {
            return Err(BaselineError::NoBaselineFound {
                user_id: user_id.to_string(),
                condition_group: condition_group.to_string(),
                activity_date,
            });
        };

        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT metric, coef_alpha, coef_d, coef_a, coef_b,
                       n_samples, rmse, speed_range_min, speed_range_max
                FROM form_baseline_history
                WHERE user_id = ?1 AND condition_group = ?2 AND period_end = ?3
                  AND metric IN ('gct', 'vo', 'vr')
                "#,
            )
            .map_err(StoreError::from)?;

        let rows = stmt
            .query_map(params![user_id, condition_group, period_end], |row| {
                let metric: String = row.get(0)?;
                let coef_alpha: Option<f64> = row.get(1)?;
                let coef_d: Option<f64> = row.get(2)?;
                let coef_a: Option<f64> = row.get(3)?;
                let coef_b: Option<f64> = row.get(4)?;
                let n_samples: i64 = row.get(5)?;
                let rmse: Option<f64> = row.get(6)?;
                let speed_min: Option<f64> = row.get(7)?;
                let speed_max: Option<f64> = row.get(8)?;
                Ok((
                    metric, coef_alpha, coef_d, coef_a, coef_b, n_samples, rmse, speed_min,
                    speed_max,
                ))
            })
            .map_err(StoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        let mut gct = None;
        let mut vo = None;
        let mut vr = None;
        let mut found = Vec::new();

        for (metric, coef_alpha, coef_d, coef_a, coef_b, n_samples, rmse, smin, smax) in rows {
            found.push(metric.clone());
            let speed_range = (smin.unwrap_or(0.0), smax.unwrap_or(0.0));
            match Metric::from_str(&metric) {
                Some(Metric::Gct) => {
                    gct = Some(GctPowerModel {
                        alpha: coef_alpha.unwrap_or(0.0),
                        d: coef_d.unwrap_or(0.0),
                        rmse: rmse.unwrap_or(0.0),
                        n_samples: n_samples as usize,
                        speed_range,
                    });
                }
                Some(Metric::Vo) => {
                    vo = Some(LinearModel {
                        a: coef_a.unwrap_or(0.0),
                        b: coef_b.unwrap_or(0.0),
                        rmse: rmse.unwrap_or(0.0),
                        n_samples: n_samples as usize,
                        speed_range,
                    });
                }
                Some(Metric::Vr) => {
                    vr = Some(LinearModel {
                        a: coef_a.unwrap_or(0.0),
                        b: coef_b.unwrap_or(0.0),
                        rmse: rmse.unwrap_or(0.0),
                        n_samples: n_samples as usize,
                        speed_range,
                    });
                }
                _ => {}
            }
        }

        match (gct, vo, vr) {
            (Some(gct), Some(vo), Some(vr)) => Ok(BaselineSet { gct, vo, vr }),
            _ => Err(BaselineError::IncompleteBaseline { found }),
        }
    }

    /// The most recent power baseline whose period started on or before the
    /// activity date, if any.
    pub fn load_power_baseline(
        &self,
        user_id: &str,
        condition_group: &str,
        activity_date: NaiveDate,
    ) -> Result<Option<PowerSpeedModel>, StoreError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT power_a, power_b, power_rmse, n_samples,
                       speed_range_min, speed_range_max
                FROM form_baseline_history
                WHERE user_id = ?1 AND condition_group = ?2
                  AND metric = 'power' AND period_start <= ?3
                ORDER BY period_end DESC
                LIMIT 1
                "#,
                params![user_id, condition_group, activity_date],
                |row| {
                    let power_a: Option<f64> = row.get(0)?;
                    let power_b: Option<f64> = row.get(1)?;
                    let power_rmse: Option<f64> = row.get(2)?;
                    let n_samples: i64 = row.get(3)?;
                    let smin: Option<f64> = row.get(4)?;
                    let smax: Option<f64> = row.get(5)?;
                    Ok((power_a, power_b, power_rmse, n_samples, smin, smax))
                },
            )
            .optional()?;

        Ok(row.and_then(|(power_a, power_b, power_rmse, n_samples, smin, smax)| {
            match (power_a, power_b) {
                (Some(a), Some(b)) => Some(PowerSpeedModel {
                    power_a: a,
                    power_b: b,
                    power_rmse: power_rmse.unwrap_or(0.0),
                    n_samples: n_samples as usize,
                    speed_range: (smin.unwrap_or(0.0), smax.unwrap_or(0.0)),
                }),
                _ => None,
            }
        }))
    }

    /// The newest `period_end` across all four metrics for the freshness
    /// check.
    pub fn newest_period_end(
        &self,
        user_id: &str,
        condition_group: &str,
    ) -> Result<Option<NaiveDate>, StoreError> {
        let date: Option<NaiveDate> = self.conn.query_row(
            r#"
            SELECT MAX(period_end) FROM form_baseline_history
            WHERE user_id = ?1 AND condition_group = ?2
              AND metric IN ('gct', 'vo', 'vr', 'power')
            "#,
            params![user_id, condition_group],
            |row| row.get(0),
        )?;
        Ok(date)
    }

    /// All baseline rows for one `(user, condition)`, newest period first.
    pub fn list_baselines(
        &self,
        user_id: &str,
        condition_group: &str,
    ) -> Result<Vec<BaselineRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, condition_group, metric, model_type,
                   coef_alpha, coef_d, coef_a, coef_b, power_a, power_b, power_rmse,
                   period_start, period_end, n_samples, rmse,
                   speed_range_min, speed_range_max
            FROM form_baseline_history
            WHERE user_id = ?1 AND condition_group = ?2
            ORDER BY period_end DESC, metric
            "#,
        )?;

        let rows = stmt
            .query_map(params![user_id, condition_group], |row| {
                let metric: String = row.get(2)?;
                let model_type: String = row.get(3)?;
                Ok((
                    BaselineRow {
                        user_id: row.get(0)?,
                        condition_group: row.get(1)?,
                        metric: Metric::Gct,
                        model_kind: ModelKind::Linear,
                        coef_alpha: row.get(4)?,
                        coef_d: row.get(5)?,
                        coef_a: row.get(6)?,
                        coef_b: row.get(7)?,
                        power_a: row.get(8)?,
                        power_b: row.get(9)?,
                        power_rmse: row.get(10)?,
                        period_start: row.get(11)?,
                        period_end: row.get(12)?,
                        n_samples: row.get(13)?,
                        rmse: row.get(14)?,
                        speed_range_min: row.get(15)?,
                        speed_range_max: row.get(16)?,
                    },
                    metric,
                    model_type,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut baselines = Vec::new();
        for (mut row, metric, model_type) in rows {
            row.metric = Metric::from_str(&metric).ok_or_else(|| StoreError::CorruptRow {
                table: "form_baseline_history".to_string(),
                reason: format!("unknown metric {metric:?}"),
            })?;
            row.model_kind =
                ModelKind::from_str(&model_type).ok_or_else(|| StoreError::CorruptRow {
                    table: "form_baseline_history".to_string(),
                    reason: format!("unknown model_type {model_type:?}"),
                })?;
            baselines.push(row);
        }
        Ok(baselines)
    }

    // ------------------------------------------------------------------
    // Evaluations
    // ------------------------------------------------------------------

    /// Upsert an evaluation row; re-evaluation overwrites everything and
    /// refreshes `evaluated_at`.
    pub fn upsert_evaluation(&mut self, record: &EvaluationRecord) -> Result<(), StoreError> {
        let power = record.power.as_ref();
        self.conn.execute(
            r#"
            INSERT INTO form_evaluations (
                activity_id,
                gct_ms_expected, vo_cm_expected, vr_pct_expected,
                gct_ms_actual, vo_cm_actual, vr_pct_actual,
                gct_delta_pct, vo_delta_cm, vo_delta_pct, vr_delta_pct,
                gct_penalty, gct_star_rating, gct_score, gct_needs_improvement, gct_evaluation_text,
                vo_penalty, vo_star_rating, vo_score, vo_needs_improvement, vo_evaluation_text,
                vr_penalty, vr_star_rating, vr_score, vr_needs_improvement, vr_evaluation_text,
                cadence_actual, cadence_minimum, cadence_achieved,
                overall_score, overall_star_rating,
                power_avg_w, power_wkg, speed_actual_mps, speed_expected_mps,
                power_efficiency_score, power_efficiency_rating,
                power_efficiency_needs_improvement,
                integrated_score, training_mode
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28,
                ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38, ?39, ?40
            )
            ON CONFLICT (activity_id) DO UPDATE SET
                gct_ms_expected = excluded.gct_ms_expected,
                vo_cm_expected = excluded.vo_cm_expected,
                vr_pct_expected = excluded.vr_pct_expected,
                gct_ms_actual = excluded.gct_ms_actual,
                vo_cm_actual = excluded.vo_cm_actual,
                vr_pct_actual = excluded.vr_pct_actual,
                gct_delta_pct = excluded.gct_delta_pct,
                vo_delta_cm = excluded.vo_delta_cm,
                vo_delta_pct = excluded.vo_delta_pct,
                vr_delta_pct = excluded.vr_delta_pct,
                gct_penalty = excluded.gct_penalty,
                gct_star_rating = excluded.gct_star_rating,
                gct_score = excluded.gct_score,
                gct_needs_improvement = excluded.gct_needs_improvement,
                gct_evaluation_text = excluded.gct_evaluation_text,
                vo_penalty = excluded.vo_penalty,
                vo_star_rating = excluded.vo_star_rating,
                vo_score = excluded.vo_score,
                vo_needs_improvement = excluded.vo_needs_improvement,
                vo_evaluation_text = excluded.vo_evaluation_text,
                vr_penalty = excluded.vr_penalty,
                vr_star_rating = excluded.vr_star_rating,
                vr_score = excluded.vr_score,
                vr_needs_improvement = excluded.vr_needs_improvement,
                vr_evaluation_text = excluded.vr_evaluation_text,
                cadence_actual = excluded.cadence_actual,
                cadence_minimum = excluded.cadence_minimum,
                cadence_achieved = excluded.cadence_achieved,
                overall_score = excluded.overall_score,
                overall_star_rating = excluded.overall_star_rating,
                power_avg_w = excluded.power_avg_w,
                power_wkg = excluded.power_wkg,
                speed_actual_mps = excluded.speed_actual_mps,
                speed_expected_mps = excluded.speed_expected_mps,
                power_efficiency_score = excluded.power_efficiency_score,
                power_efficiency_rating = excluded.power_efficiency_rating,
                power_efficiency_needs_improvement = excluded.power_efficiency_needs_improvement,
                integrated_score = excluded.integrated_score,
                training_mode = excluded.training_mode,
                evaluated_at = CURRENT_TIMESTAMP
            "#,
            params![
                record.activity_id,
                record.gct.expected,
                record.vo.expected,
                record.vr.expected,
                record.gct.actual,
                record.vo.actual,
                record.vr.actual,
                record.gct.delta_pct,
                record.vo_delta_cm,
                record.vo.delta_pct,
                record.vr.delta_pct,
                record.gct.penalty,
                record.gct.star_rating.symbol(),
                record.gct.score,
                record.gct.needs_improvement,
                record.gct.evaluation_text,
                record.vo.penalty,
                record.vo.star_rating.symbol(),
                record.vo.score,
                record.vo.needs_improvement,
                record.vo.evaluation_text,
                record.vr.penalty,
                record.vr.star_rating.symbol(),
                record.vr.score,
                record.vr.needs_improvement,
                record.vr.evaluation_text,
                record.cadence.actual,
                record.cadence.minimum,
                record.cadence.achieved,
                record.overall_score,
                record.overall_star_rating.symbol(),
                power.map(|p| p.avg_w),
                power.map(|p| p.wkg),
                power.map(|p| p.speed_actual_mps),
                power.map(|p| p.speed_expected_mps),
                power.map(|p| p.efficiency_score),
                power.map(|p| p.star_rating.symbol()),
                power.map(|p| p.needs_improvement),
                record.integrated_score,
                record.training_mode.map(|m| m.as_str()),
            ],
        )?;
        Ok(())
    }

    pub fn load_evaluation_summary(
        &self,
        activity_id: i64,
    ) -> Result<Option<EvaluationSummary>, StoreError> {
        let summary = self
            .conn
            .query_row(
                r#"
                SELECT activity_id, overall_score, overall_star_rating,
                       integrated_score, training_mode, evaluated_at
                FROM form_evaluations WHERE activity_id = ?1
                "#,
                params![activity_id],
                |row| {
                    Ok(EvaluationSummary {
                        activity_id: row.get(0)?,
                        overall_score: row.get(1)?,
                        overall_star_rating: row.get(2)?,
                        integrated_score: row.get(3)?,
                        training_mode: row.get(4)?,
                        evaluated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Result-store section cache
    // ------------------------------------------------------------------

    pub fn get_performance_section(
        &self,
        activity_id: i64,
        section: &str,
    ) -> Result<Option<Value>, StoreError> {
        let payload: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT payload FROM performance_sections WHERE activity_id = ?1 AND section = ?2",
                params![activity_id, section],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(Some(text)) => {
                let value = serde_json::from_str(&text)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Some(None) => Ok(Some(Value::Null)),
            None => Ok(None),
        }
    }

    /// Assemble the complete cached performance record, or `None` when any
    /// of the eleven sections is missing.
    pub fn cached_performance(
        &self,
        activity_id: i64,
    ) -> Result<Option<serde_json::Map<String, Value>>, StoreError> {
        let mut record = serde_json::Map::new();
        for section in SECTION_NAMES {
            match self.get_performance_section(activity_id, section)? {
                Some(value) => {
                    record.insert(section.to_string(), value);
                }
                None => return Ok(None),
            }
        }
        Ok(Some(record))
    }

    // ------------------------------------------------------------------
    // Write-through
    // ------------------------------------------------------------------

    /// Write one ingested activity atomically: the activity row, its splits,
    /// the section cache, every derived table, and the optional time
    /// series. Any failure rolls the whole record back.
    pub fn write_activity_record(
        &mut self,
        activity: &ActivityRow,
        splits: &[SplitRow],
        sections: &ActivitySections,
        time_series: Option<&[TimeSeriesPoint]>,
    ) -> Result<(), StoreError> {
        let activity_id = activity.activity_id;
        let tx = self.conn.transaction()?;

        put_activity(&tx, activity)?;
        for split in splits {
            put_split(&tx, split)?;
        }

        for (section, payload) in sections.section_payloads() {
            let text = serde_json::to_string(&payload)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            tx.execute(
                r#"
                INSERT INTO performance_sections (activity_id, section, payload)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (activity_id, section) DO UPDATE SET payload = excluded.payload
                "#,
                params![activity_id, section, text],
            )?;
        }

        put_form_efficiency(&tx, activity_id, &sections.form_efficiency_summary)?;
        put_heart_rate_zones(&tx, activity_id, &sections.heart_rate_zones)?;
        put_hr_efficiency(
            &tx,
            activity_id,
            activity.activity_date,
            &sections.hr_efficiency_analysis,
        )?;
        if let Some(trends) = &sections.performance_trends {
            put_performance_trends(&tx, activity_id, trends)?;
        }
        put_vo2_max(&tx, activity_id, &sections.vo2_max)?;
        put_lactate_threshold(&tx, activity_id, &sections.lactate_threshold)?;

        if let Some(points) = time_series {
            let compressed = CompressedTimeSeries::compress(points)?;
            tx.execute(
                r#"
                INSERT INTO time_series_metrics (
                    activity_id, compressed_data, original_size, point_count, compression_ratio
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (activity_id) DO UPDATE SET
                    compressed_data = excluded.compressed_data,
                    original_size = excluded.original_size,
                    point_count = excluded.point_count,
                    compression_ratio = excluded.compression_ratio
                "#,
                params![
                    activity_id,
                    compressed.compressed_data,
                    compressed.original_size,
                    compressed.point_count,
                    compressed.compression_ratio(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load the decompressed time series for an activity.
    pub fn load_time_series(
        &self,
        activity_id: i64,
    ) -> Result<Option<Vec<TimeSeriesPoint>>, StoreError> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT compressed_data FROM time_series_metrics WHERE activity_id = ?1",
                params![activity_id],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            Some(data) => Ok(Some(CompressedTimeSeries::decompress(&data)?)),
            None => Ok(None),
        }
    }
}

// ----------------------------------------------------------------------
// Row writers shared by the standalone upserts and the write-through
// transaction.
// ----------------------------------------------------------------------

fn put_activity(conn: &Connection, row: &ActivityRow) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO activities (
            activity_id, activity_date, activity_name, location_name,
            body_mass_kg, body_mass_source, body_mass_method,
            distance_km, duration_seconds, avg_pace_seconds_per_km, avg_heart_rate,
            external_temp_c, humidity, wind_speed_ms, wind_direction_compass
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT (activity_id) DO UPDATE SET
            activity_date = excluded.activity_date,
            activity_name = excluded.activity_name,
            location_name = excluded.location_name,
            body_mass_kg = excluded.body_mass_kg,
            body_mass_source = excluded.body_mass_source,
            body_mass_method = excluded.body_mass_method,
            distance_km = excluded.distance_km,
            duration_seconds = excluded.duration_seconds,
            avg_pace_seconds_per_km = excluded.avg_pace_seconds_per_km,
            avg_heart_rate = excluded.avg_heart_rate,
            external_temp_c = excluded.external_temp_c,
            humidity = excluded.humidity,
            wind_speed_ms = excluded.wind_speed_ms,
            wind_direction_compass = excluded.wind_direction_compass
        "#,
        params![
            row.activity_id,
            row.activity_date,
            row.activity_name,
            row.location_name,
            row.body_mass_kg,
            row.body_mass_source,
            row.body_mass_method,
            row.distance_km,
            row.duration_seconds,
            row.avg_pace_seconds_per_km,
            row.avg_heart_rate,
            row.external_temp_c,
            row.humidity,
            row.wind_speed_ms,
            row.wind_direction_compass,
        ],
    )?;
    Ok(())
}

fn put_split(conn: &Connection, split: &SplitRow) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO splits (
            activity_id, split_index, role_phase, distance, duration_seconds,
            start_time_s, end_time_s, intensity_type, pace_seconds_per_km,
            heart_rate, max_heart_rate, cadence, max_cadence, power, max_power,
            normalized_power, stride_length, ground_contact_time,
            vertical_oscillation, vertical_ratio, elevation_gain, elevation_loss,
            terrain_type, average_speed, grade_adjusted_speed
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
            ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25
        )
        ON CONFLICT (activity_id, split_index) DO UPDATE SET
            role_phase = excluded.role_phase,
            distance = excluded.distance,
            duration_seconds = excluded.duration_seconds,
            start_time_s = excluded.start_time_s,
            end_time_s = excluded.end_time_s,
            intensity_type = excluded.intensity_type,
            pace_seconds_per_km = excluded.pace_seconds_per_km,
            heart_rate = excluded.heart_rate,
            max_heart_rate = excluded.max_heart_rate,
            cadence = excluded.cadence,
            max_cadence = excluded.max_cadence,
            power = excluded.power,
            max_power = excluded.max_power,
            normalized_power = excluded.normalized_power,
            stride_length = excluded.stride_length,
            ground_contact_time = excluded.ground_contact_time,
            vertical_oscillation = excluded.vertical_oscillation,
            vertical_ratio = excluded.vertical_ratio,
            elevation_gain = excluded.elevation_gain,
            elevation_loss = excluded.elevation_loss,
            terrain_type = excluded.terrain_type,
            average_speed = excluded.average_speed,
            grade_adjusted_speed = excluded.grade_adjusted_speed
        "#,
        params![
            split.activity_id,
            split.split_index,
            split.role_phase.as_str(),
            split.distance_km,
            split.duration_seconds,
            split.start_time_s,
            split.end_time_s,
            split.intensity_type.as_str(),
            split.pace_seconds_per_km,
            split.heart_rate,
            split.max_heart_rate,
            split.cadence,
            split.max_cadence,
            split.power,
            split.max_power,
            split.normalized_power,
            split.stride_length,
            split.ground_contact_time,
            split.vertical_oscillation,
            split.vertical_ratio,
            split.elevation_gain,
            split.elevation_loss,
            split.terrain_type.map(|t| t.as_str()),
            split.average_speed,
            split.grade_adjusted_speed,
        ],
    )?;
    Ok(())
}

fn row_to_split_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<SplitRow> {
    Ok(SplitRow {
        activity_id: row.get(0)?,
        split_index: row.get(1)?,
        role_phase: RolePhase::Run,
        distance_km: row.get(3)?,
        duration_seconds: row.get(4)?,
        start_time_s: row.get(5)?,
        end_time_s: row.get(6)?,
        intensity_type: IntensityType::Active,
        pace_seconds_per_km: row.get(8)?,
        heart_rate: row.get(9)?,
        max_heart_rate: row.get(10)?,
        cadence: row.get(11)?,
        max_cadence: row.get(12)?,
        power: row.get(13)?,
        max_power: row.get(14)?,
        normalized_power: row.get(15)?,
        stride_length: row.get(16)?,
        ground_contact_time: row.get(17)?,
        vertical_oscillation: row.get(18)?,
        vertical_ratio: row.get(19)?,
        elevation_gain: row.get(20)?,
        elevation_loss: row.get(21)?,
        terrain_type: None,
        average_speed: row.get(23)?,
        grade_adjusted_speed: row.get(24)?,
    })
}

fn put_form_efficiency(
    conn: &Connection,
    activity_id: i64,
    summary: &FormEfficiencySummary,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO form_efficiency (
            activity_id,
            gct_avg, gct_min, gct_max, gct_std, gct_rating,
            vo_avg, vo_min, vo_max, vo_std, vo_rating,
            vr_avg, vr_min, vr_max, vr_std, vr_rating
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ON CONFLICT (activity_id) DO UPDATE SET
            gct_avg = excluded.gct_avg, gct_min = excluded.gct_min,
            gct_max = excluded.gct_max, gct_std = excluded.gct_std,
            gct_rating = excluded.gct_rating,
            vo_avg = excluded.vo_avg, vo_min = excluded.vo_min,
            vo_max = excluded.vo_max, vo_std = excluded.vo_std,
            vo_rating = excluded.vo_rating,
            vr_avg = excluded.vr_avg, vr_min = excluded.vr_min,
            vr_max = excluded.vr_max, vr_std = excluded.vr_std,
            vr_rating = excluded.vr_rating
        "#,
        params![
            activity_id,
            summary.gct_stats.average,
            summary.gct_stats.min,
            summary.gct_stats.max,
            summary.gct_stats.std,
            summary.gct_rating,
            summary.vo_stats.average,
            summary.vo_stats.min,
            summary.vo_stats.max,
            summary.vo_stats.std,
            summary.vo_rating,
            summary.vr_stats.average,
            summary.vr_stats.min,
            summary.vr_stats.max,
            summary.vr_stats.std,
            summary.vr_rating,
        ],
    )?;
    Ok(())
}

fn put_heart_rate_zones(
    conn: &Connection,
    activity_id: i64,
    zones: &[HrZoneDwell],
) -> Result<(), StoreError> {
    for zone in zones {
        conn.execute(
            r#"
            INSERT INTO heart_rate_zones (activity_id, zone_number, low_boundary, secs_in_zone)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (activity_id, zone_number) DO UPDATE SET
                low_boundary = excluded.low_boundary,
                secs_in_zone = excluded.secs_in_zone
            "#,
            params![activity_id, zone.zone_number, zone.low_boundary, zone.secs_in_zone],
        )?;
    }
    Ok(())
}

fn put_hr_efficiency(
    conn: &Connection,
    activity_id: i64,
    activity_date: NaiveDate,
    analysis: &HrEfficiencyAnalysis,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO hr_efficiency (
            activity_id, activity_date, avg_heart_rate, training_type, hr_stability
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (activity_id) DO UPDATE SET
            activity_date = excluded.activity_date,
            avg_heart_rate = excluded.avg_heart_rate,
            training_type = excluded.training_type,
            hr_stability = excluded.hr_stability
        "#,
        params![
            activity_id,
            activity_date,
            analysis.avg_heart_rate,
            analysis.training_type,
            analysis.hr_stability,
        ],
    )?;
    Ok(())
}

fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn put_performance_trends(
    conn: &Connection,
    activity_id: i64,
    trends: &PerformanceTrends,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO performance_trends (
            activity_id,
            warmup_splits, run_splits, recovery_splits, cooldown_splits,
            warmup_avg_pace, warmup_avg_hr, run_avg_pace, run_avg_hr,
            recovery_avg_pace, recovery_avg_hr, cooldown_avg_pace, cooldown_avg_hr,
            pace_consistency, hr_drift_percentage, cadence_consistency, fatigue_pattern
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        ON CONFLICT (activity_id) DO UPDATE SET
            warmup_splits = excluded.warmup_splits,
            run_splits = excluded.run_splits,
            recovery_splits = excluded.recovery_splits,
            cooldown_splits = excluded.cooldown_splits,
            warmup_avg_pace = excluded.warmup_avg_pace,
            warmup_avg_hr = excluded.warmup_avg_hr,
            run_avg_pace = excluded.run_avg_pace,
            run_avg_hr = excluded.run_avg_hr,
            recovery_avg_pace = excluded.recovery_avg_pace,
            recovery_avg_hr = excluded.recovery_avg_hr,
            cooldown_avg_pace = excluded.cooldown_avg_pace,
            cooldown_avg_hr = excluded.cooldown_avg_hr,
            pace_consistency = excluded.pace_consistency,
            hr_drift_percentage = excluded.hr_drift_percentage,
            cadence_consistency = excluded.cadence_consistency,
            fatigue_pattern = excluded.fatigue_pattern
        "#,
        params![
            activity_id,
            join_indices(&trends.warmup_phase.splits),
            join_indices(&trends.run_phase.splits),
            join_indices(&trends.recovery_phase.splits),
            join_indices(&trends.cooldown_phase.splits),
            trends.warmup_phase.avg_pace,
            trends.warmup_phase.avg_hr,
            trends.run_phase.avg_pace,
            trends.run_phase.avg_hr,
            trends.recovery_phase.avg_pace,
            trends.recovery_phase.avg_hr,
            trends.cooldown_phase.avg_pace,
            trends.cooldown_phase.avg_hr,
            trends.pace_consistency,
            trends.hr_drift_percentage,
            trends.cadence_consistency,
            trends.fatigue_pattern,
        ],
    )?;
    Ok(())
}

fn put_vo2_max(
    conn: &Connection,
    activity_id: i64,
    section: &Vo2MaxSection,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO vo2_max (activity_id, vo2_max, vo2_max_precise, measurement_date)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (activity_id) DO UPDATE SET
            vo2_max = excluded.vo2_max,
            vo2_max_precise = excluded.vo2_max_precise,
            measurement_date = excluded.measurement_date
        "#,
        params![
            activity_id,
            section.vo2_max,
            section.vo2_max_precise,
            section.measurement_date,
        ],
    )?;
    Ok(())
}

fn put_lactate_threshold(
    conn: &Connection,
    activity_id: i64,
    section: &LactateThresholdSection,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO lactate_threshold (
            activity_id, threshold_heart_rate, threshold_speed_mps, functional_threshold_power
        ) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (activity_id) DO UPDATE SET
            threshold_heart_rate = excluded.threshold_heart_rate,
            threshold_speed_mps = excluded.threshold_speed_mps,
            functional_threshold_power = excluded.functional_threshold_power
        "#,
        params![
            activity_id,
            section.threshold_heart_rate,
            section.threshold_speed_mps,
            section.functional_threshold_power,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RolePhase;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn activity(id: i64, date: NaiveDate) -> ActivityRow {
        ActivityRow {
            activity_id: id,
            activity_date: date,
            activity_name: Some("Morning Run".to_string()),
            location_name: None,
            body_mass_kg: Some(62.0),
            body_mass_source: Some("statistical_7d_median".to_string()),
            body_mass_method: Some("median".to_string()),
            distance_km: Some(10.0),
            duration_seconds: Some(3000.0),
            avg_pace_seconds_per_km: Some(300.0),
            avg_heart_rate: Some(150.0),
            external_temp_c: None,
            humidity: None,
            wind_speed_ms: None,
            wind_direction_compass: None,
        }
    }

    fn form_split(id: i64, index: u32, gct: f64, speed: f64) -> SplitRow {
        SplitRow {
            activity_id: id,
            split_index: index,
            role_phase: RolePhase::Run,
            intensity_type: IntensityType::Active,
            pace_seconds_per_km: Some(1000.0 / speed),
            ground_contact_time: Some(gct),
            vertical_oscillation: Some(8.0),
            vertical_ratio: Some(8.5),
            cadence: Some(182.0),
            average_speed: Some(speed),
            ..SplitRow::default()
        }
    }

    fn baseline(metric: Metric, period_end: NaiveDate) -> BaselineRow {
        let (kind, alpha, dd, a, b) = match metric {
            Metric::Gct => (ModelKind::Power, Some(4.6), Some(-0.6), None, None),
            Metric::Power => (ModelKind::Linear, None, None, None, None),
            _ => (ModelKind::Linear, None, None, Some(10.0), Some(-0.5)),
        };
        BaselineRow {
            user_id: "default".to_string(),
            condition_group: "flat_road".to_string(),
            metric,
            model_kind: kind,
            coef_alpha: alpha,
            coef_d: dd,
            coef_a: a,
            coef_b: b,
            power_a: (metric == Metric::Power).then_some(1.2),
            power_b: (metric == Metric::Power).then_some(0.6),
            power_rmse: (metric == Metric::Power).then_some(0.05),
            period_start: period_end
                .checked_sub_months(chrono::Months::new(2))
                .unwrap(),
            period_end,
            n_samples: 80,
            rmse: Some(0.05),
            speed_range_min: Some(2.5),
            speed_range_max: Some(5.0),
        }
    }

    fn seed_baseline_period(db: &mut Database, period_end: NaiveDate) {
        for metric in [Metric::Gct, Metric::Vo, Metric::Vr] {
            db.upsert_baseline(&baseline(metric, period_end)).unwrap();
        }
    }

    #[test]
    fn test_activity_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let row = activity(100, d(2025, 8, 10));
        db.upsert_activity(&row).unwrap();

        let loaded = db.get_activity(100).unwrap().unwrap();
        assert_eq!(loaded.activity_date, d(2025, 8, 10));
        assert_eq!(loaded.body_mass_kg, Some(62.0));

        assert_eq!(db.get_activity_date(100).unwrap(), Some(d(2025, 8, 10)));
        assert_eq!(db.activities_on(d(2025, 8, 10)).unwrap(), vec![100]);
        assert!(db.activities_on(d(2025, 8, 11)).unwrap().is_empty());
    }

    #[test]
    fn test_split_round_trip_and_upsert() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_activity(&activity(7, d(2025, 8, 1))).unwrap();

        let mut split = form_split(7, 1, 250.0, 3.3);
        split.terrain_type = Some(TerrainType::Rolling);
        db.upsert_splits(&[split.clone()]).unwrap();

        // Re-upserting the same key replaces rather than duplicates.
        split.ground_contact_time = Some(245.0);
        db.upsert_splits(&[split]).unwrap();

        let splits = db.load_splits(7).unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].ground_contact_time, Some(245.0));
        assert_eq!(splits[0].terrain_type, Some(TerrainType::Rolling));
        assert_eq!(splits[0].role_phase, RolePhase::Run);
    }

    #[test]
    fn test_baseline_selection_is_date_bounded() {
        let mut db = Database::open_in_memory().unwrap();
        seed_baseline_period(&mut db, d(2025, 6, 30));
        seed_baseline_period(&mut db, d(2025, 7, 31));
        seed_baseline_period(&mut db, d(2025, 8, 31));

        // 2025-08-15 selects the largest period_end <= activity_date.
        let set = db
            .load_models_covering("default", "flat_road", d(2025, 8, 15))
            .unwrap();
        assert!((set.gct.alpha - 4.6).abs() < 1e-9);

        // The selection must not drift to 2025-08-31 even though it exists.
        let max_end: NaiveDate = db
            .conn
            .query_row(
                "SELECT MAX(period_end) FROM form_baseline_history WHERE period_end <= ?1",
                params![d(2025, 8, 15)],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(max_end, d(2025, 7, 31));
    }

    #[test]
    fn test_load_models_missing_entirely() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .load_models_covering("default", "flat_road", d(2025, 8, 15))
            .unwrap_err();
        assert!(matches!(err, BaselineError::NoBaselineFound { .. }));
    }

    #[test]
    fn test_load_models_incomplete() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_baseline(&baseline(Metric::Gct, d(2025, 7, 31)))
            .unwrap();
        db.upsert_baseline(&baseline(Metric::Vo, d(2025, 7, 31)))
            .unwrap();

        let err = db
            .load_models_covering("default", "flat_road", d(2025, 8, 15))
            .unwrap_err();
        assert!(matches!(err, BaselineError::IncompleteBaseline { .. }));
    }

    #[test]
    fn test_baseline_upsert_replaces_numeric_fields() {
        let mut db = Database::open_in_memory().unwrap();
        let mut row = baseline(Metric::Gct, d(2025, 7, 31));
        db.upsert_baseline(&row).unwrap();

        row.coef_alpha = Some(4.8);
        row.n_samples = 120;
        db.upsert_baseline(&row).unwrap();

        let rows = db.list_baselines("default", "flat_road").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].coef_alpha, Some(4.8));
        assert_eq!(rows[0].n_samples, 120);
    }

    #[test]
    fn test_power_baseline_lookup() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(db
            .load_power_baseline("default", "flat_road", d(2025, 8, 15))
            .unwrap()
            .is_none());

        db.upsert_baseline(&baseline(Metric::Power, d(2025, 7, 31)))
            .unwrap();
        let model = db
            .load_power_baseline("default", "flat_road", d(2025, 8, 15))
            .unwrap()
            .unwrap();
        assert!((model.power_a - 1.2).abs() < 1e-9);
        assert!((model.power_b - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_newest_period_end_spans_all_metrics() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(db.newest_period_end("default", "flat_road").unwrap().is_none());

        seed_baseline_period(&mut db, d(2025, 6, 30));
        db.upsert_baseline(&baseline(Metric::Power, d(2025, 7, 31)))
            .unwrap();

        // A newer power row alone moves the freshness horizon.
        assert_eq!(
            db.newest_period_end("default", "flat_road").unwrap(),
            Some(d(2025, 7, 31))
        );
    }

    #[test]
    fn test_form_training_samples_window_and_filters() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_activity(&activity(1, d(2025, 7, 1))).unwrap();
        db.upsert_activity(&activity(2, d(2025, 9, 1))).unwrap();

        let mut incomplete = form_split(1, 2, 250.0, 3.3);
        incomplete.vertical_ratio = None;
        db.upsert_splits(&[form_split(1, 1, 250.0, 3.3), incomplete, form_split(2, 1, 240.0, 3.6)])
            .unwrap();

        let samples = db
            .form_training_samples(d(2025, 6, 10), d(2025, 8, 10))
            .unwrap();
        // Only the complete split of the in-window activity qualifies.
        assert_eq!(samples.len(), 1);
        assert!((samples[0].gct_ms - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_power_training_samples_compute_wkg() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_activity(&activity(1, d(2025, 7, 1))).unwrap();

        let mut split = form_split(1, 1, 250.0, 3.5);
        split.power = Some(248.0);
        db.upsert_splits(&[split]).unwrap();

        let samples = db
            .power_training_samples(d(2025, 6, 1), d(2025, 8, 1))
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].0 - 4.0).abs() < 1e-9);
        assert!((samples[0].1 - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_form_observation_with_index_list() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_activity(&activity(9, d(2025, 8, 1))).unwrap();
        db.upsert_splits(&[
            form_split(9, 1, 280.0, 3.0),
            form_split(9, 2, 240.0, 4.0),
            form_split(9, 3, 244.0, 4.0),
            form_split(9, 4, 290.0, 3.0),
        ])
        .unwrap();

        let all = db.form_observation(9, None).unwrap().unwrap();
        assert!((all.gct_ms - 263.5).abs() < 1e-9);

        let run_only = db.form_observation(9, Some(&[2, 3])).unwrap().unwrap();
        assert!((run_only.gct_ms - 242.0).abs() < 1e-9);
        assert_eq!(run_only.cadence, Some(182.0));

        assert!(db.form_observation(42, None).unwrap().is_none());
    }

    #[test]
    fn test_run_splits_list_parsing() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(db.run_splits_list(5).unwrap().is_none());

        db.conn
            .execute(
                "INSERT INTO performance_trends (activity_id, run_splits) VALUES (5, '3, 4,6')",
                [],
            )
            .unwrap();
        assert_eq!(db.run_splits_list(5).unwrap(), Some(vec![3, 4, 6]));

        db.conn
            .execute(
                "INSERT INTO performance_trends (activity_id, run_splits) VALUES (6, '')",
                [],
            )
            .unwrap();
        assert!(db.run_splits_list(6).unwrap().is_none());
    }

    #[test]
    fn test_time_series_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_activity(&activity(3, d(2025, 8, 1))).unwrap();

        let points: Vec<TimeSeriesPoint> = (0..500)
            .map(|i| TimeSeriesPoint {
                timestamp_s: i as f64,
                heart_rate: Some(140.0 + (i % 20) as f64),
                speed_mps: Some(3.3),
                power: Some(250.0),
                cadence: Some(180.0),
                elevation_m: Some(12.0),
            })
            .collect();

        let sections = ActivitySections::default();
        db.write_activity_record(&activity(3, d(2025, 8, 1)), &[], &sections, Some(&points))
            .unwrap();

        let loaded = db.load_time_series(3).unwrap().unwrap();
        assert_eq!(loaded.len(), 500);
        assert_eq!(loaded[10], points[10]);

        assert!(db.load_time_series(99).unwrap().is_none());
    }

    #[test]
    fn test_section_cache_completeness() {
        let mut db = Database::open_in_memory().unwrap();
        let sections = ActivitySections::default();
        db.write_activity_record(&activity(4, d(2025, 8, 2)), &[], &sections, None)
            .unwrap();

        let cached = db.cached_performance(4).unwrap().unwrap();
        assert_eq!(cached.len(), SECTION_NAMES.len());

        // A different activity has no cache at all.
        assert!(db.cached_performance(5).unwrap().is_none());
    }
}
