//! Core domain types shared across the baseline, ingest, and storage layers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum cadence target in steps per minute (both feet).
pub const CADENCE_TARGET_SPM: f64 = 180.0;

/// Baseline metric kinds stored in the model history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Gct,
    Vo,
    Vr,
    Power,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Gct => "gct",
            Metric::Vo => "vo",
            Metric::Vr => "vr",
            Metric::Power => "power",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "gct" => Some(Metric::Gct),
            "vo" => Some(Metric::Vo),
            "vr" => Some(Metric::Vr),
            "power" => Some(Metric::Power),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three form metrics the scorer evaluates.
///
/// Separate from [`Metric`] so that penalty tables and delta structs can
/// never be indexed by the power metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormMetric {
    Gct,
    Vo,
    Vr,
}

impl FormMetric {
    pub fn as_metric(&self) -> Metric {
        match self {
            FormMetric::Gct => Metric::Gct,
            FormMetric::Vo => Metric::Vo,
            FormMetric::Vr => Metric::Vr,
        }
    }
}

/// Model families used for baseline rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Log-log power law (GCT).
    Power,
    /// Straight line over speed (VO, VR, power->speed).
    Linear,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Power => "power",
            ModelKind::Linear => "linear",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "power" => Some(ModelKind::Power),
            "linear" => Some(ModelKind::Linear),
            _ => None,
        }
    }
}

/// Qualitative intensity shape of an activity, used to weight the
/// integrated score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingMode {
    IntervalSprint,
    TempoThreshold,
    LowModerate,
}

impl TrainingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMode::IntervalSprint => "interval_sprint",
            TrainingMode::TempoThreshold => "tempo_threshold",
            TrainingMode::LowModerate => "low_moderate",
        }
    }

    /// Parse a stored training-type label. Unknown or missing labels
    /// collapse to `LowModerate`.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("interval_sprint") => TrainingMode::IntervalSprint,
            Some("tempo_threshold") => TrainingMode::TempoThreshold,
            _ => TrainingMode::LowModerate,
        }
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-assigned (or estimated) intensity label for a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntensityType {
    Warmup,
    Interval,
    Active,
    Recovery,
    Cooldown,
}

impl IntensityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntensityType::Warmup => "WARMUP",
            IntensityType::Interval => "INTERVAL",
            IntensityType::Active => "ACTIVE",
            IntensityType::Recovery => "RECOVERY",
            IntensityType::Cooldown => "COOLDOWN",
        }
    }

    /// Parse a provider label. `REST` collapses into `RECOVERY`; anything
    /// unrecognised is treated as absent so the estimator can fill it in.
    pub fn from_provider(s: &str) -> Option<Self> {
        match s {
            "WARMUP" => Some(IntensityType::Warmup),
            "INTERVAL" => Some(IntensityType::Interval),
            "ACTIVE" => Some(IntensityType::Active),
            "RECOVERY" | "REST" => Some(IntensityType::Recovery),
            "COOLDOWN" => Some(IntensityType::Cooldown),
            _ => None,
        }
    }

    /// Map the intensity label onto the coarse role phase.
    pub fn role_phase(&self) -> RolePhase {
        match self {
            IntensityType::Warmup => RolePhase::Warmup,
            IntensityType::Interval | IntensityType::Active => RolePhase::Run,
            IntensityType::Recovery => RolePhase::Recovery,
            IntensityType::Cooldown => RolePhase::Cooldown,
        }
    }
}

impl fmt::Display for IntensityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse role of a split within the activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolePhase {
    Warmup,
    Run,
    Recovery,
    Cooldown,
}

impl RolePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolePhase::Warmup => "warmup",
            RolePhase::Run => "run",
            RolePhase::Recovery => "recovery",
            RolePhase::Cooldown => "cooldown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "warmup" => Some(RolePhase::Warmup),
            "run" => Some(RolePhase::Run),
            "recovery" => Some(RolePhase::Recovery),
            "cooldown" => Some(RolePhase::Cooldown),
            _ => None,
        }
    }
}

/// Terrain classification derived from per-split elevation gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainType {
    Flat,
    Rolling,
    Hilly,
    Mountain,
}

impl TerrainType {
    /// Classify from elevation gain in meters.
    pub fn from_elevation_gain(gain_m: f64) -> Self {
        if gain_m < 5.0 {
            TerrainType::Flat
        } else if gain_m < 15.0 {
            TerrainType::Rolling
        } else if gain_m < 30.0 {
            TerrainType::Hilly
        } else {
            TerrainType::Mountain
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerrainType::Flat => "flat",
            TerrainType::Rolling => "rolling",
            TerrainType::Hilly => "hilly",
            TerrainType::Mountain => "mountain",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "flat" => Some(TerrainType::Flat),
            "rolling" => Some(TerrainType::Rolling),
            "hilly" => Some(TerrainType::Hilly),
            "mountain" => Some(TerrainType::Mountain),
            _ => None,
        }
    }
}

/// Five-bucket star rating used for every per-metric and overall rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StarRating {
    One,
    Two,
    Three,
    Four,
    Five,
}

impl StarRating {
    /// Bucket a penalty (0-100) into a rating. Direction information is
    /// already encoded in the asymmetric penalty, so thresholds alone
    /// decide the bucket.
    pub fn from_penalty(penalty: f64) -> Self {
        if penalty < 10.0 {
            StarRating::Five
        } else if penalty < 20.0 {
            StarRating::Four
        } else if penalty < 40.0 {
            StarRating::Three
        } else if penalty < 60.0 {
            StarRating::Two
        } else {
            StarRating::One
        }
    }

    pub fn numeric(&self) -> f64 {
        match self {
            StarRating::One => 1.0,
            StarRating::Two => 2.0,
            StarRating::Three => 3.0,
            StarRating::Four => 4.0,
            StarRating::Five => 5.0,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            StarRating::Five => "excellent",
            StarRating::Four => "good",
            StarRating::Three => "average",
            StarRating::Two => "below_average",
            StarRating::One => "poor",
        }
    }

    /// Unicode symbol string, filled stars padded with empty ones.
    pub fn symbol(&self) -> String {
        let filled = match self {
            StarRating::One => 1,
            StarRating::Two => 2,
            StarRating::Three => 3,
            StarRating::Four => 4,
            StarRating::Five => 5,
        };
        let mut s = String::with_capacity(5 * '★'.len_utf8());
        for _ in 0..filled {
            s.push('★');
        }
        for _ in filled..5 {
            s.push('☆');
        }
        s
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        let filled = s.chars().take_while(|c| *c == '★').count();
        match filled {
            1 => Some(StarRating::One),
            2 => Some(StarRating::Two),
            3 => Some(StarRating::Three),
            4 => Some(StarRating::Four),
            5 => Some(StarRating::Five),
            _ => None,
        }
    }
}

impl fmt::Display for StarRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol())
    }
}

/// An activity row as written to the analytical store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRow {
    pub activity_id: i64,
    pub activity_date: NaiveDate,
    pub activity_name: Option<String>,
    pub location_name: Option<String>,
    /// Seven-day median body mass used for W/kg normalisation.
    pub body_mass_kg: Option<f64>,
    pub body_mass_source: Option<String>,
    pub body_mass_method: Option<String>,
    pub distance_km: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub avg_pace_seconds_per_km: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub external_temp_c: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub wind_direction_compass: Option<String>,
}

/// A per-kilometer (or per-lap) split row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRow {
    pub activity_id: i64,
    /// 1-based split number.
    pub split_index: u32,
    pub role_phase: RolePhase,
    pub distance_km: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub start_time_s: Option<f64>,
    pub end_time_s: Option<f64>,
    pub intensity_type: IntensityType,
    pub pace_seconds_per_km: Option<f64>,
    pub heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub max_cadence: Option<f64>,
    pub power: Option<f64>,
    pub max_power: Option<f64>,
    pub normalized_power: Option<f64>,
    pub stride_length: Option<f64>,
    /// Ground contact time in milliseconds.
    pub ground_contact_time: Option<f64>,
    /// Vertical oscillation in centimeters.
    pub vertical_oscillation: Option<f64>,
    /// Vertical ratio in percent.
    pub vertical_ratio: Option<f64>,
    pub elevation_gain: Option<f64>,
    pub elevation_loss: Option<f64>,
    pub terrain_type: Option<TerrainType>,
    pub average_speed: Option<f64>,
    pub grade_adjusted_speed: Option<f64>,
}

impl Default for SplitRow {
    fn default() -> Self {
        SplitRow {
            activity_id: 0,
            split_index: 0,
            role_phase: RolePhase::Run,
            distance_km: None,
            duration_seconds: None,
            start_time_s: None,
            end_time_s: None,
            intensity_type: IntensityType::Active,
            pace_seconds_per_km: None,
            heart_rate: None,
            max_heart_rate: None,
            cadence: None,
            max_cadence: None,
            power: None,
            max_power: None,
            normalized_power: None,
            stride_length: None,
            ground_contact_time: None,
            vertical_oscillation: None,
            vertical_ratio: None,
            elevation_gain: None,
            elevation_loss: None,
            terrain_type: None,
            average_speed: None,
            grade_adjusted_speed: None,
        }
    }
}

/// One sample of an activity's chart-level time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Seconds from activity start.
    pub timestamp_s: f64,
    pub heart_rate: Option<f64>,
    pub speed_mps: Option<f64>,
    pub power: Option<f64>,
    pub cadence: Option<f64>,
    pub elevation_m: Option<f64>,
}

/// A trained baseline model row, as stored in `form_baseline_history`.
///
/// Rows are immutable; retraining the same logical key replaces all
/// numeric fields via upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRow {
    pub user_id: String,
    pub condition_group: String,
    pub metric: Metric,
    pub model_kind: ModelKind,
    pub coef_alpha: Option<f64>,
    pub coef_d: Option<f64>,
    pub coef_a: Option<f64>,
    pub coef_b: Option<f64>,
    pub power_a: Option<f64>,
    pub power_b: Option<f64>,
    pub power_rmse: Option<f64>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub n_samples: i64,
    pub rmse: Option<f64>,
    pub speed_range_min: Option<f64>,
    pub speed_range_max: Option<f64>,
}
