//! The eleven-section performance summary computed after data collection.
//!
//! Sections are persisted both as the per-activity performance document and
//! as rows in the analytical store's result cache; the ingest cache tier is
//! complete only when all eleven are present.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use statrs::statistics::Statistics;

use crate::models::{RolePhase, SplitRow};

/// Canonical section names, in document order.
pub const SECTION_NAMES: [&str; 11] = [
    "basic_metrics",
    "heart_rate_zones",
    "split_metrics",
    "efficiency_metrics",
    "training_effect",
    "power_to_weight",
    "vo2_max",
    "lactate_threshold",
    "form_efficiency_summary",
    "hr_efficiency_analysis",
    "performance_trends",
];

/// Whole-activity aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicMetrics {
    pub distance_km: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub avg_pace_seconds_per_km: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub avg_cadence: Option<f64>,
    pub avg_power: Option<f64>,
}

/// Time spent in one provider heart-rate zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrZoneDwell {
    pub zone_number: u32,
    pub low_boundary: Option<f64>,
    pub secs_in_zone: Option<f64>,
}

/// Variability aggregates over the splits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyMetrics {
    /// Standard deviation of cadence.
    pub cadence_stability: Option<f64>,
    /// Standard deviation of pace.
    pub pace_variability: Option<f64>,
    /// Average power divided by average heart rate.
    pub power_efficiency: Option<f64>,
}

/// Provider training-effect scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingEffect {
    pub aerobic_te: Option<f64>,
    pub anaerobic_te: Option<f64>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerToWeight {
    pub watts_per_kg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vo2MaxSection {
    pub vo2_max: Option<f64>,
    pub vo2_max_precise: Option<f64>,
    pub measurement_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LactateThresholdSection {
    pub threshold_heart_rate: Option<f64>,
    pub threshold_speed_mps: Option<f64>,
    pub functional_threshold_power: Option<f64>,
}

/// avg/min/max/std for one form metric across the splits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std: Option<f64>,
}

/// Per-metric form statistics with coarse ratings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormEfficiencySummary {
    pub gct_stats: MetricStats,
    pub gct_rating: String,
    pub vo_stats: MetricStats,
    pub vo_rating: String,
    pub vr_stats: MetricStats,
    pub vr_rating: String,
}

/// Heart-rate derived training classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HrEfficiencyAnalysis {
    pub avg_heart_rate: Option<f64>,
    pub training_type: Option<String>,
    pub hr_stability: String,
}

/// Splits and averages for one role phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    /// 1-based split numbers belonging to this phase.
    pub splits: Vec<u32>,
    pub avg_pace: Option<f64>,
    pub avg_hr: Option<f64>,
}

/// Four-phase trend analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTrends {
    pub warmup_phase: PhaseSummary,
    pub run_phase: PhaseSummary,
    pub recovery_phase: PhaseSummary,
    pub cooldown_phase: PhaseSummary,
    /// Run-phase pace standard deviation over mean.
    pub pace_consistency: Option<f64>,
    /// Warmup-to-cooldown heart-rate drift in percent.
    pub hr_drift_percentage: Option<f64>,
    pub cadence_consistency: String,
    pub fatigue_pattern: String,
}

/// The assembled eleven-section record for one activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivitySections {
    pub basic_metrics: BasicMetrics,
    pub heart_rate_zones: Vec<HrZoneDwell>,
    pub split_metrics: Vec<SplitRow>,
    pub efficiency_metrics: EfficiencyMetrics,
    pub training_effect: TrainingEffect,
    pub power_to_weight: PowerToWeight,
    pub vo2_max: Vo2MaxSection,
    pub lactate_threshold: LactateThresholdSection,
    pub form_efficiency_summary: FormEfficiencySummary,
    pub hr_efficiency_analysis: HrEfficiencyAnalysis,
    pub performance_trends: Option<PerformanceTrends>,
}

impl ActivitySections {
    /// Serialize each section for the result-store cache, in
    /// [`SECTION_NAMES`] order.
    pub fn section_payloads(&self) -> Vec<(&'static str, Value)> {
        let ser = |v: serde_json::Result<Value>| v.unwrap_or(Value::Null);
        vec![
            ("basic_metrics", ser(serde_json::to_value(&self.basic_metrics))),
            (
                "heart_rate_zones",
                ser(serde_json::to_value(&self.heart_rate_zones)),
            ),
            ("split_metrics", ser(serde_json::to_value(&self.split_metrics))),
            (
                "efficiency_metrics",
                ser(serde_json::to_value(&self.efficiency_metrics)),
            ),
            (
                "training_effect",
                ser(serde_json::to_value(&self.training_effect)),
            ),
            (
                "power_to_weight",
                ser(serde_json::to_value(&self.power_to_weight)),
            ),
            ("vo2_max", ser(serde_json::to_value(&self.vo2_max))),
            (
                "lactate_threshold",
                ser(serde_json::to_value(&self.lactate_threshold)),
            ),
            (
                "form_efficiency_summary",
                ser(serde_json::to_value(&self.form_efficiency_summary)),
            ),
            (
                "hr_efficiency_analysis",
                ser(serde_json::to_value(&self.hr_efficiency_analysis)),
            ),
            (
                "performance_trends",
                ser(serde_json::to_value(&self.performance_trends)),
            ),
        ]
    }
}

/// Side inputs for section computation that do not come from the splits.
#[derive(Debug, Clone, Default)]
pub struct SectionContext {
    pub hr_zones: Vec<HrZoneDwell>,
    pub training_effect: TrainingEffect,
    pub vo2_max: Vo2MaxSection,
    pub lactate_threshold: LactateThresholdSection,
    pub body_mass_kg: Option<f64>,
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().mean())
    }
}

fn std_of(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        None
    } else {
        Some(values.iter().std_dev())
    }
}

fn collect<F>(splits: &[SplitRow], f: F) -> Vec<f64>
where
    F: Fn(&SplitRow) -> Option<f64>,
{
    splits.iter().filter_map(f).collect()
}

fn metric_stats(values: &[f64]) -> MetricStats {
    if values.is_empty() {
        return MetricStats::default();
    }
    MetricStats {
        average: mean_of(values),
        min: Some(values.iter().copied().fold(f64::INFINITY, f64::min)),
        max: Some(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        std: std_of(values),
    }
}

/// Compute the eleven-section summary from ingested splits plus context.
pub fn compute_sections(splits: &[SplitRow], ctx: &SectionContext) -> ActivitySections {
    let paces = collect(splits, |s| s.pace_seconds_per_km);
    let hrs = collect(splits, |s| s.heart_rate);
    let cadences = collect(splits, |s| s.cadence);
    let powers = collect(splits, |s| s.power);

    let avg_heart_rate = mean_of(&hrs);
    let avg_power = mean_of(&powers);

    let basic_metrics = BasicMetrics {
        distance_km: {
            let d = collect(splits, |s| s.distance_km);
            if d.is_empty() {
                None
            } else {
                Some(d.iter().sum())
            }
        },
        duration_seconds: {
            let d = collect(splits, |s| s.duration_seconds);
            if d.is_empty() {
                None
            } else {
                Some(d.iter().sum())
            }
        },
        avg_pace_seconds_per_km: mean_of(&paces),
        avg_heart_rate,
        avg_cadence: mean_of(&cadences),
        avg_power,
    };

    let efficiency_metrics = EfficiencyMetrics {
        cadence_stability: std_of(&cadences),
        pace_variability: std_of(&paces),
        power_efficiency: match (avg_power, avg_heart_rate) {
            (Some(p), Some(hr)) if hr > 0.0 => Some(p / hr),
            _ => None,
        },
    };

    let power_to_weight = PowerToWeight {
        watts_per_kg: match (avg_power, ctx.body_mass_kg) {
            (Some(p), Some(kg)) if kg > 0.0 => Some(p / kg),
            _ => None,
        },
    };

    let gct_values = collect(splits, |s| s.ground_contact_time);
    let vo_values = collect(splits, |s| s.vertical_oscillation);
    let vr_values = collect(splits, |s| s.vertical_ratio);

    let gct_stats = metric_stats(&gct_values);
    let vo_stats = metric_stats(&vo_values);
    let vr_stats = metric_stats(&vr_values);

    let coarse_rating = |avg: Option<f64>, threshold: f64| -> String {
        match avg {
            Some(v) if v < threshold => "★★★★★".to_string(),
            Some(_) => "★★★☆☆".to_string(),
            None => String::new(),
        }
    };

    let form_efficiency_summary = FormEfficiencySummary {
        gct_rating: coarse_rating(gct_stats.average, 240.0),
        gct_stats,
        vo_rating: coarse_rating(vo_stats.average, 8.0),
        vo_stats,
        vr_rating: coarse_rating(vr_stats.average, 8.5),
        vr_stats,
    };

    let hr_efficiency_analysis = hr_efficiency(avg_heart_rate, &hrs, &ctx.hr_zones);
    let performance_trends = compute_trends(splits, &cadences);

    ActivitySections {
        basic_metrics,
        heart_rate_zones: ctx.hr_zones.clone(),
        split_metrics: splits.to_vec(),
        efficiency_metrics,
        training_effect: ctx.training_effect.clone(),
        power_to_weight,
        vo2_max: ctx.vo2_max.clone(),
        lactate_threshold: ctx.lactate_threshold.clone(),
        form_efficiency_summary,
        hr_efficiency_analysis,
        performance_trends,
    }
}

/// Classify the session from average heart rate against the provider zone
/// boundaries (zone lows of zones 2-4, with fallbacks when zones are
/// missing).
fn hr_efficiency(
    avg_heart_rate: Option<f64>,
    hrs: &[f64],
    zones: &[HrZoneDwell],
) -> HrEfficiencyAnalysis {
    let boundary = |zone: u32, fallback: f64| -> f64 {
        zones
            .iter()
            .find(|z| z.zone_number == zone)
            .and_then(|z| z.low_boundary)
            .unwrap_or(fallback)
    };

    let training_type = avg_heart_rate.map(|avg| {
        let z1_high = boundary(2, 120.0);
        let z2_high = boundary(3, 140.0);
        let z3_high = boundary(4, 160.0);
        if avg <= z1_high {
            "aerobic_base"
        } else if avg <= z2_high {
            "tempo_run"
        } else if avg <= z3_high {
            "threshold_work"
        } else {
            "mixed_effort"
        }
        .to_string()
    });

    let hr_stability = match std_of(hrs) {
        Some(std) if std < 5.0 => "stable".to_string(),
        Some(_) => "variable".to_string(),
        None => String::new(),
    };

    HrEfficiencyAnalysis {
        avg_heart_rate,
        training_type,
        hr_stability,
    }
}

fn phase_summary(splits: &[SplitRow], phase: RolePhase) -> PhaseSummary {
    let members: Vec<&SplitRow> = splits.iter().filter(|s| s.role_phase == phase).collect();
    let paces: Vec<f64> = members.iter().filter_map(|s| s.pace_seconds_per_km).collect();
    let hrs: Vec<f64> = members.iter().filter_map(|s| s.heart_rate).collect();
    PhaseSummary {
        splits: members.iter().map(|s| s.split_index).collect(),
        avg_pace: mean_of(&paces),
        avg_hr: mean_of(&hrs),
    }
}

/// Four-phase trend analysis; activities with fewer than three splits carry
/// no trends section.
fn compute_trends(splits: &[SplitRow], cadences: &[f64]) -> Option<PerformanceTrends> {
    if splits.len() < 3 {
        return None;
    }

    let warmup_phase = phase_summary(splits, RolePhase::Warmup);
    let run_phase = phase_summary(splits, RolePhase::Run);
    let recovery_phase = phase_summary(splits, RolePhase::Recovery);
    let cooldown_phase = phase_summary(splits, RolePhase::Cooldown);

    // Pace consistency over the run phase only (recovery jogs excluded).
    let run_paces: Vec<f64> = splits
        .iter()
        .filter(|s| s.role_phase == RolePhase::Run)
        .filter_map(|s| s.pace_seconds_per_km)
        .collect();
    let pace_consistency = match (mean_of(&run_paces), std_of(&run_paces)) {
        (Some(mean), Some(std)) if mean > 0.0 => Some(std / mean),
        _ => None,
    };

    let hr_drift_percentage = match (warmup_phase.avg_hr, cooldown_phase.avg_hr) {
        (Some(warmup), Some(cooldown)) if warmup > 0.0 => {
            Some((cooldown - warmup) / warmup * 100.0)
        }
        _ => None,
    };

    let fatigue_pattern = match hr_drift_percentage {
        Some(drift) if drift < 5.0 => "controlled",
        Some(drift) if drift < 10.0 => "mild_accumulation",
        Some(_) => "marked_accumulation",
        None => "unknown",
    }
    .to_string();

    let cadence_consistency = match std_of(cadences) {
        Some(std) if std < 5.0 => "stable".to_string(),
        Some(_) => "variable".to_string(),
        None => String::new(),
    };

    Some(PerformanceTrends {
        warmup_phase,
        run_phase,
        recovery_phase,
        cooldown_phase,
        pace_consistency,
        hr_drift_percentage,
        cadence_consistency,
        fatigue_pattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntensityType, RolePhase};

    fn split(
        index: u32,
        phase: RolePhase,
        pace: f64,
        hr: f64,
        cadence: f64,
    ) -> SplitRow {
        SplitRow {
            activity_id: 1,
            split_index: index,
            role_phase: phase,
            distance_km: Some(1.0),
            duration_seconds: Some(pace),
            intensity_type: IntensityType::Active,
            pace_seconds_per_km: Some(pace),
            heart_rate: Some(hr),
            cadence: Some(cadence),
            power: Some(250.0),
            ground_contact_time: Some(250.0),
            vertical_oscillation: Some(8.0),
            vertical_ratio: Some(8.5),
            ..SplitRow::default()
        }
    }

    fn workout_splits() -> Vec<SplitRow> {
        vec![
            split(1, RolePhase::Warmup, 330.0, 130.0, 168.0),
            split(2, RolePhase::Run, 280.0, 155.0, 178.0),
            split(3, RolePhase::Run, 282.0, 158.0, 179.0),
            split(4, RolePhase::Run, 278.0, 157.0, 180.0),
            split(5, RolePhase::Cooldown, 340.0, 140.0, 166.0),
        ]
    }

    #[test]
    fn test_basic_metrics() {
        let sections = compute_sections(&workout_splits(), &SectionContext::default());
        let basic = &sections.basic_metrics;
        assert_eq!(basic.distance_km, Some(5.0));
        assert!((basic.avg_pace_seconds_per_km.unwrap() - 302.0).abs() < 1e-9);
        assert!(basic.avg_heart_rate.is_some());
        assert_eq!(basic.avg_power, Some(250.0));
    }

    #[test]
    fn test_phase_split_lists() {
        let sections = compute_sections(&workout_splits(), &SectionContext::default());
        let trends = sections.performance_trends.unwrap();
        assert_eq!(trends.warmup_phase.splits, vec![1]);
        assert_eq!(trends.run_phase.splits, vec![2, 3, 4]);
        assert!(trends.recovery_phase.splits.is_empty());
        assert_eq!(trends.cooldown_phase.splits, vec![5]);
    }

    #[test]
    fn test_hr_drift_and_fatigue() {
        let sections = compute_sections(&workout_splits(), &SectionContext::default());
        let trends = sections.performance_trends.unwrap();
        // (140 - 130) / 130 * 100 = 7.69% -> mild accumulation
        assert!((trends.hr_drift_percentage.unwrap() - 7.6923).abs() < 1e-3);
        assert_eq!(trends.fatigue_pattern, "mild_accumulation");
    }

    #[test]
    fn test_run_phase_pace_consistency_excludes_bookends() {
        let sections = compute_sections(&workout_splits(), &SectionContext::default());
        let trends = sections.performance_trends.unwrap();
        // Run paces are tightly grouped; the warmup/cooldown outliers must
        // not inflate the ratio.
        assert!(trends.pace_consistency.unwrap() < 0.02);
    }

    #[test]
    fn test_too_few_splits_yields_no_trends() {
        let splits = workout_splits()[..2].to_vec();
        let sections = compute_sections(&splits, &SectionContext::default());
        assert!(sections.performance_trends.is_none());
    }

    #[test]
    fn test_training_type_classification() {
        let zones = vec![
            HrZoneDwell {
                zone_number: 2,
                low_boundary: Some(125.0),
                secs_in_zone: Some(300.0),
            },
            HrZoneDwell {
                zone_number: 3,
                low_boundary: Some(145.0),
                secs_in_zone: Some(900.0),
            },
            HrZoneDwell {
                zone_number: 4,
                low_boundary: Some(165.0),
                secs_in_zone: Some(120.0),
            },
        ];
        let ctx = SectionContext {
            hr_zones: zones,
            ..SectionContext::default()
        };
        let sections = compute_sections(&workout_splits(), &ctx);
        // Average HR sits between zone-3 and zone-4 lows.
        assert_eq!(
            sections.hr_efficiency_analysis.training_type.as_deref(),
            Some("threshold_work")
        );
    }

    #[test]
    fn test_section_payload_count() {
        let sections = compute_sections(&workout_splits(), &SectionContext::default());
        let payloads = sections.section_payloads();
        assert_eq!(payloads.len(), SECTION_NAMES.len());
        for ((name, value), expected) in payloads.iter().zip(SECTION_NAMES.iter()) {
            assert_eq!(name, expected);
            if *name != "performance_trends" {
                assert!(!value.is_null(), "section {name} serialized to null");
            }
        }
    }

    #[test]
    fn test_power_to_weight_requires_body_mass() {
        let no_mass = compute_sections(&workout_splits(), &SectionContext::default());
        assert!(no_mass.power_to_weight.watts_per_kg.is_none());

        let ctx = SectionContext {
            body_mass_kg: Some(62.5),
            ..SectionContext::default()
        };
        let with_mass = compute_sections(&workout_splits(), &ctx);
        assert!((with_mass.power_to_weight.watts_per_kg.unwrap() - 4.0).abs() < 1e-9);
    }
}
