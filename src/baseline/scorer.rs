//! Scoring of observed form against pace-conditioned expectations.
//!
//! Penalties are asymmetric: lower-than-expected values (more efficient)
//! receive reduced factors, higher-than-expected values the full factor.
//! A consistency adjustment rewards balanced improvement across all three
//! metrics and penalises divergent patterns.

use serde::{Deserialize, Serialize};

use super::predictor::{predict_expectations, Expectations};
use super::BaselineSet;
use crate::models::FormMetric;

/// Penalty exceeding this flags the metric as needing improvement.
pub const NEEDS_IMPROVEMENT_PENALTY: f64 = 20.0;

/// Direction-dependent penalty factors for one form metric.
#[derive(Debug, Clone, Copy)]
pub struct PenaltyFactors {
    pub improvement: f64,
    pub degradation: f64,
}

impl FormMetric {
    /// Compile-time penalty factor table.
    pub const fn penalty_factors(self) -> PenaltyFactors {
        match self {
            FormMetric::Gct => PenaltyFactors {
                improvement: 0.3,
                degradation: 1.0,
            },
            FormMetric::Vo => PenaltyFactors {
                improvement: 0.3,
                degradation: 1.0,
            },
            FormMetric::Vr => PenaltyFactors {
                improvement: 0.2,
                degradation: 1.0,
            },
        }
    }
}

/// Averaged observation for one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub pace_s_per_km: f64,
    pub gct_ms: f64,
    pub vo_cm: f64,
    pub vr_pct: f64,
}

/// Scoring result for a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAssessment {
    pub actual: f64,
    pub expected: f64,
    /// Percentage delta from expected; negative means better than expected.
    pub delta_pct: f64,
    /// Asymmetric penalty, clamped to 0-100.
    pub penalty: f64,
    pub needs_improvement: bool,
}

/// Full scoring breakdown for one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub expectations: Expectations,
    pub gct: MetricAssessment,
    pub vo: MetricAssessment,
    pub vr: MetricAssessment,
    /// Absolute VO delta in centimeters.
    pub vo_delta_cm: f64,
    pub consistency_adjustment: f64,
    /// Overall 100-point score, clamped to 0-100.
    pub overall_score: f64,
}

/// Asymmetric penalty for one metric from its percentage delta.
pub fn compute_penalty(metric: FormMetric, delta_pct: f64) -> f64 {
    let factors = metric.penalty_factors();
    let factor = if delta_pct < 0.0 {
        factors.improvement
    } else {
        factors.degradation
    };
    (delta_pct.abs() * factor * 10.0).clamp(0.0, 100.0)
}

/// Consistency adjustment across the three deltas: a capped bonus when all
/// metrics improved, a graded penalty when they diverge.
pub fn consistency_adjustment(gct_delta_pct: f64, vo_delta_pct: f64, vr_delta_pct: f64) -> f64 {
    let deltas = [gct_delta_pct, vo_delta_pct, vr_delta_pct];
    let all_improved = deltas.iter().all(|&d| d <= 0.0);
    let max = deltas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = deltas.iter().copied().fold(f64::INFINITY, f64::min);
    let spread = max - min;

    if all_improved {
        let sum: f64 = deltas.iter().sum();
        (sum.abs() / 3.0 * 0.5).min(5.0)
    } else if spread > 15.0 {
        -10.0
    } else if spread > 10.0 {
        -5.0
    } else if spread > 5.0 {
        -2.0
    } else {
        0.0
    }
}

fn assess(metric: FormMetric, actual: f64, expected: f64) -> MetricAssessment {
    let delta_pct = (actual - expected) / expected * 100.0;
    let penalty = compute_penalty(metric, delta_pct);
    MetricAssessment {
        actual,
        expected,
        delta_pct,
        penalty,
        needs_improvement: penalty > NEEDS_IMPROVEMENT_PENALTY,
    }
}

/// Score an observation against the baseline set.
pub fn score_observation(models: &BaselineSet, obs: &Observation) -> ScoreBreakdown {
    let expectations = predict_expectations(models, obs.pace_s_per_km);

    let gct = assess(FormMetric::Gct, obs.gct_ms, expectations.gct_ms);
    let vo = assess(FormMetric::Vo, obs.vo_cm, expectations.vo_cm);
    let vr = assess(FormMetric::Vr, obs.vr_pct, expectations.vr_pct);

    let vo_delta_cm = obs.vo_cm - expectations.vo_cm;

    let adjustment = consistency_adjustment(gct.delta_pct, vo.delta_pct, vr.delta_pct);
    let avg_penalty = (gct.penalty + vo.penalty + vr.penalty) / 3.0;
    let overall_score = (100.0 - avg_penalty + adjustment).clamp(0.0, 100.0);

    ScoreBreakdown {
        expectations,
        gct,
        vo,
        vr,
        vo_delta_cm,
        consistency_adjustment: adjustment,
        overall_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::regression::{GctPowerModel, LinearModel};

    /// Models whose expected GCT at 300 s/km (3.333 m/s) is 261 ms.
    fn models_for_ideal_gct() -> BaselineSet {
        let speed: f64 = 1000.0 / 300.0;
        let d = -0.6;
        let alpha = speed.ln() - d * 261.0_f64.ln();
        BaselineSet {
            gct: GctPowerModel {
                alpha,
                d,
                rmse: 0.01,
                n_samples: 80,
                speed_range: (2.5, 5.0),
            },
            vo: LinearModel {
                a: 10.0,
                b: -0.5,
                rmse: 0.2,
                n_samples: 80,
                speed_range: (2.5, 5.0),
            },
            vr: LinearModel {
                a: 11.0,
                b: -0.8,
                rmse: 0.2,
                n_samples: 80,
                speed_range: (2.5, 5.0),
            },
        }
    }

    #[test]
    fn test_ideal_gct_scenario() {
        // Pace 300 s/km, expected GCT 261 ms, actual 258 ms.
        let models = models_for_ideal_gct();
        let speed = 1000.0 / 300.0;
        let obs = Observation {
            pace_s_per_km: 300.0,
            gct_ms: 258.0,
            vo_cm: models.vo.predict(speed),
            vr_pct: models.vr.predict(speed),
        };

        let breakdown = score_observation(&models, &obs);

        assert!((breakdown.expectations.gct_ms - 261.0).abs() < 1e-9);
        assert!((breakdown.gct.delta_pct - (-1.1494)).abs() < 1e-3);
        // Improvement direction, factor 0.3.
        assert!((breakdown.gct.penalty - 3.447).abs() < 1e-2);
        assert!(!breakdown.gct.needs_improvement);
    }

    #[test]
    fn test_asymmetric_penalty_directions() {
        // 5% worse uses the full factor, 5% better the reduced one.
        assert!((compute_penalty(FormMetric::Gct, 5.0) - 50.0).abs() < 1e-9);
        assert!((compute_penalty(FormMetric::Gct, -5.0) - 15.0).abs() < 1e-9);
        assert!((compute_penalty(FormMetric::Vr, -5.0) - 10.0).abs() < 1e-9);
        // Clamped at 100.
        assert!((compute_penalty(FormMetric::Vo, 25.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_consistency_adjustment_bonus() {
        // All improved: bonus of min(5, |sum|/3 * 0.5).
        let adj = consistency_adjustment(-3.0, -2.0, -1.0);
        assert!((adj - 1.0).abs() < 1e-9);

        // Large balanced improvement caps at +5.
        let adj = consistency_adjustment(-20.0, -20.0, -20.0);
        assert!((adj - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_consistency_adjustment_spread_boundaries() {
        assert_eq!(consistency_adjustment(0.0, 0.0, 5.0), 0.0);
        assert_eq!(consistency_adjustment(0.0, 0.0, 5.001), -2.0);
        assert_eq!(consistency_adjustment(0.0, 0.0, 10.001), -5.0);
        assert_eq!(consistency_adjustment(0.0, 0.0, 15.001), -10.0);
    }

    #[test]
    fn test_overall_score_clamped() {
        let models = models_for_ideal_gct();
        let speed = 1000.0 / 300.0;
        // Grossly degraded on every metric: overall floors at zero.
        let obs = Observation {
            pace_s_per_km: 300.0,
            gct_ms: 261.0 * 1.5,
            vo_cm: models.vo.predict(speed) * 1.5,
            vr_pct: models.vr.predict(speed) * 1.5,
        };
        let breakdown = score_observation(&models, &obs);
        assert_eq!(breakdown.overall_score, 0.0);
        assert!(breakdown.gct.needs_improvement);
        assert!(breakdown.vo.needs_improvement);
        assert!(breakdown.vr.needs_improvement);
    }

    #[test]
    fn test_balanced_improvement_beats_divergent() {
        let models = models_for_ideal_gct();
        let speed = 1000.0 / 300.0;

        let balanced = Observation {
            pace_s_per_km: 300.0,
            gct_ms: 261.0 * 0.98,
            vo_cm: models.vo.predict(speed) * 0.98,
            vr_pct: models.vr.predict(speed) * 0.98,
        };
        let divergent = Observation {
            pace_s_per_km: 300.0,
            gct_ms: 261.0 * 0.98,
            vo_cm: models.vo.predict(speed) * 1.10,
            vr_pct: models.vr.predict(speed) * 0.98,
        };

        let b = score_observation(&models, &balanced);
        let d = score_observation(&models, &divergent);
        assert!(b.consistency_adjustment > 0.0);
        assert!(d.consistency_adjustment < 0.0);
        assert!(b.overall_score > d.overall_score);
    }
}
