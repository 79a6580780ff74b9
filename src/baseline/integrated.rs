//! Mode-weighted integrated score and power-efficiency evaluation.

use serde::{Deserialize, Serialize};

use super::regression::PowerSpeedModel;
use crate::models::{StarRating, TrainingMode};

/// Per-metric weights for one training mode. Always sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeWeights {
    pub gct: f64,
    pub vo: f64,
    pub vr: f64,
    pub power: f64,
}

impl TrainingMode {
    /// Weight table for the integrated score.
    pub const fn weights(self) -> ModeWeights {
        match self {
            TrainingMode::IntervalSprint => ModeWeights {
                gct: 0.30,
                vo: 0.15,
                vr: 0.15,
                power: 0.40,
            },
            TrainingMode::TempoThreshold => ModeWeights {
                gct: 0.25,
                vo: 0.20,
                vr: 0.20,
                power: 0.35,
            },
            TrainingMode::LowModerate => ModeWeights {
                gct: 0.30,
                vo: 0.25,
                vr: 0.25,
                power: 0.20,
            },
        }
    }
}

/// Signed penalty ratios feeding the integrated score. Positive means worse
/// than expected; negative means better. Form ratios are penalty/100; the
/// power ratio is the negated efficiency score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyRatios {
    pub gct: f64,
    pub vo: f64,
    pub vr: f64,
    pub power: Option<f64>,
}

/// 100-point integrated score with mode-specific weights.
///
/// When power is absent its weight is discarded and the three form weights
/// are renormalised by their own sum. Scores above 100 are possible when
/// every ratio is negative.
pub fn integrated_score(penalties: &PenaltyRatios, mode: TrainingMode) -> f64 {
    let w = mode.weights();

    let weighted = match penalties.power {
        Some(power) => {
            w.gct * penalties.gct + w.vo * penalties.vo + w.vr * penalties.vr + w.power * power
        }
        None => {
            let total = w.gct + w.vo + w.vr;
            (w.gct * penalties.gct + w.vo * penalties.vo + w.vr * penalties.vr) / total
        }
    };

    100.0 - weighted * 100.0
}

/// Star rating for the power-efficiency score; fixed symmetric thresholds
/// around zero.
pub fn power_efficiency_rating(score: f64) -> StarRating {
    if score >= 0.05 {
        StarRating::Five
    } else if score >= 0.02 {
        StarRating::Four
    } else if score > -0.02 {
        StarRating::Three
    } else if score >= -0.05 {
        StarRating::Two
    } else {
        StarRating::One
    }
}

/// Power-efficiency block of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerEfficiency {
    /// Average power over the activity's splits, in watts.
    pub avg_w: f64,
    pub wkg: f64,
    pub speed_actual_mps: f64,
    pub speed_expected_mps: f64,
    /// `(actual - expected) / expected`; negative means slower than the
    /// baseline predicts for this power output.
    pub efficiency_score: f64,
    pub star_rating: StarRating,
    pub needs_improvement: bool,
}

impl PowerEfficiency {
    /// The signed ratio fed into the integrated score: negative efficiency
    /// (worse than expected) becomes a positive penalty.
    pub fn penalty_ratio(&self) -> f64 {
        -self.efficiency_score
    }
}

/// Evaluate power efficiency against the power->speed baseline.
pub fn evaluate_power_efficiency(
    model: &PowerSpeedModel,
    avg_power_w: f64,
    body_mass_kg: f64,
    speed_actual_mps: f64,
) -> PowerEfficiency {
    let wkg = avg_power_w / body_mass_kg;
    let speed_expected_mps = model.predict(wkg);
    let efficiency_score = (speed_actual_mps - speed_expected_mps) / speed_expected_mps;

    PowerEfficiency {
        avg_w: avg_power_w,
        wkg,
        speed_actual_mps,
        speed_expected_mps,
        efficiency_score,
        star_rating: power_efficiency_rating(efficiency_score),
        needs_improvement: efficiency_score < -0.02,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_weights_sum_to_one() {
        for mode in [
            TrainingMode::IntervalSprint,
            TrainingMode::TempoThreshold,
            TrainingMode::LowModerate,
        ] {
            let w = mode.weights();
            assert!((w.gct + w.vo + w.vr + w.power - 1.0).abs() < 1e-9, "{mode}");
        }
    }

    #[test]
    fn test_integrated_score_with_power() {
        let penalties = PenaltyRatios {
            gct: 0.10,
            vo: 0.05,
            vr: -0.02,
            power: Some(0.08),
        };
        let score = integrated_score(&penalties, TrainingMode::IntervalSprint);
        // 0.30*0.10 + 0.15*0.05 + 0.15*(-0.02) + 0.40*0.08 = 0.0665
        assert!((score - 93.35).abs() < 1e-9);
    }

    #[test]
    fn test_integrated_score_renormalises_without_power() {
        // Tempo/threshold weights renormalised by 0.65.
        let penalties = PenaltyRatios {
            gct: 0.10,
            vo: 0.05,
            vr: -0.02,
            power: None,
        };
        let score = integrated_score(&penalties, TrainingMode::TempoThreshold);
        // (0.25*0.10 + 0.20*0.05 + 0.20*(-0.02)) / 0.65 = 0.0476923
        assert!((score - 95.230769).abs() < 1e-5);
    }

    #[test]
    fn test_integrated_score_can_exceed_hundred() {
        let penalties = PenaltyRatios {
            gct: -0.05,
            vo: -0.03,
            vr: -0.02,
            power: Some(-0.04),
        };
        let score = integrated_score(&penalties, TrainingMode::LowModerate);
        assert!(score > 100.0);
    }

    #[test]
    fn test_power_efficiency_rating_thresholds() {
        assert_eq!(power_efficiency_rating(0.06), StarRating::Five);
        assert_eq!(power_efficiency_rating(0.05), StarRating::Five);
        assert_eq!(power_efficiency_rating(0.03), StarRating::Four);
        assert_eq!(power_efficiency_rating(0.0), StarRating::Three);
        assert_eq!(power_efficiency_rating(-0.019), StarRating::Three);
        assert_eq!(power_efficiency_rating(-0.03), StarRating::Two);
        assert_eq!(power_efficiency_rating(-0.06), StarRating::One);
    }

    #[test]
    fn test_evaluate_power_efficiency() {
        let model = PowerSpeedModel {
            power_a: 1.2,
            power_b: 0.6,
            power_rmse: 0.05,
            n_samples: 40,
            speed_range: (2.5, 5.0),
        };
        // 280 W at 70 kg -> 4.0 W/kg -> expected 3.6 m/s.
        let eval = evaluate_power_efficiency(&model, 280.0, 70.0, 3.78);

        assert!((eval.wkg - 4.0).abs() < 1e-9);
        assert!((eval.speed_expected_mps - 3.6).abs() < 1e-9);
        assert!((eval.efficiency_score - 0.05).abs() < 1e-9);
        assert_eq!(eval.star_rating, StarRating::Five);
        assert!(!eval.needs_improvement);
        assert!((eval.penalty_ratio() + 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_negative_efficiency_needs_improvement() {
        let model = PowerSpeedModel {
            power_a: 1.2,
            power_b: 0.6,
            power_rmse: 0.05,
            n_samples: 40,
            speed_range: (2.5, 5.0),
        };
        let eval = evaluate_power_efficiency(&model, 280.0, 70.0, 3.4);
        assert!(eval.efficiency_score < -0.02);
        assert!(eval.needs_improvement);
        assert!(eval.penalty_ratio() > 0.0);
    }
}
