//! Pace-conditioned form baselines: training, prediction, scoring, and
//! evaluation.
//!
//! A baseline captures the athlete's own typical form at a given speed over
//! a rolling window. Evaluation compares an activity's averaged form
//! observation against what the baseline predicts for that pace.

pub mod evaluator;
pub mod integrated;
pub mod predictor;
pub mod regression;
pub mod scorer;
pub mod trainer;

pub use evaluator::{EvaluationRecord, Evaluator};
pub use integrated::{integrated_score, ModeWeights, PenaltyRatios, PowerEfficiency};
pub use predictor::{predict_expectations, Expectations};
pub use regression::{
    fit_gct_power, fit_linear, fit_power_speed, GctPowerModel, LinearModel, PowerSpeedModel,
};
pub use scorer::{score_observation, Observation, ScoreBreakdown};
pub use trainer::{TrainedMetric, Trainer, TrainingReport};

/// The three form models evaluation needs, loaded for one
/// `(user, condition)` period.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineSet {
    pub gct: regression::GctPowerModel,
    pub vo: regression::LinearModel,
    pub vr: regression::LinearModel,
}

/// Convert pace (s/km) to speed (m/s). Pace must be positive; the training
/// and evaluation paths filter out non-positive paces before calling this.
pub fn to_speed(pace_seconds_per_km: f64) -> f64 {
    1000.0 / pace_seconds_per_km
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_speed() {
        assert!((to_speed(300.0) - 3.3333333333).abs() < 1e-9);
        assert!((to_speed(240.0) - 4.1666666667).abs() < 1e-9);
    }
}
