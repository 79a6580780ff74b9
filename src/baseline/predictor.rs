//! Pace-conditioned expectations from a trained baseline set.

use serde::{Deserialize, Serialize};

use super::BaselineSet;

/// Expected form values at a given pace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectations {
    pub pace_s_per_km: f64,
    pub speed_mps: f64,
    /// Expected ground contact time (ms).
    pub gct_ms: f64,
    /// Expected vertical oscillation (cm).
    pub vo_cm: f64,
    /// Expected vertical ratio (%).
    pub vr_pct: f64,
}

/// Predict expected GCT/VO/VR from pace.
///
/// No extrapolation guard is applied; callers assume the athlete's paces
/// stay within the trained speed range.
pub fn predict_expectations(models: &BaselineSet, pace_s_per_km: f64) -> Expectations {
    let speed_mps = 1000.0 / pace_s_per_km;

    Expectations {
        pace_s_per_km,
        speed_mps,
        gct_ms: models.gct.predict_inverse(speed_mps),
        vo_cm: models.vo.predict(speed_mps),
        vr_pct: models.vr.predict(speed_mps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::regression::{GctPowerModel, LinearModel};

    fn test_models() -> BaselineSet {
        BaselineSet {
            gct: GctPowerModel {
                alpha: 4.6,
                d: -0.6,
                rmse: 0.01,
                n_samples: 100,
                speed_range: (2.5, 5.0),
            },
            vo: LinearModel {
                a: 10.0,
                b: -0.5,
                rmse: 0.2,
                n_samples: 100,
                speed_range: (2.5, 5.0),
            },
            vr: LinearModel {
                a: 11.0,
                b: -0.8,
                rmse: 0.2,
                n_samples: 100,
                speed_range: (2.5, 5.0),
            },
        }
    }

    #[test]
    fn test_predict_expectations() {
        let models = test_models();
        let exp = predict_expectations(&models, 300.0);

        let speed = 1000.0 / 300.0;
        assert!((exp.speed_mps - speed).abs() < 1e-12);
        assert!((exp.gct_ms - models.gct.predict_inverse(speed)).abs() < 1e-12);
        assert!((exp.vo_cm - (10.0 - 0.5 * speed)).abs() < 1e-12);
        assert!((exp.vr_pct - (11.0 - 0.8 * speed)).abs() < 1e-12);
    }

    #[test]
    fn test_expectations_consistent_with_forward_model() {
        let models = test_models();
        let exp = predict_expectations(&models, 240.0);

        // The expected GCT maps back to the input speed through the
        // forward model.
        let speed_back = models.gct.predict(exp.gct_ms);
        assert!((speed_back - exp.speed_mps).abs() < 1e-9);
    }
}
