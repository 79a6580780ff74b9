//! Robust regression for form baselines.
//!
//! Three model families are fitted here: a log-log power law for ground
//! contact time, straight lines over speed for vertical oscillation and
//! vertical ratio, and a straight line from W/kg to speed for the power
//! baseline. Fits use Huber IRLS, with a deterministic RANSAC fallback for
//! the GCT monotonicity gate. All solver settings are fixed so retraining
//! over the same window reproduces identical coefficients.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};

use crate::error::BaselineError;
use crate::models::Metric;

/// Valid GCT range in milliseconds; samples outside are rejected.
const GCT_VALID_MS: (f64, f64) = (100.0, 400.0);
/// Valid speed range in m/s for every fit.
const SPEED_VALID_MPS: (f64, f64) = (1.5, 7.0);
/// Valid vertical oscillation range in centimeters.
const VO_VALID_CM: (f64, f64) = (2.0, 15.0);
/// Valid vertical ratio range in percent.
const VR_VALID_PCT: (f64, f64) = (2.0, 20.0);

/// Huber tuning constant (95% efficiency at the normal distribution).
const HUBER_EPSILON: f64 = 1.345;
const HUBER_MAX_ITER: usize = 100;
const HUBER_TOL: f64 = 1e-10;

/// Fixed trial count and seed for the RANSAC fallback.
const RANSAC_TRIALS: usize = 100;
const RANSAC_SEED: u64 = 0x5D35_7A10_9C4B_21E7;

/// Minimum samples for the power->speed baseline.
pub const MIN_POWER_SAMPLES: usize = 10;

/// Power law model for GCT: `v = c * GCT^d`, fitted in log-log space as
/// `ln(v) = alpha + d * ln(GCT)` with `d < 0` guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GctPowerModel {
    /// Intercept in log-log space (`ln(c)`).
    pub alpha: f64,
    /// Slope in log-log space; strictly negative.
    pub d: f64,
    /// RMSE of the log-space residuals.
    pub rmse: f64,
    pub n_samples: usize,
    /// Observed (min, max) speed in m/s over the training samples.
    pub speed_range: (f64, f64),
}

impl GctPowerModel {
    /// Forward prediction: speed in m/s from GCT in milliseconds.
    pub fn predict(&self, gct_ms: f64) -> f64 {
        (self.alpha + self.d * gct_ms.ln()).exp()
    }

    /// Inverse prediction: expected GCT in milliseconds at a given speed.
    /// This is the direction evaluation uses.
    pub fn predict_inverse(&self, speed_mps: f64) -> f64 {
        ((speed_mps.ln() - self.alpha) / self.d).exp()
    }
}

/// Linear model for VO/VR: `y = a + b * v`. `b` is typically negative for
/// running metrics but this is not enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub a: f64,
    pub b: f64,
    pub rmse: f64,
    pub n_samples: usize,
    pub speed_range: (f64, f64),
}

impl LinearModel {
    /// Predicted metric value (VO in cm, VR in %) at a speed in m/s.
    pub fn predict(&self, speed_mps: f64) -> f64 {
        self.a + self.b * speed_mps
    }
}

/// Linear power-efficiency model: `speed_mps = power_a + power_b * power_wkg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSpeedModel {
    pub power_a: f64,
    pub power_b: f64,
    pub power_rmse: f64,
    pub n_samples: usize,
    pub speed_range: (f64, f64),
}

impl PowerSpeedModel {
    /// Expected speed in m/s at a given W/kg.
    pub fn predict(&self, power_wkg: f64) -> f64 {
        self.power_a + self.power_b * power_wkg
    }
}

fn within(range: (f64, f64), value: f64) -> bool {
    value >= range.0 && value <= range.1
}

fn speed_range_of(speeds: &[f64]) -> (f64, f64) {
    let min = speeds.iter().copied().fold(f64::INFINITY, f64::min);
    let max = speeds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

fn rmse_of(xs: &[f64], ys: &[f64], intercept: f64, slope: f64) -> f64 {
    let sse: f64 = xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| {
            let r = y - (intercept + slope * x);
            r * r
        })
        .sum();
    (sse / xs.len() as f64).sqrt()
}

/// Weighted least squares for a single predictor plus intercept.
/// Returns `(intercept, slope)` or `None` when the system is singular.
fn weighted_least_squares(xs: &[f64], ys: &[f64], ws: &[f64]) -> Option<(f64, f64)> {
    let mut sw = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for ((&x, &y), &w) in xs.iter().zip(ys).zip(ws) {
        sw += w;
        sx += w * x;
        sy += w * y;
        sxx += w * x * x;
        sxy += w * x * y;
    }
    let denom = sw * sxx - sx * sx;
    if denom.abs() < 1e-12 {
        return None;
    }
    let slope = (sw * sxy - sx * sy) / denom;
    let intercept = (sy - slope * sx) / sw;
    Some((intercept, slope))
}

fn ordinary_least_squares(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let ws = vec![1.0; xs.len()];
    weighted_least_squares(xs, ys, &ws)
}

fn median_of(values: &[f64]) -> f64 {
    Data::new(values.to_vec()).median()
}

/// Median absolute deviation around the median.
fn mad(values: &[f64]) -> f64 {
    let center = median_of(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median_of(&deviations)
}

/// Huber regression via iteratively reweighted least squares.
///
/// Starts from the OLS solution and reweights residuals beyond
/// `HUBER_EPSILON` scaled deviations; the scale estimate is the
/// MAD-consistent sigma recomputed each iteration.
fn huber_fit(xs: &[f64], ys: &[f64]) -> Result<(f64, f64), BaselineError> {
    let (mut intercept, mut slope) =
        ordinary_least_squares(xs, ys).ok_or_else(|| BaselineError::Degenerate {
            reason: "zero variance in predictor".to_string(),
        })?;

    for _ in 0..HUBER_MAX_ITER {
        let residuals: Vec<f64> = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| y - (intercept + slope * x))
            .collect();

        let scale = mad(&residuals) / 0.6745;
        if scale < 1e-12 {
            // Residuals (near-)zero: the fit is already exact.
            break;
        }

        let ws: Vec<f64> = residuals
            .iter()
            .map(|r| {
                let z = (r / scale).abs();
                if z <= HUBER_EPSILON {
                    1.0
                } else {
                    HUBER_EPSILON / z
                }
            })
            .collect();

        let (new_intercept, new_slope) =
            weighted_least_squares(xs, ys, &ws).ok_or_else(|| BaselineError::Degenerate {
                reason: "singular reweighted system".to_string(),
            })?;

        let delta = (new_intercept - intercept).abs().max((new_slope - slope).abs());
        intercept = new_intercept;
        slope = new_slope;
        if delta < HUBER_TOL {
            break;
        }
    }

    Ok((intercept, slope))
}

/// xorshift64* generator; fixed-seed so RANSAC sampling is reproducible.
struct SampleRng(u64);

impl SampleRng {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn next_below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

/// Deterministic RANSAC: fixed trial count, fixed seed, MAD residual
/// threshold, consensus refit over the best inlier set.
fn ransac_fit(xs: &[f64], ys: &[f64], min_samples: usize) -> Result<(f64, f64), BaselineError> {
    let n = xs.len();
    let threshold = mad(ys).max(1e-12);
    let mut rng = SampleRng(RANSAC_SEED);
    let mut indices: Vec<usize> = (0..n).collect();

    let mut best: Option<(usize, Vec<usize>)> = None;

    for _ in 0..RANSAC_TRIALS {
        // Partial Fisher-Yates draw of `min_samples` distinct indices.
        for i in 0..min_samples.min(n) {
            let j = i + rng.next_below(n - i);
            indices.swap(i, j);
        }
        let sub_x: Vec<f64> = indices[..min_samples].iter().map(|&i| xs[i]).collect();
        let sub_y: Vec<f64> = indices[..min_samples].iter().map(|&i| ys[i]).collect();

        let Some((intercept, slope)) = ordinary_least_squares(&sub_x, &sub_y) else {
            continue;
        };

        let inliers: Vec<usize> = (0..n)
            .filter(|&i| (ys[i] - (intercept + slope * xs[i])).abs() <= threshold)
            .collect();

        let better = match &best {
            Some((count, _)) => inliers.len() > *count,
            None => inliers.len() >= 2,
        };
        if better {
            best = Some((inliers.len(), inliers));
        }
    }

    let (_, inliers) = best.ok_or_else(|| BaselineError::Degenerate {
        reason: "RANSAC found no consensus set".to_string(),
    })?;
    let in_x: Vec<f64> = inliers.iter().map(|&i| xs[i]).collect();
    let in_y: Vec<f64> = inliers.iter().map(|&i| ys[i]).collect();
    ordinary_least_squares(&in_x, &in_y).ok_or_else(|| BaselineError::Degenerate {
        reason: "singular consensus refit".to_string(),
    })
}

/// Fit the GCT power-law model over `(gct_ms, speed_mps)` samples.
///
/// Samples outside the valid GCT/speed ranges are dropped first. The Huber
/// fit must produce a negative slope; if it does not and `allow_ransac` is
/// set, a RANSAC refit over `max(3, ceil(0.8 n))`-sample subsets gets one
/// more chance before the fit fails as non-monotonic.
pub fn fit_gct_power(
    samples: &[(f64, f64)],
    allow_ransac: bool,
) -> Result<GctPowerModel, BaselineError> {
    let clean: Vec<(f64, f64)> = samples
        .iter()
        .copied()
        .filter(|&(gct, speed)| within(GCT_VALID_MS, gct) && within(SPEED_VALID_MPS, speed))
        .collect();

    if clean.len() < 3 {
        return Err(BaselineError::InsufficientData {
            needed: 3,
            got: clean.len(),
        });
    }

    let x_log: Vec<f64> = clean.iter().map(|&(gct, _)| gct.ln()).collect();
    let y_log: Vec<f64> = clean.iter().map(|&(_, speed)| speed.ln()).collect();

    let (mut alpha, mut d) = huber_fit(&x_log, &y_log)?;

    if d >= 0.0 {
        if !allow_ransac {
            return Err(BaselineError::NonMonotonic { d });
        }
        let min_samples = 3usize.max((0.8 * clean.len() as f64).ceil() as usize);
        let (ransac_alpha, ransac_d) = ransac_fit(&x_log, &y_log, min_samples.min(clean.len()))?;
        if ransac_d >= 0.0 {
            return Err(BaselineError::NonMonotonic { d: ransac_d });
        }
        alpha = ransac_alpha;
        d = ransac_d;
    }

    let speeds: Vec<f64> = clean.iter().map(|&(_, s)| s).collect();
    Ok(GctPowerModel {
        alpha,
        d,
        rmse: rmse_of(&x_log, &y_log, alpha, d),
        n_samples: clean.len(),
        speed_range: speed_range_of(&speeds),
    })
}

/// Fit a linear model over `(value, speed_mps)` samples for VO or VR.
pub fn fit_linear(samples: &[(f64, f64)], metric: Metric) -> Result<LinearModel, BaselineError> {
    let value_bounds = match metric {
        Metric::Vo => VO_VALID_CM,
        Metric::Vr => VR_VALID_PCT,
        other => return Err(BaselineError::UnsupportedMetric { metric: other }),
    };

    let clean: Vec<(f64, f64)> = samples
        .iter()
        .copied()
        .filter(|&(value, speed)| within(value_bounds, value) && within(SPEED_VALID_MPS, speed))
        .collect();

    if clean.len() < 2 {
        return Err(BaselineError::InsufficientData {
            needed: 2,
            got: clean.len(),
        });
    }

    let speeds: Vec<f64> = clean.iter().map(|&(_, s)| s).collect();
    let values: Vec<f64> = clean.iter().map(|&(v, _)| v).collect();

    let (a, b) = huber_fit(&speeds, &values)?;

    Ok(LinearModel {
        a,
        b,
        rmse: rmse_of(&speeds, &values, a, b),
        n_samples: clean.len(),
        speed_range: speed_range_of(&speeds),
    })
}

/// Fit the power-efficiency line over `(power_wkg, speed_mps)` samples.
/// Only the speed bound applies; at least [`MIN_POWER_SAMPLES`] samples
/// must survive.
pub fn fit_power_speed(samples: &[(f64, f64)]) -> Result<PowerSpeedModel, BaselineError> {
    let clean: Vec<(f64, f64)> = samples
        .iter()
        .copied()
        .filter(|&(_, speed)| within(SPEED_VALID_MPS, speed))
        .collect();

    if clean.len() < MIN_POWER_SAMPLES {
        return Err(BaselineError::InsufficientData {
            needed: MIN_POWER_SAMPLES,
            got: clean.len(),
        });
    }

    let wkg: Vec<f64> = clean.iter().map(|&(w, _)| w).collect();
    let speeds: Vec<f64> = clean.iter().map(|&(_, s)| s).collect();

    let (power_a, power_b) = huber_fit(&wkg, &speeds)?;

    Ok(PowerSpeedModel {
        power_a,
        power_b,
        power_rmse: rmse_of(&wkg, &speeds, power_a, power_b),
        n_samples: clean.len(),
        speed_range: speed_range_of(&speeds),
    })
}
