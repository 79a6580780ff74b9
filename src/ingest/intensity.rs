//! Intensity estimation for splits the provider left unlabeled.
//!
//! Provider-assigned intensity types are preserved untouched; estimation
//! only fills the gaps, applying the rules in order: position-based warmup
//! and cooldown (widened for longer runs), recovery after hard efforts,
//! interval by fast pace, interval by high heart rate, then ACTIVE.

use crate::models::IntensityType;

/// Pace threshold above which a split following a hard effort counts as
/// recovery, in s/km.
const RECOVERY_PACE_S_PER_KM: f64 = 400.0;
/// A split this much faster than the activity average is an interval.
const INTERVAL_PACE_FACTOR: f64 = 0.90;
/// A split with heart rate this far above the activity average is an
/// interval.
const INTERVAL_HR_FACTOR: f64 = 1.1;

/// Per-split inputs to the estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitSignals {
    pub pace_seconds_per_km: Option<f64>,
    pub heart_rate: Option<f64>,
    /// Provider-assigned label, kept as-is when present.
    pub provider_intensity: Option<IntensityType>,
}

/// Estimate intensity labels for a whole activity.
///
/// Returns one label per input split; provider labels pass through
/// unchanged.
pub fn estimate_intensity(splits: &[SplitSignals]) -> Vec<IntensityType> {
    let n = splits.len();
    if n == 0 {
        return Vec::new();
    }

    let paces: Vec<f64> = splits.iter().filter_map(|s| s.pace_seconds_per_km).collect();
    let hrs: Vec<f64> = splits.iter().filter_map(|s| s.heart_rate).collect();
    let avg_pace = if paces.is_empty() {
        None
    } else {
        Some(paces.iter().sum::<f64>() / paces.len() as f64)
    };
    let avg_hr = if hrs.is_empty() {
        None
    } else {
        Some(hrs.iter().sum::<f64>() / hrs.len() as f64)
    };

    // Long runs get two warmup and two cooldown splits, short runs one.
    let edge_width = if n > 6 { 2 } else { 1 };

    let mut labels = Vec::with_capacity(n);

    for (index, split) in splits.iter().enumerate() {
        if let Some(provided) = split.provider_intensity {
            labels.push(provided);
            continue;
        }

        labels.push(estimate_one(
            index,
            n,
            edge_width,
            split,
            avg_pace,
            avg_hr,
            labels.last().copied(),
        ));
    }

    labels
}

fn estimate_one(
    index: usize,
    n: usize,
    edge_width: usize,
    split: &SplitSignals,
    avg_pace: Option<f64>,
    avg_hr: Option<f64>,
    previous: Option<IntensityType>,
) -> IntensityType {
    // Rule 1: position-based warmup.
    if index < edge_width {
        return IntensityType::Warmup;
    }

    // Rule 2: position-based cooldown.
    if index >= n.saturating_sub(edge_width) {
        return IntensityType::Cooldown;
    }

    // Rule 3: slow split directly after a hard effort is recovery.
    if let Some(pace) = split.pace_seconds_per_km {
        if pace > RECOVERY_PACE_S_PER_KM
            && matches!(
                previous,
                Some(IntensityType::Interval) | Some(IntensityType::Recovery)
            )
        {
            return IntensityType::Recovery;
        }

        // Rule 4: interval by fast pace.
        if let Some(avg) = avg_pace {
            if pace < avg * INTERVAL_PACE_FACTOR {
                return IntensityType::Interval;
            }
        }
    }

    // Rule 5: interval by high heart rate.
    if let (Some(hr), Some(avg)) = (split.heart_rate, avg_hr) {
        if hr > avg * INTERVAL_HR_FACTOR {
            return IntensityType::Interval;
        }
    }

    IntensityType::Active
}
