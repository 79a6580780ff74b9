//! Per-activity evaluation against the covering baseline.
//!
//! Orchestrates baseline load, freshness check with auto-retrain,
//! prediction, scoring, the power path, and the evaluation upsert. The
//! write happens last; a cancelled evaluation leaves no row behind.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::integrated::{evaluate_power_efficiency, integrated_score, PenaltyRatios, PowerEfficiency};
use super::scorer::{score_observation, Observation, ScoreBreakdown};
use super::trainer::Trainer;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::database::Database;
use crate::dates::days_between;
use crate::error::EvalError;
use crate::models::{StarRating, TrainingMode, CADENCE_TARGET_SPM};

/// One metric's slice of an evaluation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvaluation {
    pub actual: f64,
    pub expected: f64,
    pub delta_pct: f64,
    pub penalty: f64,
    pub star_rating: StarRating,
    /// Star numeric, 1.0-5.0.
    pub score: f64,
    pub needs_improvement: bool,
    pub evaluation_text: String,
}

/// Cadence is scored as a boolean target, no gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceEvaluation {
    pub actual: f64,
    pub minimum: f64,
    pub achieved: bool,
}

/// The complete evaluation for one activity, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub activity_id: i64,
    pub gct: MetricEvaluation,
    pub vo: MetricEvaluation,
    pub vr: MetricEvaluation,
    /// Absolute VO delta in centimeters.
    pub vo_delta_cm: f64,
    pub cadence: CadenceEvaluation,
    /// Mean of the three star numerics, 0-5.
    pub overall_score: f64,
    pub overall_star_rating: StarRating,
    pub power: Option<PowerEfficiency>,
    pub integrated_score: Option<f64>,
    pub training_mode: Option<TrainingMode>,
}

/// Evaluator for one `(user, condition)`.
#[derive(Debug, Clone)]
pub struct Evaluator {
    pub user_id: String,
    pub condition_group: String,
    /// Baselines older than this many days relative to the activity
    /// trigger auto-retrain.
    pub freshness_days: i64,
    /// Window passed to the auto-retrain.
    pub window_months: u32,
    trainer: Trainer,
}

impl Evaluator {
    pub fn new(user_id: impl Into<String>, condition_group: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let condition_group = condition_group.into();
        Evaluator {
            trainer: Trainer::new(user_id.clone(), condition_group.clone()),
            user_id,
            condition_group,
            freshness_days: 7,
            window_months: 2,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Evaluator {
            user_id: config.user_id.clone(),
            condition_group: config.condition_group.clone(),
            freshness_days: config.training.freshness_days,
            window_months: config.training.window_months,
            trainer: Trainer::from_config(config),
        }
    }

    /// Evaluate one activity and upsert the resulting row.
    pub fn evaluate(
        &self,
        db: &mut Database,
        activity_id: i64,
        activity_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<EvaluationRecord, EvalError> {
        // Baselines first; the freshness check below must not run before
        // this load.
        let mut models =
            db.load_models_covering(&self.user_id, &self.condition_group, activity_date)?;

        if self.refresh_if_stale(db, activity_date, cancel) {
            // Reload so prediction sees the freshly trained period.
            models =
                db.load_models_covering(&self.user_id, &self.condition_group, activity_date)?;
        }

        let observation = self.pull_observation(db, activity_id)?;
        let obs = Observation {
            pace_s_per_km: observation.pace_seconds_per_km,
            gct_ms: observation.gct_ms,
            vo_cm: observation.vo_cm,
            vr_pct: observation.vr_pct,
        };

        let breakdown = score_observation(&models, &obs);
        let cadence_actual = observation.cadence.unwrap_or(0.0);

        let mut record = self.build_record(activity_id, &breakdown, cadence_actual);

        self.attach_power_path(db, activity_id, activity_date, &breakdown, &mut record)?;

        // A cancelled evaluation must not leave a partial row.
        if cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }

        db.upsert_evaluation(&record)?;
        info!(
            activity_id,
            overall = record.overall_score,
            integrated = ?record.integrated_score,
            "evaluation stored"
        );
        Ok(record)
    }

    /// Retrain when the newest baseline period (over all four metrics) is
    /// more than `freshness_days` older than the activity. Returns whether
    /// a retrain happened; failures are logged and evaluation proceeds with
    /// the stale baseline.
    fn refresh_if_stale(
        &self,
        db: &mut Database,
        activity_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> bool {
        let newest = match db.newest_period_end(&self.user_id, &self.condition_group) {
            Ok(Some(date)) => date,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "freshness check failed");
                return false;
            }
        };

        let age_days = days_between(newest, activity_date);
        if age_days <= self.freshness_days {
            return false;
        }

        info!(age_days, "baselines stale, auto-retraining");
        match self
            .trainer
            .train(db, activity_date, self.window_months, cancel)
        {
            Ok(report) => {
                info!(
                    period_start = %report.period_start,
                    period_end = %report.period_end,
                    "auto-retrain complete"
                );
                report.form_complete()
            }
            Err(e) => {
                warn!(error = %e, "auto-retrain failed, evaluating with stale baseline");
                false
            }
        }
    }

    /// The averaged form observation, restricted to run splits when the
    /// performance trends recorded them.
    fn pull_observation(
        &self,
        db: &Database,
        activity_id: i64,
    ) -> Result<crate::database::FormObservationRow, EvalError> {
        let run_splits = db.run_splits_list(activity_id)?;
        let observation = db.form_observation(activity_id, run_splits.as_deref())?;

        observation.ok_or(EvalError::NoSplitsFound { activity_id })
    }

    fn build_record(
        &self,
        activity_id: i64,
        breakdown: &ScoreBreakdown,
        cadence_actual: f64,
    ) -> EvaluationRecord {
        let gct = metric_evaluation(
            "ground contact",
            "ms",
            breakdown.gct.actual,
            breakdown.gct.expected,
            breakdown.gct.delta_pct,
            breakdown.gct.penalty,
            breakdown.gct.needs_improvement,
        );
        let vo = metric_evaluation(
            "vertical oscillation",
            "cm",
            breakdown.vo.actual,
            breakdown.vo.expected,
            breakdown.vo.delta_pct,
            breakdown.vo.penalty,
            breakdown.vo.needs_improvement,
        );
        let vr = metric_evaluation(
            "vertical ratio",
            "%",
            breakdown.vr.actual,
            breakdown.vr.expected,
            breakdown.vr.delta_pct,
            breakdown.vr.penalty,
            breakdown.vr.needs_improvement,
        );

        // Overall 0-5 is the mean of the star numerics; its star rating
        // reuses the penalty buckets through the (5 - score) * 20 inverse.
        let overall_score = (gct.score + vo.score + vr.score) / 3.0;
        let overall_star_rating = StarRating::from_penalty((5.0 - overall_score) * 20.0);

        EvaluationRecord {
            activity_id,
            vo_delta_cm: breakdown.vo_delta_cm,
            gct,
            vo,
            vr,
            cadence: CadenceEvaluation {
                actual: cadence_actual,
                minimum: CADENCE_TARGET_SPM,
                achieved: cadence_actual >= CADENCE_TARGET_SPM,
            },
            overall_score,
            overall_star_rating,
            power: None,
            integrated_score: None,
            training_mode: None,
        }
    }

    /// Attach the power block when a power baseline, powered splits, and a
    /// body mass are all available.
    fn attach_power_path(
        &self,
        db: &Database,
        activity_id: i64,
        activity_date: NaiveDate,
        breakdown: &ScoreBreakdown,
        record: &mut EvaluationRecord,
    ) -> Result<(), EvalError> {
        let Some(model) =
            db.load_power_baseline(&self.user_id, &self.condition_group, activity_date)?
        else {
            return Ok(());
        };
        let Some((avg_power, avg_speed)) = db.splits_power_speed(activity_id)? else {
            return Ok(());
        };
        let body_mass = db
            .get_activity(activity_id)?
            .and_then(|a| a.body_mass_kg)
            .filter(|&kg| kg > 0.0);
        let Some(body_mass) = body_mass else {
            return Ok(());
        };

        let power = evaluate_power_efficiency(&model, avg_power, body_mass, avg_speed);
        let training_mode =
            TrainingMode::from_label(db.training_type(activity_id)?.as_deref());

        let ratios = PenaltyRatios {
            gct: breakdown.gct.penalty / 100.0,
            vo: breakdown.vo.penalty / 100.0,
            vr: breakdown.vr.penalty / 100.0,
            power: Some(power.penalty_ratio()),
        };

        record.integrated_score = Some(integrated_score(&ratios, training_mode));
        record.training_mode = Some(training_mode);
        record.power = Some(power);
        Ok(())
    }
}

fn metric_evaluation(
    label: &str,
    unit: &str,
    actual: f64,
    expected: f64,
    delta_pct: f64,
    penalty: f64,
    needs_improvement: bool,
) -> MetricEvaluation {
    let star_rating = StarRating::from_penalty(penalty);
    MetricEvaluation {
        actual,
        expected,
        delta_pct,
        penalty,
        star_rating,
        score: star_rating.numeric(),
        needs_improvement,
        evaluation_text: format!(
            "{label} {actual:.1} {unit} vs expected {expected:.1} {unit} ({delta_pct:+.1}%), {}",
            star_rating.category()
        ),
    }
}
