//! Baseline training over a rolling calendar-month window.
//!
//! Pulls joined splits+activities rows from the store, filters them, fits
//! the three form models plus the power-efficiency model, and upserts each
//! produced row. A failed fit for one metric is logged and skipped without
//! aborting the others.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::regression::{
    fit_gct_power, fit_linear, fit_power_speed, GctPowerModel, LinearModel, PowerSpeedModel,
};
use super::to_speed;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::database::Database;
use crate::dates::training_window;
use crate::error::BaselineError;
use crate::models::{BaselineRow, Metric, ModelKind};

/// Summary of one fitted metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedMetric {
    pub metric: Metric,
    pub n_samples: usize,
    pub rmse: f64,
}

/// Outcome of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub gct: Option<TrainedMetric>,
    pub vo: Option<TrainedMetric>,
    pub vr: Option<TrainedMetric>,
    pub power: Option<TrainedMetric>,
}

impl TrainingReport {
    /// True when all three form metrics trained.
    pub fn form_complete(&self) -> bool {
        self.gct.is_some() && self.vo.is_some() && self.vr.is_some()
    }
}

/// Baseline trainer for one `(user, condition)`.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub user_id: String,
    pub condition_group: String,
    /// Minimum post-filter sample count for the form metrics.
    pub min_form_samples: usize,
}

impl Trainer {
    pub fn new(user_id: impl Into<String>, condition_group: impl Into<String>) -> Self {
        Trainer {
            user_id: user_id.into(),
            condition_group: condition_group.into(),
            min_form_samples: 50,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Trainer {
            user_id: config.user_id.clone(),
            condition_group: config.condition_group.clone(),
            min_form_samples: config.training.min_form_samples,
        }
    }

    /// Train all four baselines over `[end_date - window_months, end_date]`.
    pub fn train(
        &self,
        db: &mut Database,
        end_date: NaiveDate,
        window_months: u32,
        cancel: &CancellationToken,
    ) -> Result<TrainingReport, BaselineError> {
        let (period_start, period_end) = training_window(end_date, window_months);
        info!(
            user = %self.user_id,
            condition = %self.condition_group,
            %period_start,
            %period_end,
            "training form baselines"
        );

        let samples = db.form_training_samples(period_start, period_end)?;
        if samples.len() < self.min_form_samples {
            return Err(BaselineError::InsufficientData {
                needed: self.min_form_samples,
                got: samples.len(),
            });
        }

        let gct_pairs: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| (s.gct_ms, to_speed(s.pace_seconds_per_km)))
            .collect();
        let vo_pairs: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| (s.vo_cm, to_speed(s.pace_seconds_per_km)))
            .collect();
        let vr_pairs: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| (s.vr_pct, to_speed(s.pace_seconds_per_km)))
            .collect();

        let mut report = TrainingReport {
            period_start,
            period_end,
            gct: None,
            vo: None,
            vr: None,
            power: None,
        };

        if cancel.is_cancelled() {
            return Err(BaselineError::Cancelled);
        }

        match fit_gct_power(&gct_pairs, true) {
            Ok(model) => {
                db.upsert_baseline(&self.gct_row(&model, period_start, period_end))?;
                report.gct = Some(TrainedMetric {
                    metric: Metric::Gct,
                    n_samples: model.n_samples,
                    rmse: model.rmse,
                });
            }
            Err(e) => warn!(metric = "gct", error = %e, "metric fit failed, skipping"),
        }

        if cancel.is_cancelled() {
            return Err(BaselineError::Cancelled);
        }

        match fit_linear(&vo_pairs, Metric::Vo) {
            Ok(model) => {
                db.upsert_baseline(&self.linear_row(
                    Metric::Vo,
                    &model,
                    period_start,
                    period_end,
                ))?;
                report.vo = Some(TrainedMetric {
                    metric: Metric::Vo,
                    n_samples: model.n_samples,
                    rmse: model.rmse,
                });
            }
            Err(e) => warn!(metric = "vo", error = %e, "metric fit failed, skipping"),
        }

        if cancel.is_cancelled() {
            return Err(BaselineError::Cancelled);
        }

        match fit_linear(&vr_pairs, Metric::Vr) {
            Ok(model) => {
                db.upsert_baseline(&self.linear_row(
                    Metric::Vr,
                    &model,
                    period_start,
                    period_end,
                ))?;
                report.vr = Some(TrainedMetric {
                    metric: Metric::Vr,
                    n_samples: model.n_samples,
                    rmse: model.rmse,
                });
            }
            Err(e) => warn!(metric = "vr", error = %e, "metric fit failed, skipping"),
        }

        if cancel.is_cancelled() {
            return Err(BaselineError::Cancelled);
        }

        // The power baseline is optional: too little powered data simply
        // skips it.
        let power_pairs = db.power_training_samples(period_start, period_end)?;
        match fit_power_speed(&power_pairs) {
            Ok(model) => {
                db.upsert_baseline(&self.power_row(&model, period_start, period_end))?;
                report.power = Some(TrainedMetric {
                    metric: Metric::Power,
                    n_samples: model.n_samples,
                    rmse: model.power_rmse,
                });
            }
            Err(BaselineError::InsufficientData { needed, got }) => {
                debug!(needed, got, "skipping power baseline");
            }
            Err(e) => warn!(metric = "power", error = %e, "metric fit failed, skipping"),
        }

        info!(
            gct = report.gct.is_some(),
            vo = report.vo.is_some(),
            vr = report.vr.is_some(),
            power = report.power.is_some(),
            "training finished"
        );
        Ok(report)
    }

    fn gct_row(
        &self,
        model: &GctPowerModel,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> BaselineRow {
        BaselineRow {
            user_id: self.user_id.clone(),
            condition_group: self.condition_group.clone(),
            metric: Metric::Gct,
            model_kind: ModelKind::Power,
            coef_alpha: Some(model.alpha),
            coef_d: Some(model.d),
            coef_a: None,
            coef_b: None,
            power_a: None,
            power_b: None,
            power_rmse: None,
            period_start,
            period_end,
            n_samples: model.n_samples as i64,
            rmse: Some(model.rmse),
            speed_range_min: Some(model.speed_range.0),
            speed_range_max: Some(model.speed_range.1),
        }
    }

    fn linear_row(
        &self,
        metric: Metric,
        model: &LinearModel,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> BaselineRow {
        BaselineRow {
            user_id: self.user_id.clone(),
            condition_group: self.condition_group.clone(),
            metric,
            model_kind: ModelKind::Linear,
            coef_alpha: None,
            coef_d: None,
            coef_a: Some(model.a),
            coef_b: Some(model.b),
            power_a: None,
            power_b: None,
            power_rmse: None,
            period_start,
            period_end,
            n_samples: model.n_samples as i64,
            rmse: Some(model.rmse),
            speed_range_min: Some(model.speed_range.0),
            speed_range_max: Some(model.speed_range.1),
        }
    }

    fn power_row(
        &self,
        model: &PowerSpeedModel,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> BaselineRow {
        BaselineRow {
            user_id: self.user_id.clone(),
            condition_group: self.condition_group.clone(),
            metric: Metric::Power,
            model_kind: ModelKind::Linear,
            coef_alpha: None,
            coef_d: None,
            coef_a: None,
            coef_b: None,
            power_a: Some(model.power_a),
            power_b: Some(model.power_b),
            power_rmse: Some(model.power_rmse),
            period_start,
            period_end,
            n_samples: model.n_samples as i64,
            rmse: None,
            speed_range_min: Some(model.speed_range.0),
            speed_range_max: Some(model.speed_range.1),
        }
    }
}
