//! Cache-first activity ingestion.
//!
//! Three tiers are tried in order: the result-store section cache, the
//! per-activity raw-file cache, and the remote provider. Fetches are
//! per-file and failure-tolerant; whatever succeeded is persisted so a
//! later run resumes instead of refetching. The write-through to the
//! analytical store is a single transaction.

pub mod intensity;
pub mod provider;
pub mod raw_cache;
pub mod resolver;
pub mod sections;
pub mod weight;

use chrono::{Duration as ChronoDuration, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::database::Database;
use crate::error::{IngestError, ResolveError, RunformError};
use crate::models::{ActivityRow, IntensityType, SplitRow, TerrainType, TimeSeriesPoint};
use intensity::{estimate_intensity, SplitSignals};
use provider::ActivityProvider;
use raw_cache::{RawFileCache, RawFileKind};
use sections::{
    compute_sections, ActivitySections, HrZoneDwell, LactateThresholdSection, SectionContext,
    TrainingEffect, Vo2MaxSection,
};
use weight::{BodyMassAggregator, BODY_MASS_METHOD, BODY_MASS_SOURCE};

/// Which tier satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestSource {
    /// All eleven sections were already in the result store; nothing was
    /// touched.
    ResultCache,
    /// The pipeline ran (raw cache and/or provider) and wrote through.
    Pipeline,
}

/// Result of processing one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub activity_id: i64,
    pub date: NaiveDate,
    pub source: IngestSource,
    pub split_count: usize,
    pub body_mass_kg: Option<f64>,
}

/// Per-day outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchDayResult {
    Success {
        date: NaiveDate,
        activity_id: i64,
        source: IngestSource,
    },
    NoActivity {
        date: NaiveDate,
    },
    Ambiguous {
        date: NaiveDate,
        ids: Vec<i64>,
    },
    Failed {
        date: NaiveDate,
        message: String,
    },
}

/// The eight raw documents of one activity, any of which may be absent.
#[derive(Debug, Default, Clone)]
struct RawDocuments {
    activity: Option<Value>,
    details: Option<Value>,
    splits: Option<Value>,
    weather: Option<Value>,
    gear: Option<Value>,
    hr_zones: Option<Value>,
    vo2_max: Option<Value>,
    lactate_threshold: Option<Value>,
}

/// Cache-first ingest worker.
pub struct IngestWorker<P: ActivityProvider> {
    provider: P,
    cache: RawFileCache,
    performance_dir: PathBuf,
    precheck_dir: PathBuf,
    request_delay: Duration,
    max_chart_points: u32,
}

impl<P: ActivityProvider> IngestWorker<P> {
    pub fn new(provider: P, config: &Config) -> Self {
        IngestWorker {
            provider,
            cache: RawFileCache::new(config),
            performance_dir: config.performance_dir(),
            precheck_dir: config.precheck_dir(),
            request_delay: Duration::from_secs_f64(config.ingest.request_delay_secs.max(0.0)),
            max_chart_points: config.ingest.max_chart_points,
        }
    }

    pub fn cache(&self) -> &RawFileCache {
        &self.cache
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Process one activity through the cache tiers; idempotent once the
    /// result store covers all sections.
    pub fn process_activity(
        &self,
        db: &mut Database,
        activity_id: i64,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        // Tier 1: result store.
        if db.cached_performance(activity_id)?.is_some() {
            info!(activity_id, "complete record in result store, skipping");
            let split_count = db.load_splits(activity_id)?.len();
            let body_mass_kg = db.get_activity(activity_id)?.and_then(|a| a.body_mass_kg);
            return Ok(IngestOutcome {
                activity_id,
                date,
                source: IngestSource::ResultCache,
                split_count,
                body_mass_kg,
            });
        }

        // Tiers 2 and 3: raw files, then per-file fetches.
        let docs = self.collect_documents(activity_id, cancel)?;

        let splits = match &docs.splits {
            Some(doc) => parse_splits(activity_id, doc),
            None => {
                warn!(activity_id, "no splits document available");
                Vec::new()
            }
        };

        let aggregator = BodyMassAggregator::new(&self.cache, &self.provider);
        let median_weight = aggregator.median_weight(date)?;
        let body_mass_kg = median_weight.as_ref().map(|w| w.weight_kg);

        let ctx = SectionContext {
            hr_zones: docs.hr_zones.as_ref().map(parse_hr_zones).unwrap_or_default(),
            training_effect: docs
                .activity
                .as_ref()
                .map(parse_training_effect)
                .unwrap_or_default(),
            vo2_max: docs.vo2_max.as_ref().map(parse_vo2_max).unwrap_or_default(),
            lactate_threshold: docs
                .lactate_threshold
                .as_ref()
                .map(parse_lactate_threshold)
                .unwrap_or_default(),
            body_mass_kg,
        };
        let sections = compute_sections(&splits, &ctx);

        self.write_documents(activity_id, &splits, &sections)?;

        let activity = build_activity_row(activity_id, date, &docs, &sections, median_weight);
        let time_series = docs.details.as_ref().and_then(parse_time_series);

        if cancel.is_cancelled() {
            // Raw cache files stay behind as a resume point; the store is
            // untouched.
            return Err(IngestError::Cancelled);
        }

        db.write_activity_record(&activity, &splits, &sections, time_series.as_deref())?;
        info!(
            activity_id,
            splits = splits.len(),
            body_mass = ?body_mass_kg,
            "activity ingested"
        );

        Ok(IngestOutcome {
            activity_id,
            date,
            source: IngestSource::Pipeline,
            split_count: splits.len(),
            body_mass_kg,
        })
    }

    /// Resolve a date to its activity and process it. Resolution failures
    /// (`NoActivity`, `AmbiguousActivity`) surface typed so the caller can
    /// ask the user to disambiguate.
    pub fn process_by_date(
        &self,
        db: &mut Database,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, RunformError> {
        let activity_id = resolver::resolve_activity_id(db, &self.provider, date)?;
        Ok(self.process_activity(db, activity_id, date, cancel)?)
    }

    /// Process one activity per day over an inclusive date range, honoring
    /// the configured inter-request delay between days.
    pub fn batch_ingest(
        &self,
        db: &mut Database,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchDayResult>, IngestError> {
        let total = (end - start).num_days().max(0) as u64 + 1;
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut results = Vec::new();
        let mut day = start;
        while day <= end {
            if cancel.is_cancelled() {
                bar.abandon_with_message("cancelled");
                return Err(IngestError::Cancelled);
            }
            bar.set_message(day.to_string());

            let result = match resolver::resolve_activity_id(db, &self.provider, day) {
                Ok(activity_id) => match self.process_activity(db, activity_id, day, cancel) {
                    Ok(outcome) => BatchDayResult::Success {
                        date: day,
                        activity_id,
                        source: outcome.source,
                    },
                    Err(IngestError::Cancelled) => {
                        bar.abandon_with_message("cancelled");
                        return Err(IngestError::Cancelled);
                    }
                    Err(e) => BatchDayResult::Failed {
                        date: day,
                        message: e.to_string(),
                    },
                },
                Err(ResolveError::NoActivity { .. }) => BatchDayResult::NoActivity { date: day },
                Err(ResolveError::AmbiguousActivity { ids, .. }) => BatchDayResult::Ambiguous {
                    date: day,
                    ids,
                },
                Err(e) => BatchDayResult::Failed {
                    date: day,
                    message: e.to_string(),
                },
            };
            results.push(result);
            bar.inc(1);

            day += ChronoDuration::days(1);
            if day <= end && !self.request_delay.is_zero() {
                thread::sleep(self.request_delay);
            }
        }

        bar.finish_and_clear();
        Ok(results)
    }

    /// Tier-2/3 collection: load each file from the raw cache, fetch and
    /// persist what is missing. Fetch failures are logged and leave the
    /// slot empty.
    fn collect_documents(
        &self,
        activity_id: i64,
        cancel: &CancellationToken,
    ) -> Result<RawDocuments, IngestError> {
        let mut docs = RawDocuments::default();

        for kind in RawFileKind::ALL {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let cached = self.cache.load(activity_id, kind)?;
            let value = match cached {
                Some(value) => Some(value),
                None => self.fetch_and_store(activity_id, kind, &docs)?,
            };

            match kind {
                RawFileKind::Activity => docs.activity = value,
                RawFileKind::ActivityDetails => docs.details = value,
                RawFileKind::Splits => docs.splits = value,
                RawFileKind::Weather => docs.weather = value,
                RawFileKind::Gear => docs.gear = value,
                RawFileKind::HrZones => docs.hr_zones = value,
                RawFileKind::Vo2Max => docs.vo2_max = value,
                RawFileKind::LactateThreshold => docs.lactate_threshold = value,
            }
        }

        Ok(docs)
    }

    fn fetch_and_store(
        &self,
        activity_id: i64,
        kind: RawFileKind,
        docs: &RawDocuments,
    ) -> Result<Option<Value>, IngestError> {
        let fetched = match kind {
            RawFileKind::Activity => self.provider.get_activity(activity_id),
            RawFileKind::ActivityDetails => self
                .provider
                .get_activity_details(activity_id, self.max_chart_points),
            RawFileKind::Splits => self.provider.get_activity_splits(activity_id),
            RawFileKind::Weather => self.provider.get_activity_weather(activity_id),
            RawFileKind::Gear => self.provider.get_activity_gear(activity_id),
            RawFileKind::HrZones => self.provider.get_activity_hr_in_timezones(activity_id),
            RawFileKind::Vo2Max => self.fetch_vo2_max(docs),
            RawFileKind::LactateThreshold => self.provider.get_lactate_threshold(true),
        };

        match fetched {
            Ok(value) => {
                self.cache.store(activity_id, kind, &value)?;
                Ok(Some(value))
            }
            Err(e) => {
                warn!(activity_id, file = kind.file_name(), error = %e, "fetch failed, skipping");
                // Max-metrics and lactate failures cache a default document
                // so later runs do not hammer the endpoint.
                let default = match kind {
                    RawFileKind::Vo2Max => Some(json!({})),
                    RawFileKind::LactateThreshold => {
                        Some(json!({"speed_and_heart_rate": null, "power": null}))
                    }
                    _ => None,
                };
                if let Some(default) = &default {
                    self.cache.store(activity_id, kind, default)?;
                }
                Ok(default)
            }
        }
    }

    /// VO2 max comes from the date-keyed max-metrics endpoint, normalised
    /// down to the three fields the store keeps.
    fn fetch_vo2_max(&self, docs: &RawDocuments) -> Result<Value, provider::ProviderError> {
        let date = docs
            .activity
            .as_ref()
            .and_then(activity_start_date)
            .ok_or_else(|| {
                provider::ProviderError::new("get_max_metrics", "activity date unavailable")
            })?;

        let metrics = self.provider.get_max_metrics(date)?;
        let generic = metrics.get("generic").cloned().unwrap_or(Value::Null);
        Ok(json!({
            "vo2MaxValue": generic.get("vo2MaxValue").cloned().unwrap_or(Value::Null),
            "vo2MaxPreciseValue": generic.get("vo2MaxPreciseValue").cloned().unwrap_or(Value::Null),
            "calendarDate": generic.get("calendarDate").cloned().unwrap_or(Value::Null),
        }))
    }

    /// Persist the computed performance document and the precheck summary.
    fn write_documents(
        &self,
        activity_id: i64,
        splits: &[SplitRow],
        sections: &ActivitySections,
    ) -> Result<(), IngestError> {
        fs::create_dir_all(&self.performance_dir)?;
        fs::create_dir_all(&self.precheck_dir)?;

        let mut doc = serde_json::Map::new();
        for (name, payload) in sections.section_payloads() {
            doc.insert(name.to_string(), payload);
        }
        let performance_file = self.performance_dir.join(format!("{activity_id}.json"));
        fs::write(
            &performance_file,
            serde_json::to_string_pretty(&Value::Object(doc))
                .map_err(|e| IngestError::InvalidDocument {
                    path: performance_file.display().to_string(),
                    source: e,
                })?,
        )?;

        let precheck = json!({
            "activity_id": activity_id,
            "total_splits": splits.len(),
            "has_hr_data": !splits.is_empty() && splits.iter().all(|s| s.heart_rate.is_some()),
            "has_power_data": !splits.is_empty() && splits.iter().all(|s| s.power.is_some()),
            "has_form_data": !splits.is_empty()
                && splits.iter().all(|s| s.ground_contact_time.is_some()),
        });
        let precheck_file = self.precheck_dir.join(format!("{activity_id}.json"));
        fs::write(
            &precheck_file,
            serde_json::to_string_pretty(&precheck).map_err(|e| IngestError::InvalidDocument {
                path: precheck_file.display().to_string(),
                source: e,
            })?,
        )?;

        Ok(())
    }
}

fn f64_of(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(|v| v.as_f64())
}

fn str_of<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(|v| v.as_str())
}

/// `summaryDTO.startTimeLocal` date part.
fn activity_start_date(activity: &Value) -> Option<NaiveDate> {
    let start = activity.get("summaryDTO").and_then(|s| str_of(s, "startTimeLocal"))?;
    let date_part = start.split('T').next()?;
    date_part.parse().ok()
}

/// Build split rows from the provider's lap list, estimating intensity for
/// laps the provider left unlabeled.
fn parse_splits(activity_id: i64, splits_doc: &Value) -> Vec<SplitRow> {
    let laps = splits_doc
        .get("lapDTOs")
        .and_then(|l| l.as_array())
        .cloned()
        .unwrap_or_default();
    if laps.is_empty() {
        return Vec::new();
    }

    // First pass: raw signals for the estimator.
    let signals: Vec<SplitSignals> = laps
        .iter()
        .map(|lap| {
            let distance_km = f64_of(lap, "distance").unwrap_or(0.0) / 1000.0;
            let duration = f64_of(lap, "duration").unwrap_or(0.0);
            let pace = (distance_km > 0.0).then(|| duration / distance_km);
            SplitSignals {
                pace_seconds_per_km: pace,
                heart_rate: f64_of(lap, "averageHR"),
                provider_intensity: str_of(lap, "intensityType")
                    .and_then(IntensityType::from_provider),
            }
        })
        .collect();
    let labels = estimate_intensity(&signals);

    let mut rows = Vec::with_capacity(laps.len());
    let mut elapsed = 0.0;
    for (idx, (lap, label)) in laps.iter().zip(labels).enumerate() {
        let distance_km = f64_of(lap, "distance").unwrap_or(0.0) / 1000.0;
        let duration = f64_of(lap, "duration");
        let pace = signals[idx].pace_seconds_per_km;
        let start_time = elapsed;
        elapsed += duration.unwrap_or(0.0);

        rows.push(SplitRow {
            activity_id,
            split_index: idx as u32 + 1,
            role_phase: label.role_phase(),
            distance_km: (distance_km > 0.0).then_some(distance_km),
            duration_seconds: duration,
            start_time_s: Some(start_time),
            end_time_s: Some(elapsed),
            intensity_type: label,
            pace_seconds_per_km: pace,
            heart_rate: f64_of(lap, "averageHR"),
            max_heart_rate: f64_of(lap, "maxHR"),
            cadence: f64_of(lap, "averageRunCadence"),
            max_cadence: f64_of(lap, "maxRunCadence"),
            power: f64_of(lap, "averagePower"),
            max_power: f64_of(lap, "maxPower"),
            normalized_power: f64_of(lap, "normalizedPower"),
            stride_length: f64_of(lap, "strideLength"),
            ground_contact_time: f64_of(lap, "groundContactTime"),
            vertical_oscillation: f64_of(lap, "verticalOscillation"),
            vertical_ratio: f64_of(lap, "verticalRatio"),
            elevation_gain: f64_of(lap, "elevationGain"),
            elevation_loss: f64_of(lap, "elevationLoss"),
            terrain_type: Some(TerrainType::from_elevation_gain(
                f64_of(lap, "elevationGain").unwrap_or(0.0),
            )),
            average_speed: f64_of(lap, "averageSpeed"),
            grade_adjusted_speed: f64_of(lap, "gradeAdjustedSpeed")
                .or_else(|| f64_of(lap, "avgGradeAdjustedSpeed")),
        });
    }
    rows
}

fn parse_hr_zones(doc: &Value) -> Vec<HrZoneDwell> {
    doc.as_array()
        .map(|zones| {
            zones
                .iter()
                .filter_map(|zone| {
                    let number = zone.get("zoneNumber")?.as_u64()? as u32;
                    Some(HrZoneDwell {
                        zone_number: number,
                        low_boundary: f64_of(zone, "zoneLowBoundary"),
                        secs_in_zone: f64_of(zone, "secsInZone"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_training_effect(activity: &Value) -> TrainingEffect {
    let summary = activity.get("summaryDTO").cloned().unwrap_or(Value::Null);
    TrainingEffect {
        aerobic_te: f64_of(&summary, "trainingEffect"),
        anaerobic_te: f64_of(&summary, "anaerobicTrainingEffect"),
        label: str_of(&summary, "trainingEffectLabel").map(str::to_string),
    }
}

fn parse_vo2_max(doc: &Value) -> Vo2MaxSection {
    Vo2MaxSection {
        vo2_max: f64_of(doc, "vo2MaxValue"),
        vo2_max_precise: f64_of(doc, "vo2MaxPreciseValue"),
        measurement_date: str_of(doc, "calendarDate").map(str::to_string),
    }
}

fn parse_lactate_threshold(doc: &Value) -> LactateThresholdSection {
    let speed_hr = doc.get("speed_and_heart_rate").cloned().unwrap_or(Value::Null);
    let power = doc.get("power").cloned().unwrap_or(Value::Null);
    LactateThresholdSection {
        threshold_heart_rate: f64_of(&speed_hr, "lactateThresholdHeartRate")
            .or_else(|| f64_of(doc, "lactateThresholdHeartRate")),
        threshold_speed_mps: f64_of(&speed_hr, "lactateThresholdSpeed")
            .or_else(|| f64_of(doc, "lactateThresholdSpeed")),
        functional_threshold_power: f64_of(&power, "functionalThresholdPower")
            .or_else(|| f64_of(doc, "functionalThresholdPower")),
    }
}

fn build_activity_row(
    activity_id: i64,
    date: NaiveDate,
    docs: &RawDocuments,
    sections: &ActivitySections,
    median_weight: Option<weight::MedianWeight>,
) -> ActivityRow {
    let activity = docs.activity.as_ref();
    let weather = docs.weather.as_ref();
    let basic = &sections.basic_metrics;

    ActivityRow {
        activity_id,
        activity_date: date,
        activity_name: activity
            .and_then(|a| str_of(a, "activityName"))
            .map(str::to_string),
        location_name: activity
            .and_then(|a| str_of(a, "locationName"))
            .map(str::to_string),
        body_mass_kg: median_weight.as_ref().map(|w| w.weight_kg),
        body_mass_source: median_weight
            .as_ref()
            .map(|_| BODY_MASS_SOURCE.to_string()),
        body_mass_method: median_weight
            .as_ref()
            .map(|_| BODY_MASS_METHOD.to_string()),
        distance_km: basic.distance_km,
        duration_seconds: basic.duration_seconds,
        avg_pace_seconds_per_km: basic.avg_pace_seconds_per_km,
        avg_heart_rate: basic.avg_heart_rate,
        external_temp_c: weather.and_then(|w| f64_of(w, "temp")),
        humidity: weather.and_then(|w| f64_of(w, "relativeHumidity")),
        wind_speed_ms: weather.and_then(|w| f64_of(w, "windSpeed")),
        wind_direction_compass: weather
            .and_then(|w| str_of(w, "windDirectionCompassPoint"))
            .map(str::to_string),
    }
}

/// Decode the chart document into a time series using its metric
/// descriptors. Returns `None` when the document carries no usable rows.
fn parse_time_series(details: &Value) -> Option<Vec<TimeSeriesPoint>> {
    let descriptors = details.get("metricDescriptors")?.as_array()?;
    let index_of = |key: &str| -> Option<usize> {
        descriptors.iter().find_map(|d| {
            (str_of(d, "key") == Some(key))
                .then(|| d.get("metricsIndex").and_then(|i| i.as_u64()))
                .flatten()
                .map(|i| i as usize)
        })
    };

    let time_idx = index_of("sumDuration");
    let hr_idx = index_of("directHeartRate");
    let speed_idx = index_of("directSpeed");
    let power_idx = index_of("directPower");
    let cadence_idx = index_of("directRunCadence");
    let elevation_idx = index_of("directElevation");

    let rows = details.get("activityDetailMetrics")?.as_array()?;
    if rows.is_empty() {
        return None;
    }

    let points: Vec<TimeSeriesPoint> = rows
        .iter()
        .enumerate()
        .filter_map(|(row_idx, row)| {
            let metrics = row.get("metrics")?.as_array()?;
            let at = |idx: Option<usize>| idx.and_then(|i| metrics.get(i)).and_then(|v| v.as_f64());
            Some(TimeSeriesPoint {
                timestamp_s: at(time_idx).unwrap_or(row_idx as f64),
                heart_rate: at(hr_idx),
                speed_mps: at(speed_idx),
                power: at(power_idx),
                cadence: at(cadence_idx),
                elevation_m: at(elevation_idx),
            })
        })
        .collect();

    (!points.is_empty()).then_some(points)
}
