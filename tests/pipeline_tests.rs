//! Ingest pipeline tests against a scripted provider: cache tiers,
//! per-file fetch accounting, partial failure, intensity labeling, and the
//! full ingest-then-evaluate flow.

use chrono::NaiveDate;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use tempfile::TempDir;

use runform::baseline::{Evaluator, Trainer};
use runform::cancel::CancellationToken;
use runform::config::Config;
use runform::database::Database;
use runform::error::IngestError;
use runform::ingest::provider::{ActivityProvider, ProviderError};
use runform::ingest::{IngestSource, IngestWorker};
use runform::models::IntensityType;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Scripted provider: serves canned documents and counts every call.
/// Endpoints listed in `failing` return errors instead.
struct MockProvider {
    activities: HashMap<i64, Value>,
    splits: HashMap<i64, Value>,
    details: HashMap<i64, Value>,
    weigh_ins: HashMap<NaiveDate, f64>,
    for_date: HashMap<NaiveDate, Vec<i64>>,
    failing: Vec<&'static str>,
    calls: RefCell<HashMap<String, usize>>,
}

impl MockProvider {
    fn new() -> Self {
        MockProvider {
            activities: HashMap::new(),
            splits: HashMap::new(),
            details: HashMap::new(),
            weigh_ins: HashMap::new(),
            for_date: HashMap::new(),
            failing: Vec::new(),
            calls: RefCell::new(HashMap::new()),
        }
    }

    fn count(&self, endpoint: &str) -> usize {
        *self.calls.borrow().get(endpoint).unwrap_or(&0)
    }

    fn record(&self, endpoint: &str) -> Result<(), ProviderError> {
        *self.calls.borrow_mut().entry(endpoint.to_string()).or_insert(0) += 1;
        if self.failing.contains(&endpoint) {
            return Err(ProviderError::new(endpoint, "scripted failure"));
        }
        Ok(())
    }

    /// A ten-lap threshold workout on `date`: slow bookends, fast middle,
    /// on-baseline form data, power throughout.
    fn with_threshold_workout(mut self, activity_id: i64, date: NaiveDate) -> Self {
        let paces = [300.0, 300.0, 220.0, 222.0, 224.0, 221.0, 223.0, 225.0, 300.0, 310.0];
        let laps: Vec<Value> = paces
            .iter()
            .map(|&pace| {
                let speed: f64 = 1000.0 / pace;
                json!({
                    "distance": 1000.0,
                    "duration": pace,
                    "averageHR": if pace < 240.0 { 168.0 } else { 140.0 },
                    "averageRunCadence": 182.0,
                    "averagePower": (speed - 1.2) / 0.6 * 62.0,
                    "groundContactTime": ((speed.ln() - 4.6) / -0.6).exp(),
                    "verticalOscillation": 10.0 - 0.5 * speed,
                    "verticalRatio": 11.0 - 0.8 * speed,
                    "elevationGain": 2.0,
                    "elevationLoss": 2.0,
                    "averageSpeed": speed,
                    "strideLength": 1.15
                })
            })
            .collect();

        self.activities.insert(
            activity_id,
            json!({
                "activityName": "Threshold Tuesday",
                "locationName": "River Loop",
                "summaryDTO": {
                    "startTimeLocal": format!("{date}T06:58:00"),
                    "trainingEffect": 3.8,
                    "anaerobicTrainingEffect": 1.4,
                    "trainingEffectLabel": "TEMPO"
                }
            }),
        );
        self.splits.insert(activity_id, json!({ "lapDTOs": laps }));
        self.details.insert(
            activity_id,
            json!({
                "metricDescriptors": [
                    {"key": "sumDuration", "metricsIndex": 0},
                    {"key": "directHeartRate", "metricsIndex": 1},
                    {"key": "directSpeed", "metricsIndex": 2}
                ],
                "activityDetailMetrics": (0..120).map(|i| json!({
                    "metrics": [i as f64, 150.0 + (i % 10) as f64, 4.2]
                })).collect::<Vec<Value>>()
            }),
        );
        self.weigh_ins.insert(date, 62000.0);
        self.for_date.entry(date).or_default().push(activity_id);
        self
    }
}

impl ActivityProvider for MockProvider {
    fn get_activity(&self, activity_id: i64) -> Result<Value, ProviderError> {
        self.record("get_activity")?;
        self.activities
            .get(&activity_id)
            .cloned()
            .ok_or_else(|| ProviderError::new("get_activity", "unknown activity"))
    }

    fn get_activity_details(&self, activity_id: i64, _maxchart: u32) -> Result<Value, ProviderError> {
        self.record("get_activity_details")?;
        self.details
            .get(&activity_id)
            .cloned()
            .ok_or_else(|| ProviderError::new("get_activity_details", "unknown activity"))
    }

    fn get_activity_splits(&self, activity_id: i64) -> Result<Value, ProviderError> {
        self.record("get_activity_splits")?;
        self.splits
            .get(&activity_id)
            .cloned()
            .ok_or_else(|| ProviderError::new("get_activity_splits", "unknown activity"))
    }

    fn get_activity_weather(&self, _activity_id: i64) -> Result<Value, ProviderError> {
        self.record("get_activity_weather")?;
        Ok(json!({
            "temp": 18.0,
            "relativeHumidity": 63.0,
            "windSpeed": 2.5,
            "windDirectionCompassPoint": "NW"
        }))
    }

    fn get_activity_gear(&self, _activity_id: i64) -> Result<Value, ProviderError> {
        self.record("get_activity_gear")?;
        Ok(json!([{"displayName": "Pegasus 41"}]))
    }

    fn get_activity_hr_in_timezones(&self, _activity_id: i64) -> Result<Value, ProviderError> {
        self.record("get_activity_hr_in_timezones")?;
        Ok(json!([
            {"zoneNumber": 1, "zoneLowBoundary": 98.0, "secsInZone": 300.0},
            {"zoneNumber": 2, "zoneLowBoundary": 125.0, "secsInZone": 600.0},
            {"zoneNumber": 3, "zoneLowBoundary": 145.0, "secsInZone": 900.0},
            {"zoneNumber": 4, "zoneLowBoundary": 165.0, "secsInZone": 700.0},
            {"zoneNumber": 5, "zoneLowBoundary": 178.0, "secsInZone": 60.0}
        ]))
    }

    fn get_max_metrics(&self, _date: NaiveDate) -> Result<Value, ProviderError> {
        self.record("get_max_metrics")?;
        Ok(json!({"generic": {
            "vo2MaxValue": 54.0,
            "vo2MaxPreciseValue": 54.4,
            "calendarDate": "2025-08-10"
        }}))
    }

    fn get_lactate_threshold(&self, _latest: bool) -> Result<Value, ProviderError> {
        self.record("get_lactate_threshold")?;
        Ok(json!({
            "speed_and_heart_rate": {
                "lactateThresholdHeartRate": 168.0,
                "lactateThresholdSpeed": 3.9
            },
            "power": {"functionalThresholdPower": 285.0}
        }))
    }

    fn get_daily_weigh_ins(&self, date: NaiveDate) -> Result<Value, ProviderError> {
        self.record("get_daily_weigh_ins")?;
        match self.weigh_ins.get(&date) {
            Some(&grams) => Ok(json!({"dateWeightList": [{"weight": grams}]})),
            None => Ok(json!({"dateWeightList": []})),
        }
    }

    fn get_activities_fordate(&self, date: NaiveDate) -> Result<Value, ProviderError> {
        self.record("get_activities_fordate")?;
        let payload: Vec<Value> = self
            .for_date
            .get(&date)
            .map(|ids| ids.iter().map(|id| json!({"activityId": id})).collect())
            .unwrap_or_default();
        Ok(json!({"ActivitiesForDay": {"payload": payload}}))
    }
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.ingest.request_delay_secs = 0.0;
    config
}

#[test]
fn pipeline_ingests_and_writes_through() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut db = Database::open_in_memory().unwrap();
    let provider = MockProvider::new().with_threshold_workout(42, d(2025, 8, 10));
    let worker = IngestWorker::new(provider, &config);

    let outcome = worker
        .process_activity(&mut db, 42, d(2025, 8, 10), &CancellationToken::new())
        .unwrap();

    assert_eq!(outcome.source, IngestSource::Pipeline);
    assert_eq!(outcome.split_count, 10);
    assert!((outcome.body_mass_kg.unwrap() - 62.0).abs() < 1e-9);

    // Activity row carries metadata, weather, and the median body mass.
    let activity = db.get_activity(42).unwrap().unwrap();
    assert_eq!(activity.activity_name.as_deref(), Some("Threshold Tuesday"));
    assert_eq!(activity.external_temp_c, Some(18.0));
    assert_eq!(activity.wind_direction_compass.as_deref(), Some("NW"));
    assert_eq!(activity.body_mass_source.as_deref(), Some("statistical_7d_median"));

    // Splits: labeled, phased, terrain-classified.
    let splits = db.load_splits(42).unwrap();
    assert_eq!(splits.len(), 10);
    assert_eq!(splits[0].intensity_type, IntensityType::Warmup);
    assert_eq!(splits[4].intensity_type, IntensityType::Interval);
    assert_eq!(splits[9].intensity_type, IntensityType::Cooldown);

    // The result cache covers all eleven sections.
    assert!(db.cached_performance(42).unwrap().is_some());

    // Run-splits list recorded for evaluation.
    assert_eq!(db.run_splits_list(42).unwrap(), Some(vec![3, 4, 5, 6, 7, 8]));

    // Time series decoded and stored compressed.
    let points = db.load_time_series(42).unwrap().unwrap();
    assert_eq!(points.len(), 120);

    // Raw files and computed documents landed on disk.
    assert!(dir.path().join("raw/activity/42/splits.json").exists());
    assert!(dir.path().join("raw/activity/42/vo2_max.json").exists());
    assert!(dir.path().join("raw/weight/2025-08-10.json").exists());
    assert!(dir.path().join("performance/42.json").exists());
    assert!(dir.path().join("precheck/42.json").exists());
}

#[test]
fn reingestion_is_a_noop_on_result_cache() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut db = Database::open_in_memory().unwrap();
    let provider = MockProvider::new().with_threshold_workout(42, d(2025, 8, 10));
    let worker = IngestWorker::new(provider, &config);

    let first = worker
        .process_activity(&mut db, 42, d(2025, 8, 10), &CancellationToken::new())
        .unwrap();
    assert_eq!(first.source, IngestSource::Pipeline);

    let splits_calls = 1;
    let second = worker
        .process_activity(&mut db, 42, d(2025, 8, 10), &CancellationToken::new())
        .unwrap();
    assert_eq!(second.source, IngestSource::ResultCache);

    // No further provider traffic on the second run.
    let worker_provider = worker_provider(&worker);
    assert_eq!(worker_provider.count("get_activity_splits"), splits_calls);
    assert_eq!(worker_provider.count("get_activity"), 1);
    assert_eq!(worker_provider.count("get_activity_weather"), 1);
}

/// Access the scripted provider back out of the worker for call counts.
fn worker_provider(worker: &IngestWorker<MockProvider>) -> &MockProvider {
    worker.provider()
}

#[test]
fn raw_cache_serves_partial_resume() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut db = Database::open_in_memory().unwrap();

    // First pass: weather endpoint is down; everything else lands in the
    // raw cache.
    let mut provider = MockProvider::new().with_threshold_workout(42, d(2025, 8, 10));
    provider.failing = vec!["get_activity_weather"];
    let worker = IngestWorker::new(provider, &config);

    let outcome = worker
        .process_activity(&mut db, 42, d(2025, 8, 10), &CancellationToken::new())
        .unwrap();
    // Partial failure is not fatal.
    assert_eq!(outcome.source, IngestSource::Pipeline);
    let activity = db.get_activity(42).unwrap().unwrap();
    assert!(activity.external_temp_c.is_none());
    assert!(!dir.path().join("raw/activity/42/weather.json").exists());
    assert!(dir.path().join("raw/activity/42/splits.json").exists());
}

#[test]
fn process_by_date_resolves_through_provider() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut db = Database::open_in_memory().unwrap();
    let provider = MockProvider::new().with_threshold_workout(77, d(2025, 8, 12));
    let worker = IngestWorker::new(provider, &config);

    let outcome = worker
        .process_by_date(&mut db, d(2025, 8, 12), &CancellationToken::new())
        .unwrap();
    assert_eq!(outcome.activity_id, 77);

    // Second resolution hits the store instead of the provider.
    worker
        .process_by_date(&mut db, d(2025, 8, 12), &CancellationToken::new())
        .unwrap();
    assert_eq!(worker_provider(&worker).count("get_activities_fordate"), 1);
}

#[test]
fn batch_ingest_reports_per_day() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut db = Database::open_in_memory().unwrap();
    let provider = MockProvider::new()
        .with_threshold_workout(11, d(2025, 8, 10))
        .with_threshold_workout(12, d(2025, 8, 12));
    let worker = IngestWorker::new(provider, &config);

    let results = worker
        .batch_ingest(&mut db, d(2025, 8, 10), d(2025, 8, 12), &CancellationToken::new())
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(matches!(
        results[0],
        runform::ingest::BatchDayResult::Success { activity_id: 11, .. }
    ));
    assert!(matches!(
        results[1],
        runform::ingest::BatchDayResult::NoActivity { .. }
    ));
    assert!(matches!(
        results[2],
        runform::ingest::BatchDayResult::Success { activity_id: 12, .. }
    ));
}

#[test]
fn cancelled_ingest_writes_nothing_to_store() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut db = Database::open_in_memory().unwrap();
    let provider = MockProvider::new().with_threshold_workout(42, d(2025, 8, 10));
    let worker = IngestWorker::new(provider, &config);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = worker
        .process_activity(&mut db, 42, d(2025, 8, 10), &cancel)
        .unwrap_err();
    assert!(matches!(err, IngestError::Cancelled));
    assert!(db.get_activity(42).unwrap().is_none());
}

#[test]
fn ingest_train_evaluate_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut db = Database::open_in_memory().unwrap();
    let provider = MockProvider::new().with_threshold_workout(42, d(2025, 8, 10));
    let worker = IngestWorker::new(provider, &config);

    worker
        .process_activity(&mut db, 42, d(2025, 8, 10), &CancellationToken::new())
        .unwrap();

    // A short history is enough here; the floor is a config concern.
    let mut trainer = Trainer::new("default", "flat_road");
    trainer.min_form_samples = 10;
    let report = trainer
        .train(&mut db, d(2025, 8, 10), 2, &CancellationToken::new())
        .unwrap();
    assert!(report.form_complete());
    assert!(report.power.is_some());

    let record = Evaluator::new("default", "flat_road")
        .evaluate(&mut db, 42, d(2025, 8, 10), &CancellationToken::new())
        .unwrap();

    // Ingested on-baseline data evaluates clean across the board,
    // including the power block fed by the ingested body mass.
    assert!(record.overall_score > 4.5);
    assert!(record.cadence.achieved);
    let power = record.power.expect("power block");
    assert!((power.wkg * 62.0 - power.avg_w).abs() < 1e-6);
    assert!(record.integrated_score.unwrap() > 95.0);
    assert!(record.training_mode.is_some());

    let summary = db.load_evaluation_summary(42).unwrap().unwrap();
    assert!(summary.integrated_score.is_some());
}
