//! Seven-day median body mass for W/kg normalisation.
//!
//! Each of the seven days ending on the activity date is loaded cache-first
//! (one raw weigh-in file per date) and fetched when absent; days without a
//! sample are skipped. Provider weights arrive in grams.

use chrono::{Duration, NaiveDate};
use serde_json::Value;
use statrs::statistics::{Data, Median};
use tracing::{debug, warn};

use super::provider::ActivityProvider;
use super::raw_cache::RawFileCache;
use crate::error::IngestError;

/// Label recorded on the activity row for a median-derived body mass.
pub const BODY_MASS_SOURCE: &str = "statistical_7d_median";
/// Aggregation method label.
pub const BODY_MASS_METHOD: &str = "median";

/// Median body mass over the seven-day window.
#[derive(Debug, Clone, PartialEq)]
pub struct MedianWeight {
    pub date: NaiveDate,
    pub weight_kg: f64,
    pub sample_count: usize,
}

/// Cache-first aggregator over daily weigh-ins.
pub struct BodyMassAggregator<'a, P: ActivityProvider> {
    cache: &'a RawFileCache,
    provider: &'a P,
}

impl<'a, P: ActivityProvider> BodyMassAggregator<'a, P> {
    pub fn new(cache: &'a RawFileCache, provider: &'a P) -> Self {
        BodyMassAggregator { cache, provider }
    }

    /// The median weight over the seven days ending on `date` inclusive, or
    /// `None` when no day carried a sample.
    pub fn median_weight(&self, date: NaiveDate) -> Result<Option<MedianWeight>, IngestError> {
        let mut weights_kg = Vec::new();

        for offset in 0..7 {
            let day = date - Duration::days(offset);
            match self.collect_day(day)? {
                Some(grams) => weights_kg.push(grams / 1000.0),
                None => debug!(%day, "no weigh-in sample, skipping"),
            }
        }

        if weights_kg.is_empty() {
            return Ok(None);
        }

        let sample_count = weights_kg.len();
        let median = Data::new(weights_kg).median();
        Ok(Some(MedianWeight {
            date,
            weight_kg: median,
            sample_count,
        }))
    }

    /// One day's weigh-in in grams, cache-first with fetch-and-persist.
    fn collect_day(&self, day: NaiveDate) -> Result<Option<f64>, IngestError> {
        if let Some(doc) = self.cache.load_weight(day)? {
            return Ok(extract_weight_grams(&doc));
        }

        match self.provider.get_daily_weigh_ins(day) {
            Ok(doc) => {
                if extract_weight_grams(&doc).is_some() {
                    self.cache.store_weight(day, &doc)?;
                }
                Ok(extract_weight_grams(&doc))
            }
            Err(e) => {
                warn!(%day, error = %e, "weigh-in fetch failed, skipping day");
                Ok(None)
            }
        }
    }
}

/// First weigh-in of the day, in grams.
fn extract_weight_grams(doc: &Value) -> Option<f64> {
    doc.get("dateWeightList")?
        .as_array()?
        .first()?
        .get("weight")?
        .as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::provider::ProviderError;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct WeighInProvider {
        by_date: HashMap<NaiveDate, f64>,
        calls: RefCell<usize>,
    }

    impl WeighInProvider {
        fn new(samples: &[(NaiveDate, f64)]) -> Self {
            WeighInProvider {
                by_date: samples.iter().copied().collect(),
                calls: RefCell::new(0),
            }
        }
    }

    impl ActivityProvider for WeighInProvider {
        fn get_activity(&self, _: i64) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_activity_details(&self, _: i64, _: u32) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_activity_splits(&self, _: i64) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_activity_weather(&self, _: i64) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_activity_gear(&self, _: i64) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_activity_hr_in_timezones(&self, _: i64) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_max_metrics(&self, _: NaiveDate) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_lactate_threshold(&self, _: bool) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_daily_weigh_ins(&self, date: NaiveDate) -> Result<Value, ProviderError> {
            *self.calls.borrow_mut() += 1;
            match self.by_date.get(&date) {
                Some(&grams) => Ok(json!({"dateWeightList": [{"weight": grams}]})),
                None => Ok(json!({"dateWeightList": []})),
            }
        }
        fn get_activities_fordate(&self, _: NaiveDate) -> Result<Value, ProviderError> {
            unimplemented!()
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn cache() -> (TempDir, RawFileCache) {
        let dir = TempDir::new().unwrap();
        let cache = RawFileCache::with_roots(
            dir.path().join("raw/activity"),
            dir.path().join("raw/weight"),
        );
        (dir, cache)
    }

    #[test]
    fn test_median_over_available_days() {
        let (_dir, cache) = cache();
        // Three of seven days have samples: 61.8, 62.4, 63.0 kg.
        let provider = WeighInProvider::new(&[
            (d(2025, 8, 10), 62400.0),
            (d(2025, 8, 8), 61800.0),
            (d(2025, 8, 5), 63000.0),
        ]);

        let aggregator = BodyMassAggregator::new(&cache, &provider);
        let median = aggregator.median_weight(d(2025, 8, 10)).unwrap().unwrap();

        assert_eq!(median.sample_count, 3);
        assert!((median.weight_kg - 62.4).abs() < 1e-9);
    }

    #[test]
    fn test_no_samples_returns_none() {
        let (_dir, cache) = cache();
        let provider = WeighInProvider::new(&[]);
        let aggregator = BodyMassAggregator::new(&cache, &provider);
        assert!(aggregator.median_weight(d(2025, 8, 10)).unwrap().is_none());
    }

    #[test]
    fn test_cache_avoids_refetch() {
        let (_dir, cache) = cache();
        let provider = WeighInProvider::new(&[(d(2025, 8, 10), 62000.0)]);
        let aggregator = BodyMassAggregator::new(&cache, &provider);

        aggregator.median_weight(d(2025, 8, 10)).unwrap().unwrap();
        let first_calls = *provider.calls.borrow();
        assert_eq!(first_calls, 7);

        // The day with data is now cached; empty days are asked again.
        aggregator.median_weight(d(2025, 8, 10)).unwrap().unwrap();
        assert_eq!(*provider.calls.borrow(), first_calls + 6);
    }

    #[test]
    fn test_day_outside_window_ignored() {
        let (_dir, cache) = cache();
        // Sample eight days before the target is out of the window.
        let provider = WeighInProvider::new(&[(d(2025, 8, 2), 70000.0)]);
        let aggregator = BodyMassAggregator::new(&cache, &provider);
        assert!(aggregator.median_weight(d(2025, 8, 10)).unwrap().is_none());
    }
}
