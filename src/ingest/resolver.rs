//! Date-to-activity resolution, store-first with remote fallback.

use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;

use super::provider::ActivityProvider;
use crate::database::Database;
use crate::error::ResolveError;

/// Resolve a calendar day to a single activity id.
///
/// The analytical store is consulted first; exactly one matching row wins.
/// Otherwise the provider's for-date listing decides: an empty payload is
/// `NoActivity`, more than one entry is `AmbiguousActivity`.
pub fn resolve_activity_id<P: ActivityProvider>(
    db: &Database,
    provider: &P,
    date: NaiveDate,
) -> Result<i64, ResolveError> {
    let ids = db.activities_on(date)?;
    if ids.len() == 1 {
        info!(%date, activity_id = ids[0], "resolved activity from store");
        return Ok(ids[0]);
    }

    info!(%date, "activity not resolved from store, querying provider");
    let response = provider
        .get_activities_fordate(date)
        .map_err(|e| ResolveError::Provider {
            message: e.to_string(),
        })?;

    let payload = activities_payload(&response);
    match payload.len() {
        0 => Err(ResolveError::NoActivity { date }),
        1 => {
            let id = activity_id_of(&payload[0]).ok_or_else(|| ResolveError::Provider {
                message: "payload entry without activityId".to_string(),
            })?;
            info!(%date, activity_id = id, "resolved activity from provider");
            Ok(id)
        }
        _ => {
            let ids: Vec<i64> = payload.iter().filter_map(activity_id_of).collect();
            Err(ResolveError::AmbiguousActivity { date, ids })
        }
    }
}

fn activities_payload(response: &Value) -> Vec<Value> {
    response
        .get("ActivitiesForDay")
        .and_then(|day| day.get("payload"))
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default()
}

fn activity_id_of(entry: &Value) -> Option<i64> {
    entry.get("activityId").and_then(|id| id.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::provider::ProviderError;
    use crate::models::ActivityRow;
    use serde_json::json;

    struct ForDateProvider {
        payload: Value,
    }

    impl ActivityProvider for ForDateProvider {
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
        fn get_daily_weigh_ins(&self, _: NaiveDate) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        fn get_activities_fordate(&self, _: NaiveDate) -> Result<Value, ProviderError> {
            Ok(json!({"ActivitiesForDay": {"payload": self.payload}}))
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn store_activity(db: &mut Database, id: i64, date: NaiveDate) {
        db.upsert_activity(&ActivityRow {
            activity_id: id,
            activity_date: date,
            activity_name: None,
            location_name: None,
            body_mass_kg: None,
            body_mass_source: None,
            body_mass_method: None,
            distance_km: None,
            duration_seconds: None,
            avg_pace_seconds_per_km: None,
            avg_heart_rate: None,
            external_temp_c: None,
            humidity: None,
            wind_speed_ms: None,
            wind_direction_compass: None,
        })
        .unwrap();
    }

    #[test]
    fn test_store_hit_short_circuits() {
        let mut db = Database::open_in_memory().unwrap();
        store_activity(&mut db, 555, d(2025, 8, 10));

        let provider = ForDateProvider {
            payload: json!([]),
        };
        let id = resolve_activity_id(&db, &provider, d(2025, 8, 10)).unwrap();
        assert_eq!(id, 555);
    }

    #[test]
    fn test_provider_fallback_single() {
        let db = Database::open_in_memory().unwrap();
        let provider = ForDateProvider {
            payload: json!([{"activityId": 777, "activityName": "Tempo"}]),
        };
        let id = resolve_activity_id(&db, &provider, d(2025, 8, 10)).unwrap();
        assert_eq!(id, 777);
    }

    #[test]
    fn test_no_activity() {
        let db = Database::open_in_memory().unwrap();
        let provider = ForDateProvider {
            payload: json!([]),
        };
        let err = resolve_activity_id(&db, &provider, d(2025, 8, 10)).unwrap_err();
        assert!(matches!(err, ResolveError::NoActivity { .. }));
    }

    #[test]
    fn test_ambiguous_activity_lists_ids() {
        let db = Database::open_in_memory().unwrap();
        let provider = ForDateProvider {
            payload: json!([
                {"activityId": 1, "activityName": "Morning"},
                {"activityId": 2, "activityName": "Evening"}
            ]),
        };
        let err = resolve_activity_id(&db, &provider, d(2025, 8, 10)).unwrap_err();
        match err {
            ResolveError::AmbiguousActivity { ids, .. } => assert_eq!(ids, vec![1, 2]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
