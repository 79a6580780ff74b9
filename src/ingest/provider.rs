//! Remote activity-provider interface.
//!
//! The provider is a black box returning JSON documents; the concrete HTTP
//! transport lives outside this crate. The pipeline only depends on this
//! trait, so tests and cache-only operation inject their own
//! implementations. Credentials come from the environment at construction
//! time; there is no module-level client state.

use chrono::NaiveDate;
use serde_json::Value;
use std::env;
use std::fmt;
use thiserror::Error;

use crate::error::RunformError;

/// Environment variable carrying the provider login email.
pub const ENV_EMAIL: &str = "GARMIN_EMAIL";
/// Environment variable carrying the provider login password.
pub const ENV_PASSWORD: &str = "GARMIN_PASSWORD";

/// A single failed provider call.
#[derive(Debug, Error)]
#[error("provider call {endpoint} failed: {message}")]
pub struct ProviderError {
    pub endpoint: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

/// Login credentials, sourced from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Read `GARMIN_EMAIL` / `GARMIN_PASSWORD`.
    pub fn from_env() -> Result<Self, RunformError> {
        let email = env::var(ENV_EMAIL).unwrap_or_default();
        let password = env::var(ENV_PASSWORD).unwrap_or_default();
        if email.is_empty() || password.is_empty() {
            return Err(RunformError::Configuration(format!(
                "provider credentials not found; set {ENV_EMAIL} and {ENV_PASSWORD}"
            )));
        }
        Ok(Credentials { email, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Abstract client over the remote activity provider.
///
/// Document shapes (all JSON):
/// - `get_activity`: summary with `activityName`, `locationName`, and a
///   `summaryDTO` object.
/// - `get_activity_splits`: `{ "lapDTOs": [ ... ] }`.
/// - `get_activity_details`: chart document with `metricDescriptors` and
///   `activityDetailMetrics`.
/// - `get_max_metrics`: `{ "generic": { "vo2MaxValue", "vo2MaxPreciseValue",
///   "calendarDate" } }`.
/// - `get_daily_weigh_ins`: `{ "dateWeightList": [ { "weight": <grams> } ] }`.
/// - `get_activities_fordate`: `{ "ActivitiesForDay": { "payload": [ ... ] } }`.
pub trait ActivityProvider {
    fn get_activity(&self, activity_id: i64) -> Result<Value, ProviderError>;

    fn get_activity_details(&self, activity_id: i64, maxchart: u32)
        -> Result<Value, ProviderError>;

    fn get_activity_splits(&self, activity_id: i64) -> Result<Value, ProviderError>;

    fn get_activity_weather(&self, activity_id: i64) -> Result<Value, ProviderError>;

    fn get_activity_gear(&self, activity_id: i64) -> Result<Value, ProviderError>;

    fn get_activity_hr_in_timezones(&self, activity_id: i64) -> Result<Value, ProviderError>;

    fn get_max_metrics(&self, date: NaiveDate) -> Result<Value, ProviderError>;

    fn get_lactate_threshold(&self, latest: bool) -> Result<Value, ProviderError>;

    fn get_daily_weigh_ins(&self, date: NaiveDate) -> Result<Value, ProviderError>;

    fn get_activities_fordate(&self, date: NaiveDate) -> Result<Value, ProviderError>;
}

/// Provider for cache-only operation: every call fails, so the pipeline
/// works entirely from the raw-file cache and the result store.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineProvider;

impl OfflineProvider {
    fn offline(endpoint: &str) -> ProviderError {
        ProviderError::new(endpoint, "offline: no provider configured")
    }
}

impl ActivityProvider for OfflineProvider {
    fn get_activity(&self, _activity_id: i64) -> Result<Value, ProviderError> {
        Err(Self::offline("get_activity"))
    }

    fn get_activity_details(
        &self,
        _activity_id: i64,
        _maxchart: u32,
    ) -> Result<Value, ProviderError> {
        Err(Self::offline("get_activity_details"))
    }

    fn get_activity_splits(&self, _activity_id: i64) -> Result<Value, ProviderError> {
        Err(Self::offline("get_activity_splits"))
    }

    fn get_activity_weather(&self, _activity_id: i64) -> Result<Value, ProviderError> {
        Err(Self::offline("get_activity_weather"))
    }

    fn get_activity_gear(&self, _activity_id: i64) -> Result<Value, ProviderError> {
        Err(Self::offline("get_activity_gear"))
    }

    fn get_activity_hr_in_timezones(&self, _activity_id: i64) -> Result<Value, ProviderError> {
        Err(Self::offline("get_activity_hr_in_timezones"))
    }

    fn get_max_metrics(&self, _date: NaiveDate) -> Result<Value, ProviderError> {
        Err(Self::offline("get_max_metrics"))
    }

    fn get_lactate_threshold(&self, _latest: bool) -> Result<Value, ProviderError> {
        Err(Self::offline("get_lactate_threshold"))
    }

    fn get_daily_weigh_ins(&self, _date: NaiveDate) -> Result<Value, ProviderError> {
        Err(Self::offline("get_daily_weigh_ins"))
    }

    fn get_activities_fordate(&self, _date: NaiveDate) -> Result<Value, ProviderError> {
        Err(Self::offline("get_activities_fordate"))
    }
}
