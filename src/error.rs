//! Unified error hierarchy for the runform engine.
//!
//! Each subsystem carries its own `thiserror` enum; the top-level
//! [`RunformError`] rolls them up for the binary surface.

use chrono::NaiveDate;
use thiserror::Error;

/// Top-level error type for all runform operations.
#[derive(Debug, Error)]
pub enum RunformError {
    /// Baseline training / model errors
    #[error("baseline error: {0}")]
    Baseline(#[from] BaselineError),

    /// Analytical store errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Evaluation errors
    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    /// Ingest pipeline errors
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Activity resolution errors
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = RunformError> = std::result::Result<T, E>;

/// Errors from baseline model fitting and lookup.
#[derive(Debug, Error)]
pub enum BaselineError {
    /// Too few samples survived outlier rejection
    #[error("insufficient data: {got} samples after filtering (need {needed})")]
    InsufficientData { needed: usize, got: usize },

    /// The GCT fit produced a non-negative slope and no fallback rescued it
    #[error("non-monotonic GCT model: d={d:.3} >= 0")]
    NonMonotonic { d: f64 },

    /// A metric the linear fitter does not support
    #[error("unsupported metric for linear fit: {metric}")]
    UnsupportedMetric { metric: crate::models::Metric },

    /// The regression system was singular (e.g. zero variance in x)
    #[error("degenerate regression input: {reason}")]
    Degenerate { reason: String },

    /// No baseline row covers the activity date
    #[error(
        "no baseline found for user={user_id} condition={condition_group} date={activity_date}; \
         train a baseline with period_end <= {activity_date}"
    )]
    NoBaselineFound {
        user_id: String,
        condition_group: String,
        activity_date: NaiveDate,
    },

    /// Rows exist for the period but not all three form metrics are present
    #[error("incomplete baseline: found metrics {found:?}")]
    IncompleteBaseline { found: Vec<String> },

    /// Training was cancelled between metric fits
    #[error("training cancelled")]
    Cancelled,

    /// Store access during training or lookup
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from scoring and evaluation of a single activity.
#[derive(Debug, Error)]
pub enum EvalError {
    /// No splits carried usable form data
    #[error("no splits found for activity {activity_id}")]
    NoSplitsFound { activity_id: i64 },

    /// Evaluation was cancelled before the row was written
    #[error("evaluation cancelled")]
    Cancelled,

    #[error("baseline error: {0}")]
    Baseline(#[from] BaselineError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Analytical-store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: String, reason: String },
}

/// Ingest pipeline errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The provider returned an error for a required document
    #[error("provider error on {endpoint}: {message}")]
    Provider { endpoint: String, message: String },

    /// A cached document could not be parsed
    #[error("invalid cached document {path}: {source}")]
    InvalidDocument {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The splits document carried no usable laps
    #[error("no splits in activity {activity_id}")]
    EmptySplits { activity_id: i64 },

    /// Ingest was cancelled between fetches
    #[error("ingest cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Date-to-activity resolution errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no activity found for {date}")]
    NoActivity { date: NaiveDate },

    #[error("multiple activities found for {date}: {ids:?}; specify an activity id")]
    AmbiguousActivity { date: NaiveDate, ids: Vec<i64> },

    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
