// Library interface for the runform engine.
// Exposes the baseline, ingest, and storage layers to the CLI and to
// integration tests.

pub mod baseline;
pub mod cancel;
pub mod config;
pub mod database;
pub mod dates;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod models;

// Re-export commonly used types for convenience
pub use baseline::{
    BaselineSet, EvaluationRecord, Evaluator, Expectations, GctPowerModel, LinearModel,
    Observation, PowerSpeedModel, Trainer, TrainingReport,
};
pub use cancel::CancellationToken;
pub use config::Config;
pub use database::Database;
pub use error::{BaselineError, EvalError, IngestError, ResolveError, Result, RunformError, StoreError};
pub use ingest::{IngestOutcome, IngestSource, IngestWorker};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use models::*;
