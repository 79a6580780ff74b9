//! Cooperative cancellation shared between the ingest pipeline and the
//! trainer.
//!
//! The token is checked at component boundaries only (between file fetches,
//! between metric fits); a cancelled evaluation must leave no partial
//! evaluation row, while partially-written raw cache files are kept as a
//! resume point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheaply clonable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
