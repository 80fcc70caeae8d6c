//! Cooperative cancellation for a running test.
//!
//! The flag is the only channel from the orchestrator into a running worker.
//! Setting it never blocks; the worker polls it at its loop boundaries and
//! unwinds through its normal shutdown path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Shared, clonable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<RwLock<Option<String>>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            if let Ok(mut r) = self.reason.write() {
                *r = Some(reason.into());
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }
}
