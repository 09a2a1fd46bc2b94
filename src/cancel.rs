//! Cooperative cancellation for a pipeline run.
//!
//! The pipeline polls the token at stage, page and block boundaries. An
//! in-flight worker request is never interrupted; the run stops at the next
//! boundary and ends `failed` with `cancelled during <stage>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::IngestError;
use crate::output::Stage;

/// Cloneable cancel flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` naming `stage` once the token has been cancelled.
    pub fn check(&self, stage: Stage) -> Result<(), IngestError> {
        if self.is_cancelled() {
            return Err(IngestError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}
