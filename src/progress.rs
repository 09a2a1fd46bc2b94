//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as a run moves through its stages.
//!
//! # Why callbacks instead of channels?
//!
//! The host decides how progress travels: a terminal bar, a job-status row,
//! a websocket. The library only promises to call these methods in order
//! from the task driving the run.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ingest::{IngestConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl PipelineProgressCallback for PageCounter {
//!     fn on_page_complete(&self, page: usize, total_pages: usize, blocks: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page}/{total_pages}: {blocks} blocks");
//!     }
//! }
//!
//! let config = IngestConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once the source has been classified.
    ///
    /// # Arguments
    /// * `source` - path or URL as given
    /// * `kind`   - `document`, `media` or `stream`
    fn on_run_start(&self, source: &str, kind: &str) {
        let _ = (source, kind);
    }

    /// Called when the number of pages is known (documents only).
    fn on_pages_discovered(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after a page has been analysed and enriched.
    ///
    /// # Arguments
    /// * `page`        - 1-indexed page number
    /// * `total_pages` - total pages in the document
    /// * `blocks`      - blocks on the page after enrichment
    fn on_page_complete(&self, page: usize, total_pages: usize, blocks: usize) {
        let _ = (page, total_pages, blocks);
    }

    /// Called when enrichment of one block failed and the block kept its
    /// previous content.
    fn on_block_error(&self, block_id: &str, error: &str) {
        let _ = (block_id, error);
    }

    /// Called once when the run reaches `completed` or `failed`.
    ///
    /// # Arguments
    /// * `status` - `completed` or `failed`
    /// * `error`  - the failure message, if any
    fn on_run_complete(&self, status: &str, error: Option<&str>) {
        let _ = (status, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        pages: AtomicUsize,
        block_errors: AtomicUsize,
        final_status: Mutex<Option<String>>,
    }

    impl PipelineProgressCallback for Recorder {
        fn on_page_complete(&self, _page: usize, _total_pages: usize, _blocks: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_block_error(&self, _block_id: &str, _error: &str) {
            self.block_errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, status: &str, _error: Option<&str>) {
            *self.final_status.lock().unwrap() = Some(status.to_string());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start("a.pdf", "document");
        cb.on_pages_discovered(2);
        cb.on_page_complete(1, 2, 7);
        cb.on_block_error("p1-b0", "worker gone");
        cb.on_run_complete("failed", Some("boom"));
    }

    #[test]
    fn recorder_receives_events_through_arc_dyn() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_page_complete(1, 2, 3);
        cb.on_page_complete(2, 2, 0);
        cb.on_block_error("p2-b1", "timeout");
        cb.on_run_complete("completed", None);

        assert_eq!(rec.pages.load(Ordering::SeqCst), 2);
        assert_eq!(rec.block_errors.load(Ordering::SeqCst), 1);
        assert_eq!(rec.final_status.lock().unwrap().as_deref(), Some("completed"));
    }
}
