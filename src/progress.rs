//! Progress-callback trait for per-page batch extraction events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! real-time events as the batch driver processes each page.
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a terminal progress bar, a UI status table, or a
//! log sink without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because pages are extracted
//! concurrently.
//!
//! `on_page_done`/`on_page_failed` carry a `completed` count computed by the
//! driver on a single task, so it is monotonic regardless of the order in
//! which concurrent pages finish — progress bars can use it directly as an
//! absolute position.

use crate::engine::PageKey;
use std::sync::Arc;

/// Called by the batch driver as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_page_start` may be called concurrently from
/// different tasks; the done/failed events are delivered sequentially.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after validation, before any page is prepared.
    fn on_batch_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the model request is sent for a page.
    fn on_page_start(&self, key: &PageKey, total_pages: usize) {
        let _ = (key, total_pages);
    }

    /// Called when a page's record was extracted successfully.
    ///
    /// `completed` counts all finished pages (success or failure) so far;
    /// it only ever increases.
    fn on_page_done(&self, key: &PageKey, completed: usize, total_pages: usize) {
        let _ = (key, completed, total_pages);
    }

    /// Called when a page finished in failure; `error` is the recorded
    /// failure description.
    fn on_page_failed(&self, key: &PageKey, completed: usize, total_pages: usize, error: &str) {
        let _ = (key, completed, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_batch_complete(&self, total_pages: usize, succeeded: usize) {
        let _ = (total_pages, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in
/// [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
