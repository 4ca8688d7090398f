//! Batch extraction driver: many uploaded pages, one engine, bounded
//! concurrency.
//!
//! The driver owns the orchestration the engine deliberately does not:
//! image preparation on the blocking pool, concurrent model calls, and the
//! sequential application of results back onto the [`WorkflowEngine`]. The
//! engine stays single-writer — extraction futures never touch it; they
//! hand `(key, result)` pairs back to the driver task, which applies them
//! in completion order. That also makes the reported progress count
//! trivially monotonic.
//!
//! Per-page failures (bad image, API error, timeout, cancellation) are
//! recorded on their record and never abort the batch; only caller bugs
//! (duplicate uploads) and store/engine faults surface as errors.

use crate::config::ExtractionConfig;
use crate::engine::{PageKey, Stage, WorkflowEngine};
use crate::error::{ExtractionError, WorkflowError};
use crate::pipeline::{client::ExtractionClient, prepare};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// One uploaded page: identity plus raw raster bytes (PNG or JPEG).
#[derive(Debug, Clone)]
pub struct PageSource {
    pub document_id: String,
    pub page_number: u32,
    pub image: Vec<u8>,
}

impl PageSource {
    pub fn new(document_id: impl Into<String>, page_number: u32, image: Vec<u8>) -> Self {
        Self {
            document_id: document_id.into(),
            page_number,
            image,
        }
    }
}

/// Cooperative cancellation flag shared between the caller and the driver.
///
/// Cancellation is checked before each page is dispatched and between retry
/// attempts inside the client; a cancelled page completes as
/// [`Stage::Failed`] with [`ExtractionError::Cancelled`] rather than being
/// left in `Extracting` indefinitely. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Pages already in flight finish their current
    /// attempt (bounded by the per-call timeout) and then fail as cancelled.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Counts and timings for one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total_pages: usize,
    /// Pages that reached [`Stage::Done`].
    pub extracted_pages: usize,
    /// Pages that reached [`Stage::Failed`] (prepare or extraction).
    pub failed_pages: usize,
    pub prepare_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Extract every source page into `engine`, at most `config.concurrency`
/// model calls in flight.
///
/// All keys are validated before any work starts: a duplicate upload —
/// within `sources` or against records already registered this run — fails
/// the whole call with [`WorkflowError::DuplicateRecord`] and leaves the
/// engine untouched.
///
/// # Errors
/// [`WorkflowError::DuplicateRecord`] on duplicate uploads,
/// [`WorkflowError::Internal`] if a blocking task panics, plus any engine
/// error from applying results. Per-page extraction failures are *not*
/// errors; inspect the returned [`BatchStats`] and the records.
pub async fn extract_all<C>(
    engine: &mut WorkflowEngine,
    client: &C,
    sources: Vec<PageSource>,
    config: &ExtractionConfig,
    cancel: &CancelToken,
) -> Result<BatchStats, WorkflowError>
where
    C: ExtractionClient + ?Sized,
{
    let total_start = Instant::now();
    let total = sources.len();
    info!("Starting batch extraction of {total} pages");

    // ── Step 1: Validate keys before paying for anything ─────────────────
    let mut seen: HashSet<PageKey> = HashSet::new();
    for source in &sources {
        let key = PageKey::new(source.document_id.clone(), source.page_number);
        if engine.has_record(&key) || !seen.insert(key) {
            return Err(WorkflowError::DuplicateRecord {
                document_id: source.document_id.clone(),
                page: source.page_number,
            });
        }
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    // ── Step 2: Prepare all pages on the blocking pool ───────────────────
    let prepare_start = Instant::now();
    let max_bytes = config.max_image_bytes;
    let prepared: Vec<(String, u32, Result<Vec<u8>, ExtractionError>)> =
        tokio::task::spawn_blocking(move || {
            sources
                .into_iter()
                .map(|s| {
                    let jpeg = prepare::prepare_page(&s.image, max_bytes);
                    (s.document_id, s.page_number, jpeg)
                })
                .collect()
        })
        .await
        .map_err(|e| WorkflowError::Internal(format!("prepare task panicked: {e}")))?;
    let prepare_duration_ms = prepare_start.elapsed().as_millis() as u64;
    debug!("Prepared {} pages in {}ms", prepared.len(), prepare_duration_ms);

    // ── Step 3: Register records; unpreparable pages fail immediately ────
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut work: Vec<(PageKey, Vec<u8>)> = Vec::with_capacity(prepared.len());
    for (document_id, page_number, result) in prepared {
        match result {
            Ok(jpeg) => {
                // The record owns the compressed image; the extraction call
                // gets its own copy to send.
                let key = engine.begin_extraction(document_id, page_number, jpeg.clone())?;
                work.push((key, jpeg));
            }
            Err(e) => {
                let key = engine.begin_extraction(document_id, page_number, Vec::new())?;
                completed += 1;
                failed += 1;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_failed(&key, completed, total, &e.to_string());
                }
                engine.complete_extraction(&key, Err(e))?;
            }
        }
    }

    // ── Step 4: Extract concurrently, apply sequentially ─────────────────
    let extract_start = Instant::now();
    let mut succeeded = 0usize;
    {
        let mut results = stream::iter(work.into_iter().map(|(key, jpeg)| {
            let cancel = cancel.clone();
            async move {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_start(&key, total);
                }
                let result = if cancel.is_cancelled() {
                    Err(ExtractionError::Cancelled)
                } else {
                    client.extract(&key, &jpeg).await
                };
                (key, result)
            }
        }))
        .buffer_unordered(config.concurrency);

        while let Some((key, result)) = results.next().await {
            completed += 1;
            if let Some(ref cb) = config.progress_callback {
                match &result {
                    Ok(_) => cb.on_page_done(&key, completed, total),
                    Err(e) => cb.on_page_failed(&key, completed, total, &e.to_string()),
                }
            }
            match engine.complete_extraction(&key, result)? {
                Stage::Done => succeeded += 1,
                _ => failed += 1,
            }
        }
    }
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, succeeded);
    }

    let stats = BatchStats {
        total_pages: total,
        extracted_pages: succeeded,
        failed_pages: failed,
        prepare_duration_ms,
        extract_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Batch complete: {}/{} pages extracted, {}ms total",
        stats.extracted_pages, stats.total_pages, stats.total_duration_ms
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonStore;
    use crate::value::Value;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::json;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct StubClient;

    #[async_trait]
    impl ExtractionClient for StubClient {
        async fn extract(&self, key: &PageKey, _jpeg: &[u8]) -> Result<Value, ExtractionError> {
            if key.page_number % 2 == 1 {
                Ok(Value::from(
                    json!({"InvoiceDetails": {"Number": format!("INV-{:03}", key.page_number)}}),
                ))
            } else {
                Err(ExtractionError::Api {
                    retries: 0,
                    detail: "model timeout".into(),
                })
            }
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn engine() -> (TempDir, WorkflowEngine) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::open(dir.path().join("store.json")).unwrap();
        (dir, WorkflowEngine::new(store))
    }

    #[tokio::test]
    async fn batch_records_successes_and_failures() {
        let (_dir, mut engine) = engine();
        let sources = vec![
            PageSource::new("invoice.pdf", 1, png_bytes()),
            PageSource::new("invoice.pdf", 2, png_bytes()),
            PageSource::new("invoice.pdf", 3, png_bytes()),
        ];
        let config = ExtractionConfig::default();

        let stats = extract_all(
            &mut engine,
            &StubClient,
            sources,
            &config,
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats.total_pages, 3);
        assert_eq!(stats.extracted_pages, 2);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(engine.list_pending_review().len(), 2);

        let failed = engine.record(&PageKey::new("invoice.pdf", 2)).unwrap();
        assert_eq!(failed.stage(), Stage::Failed);
        assert!(failed.error().unwrap().to_string().contains("model timeout"));
    }

    #[tokio::test]
    async fn duplicate_sources_fail_before_any_extraction() {
        let (_dir, mut engine) = engine();
        let sources = vec![
            PageSource::new("invoice.pdf", 1, png_bytes()),
            PageSource::new("invoice.pdf", 1, png_bytes()),
        ];
        let err = extract_all(
            &mut engine,
            &StubClient,
            sources,
            &ExtractionConfig::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkflowError::DuplicateRecord { .. }));
        assert!(engine.records().is_empty());
    }

    #[tokio::test]
    async fn duplicate_against_an_earlier_batch_fails_and_keeps_prior_records() {
        let (_dir, mut engine) = engine();
        extract_all(
            &mut engine,
            &StubClient,
            vec![PageSource::new("invoice.pdf", 1, png_bytes())],
            &ExtractionConfig::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        let err = extract_all(
            &mut engine,
            &StubClient,
            vec![PageSource::new("invoice.pdf", 1, png_bytes())],
            &ExtractionConfig::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkflowError::DuplicateRecord { .. }));
        assert_eq!(engine.records().len(), 1);
        assert_eq!(
            engine.record(&PageKey::new("invoice.pdf", 1)).unwrap().stage(),
            Stage::Done
        );
    }

    #[tokio::test]
    async fn unpreparable_pages_fail_without_blocking_others() {
        let (_dir, mut engine) = engine();
        let sources = vec![
            PageSource::new("invoice.pdf", 1, png_bytes()),
            PageSource::new("invoice.pdf", 2, b"not an image".to_vec()),
        ];
        let stats = extract_all(
            &mut engine,
            &StubClient,
            sources,
            &ExtractionConfig::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats.extracted_pages, 1);
        assert_eq!(stats.failed_pages, 1);
        let record = engine.record(&PageKey::new("invoice.pdf", 2)).unwrap();
        assert!(matches!(
            record.error(),
            Some(ExtractionError::InvalidImage { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_batch_fails_pages_as_cancelled() {
        let (_dir, mut engine) = engine();
        let cancel = CancelToken::new();
        cancel.cancel();

        let stats = extract_all(
            &mut engine,
            &StubClient,
            vec![
                PageSource::new("invoice.pdf", 1, png_bytes()),
                PageSource::new("invoice.pdf", 3, png_bytes()),
            ],
            &ExtractionConfig::default(),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(stats.extracted_pages, 0);
        assert_eq!(stats.failed_pages, 2);
        for record in engine.records() {
            assert_eq!(record.stage(), Stage::Failed);
            assert!(matches!(record.error(), Some(ExtractionError::Cancelled)));
        }
    }
}
