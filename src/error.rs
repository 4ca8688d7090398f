//! Error types for the invoiceflow library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`WorkflowError`] — **Fatal for the failing operation**: the engine or
//!   store call cannot proceed (duplicate upload, out-of-order transition,
//!   unwritable store file). Returned as `Err(WorkflowError)` from engine,
//!   store, and batch entry points. A `WorkflowError` aborts that one
//!   operation; it never invalidates other records or store entries.
//!
//! * [`ExtractionError`] — **Non-fatal**: a single page failed (bad image
//!   bytes, transient API error, unparsable model reply) but all other pages
//!   are fine. Stored inside [`crate::engine::PageRecord`] so callers can
//!   inspect partial success rather than losing the whole batch to one bad
//!   page.
//!
//! The separation lets callers decide their own tolerance: surface the page
//! failure inline next to that page's status, or collect all failures for a
//! post-run report, while engine bugs (e.g. completing extraction twice)
//! fail loudly.

use crate::engine::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by engine, store, and batch operations.
///
/// Page-level failures use [`ExtractionError`] and are stored in
/// [`crate::engine::PageRecord`] rather than propagated here.
#[derive(Debug, Error)]
pub enum WorkflowError {
    // ── Engine errors ─────────────────────────────────────────────────────
    /// Two uploads claimed the same (document, page) pair in one run.
    #[error("duplicate record: '{document_id}' page {page} was already uploaded in this run")]
    DuplicateRecord { document_id: String, page: u32 },

    /// A stage transition was attempted out of order — a caller bug.
    #[error("cannot {attempted} '{document_id}' page {page}: record is in stage {stage}")]
    InvalidTransition {
        document_id: String,
        page: u32,
        stage: Stage,
        attempted: &'static str,
    },

    /// Verification attempted on a key already present in the durable store.
    ///
    /// Recoverable: treat as already-done and refresh the pending-review list.
    #[error("'{document_id}' page {page} is already verified")]
    AlreadyVerified { document_id: String, page: u32 },

    /// The requested record or store entry does not exist.
    ///
    /// Recoverable: refresh the pending list and retry with a current key.
    #[error("no entry for '{document_id}' page {page}")]
    NotFound { document_id: String, page: u32 },

    // ── Store errors ──────────────────────────────────────────────────────
    /// The store file exists but could not be read.
    #[error("failed to read store file '{path}': {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store file could not be written or atomically replaced.
    ///
    /// The prior on-disk contents are left intact.
    #[error("failed to write store file '{path}': {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store file does not contain a valid invoice collection.
    #[error("store file '{path}' is corrupt: {source}")]
    StoreFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured extraction provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Recorded verbatim on the [`crate::engine::PageRecord`] when extraction
/// fails; the batch continues to the next page. The record carrying one of
/// these is terminal (`Stage::Failed`) and excluded from all review queues.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionError {
    /// The page image bytes could not be decoded or re-encoded.
    #[error("page image could not be prepared: {detail}")]
    InvalidImage { detail: String },

    /// The model call failed after all retries.
    #[error("extraction failed after {retries} retries: {detail}")]
    Api { retries: u8, detail: String },

    /// The model call exceeded the per-call timeout on every attempt.
    #[error("extraction timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The model replied, but the reply contained no parsable record.
    #[error("model reply contained no parsable record: {detail}")]
    Unparsable { detail: String },

    /// The batch was cancelled before this page completed.
    #[error("extraction cancelled before completion")]
    Cancelled,
}
