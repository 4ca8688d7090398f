//! # invoiceflow
//!
//! Human-in-the-loop invoice extraction: Vision Language Model field
//! extraction with a two-stage review workflow.
//!
//! ## Why this crate?
//!
//! Classic OCR turns a scanned invoice into a wall of text; what finance
//! teams actually need is *fields* — invoice number, vendor, line items,
//! totals — with a human sign-off before anything is booked. This crate
//! sends rasterised page images to a VLM that reads each page as a human would,
//! flattens the returned record into editable `(path, value)` fields, and
//! routes every page through procurement verification and finance approval
//! before the data leaves the system.
//!
//! ## Workflow Overview
//!
//! ```text
//! page image
//!  │
//!  ├─ 1. Prepare   JPEG-compress under the API size ceiling
//!  ├─ 2. Extract   concurrent VLM calls → six-section record
//!  │                           │
//!  │        Extracting ──▶ Done │ Failed
//!  ├─ 3. Review    procurement edits fields, verifies  ──▶ Verified
//!  │               (written through the durable store)
//!  └─ 4. Approve   finance accepts ──▶ Approved (removed from store)
//! ```
//!
//! Extraction state lives in a per-run [`WorkflowEngine`]; only verified
//! invoices survive restarts, in a single JSON [`JsonStore`] file rewritten
//! atomically on every change.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoiceflow::{
//!     extract_all, CancelToken, ExtractionConfig, JsonStore, PageSource,
//!     VisionExtractionClient, WorkflowEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let cancel = CancelToken::new();
//!     let client = VisionExtractionClient::from_config(&config, cancel.clone())?;
//!
//!     let store = JsonStore::open("verified_invoices.json")?;
//!     let mut engine = WorkflowEngine::new(store);
//!
//!     let pages = vec![PageSource::new("invoice.pdf", 1, std::fs::read("page1.png")?)];
//!     let stats = extract_all(&mut engine, &client, pages, &config, &cancel).await?;
//!     eprintln!("extracted {}/{} pages", stats.extracted_pages, stats.total_pages);
//!
//!     for record in engine.list_pending_review() {
//!         println!("{}: {} fields", record.key(), record.fields().len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoiceflow` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! invoiceflow = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod flatten;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;
pub mod value;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{extract_all, BatchStats, CancelToken, PageSource};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use engine::{PageKey, PageRecord, Stage, WorkflowEngine};
pub use error::{ExtractionError, WorkflowError};
pub use export::{fields_csv, invoices_csv, pages_csv};
pub use flatten::{flatten, FieldMap, PATH_SEPARATOR};
pub use pipeline::client::{ExtractionClient, VisionExtractionClient};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{JsonStore, VerifiedInvoice};
pub use value::Value;
