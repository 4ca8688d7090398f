//! End-to-end workflow tests: upload → extraction → procurement review →
//! finance approval, driven through the public API with a stub extraction
//! client. No network and no API keys needed — the model boundary is the
//! [`ExtractionClient`] trait, and the stub answers exactly like the review
//! scenarios require.

use async_trait::async_trait;
use invoiceflow::{
    extract_all, invoices_csv, CancelToken, ExtractionClient, ExtractionConfig, ExtractionError,
    FieldMap, JsonStore, PageKey, PageSource, Stage, Value, WorkflowEngine, WorkflowError,
};
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Page 1 of any document extracts a record; every other page fails with a
/// verbatim "model timeout" error.
struct ScenarioClient;

#[async_trait]
impl ExtractionClient for ScenarioClient {
    async fn extract(&self, key: &PageKey, _jpeg: &[u8]) -> Result<Value, ExtractionError> {
        if key.page_number == 1 {
            Ok(Value::from(json!({"InvoiceDetails": {"Number": "INV-001"}})))
        } else {
            Err(ExtractionError::Api {
                retries: 0,
                detail: "model timeout".into(),
            })
        }
    }
}

fn png_bytes() -> Vec<u8> {
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("encode png");
    buf
}

fn open_engine(store_path: &Path) -> WorkflowEngine {
    WorkflowEngine::new(JsonStore::open(store_path).expect("open store"))
}

/// Run the two-page scenario: page 1 extracts, page 2 fails.
async fn extract_two_pages(engine: &mut WorkflowEngine) {
    let sources = vec![
        PageSource::new("invoice.pdf", 1, png_bytes()),
        PageSource::new("invoice.pdf", 2, png_bytes()),
    ];
    extract_all(
        engine,
        &ScenarioClient,
        sources,
        &ExtractionConfig::default(),
        &CancelToken::new(),
    )
    .await
    .expect("batch should not fail");
}

// ── Extraction scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn failed_page_is_excluded_from_review_and_keeps_its_error() {
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(&dir.path().join("store.json"));
    extract_two_pages(&mut engine).await;

    // Only page 1 awaits procurement review.
    let pending = engine.list_pending_review();
    assert_eq!(pending.len(), 1);
    assert_eq!(*pending[0].key(), PageKey::new("invoice.pdf", 1));

    // The flattened fields use the " > " separator.
    let fields: Vec<(&str, &str)> = pending[0].fields().iter().collect();
    assert_eq!(fields, vec![("InvoiceDetails > Number", "INV-001")]);

    // Page 2 is Failed with the error text preserved verbatim.
    let failed = engine.record(&PageKey::new("invoice.pdf", 2)).unwrap();
    assert_eq!(failed.stage(), Stage::Failed);
    match failed.error().unwrap() {
        ExtractionError::Api { detail, .. } => assert_eq!(detail, "model timeout"),
        other => panic!("unexpected error kind: {other:?}"),
    }
}

// ── Review scenarios ─────────────────────────────────────────────────────────

#[tokio::test]
async fn verify_persists_edits_and_rejects_a_second_verification() {
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(&dir.path().join("store.json"));
    extract_two_pages(&mut engine).await;

    let key = PageKey::new("invoice.pdf", 1);
    let mut edited = FieldMap::new();
    edited.insert("InvoiceDetails > Number", "INV-001-A");
    engine.verify(&key, edited).expect("first verify");

    // Re-verifying the same key is rejected, not duplicated.
    let err = engine.verify(&key, FieldMap::new()).unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyVerified { .. }));

    // The approval queue shows the edited value, not the raw extraction.
    let approvals = engine.list_pending_approval();
    assert_eq!(approvals.len(), 1);
    assert_eq!(
        approvals[0].fields.get("InvoiceDetails > Number"),
        Some("INV-001-A")
    );
}

#[tokio::test]
async fn a_page_verified_in_an_earlier_run_never_reenters_review() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("store.json");

    // Run 1: extract and verify page 1.
    {
        let mut engine = open_engine(&store_path);
        extract_two_pages(&mut engine).await;
        engine
            .verify(&PageKey::new("invoice.pdf", 1), FieldMap::new())
            .unwrap();
    }

    // Run 2: the same document is re-extracted after a restart. The page is
    // Done in-run, but the durable store already holds it, so the
    // procurement queue stays empty and a retried verify is rejected.
    let mut engine = open_engine(&store_path);
    extract_two_pages(&mut engine).await;

    assert!(engine.list_pending_review().is_empty());
    let err = engine
        .verify(&PageKey::new("invoice.pdf", 1), FieldMap::new())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyVerified { .. }));
}

// ── Approval scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn approving_an_absent_key_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(&dir.path().join("store.json"));
    extract_two_pages(&mut engine).await;
    engine
        .verify(&PageKey::new("invoice.pdf", 1), FieldMap::new())
        .unwrap();

    let before = engine.list_pending_approval().len();
    let err = engine.approve(&PageKey::new("other.pdf", 5)).unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
    assert_eq!(engine.list_pending_approval().len(), before);
}

#[tokio::test]
async fn full_lifecycle_ends_with_an_empty_store() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("store.json");
    let mut engine = open_engine(&store_path);
    extract_two_pages(&mut engine).await;

    let key = PageKey::new("invoice.pdf", 1);
    let mut edited = FieldMap::new();
    edited.insert("InvoiceDetails > Number", "INV-001-A");
    engine.verify(&key, edited).unwrap();

    let removed = engine.approve(&key).unwrap();
    assert_eq!(
        removed.fields.get("InvoiceDetails > Number"),
        Some("INV-001-A")
    );
    assert_eq!(engine.record(&key).unwrap().stage(), Stage::Approved);
    assert!(engine.list_pending_approval().is_empty());

    // Approval is destructive: a reopened store holds nothing.
    let reopened = JsonStore::open(&store_path).unwrap();
    assert!(reopened.is_empty());
}

// ── Persistence & export ─────────────────────────────────────────────────────

#[tokio::test]
async fn verified_invoices_survive_a_restart_with_their_edits() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("store.json");

    {
        let mut engine = open_engine(&store_path);
        extract_two_pages(&mut engine).await;
        let mut edited = FieldMap::new();
        edited.insert("InvoiceDetails > Number", "INV-001-A");
        engine
            .verify(&PageKey::new("invoice.pdf", 1), edited)
            .unwrap();
    }

    // Fresh session, no in-run records: the finance queue is rebuilt purely
    // from the durable store.
    let engine = open_engine(&store_path);
    let approvals = engine.list_pending_approval();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].document_id, "invoice.pdf");
    assert_eq!(
        approvals[0].fields.get("InvoiceDetails > Number"),
        Some("INV-001-A")
    );
}

#[tokio::test]
async fn approval_queue_exports_the_edited_values() {
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(&dir.path().join("store.json"));
    extract_two_pages(&mut engine).await;

    let mut edited = FieldMap::new();
    edited.insert("InvoiceDetails > Number", "INV-001-A");
    engine
        .verify(&PageKey::new("invoice.pdf", 1), edited)
        .unwrap();

    let csv = invoices_csv(&engine.list_pending_approval());
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "File,Page,Field,Value");
    assert_eq!(lines[1], "invoice.pdf,1,InvoiceDetails > Number,INV-001-A");
}
