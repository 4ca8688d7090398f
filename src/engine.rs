//! The extraction-and-review workflow state machine.
//!
//! One [`PageRecord`] exists per (document, page) within a run and moves
//! monotonically through
//!
//! ```text
//! Extracting ──▶ Done ──▶ Verified ──▶ Approved (deleted from store)
//!      └───────▶ Failed (terminal, excluded from review)
//! ```
//!
//! [`WorkflowEngine`] owns the records and the durable store handle and is
//! the only mutator of either. Stage transitions are single-writer per
//! record within a run, so the engine itself needs no locking; the store
//! applies its own write discipline. The one subtlety is `verify`: the
//! already-verified check runs against *durable* state, not in-run state,
//! which is what makes the call safe to retry after a crash between the
//! store append and the acknowledgement.
//!
//! Records are scoped to a single engine instance (one session/run) and are
//! never persisted; only verified invoices survive a restart, via
//! [`crate::store::JsonStore`].

use crate::error::{ExtractionError, WorkflowError};
use crate::flatten::{flatten, FieldMap};
use crate::store::{JsonStore, VerifiedInvoice};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Position of a [`PageRecord`] in its lifecycle.
///
/// Transitions only ever move forward; the derived ordering follows the
/// lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    /// Initial state, set at record creation before the model is invoked.
    Extracting,
    /// The model returned a structured record; fields are populated.
    Done,
    /// The model call failed; the error is recorded and the record is
    /// terminal for this run.
    Failed,
    /// A human reviewed the fields; a [`VerifiedInvoice`] is in the store.
    Verified,
    /// A human approved the verified invoice; it was removed from the store.
    Approved,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extracting => "Extracting",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
            Stage::Verified => "Verified",
            Stage::Approved => "Approved",
        };
        f.write_str(name)
    }
}

/// Identity of one invoice page: source document plus 1-based page number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub document_id: String,
    pub page_number: u32,
}

impl PageKey {
    pub fn new(document_id: impl Into<String>, page_number: u32) -> Self {
        Self {
            document_id: document_id.into(),
            page_number,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' page {}", self.document_id, self.page_number)
    }
}

/// In-run representation of one invoice page from upload through review.
#[derive(Debug, Serialize)]
pub struct PageRecord {
    key: PageKey,
    stage: Stage,
    /// Compressed JPEG raster of the page; held for display next to the
    /// field editor until review completes. Not serialized.
    #[serde(skip)]
    image: Vec<u8>,
    fields: FieldMap,
    raw: Option<Value>,
    error: Option<ExtractionError>,
}

impl PageRecord {
    pub fn key(&self) -> &PageKey {
        &self.key
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The compressed page image this record owns.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Flattened fields; empty until the record reaches [`Stage::Done`].
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// The nested extraction result, retained until review completes.
    pub fn raw(&self) -> Option<&Value> {
        self.raw.as_ref()
    }

    /// The extraction failure, present only when the stage is [`Stage::Failed`].
    pub fn error(&self) -> Option<&ExtractionError> {
        self.error.as_ref()
    }
}

/// Owns every [`PageRecord`] of one extraction run plus the durable store.
///
/// Constructed per session and passed explicitly to callers; there is no
/// process-wide singleton.
pub struct WorkflowEngine {
    records: Vec<PageRecord>,
    store: JsonStore,
}

impl WorkflowEngine {
    pub fn new(store: JsonStore) -> Self {
        Self {
            records: Vec::new(),
            store,
        }
    }

    /// All records of this run, in upload order.
    pub fn records(&self) -> &[PageRecord] {
        &self.records
    }

    pub fn record(&self, key: &PageKey) -> Option<&PageRecord> {
        self.records.iter().find(|r| r.key == *key)
    }

    pub fn has_record(&self, key: &PageKey) -> bool {
        self.record(key).is_some()
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    /// Register a page at upload time, taking ownership of its compressed
    /// image. The record starts in [`Stage::Extracting`].
    ///
    /// # Errors
    /// [`WorkflowError::DuplicateRecord`] if the (document, page) pair
    /// already exists in this run.
    pub fn begin_extraction(
        &mut self,
        document_id: impl Into<String>,
        page_number: u32,
        image: Vec<u8>,
    ) -> Result<PageKey, WorkflowError> {
        let key = PageKey::new(document_id, page_number);
        if self.has_record(&key) {
            return Err(WorkflowError::DuplicateRecord {
                document_id: key.document_id,
                page: key.page_number,
            });
        }
        debug!("Begin extraction for {key}");
        self.records.push(PageRecord {
            key: key.clone(),
            stage: Stage::Extracting,
            image,
            fields: FieldMap::new(),
            raw: None,
            error: None,
        });
        Ok(key)
    }

    /// Apply the model's result, moving the record to [`Stage::Done`] or
    /// [`Stage::Failed`]. Must be called exactly once per record.
    ///
    /// # Errors
    /// [`WorkflowError::NotFound`] for an unknown key;
    /// [`WorkflowError::InvalidTransition`] if the record already left
    /// `Extracting` (calling this twice is a caller bug and surfaces loudly).
    pub fn complete_extraction(
        &mut self,
        key: &PageKey,
        result: Result<Value, ExtractionError>,
    ) -> Result<Stage, WorkflowError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.key == *key)
            .ok_or_else(|| WorkflowError::NotFound {
                document_id: key.document_id.clone(),
                page: key.page_number,
            })?;

        if record.stage != Stage::Extracting {
            return Err(WorkflowError::InvalidTransition {
                document_id: key.document_id.clone(),
                page: key.page_number,
                stage: record.stage,
                attempted: "complete extraction for",
            });
        }

        match result {
            Ok(raw) => {
                record.fields = flatten(&raw);
                record.raw = Some(raw);
                record.stage = Stage::Done;
                debug!("Extraction done for {key}: {} fields", record.fields.len());
            }
            Err(e) => {
                warn!("Extraction failed for {key}: {e}");
                record.error = Some(e);
                record.stage = Stage::Failed;
            }
        }
        Ok(record.stage)
    }

    /// The procurement queue: `Done` records whose key is not already in the
    /// durable store, in upload order.
    pub fn list_pending_review(&self) -> Vec<&PageRecord> {
        self.records
            .iter()
            .filter(|r| r.stage == Stage::Done && !self.store.contains(&r.key))
            .collect()
    }

    /// Persist a human-reviewed invoice and mark the record verified.
    ///
    /// `edited_fields` supersedes the raw extraction; the engine stores it
    /// as given. The store upsert completes before the in-run record is
    /// touched, so a crash between the two leaves a retry-safe state: the
    /// next `verify` for the same key fails `AlreadyVerified` and the page
    /// drops out of the pending-review queue.
    ///
    /// # Errors
    /// [`WorkflowError::AlreadyVerified`] if the key is already in the store
    /// (or the record already verified this run);
    /// [`WorkflowError::NotFound`] for an unknown key;
    /// [`WorkflowError::InvalidTransition`] for `Extracting`/`Failed`
    /// records.
    pub fn verify(
        &mut self,
        key: &PageKey,
        edited_fields: FieldMap,
    ) -> Result<VerifiedInvoice, WorkflowError> {
        if self.store.contains(key) {
            return Err(WorkflowError::AlreadyVerified {
                document_id: key.document_id.clone(),
                page: key.page_number,
            });
        }

        let record = self
            .records
            .iter_mut()
            .find(|r| r.key == *key)
            .ok_or_else(|| WorkflowError::NotFound {
                document_id: key.document_id.clone(),
                page: key.page_number,
            })?;

        match record.stage {
            Stage::Done => {}
            Stage::Verified | Stage::Approved => {
                return Err(WorkflowError::AlreadyVerified {
                    document_id: key.document_id.clone(),
                    page: key.page_number,
                });
            }
            stage => {
                return Err(WorkflowError::InvalidTransition {
                    document_id: key.document_id.clone(),
                    page: key.page_number,
                    stage,
                    attempted: "verify",
                });
            }
        }

        let invoice = VerifiedInvoice {
            document_id: key.document_id.clone(),
            page_number: key.page_number,
            fields: edited_fields,
        };
        self.store.upsert(invoice.clone())?;
        record.stage = Stage::Verified;
        info!("Verified {key}; forwarded to approval queue");
        Ok(invoice)
    }

    /// The finance queue: every verified invoice in the store, store order.
    pub fn list_pending_approval(&self) -> Vec<VerifiedInvoice> {
        self.store.list_all()
    }

    /// Approve a verified invoice: remove it from the store and return the
    /// removed value for the caller to display or archive. The only delete
    /// path; no approved copy is retained by this system.
    ///
    /// # Errors
    /// [`WorkflowError::NotFound`] if the key is absent from the store (the
    /// store is left untouched).
    pub fn approve(&mut self, key: &PageKey) -> Result<VerifiedInvoice, WorkflowError> {
        let removed = self
            .store
            .delete(key)?
            .ok_or_else(|| WorkflowError::NotFound {
                document_id: key.document_id.clone(),
                page: key.page_number,
            })?;

        // The record may not exist this run: the invoice could have been
        // verified in an earlier session and only approved now.
        if let Some(record) = self.records.iter_mut().find(|r| r.key == *key) {
            if record.stage == Stage::Verified {
                record.stage = Stage::Approved;
            }
        }
        info!("Approved {key}; removed from store");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn engine() -> (TempDir, WorkflowEngine) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::open(dir.path().join("verified_invoices.json")).unwrap();
        (dir, WorkflowEngine::new(store))
    }

    fn record_value() -> Value {
        Value::from(json!({"InvoiceDetails": {"Number": "INV-001"}}))
    }

    #[test]
    fn begin_extraction_rejects_duplicates() {
        let (_dir, mut engine) = engine();
        engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
        let err = engine
            .begin_extraction("invoice.pdf", 1, vec![])
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateRecord { .. }));
        // Same document, different page is fine.
        engine.begin_extraction("invoice.pdf", 2, vec![]).unwrap();
    }

    #[test]
    fn complete_extraction_twice_is_an_invalid_transition() {
        let (_dir, mut engine) = engine();
        let key = engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
        engine
            .complete_extraction(&key, Ok(record_value()))
            .unwrap();
        let err = engine
            .complete_extraction(&key, Ok(record_value()))
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                stage: Stage::Done,
                ..
            }
        ));
    }

    #[test]
    fn failed_records_keep_the_error_and_leave_review_queue_empty() {
        let (_dir, mut engine) = engine();
        let key = engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
        let stage = engine
            .complete_extraction(
                &key,
                Err(ExtractionError::Api {
                    retries: 3,
                    detail: "model timeout".into(),
                }),
            )
            .unwrap();
        assert_eq!(stage, Stage::Failed);
        assert!(engine.list_pending_review().is_empty());

        let record = engine.record(&key).unwrap();
        assert!(record.error().unwrap().to_string().contains("model timeout"));
        assert!(record.raw().is_none());
    }

    #[test]
    fn verify_requires_a_done_record() {
        let (_dir, mut engine) = engine();
        let key = engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
        // Still extracting.
        let err = engine.verify(&key, FieldMap::new()).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(engine.record(&key).unwrap().stage(), Stage::Extracting);

        // Failed records cannot be verified either.
        engine
            .complete_extraction(&key, Err(ExtractionError::Cancelled))
            .unwrap();
        let err = engine.verify(&key, FieldMap::new()).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                stage: Stage::Failed,
                ..
            }
        ));
    }

    #[test]
    fn verify_is_idempotent_at_the_store_boundary() {
        let (_dir, mut engine) = engine();
        let key = engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
        engine
            .complete_extraction(&key, Ok(record_value()))
            .unwrap();

        let mut edited = FieldMap::new();
        edited.insert("InvoiceDetails > Number", "INV-001-A");
        engine.verify(&key, edited).unwrap();

        let err = engine.verify(&key, FieldMap::new()).unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyVerified { .. }));
        // State unchanged: still exactly one store entry with the edit.
        let pending = engine.list_pending_approval();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].fields.get("InvoiceDetails > Number"),
            Some("INV-001-A")
        );
    }

    #[test]
    fn verified_pages_drop_out_of_pending_review() {
        let (_dir, mut engine) = engine();
        let key = engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
        engine
            .complete_extraction(&key, Ok(record_value()))
            .unwrap();
        assert_eq!(engine.list_pending_review().len(), 1);

        engine.verify(&key, FieldMap::new()).unwrap();
        assert!(engine.list_pending_review().is_empty());
    }

    #[test]
    fn approve_removes_the_entry_and_returns_it() {
        let (_dir, mut engine) = engine();
        let key = engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
        engine
            .complete_extraction(&key, Ok(record_value()))
            .unwrap();
        let mut edited = FieldMap::new();
        edited.insert("InvoiceDetails > Number", "INV-001");
        engine.verify(&key, edited).unwrap();

        let removed = engine.approve(&key).unwrap();
        assert_eq!(removed.document_id, "invoice.pdf");
        assert!(engine.list_pending_approval().is_empty());
        assert_eq!(engine.record(&key).unwrap().stage(), Stage::Approved);
    }

    #[test]
    fn approve_of_absent_key_is_not_found_and_changes_nothing() {
        let (_dir, mut engine) = engine();
        let key = engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
        engine
            .complete_extraction(&key, Ok(record_value()))
            .unwrap();
        engine.verify(&key, FieldMap::new()).unwrap();

        let missing = PageKey::new("other.pdf", 7);
        let err = engine.approve(&missing).unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
        assert_eq!(engine.list_pending_approval().len(), 1);
    }

    #[test]
    fn approval_works_for_invoices_verified_in_an_earlier_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("verified_invoices.json");

        // First session: extract and verify.
        {
            let store = JsonStore::open(&path).unwrap();
            let mut engine = WorkflowEngine::new(store);
            let key = engine.begin_extraction("invoice.pdf", 1, vec![]).unwrap();
            engine
                .complete_extraction(&key, Ok(record_value()))
                .unwrap();
            engine.verify(&key, FieldMap::new()).unwrap();
        }

        // Second session: no in-run records, approval still works.
        let store = JsonStore::open(&path).unwrap();
        let mut engine = WorkflowEngine::new(store);
        assert!(engine.records().is_empty());
        let removed = engine.approve(&PageKey::new("invoice.pdf", 1)).unwrap();
        assert_eq!(removed.page_number, 1);
    }
}
