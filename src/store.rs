//! The durable store for verified invoices.
//!
//! A single JSON file holds every invoice that procurement has verified but
//! finance has not yet approved. The persistence policy is deliberately
//! blunt: every mutation rewrites the whole file through a same-directory
//! temp file, fsyncs it, and atomically renames it into place. A crash
//! immediately after a successful call never loses or corrupts an
//! acknowledged entry, and a crash mid-write leaves the prior file intact.
//! Whole-file rewrite does not scale past a few hundred entries — fine for
//! a review queue, and an explicit non-goal to improve.
//!
//! Mutations and reads go through one exclusive in-process `Mutex`, so two
//! sessions sharing a store handle (a procurement reviewer and a finance
//! approver) never interleave a partial write. Two *processes* pointing at
//! the same file each get crash consistency from the atomic rename, but
//! last-writer-wins semantics; the single-file design assumes one process
//! owns the store at a time.

use crate::engine::PageKey;
use crate::error::WorkflowError;
use crate::flatten::FieldMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Durable, human-confirmed projection of a page record's fields.
///
/// Serialized field names (`file`, `page`) are the store file format and
/// must stay stable across versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedInvoice {
    #[serde(rename = "file")]
    pub document_id: String,
    #[serde(rename = "page")]
    pub page_number: u32,
    /// The human-edited flattened mapping; supersedes the raw extraction.
    pub fields: FieldMap,
}

impl VerifiedInvoice {
    pub fn key(&self) -> PageKey {
        PageKey::new(self.document_id.clone(), self.page_number)
    }
}

/// Upsert/delete/list key-value store backed by one JSON file.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    entries: Mutex<Vec<VerifiedInvoice>>,
}

impl JsonStore {
    /// Open a store, loading existing entries if the file is present.
    ///
    /// A missing file is an empty store; it is created on the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WorkflowError> {
        let path = path.into();
        let entries: Vec<VerifiedInvoice> = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| WorkflowError::StoreRead {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_slice(&bytes).map_err(|e| WorkflowError::StoreFormat {
                path: path.clone(),
                source: e,
            })?
        } else {
            Vec::new()
        };
        info!(
            "Opened store '{}' with {} entries",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &PageKey) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.key() == *key)
    }

    /// Insert or overwrite by key. The write is durable before this returns.
    ///
    /// An overwritten key keeps its original position in the listing order.
    pub fn upsert(&self, invoice: VerifiedInvoice) -> Result<(), WorkflowError> {
        let mut entries = self.entries.lock().unwrap();
        // Mutate a copy and only commit it to memory after the flush
        // succeeded, so a failed write leaves both disk and memory in the
        // prior consistent state.
        let mut next = entries.clone();
        let key = invoice.key();
        match next.iter_mut().find(|e| e.key() == key) {
            Some(slot) => *slot = invoice,
            None => next.push(invoice),
        }
        self.persist(&next)?;
        debug!("Upserted {key}; store now holds {} entries", next.len());
        *entries = next;
        Ok(())
    }

    /// Remove by key, returning the prior value, or `Ok(None)` when absent.
    ///
    /// Absence performs no write at all — the file is left untouched.
    pub fn delete(&self, key: &PageKey) -> Result<Option<VerifiedInvoice>, WorkflowError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(pos) = entries.iter().position(|e| e.key() == *key) else {
            return Ok(None);
        };
        let mut next = entries.clone();
        let removed = next.remove(pos);
        self.persist(&next)?;
        debug!("Deleted {key}; store now holds {} entries", next.len());
        *entries = next;
        Ok(Some(removed))
    }

    /// Every entry, in insertion order.
    pub fn list_all(&self) -> Vec<VerifiedInvoice> {
        self.entries.lock().unwrap().clone()
    }

    /// Rewrite the whole store: temp file in the target directory, fsync,
    /// atomic rename. Readers of the old file keep a consistent view; a
    /// crash at any point leaves either the old or the new complete file.
    fn persist(&self, entries: &[VerifiedInvoice]) -> Result<(), WorkflowError> {
        let json = serde_json::to_string_pretty(entries).map_err(|e| {
            WorkflowError::StoreFormat {
                path: self.path.clone(),
                source: e,
            }
        })?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let write_err = |e: std::io::Error| WorkflowError::StoreWrite {
            path: self.path.clone(),
            source: e,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}
