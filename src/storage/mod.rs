//! Deduplicated, immutable-once-written document persistence.
//!
//! The blob store is a seam: production talks to GCS over its JSON API, the
//! test suite uses the in-memory store. `DedupStore` owns the naming and
//! existence-check discipline; it never overwrites and never aborts the run —
//! upload failures come back as a `Failed` outcome for the controller to log.

pub mod gcs;

use crate::core::types::{ExtractedRecord, RunState, StorageKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{error, info};

/// Storage-client failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage auth failed: {0}")]
    Auth(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for object '{object}'")]
    UnexpectedStatus { status: u16, object: String },
}

/// Minimal object-store surface the pipeline needs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, StoreError>;
    async fn put(&self, name: &str, content: &str) -> Result<(), StoreError>;
}

/// Result of one persistence attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved,
    AlreadyExists,
    Failed(String),
}

/// Create-if-absent writer with run-scoped sequence disambiguation.
pub struct DedupStore<S: BlobStore> {
    store: S,
    folder: String,
}

impl<S: BlobStore> DedupStore<S> {
    pub fn new(store: S, folder: impl Into<String>) -> Self {
        Self {
            store,
            folder: folder.into(),
        }
    }

    /// Access the underlying blob store.
    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Persist one extracted record.
    ///
    /// The sequence counter is advanced *before* the existence check, so a
    /// repeated (identifier, type) pair within this run gets a fresh blob
    /// name even when the earlier attempt failed or content differs.
    pub async fn persist(&self, state: &mut RunState, record: &ExtractedRecord) -> PersistOutcome {
        let sequence = state.next_sequence(&record.identifier, &record.document_type);
        let key = StorageKey {
            folder: self.folder.clone(),
            identifier: record.identifier.clone(),
            document_type: record.document_type.clone(),
            sequence,
        };
        let name = key.blob_name();

        match self.store.exists(&name).await {
            Ok(true) => PersistOutcome::AlreadyExists,
            Ok(false) => match self.store.put(&name, &record.raw_html).await {
                Ok(()) => {
                    info!("☁ Uploaded {}", name);
                    PersistOutcome::Saved
                }
                Err(e) => {
                    error!("❌ Upload failed for {}: {}", name, e);
                    PersistOutcome::Failed(e.to_string())
                }
            },
            Err(e) => {
                error!("❌ Existence check failed for {}: {}", name, e);
                PersistOutcome::Failed(e.to_string())
            }
        }
    }
}

/// In-memory blob store, used by the test suite.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.blobs.lock().ok()?.get(name).cloned()
    }

    pub fn insert(&self, name: &str, content: &str) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(name.to_string(), content.to_string());
        }
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .blobs
            .lock()
            .map(|b| b.contains_key(name))
            .unwrap_or(false))
    }

    async fn put(&self, name: &str, content: &str) -> Result<(), StoreError> {
        self.insert(name, content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identifier: &str, document_type: &str, html: &str) -> ExtractedRecord {
        ExtractedRecord {
            identifier: identifier.to_string(),
            document_type: document_type.to_string(),
            raw_html: html.to_string(),
        }
    }

    #[tokio::test]
    async fn test_repeated_pair_gets_distinct_blob_names() {
        let store = DedupStore::new(MemoryStore::new(), "forms");
        let mut state = RunState::new();
        let rec = record("24-0291-00-1459876-1-1", "FORM100", "<p>a</p>");

        assert_eq!(store.persist(&mut state, &rec).await, PersistOutcome::Saved);
        assert_eq!(store.persist(&mut state, &rec).await, PersistOutcome::Saved);

        assert_eq!(store.store.len(), 2);
        assert!(store
            .store
            .get("forms/24-0291-00-1459876-1-1_FORM100_1.html")
            .is_some());
        assert!(store
            .store
            .get("forms/24-0291-00-1459876-1-1_FORM100_2.html")
            .is_some());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_and_never_overwrites() {
        let memory = MemoryStore::new();
        memory.insert("forms/X-1-2-3-4-567890123_FORM100_1.html", "<p>original</p>");
        let store = DedupStore::new(memory, "forms");

        // A fresh RunState models a restarted run over the same window.
        let mut state = RunState::new();
        let rec = record("X-1-2-3-4-567890123", "FORM100", "<p>different content</p>");

        assert_eq!(
            store.persist(&mut state, &rec).await,
            PersistOutcome::AlreadyExists
        );
        assert_eq!(
            store.store.get("forms/X-1-2-3-4-567890123_FORM100_1.html"),
            Some("<p>original</p>".to_string())
        );
        assert_eq!(store.store.len(), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl BlobStore for FailingStore {
        async fn exists(&self, _name: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn put(&self, name: &str, _content: &str) -> Result<(), StoreError> {
            Err(StoreError::UnexpectedStatus {
                status: 503,
                object: name.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported_not_raised() {
        let store = DedupStore::new(FailingStore, "forms");
        let mut state = RunState::new();
        let rec = record("24-0291-00-1459876-1-1", "FORM100", "<p>a</p>");

        match store.persist(&mut state, &rec).await {
            PersistOutcome::Failed(reason) => assert!(reason.contains("503")),
            other => panic!("expected Failed, got {:?}", other),
        }
        // The failed attempt still consumed a sequence number.
        assert_eq!(state.next_sequence("24-0291-00-1459876-1-1", "FORM100"), 2);
    }
}
