//! Core data model for one harvest run.
//!
//! Everything here is plain data: the captured payload, the extracted record,
//! the blob-naming key, and the run-scoped counters. The only mutable state
//! in the whole pipeline is [`RunState`], owned by the crawl controller and
//! handed explicitly to the dedup store — there are no ambient globals.

use std::collections::HashMap;

/// The raw HTML payload recovered from one intercepted response.
///
/// The portal answers the form click with a JSON envelope of the shape
/// `{"data": "<html>..."}`. A missing or non-string `data` field yields an
/// empty document, which the controller treats as a no-op extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedDocument {
    pub raw_html: String,
}

impl CapturedDocument {
    /// Decode the JSON envelope of the captured endpoint.
    pub fn from_envelope(body: &str) -> Self {
        let raw_html = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("data")
                    .and_then(|d| d.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_default();
        Self { raw_html }
    }

    pub fn is_empty(&self) -> bool {
        self.raw_html.is_empty()
    }
}

/// A fully derived document, ready for persistence.
///
/// Invariants (upheld by the extractor): `identifier` is never empty and
/// contains no `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRecord {
    pub identifier: String,
    pub document_type: String,
    pub raw_html: String,
}

/// The unique blob name components for one persisted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKey {
    pub folder: String,
    pub identifier: String,
    pub document_type: String,
    pub sequence: u32,
}

impl StorageKey {
    /// Full object name: `{folder}/{identifier}_{documentType}_{sequence}.html`.
    pub fn blob_name(&self) -> String {
        format!(
            "{}/{}_{}_{}.html",
            self.folder, self.identifier, self.document_type, self.sequence
        )
    }
}

/// Process-wide counters for one run.
///
/// `form_counter` disambiguates repeated (identifier, type) pairs within the
/// run; it is *not* persisted, so a re-run of the same window relies solely on
/// the storage existence check for idempotence.
#[derive(Debug, Default)]
pub struct RunState {
    form_counter: HashMap<(String, String), u32>,
    pub saved_files: u32,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number for this (identifier, type) pair.
    ///
    /// Incremented *before* the storage existence check so repeated pairs
    /// within one run never collide on the blob name.
    pub fn next_sequence(&mut self, identifier: &str, document_type: &str) -> u32 {
        let counter = self
            .form_counter
            .entry((identifier.to_string(), document_type.to_string()))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn record_saved(&mut self) {
        self.saved_files += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_decoding() {
        let doc = CapturedDocument::from_envelope(r#"{"data": "<table><td>x</td></table>"}"#);
        assert_eq!(doc.raw_html, "<table><td>x</td></table>");
        assert!(!doc.is_empty());
    }

    #[test]
    fn test_envelope_mismatch_is_empty() {
        assert!(CapturedDocument::from_envelope("not json at all").is_empty());
        assert!(CapturedDocument::from_envelope(r#"{"other": "field"}"#).is_empty());
        assert!(CapturedDocument::from_envelope(r#"{"data": 42}"#).is_empty());
    }

    #[test]
    fn test_blob_name_layout() {
        let key = StorageKey {
            folder: "forms".to_string(),
            identifier: "12-3456-78-9012345-6-7".to_string(),
            document_type: "FORM100".to_string(),
            sequence: 3,
        };
        assert_eq!(
            key.blob_name(),
            "forms/12-3456-78-9012345-6-7_FORM100_3.html"
        );
    }

    #[test]
    fn test_sequences_are_strictly_increasing_and_distinct() {
        let mut state = RunState::new();
        let a1 = state.next_sequence("CUCE-A", "FORM100");
        let b1 = state.next_sequence("CUCE-B", "FORM100");
        let a2 = state.next_sequence("CUCE-A", "FORM100");
        let a3 = state.next_sequence("CUCE-A", "FORM100");

        assert_eq!((a1, a2, a3), (1, 2, 3));
        // Counters are scoped per pair — a second pair starts at 1.
        assert_eq!(b1, 1);
        // Same identifier but different type is a distinct pair.
        assert_eq!(state.next_sequence("CUCE-A", "FORM200"), 1);
    }
}
