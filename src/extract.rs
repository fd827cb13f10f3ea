//! CUCE identifier and document-type extraction.
//!
//! The CUCE (Código Único de Contrataciones Estatales) is a token of six
//! hyphen-separated alphanumeric groups, e.g. `24-0291-00-1459876-1-1`.
//! Resolution order: first plausible match in the raw HTML, then the
//! flattened table text, then a timestamp-based synthetic value — the
//! pipeline never drops a document purely for lacking a recognizable
//! identifier.

use crate::core::types::ExtractedRecord;
use chrono::Local;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

/// Real CUCEs fall in this window; shorter or longer hyphenated matches are
/// noise (CSS classes, asset ids).
const MIN_CUCE_LEN: usize = 15;
const MAX_CUCE_LEN: usize = 35;

static CUCE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn cuce_pattern() -> &'static Regex {
    CUCE_PATTERN
        .get_or_init(|| Regex::new(r"\w+-\w+-\w+-\w+-\w+-\w+").expect("valid CUCE pattern"))
}

/// Parse every `<table>` in the payload into rows of trimmed cell texts.
///
/// Malformed markup never raises — the HTML parser is lenient, and a payload
/// with no tables simply yields an empty vec (the caller degrades the
/// document type to `UNKNOWN`).
pub fn parse_tables(raw_html: &str) -> Vec<Vec<String>> {
    static TABLE: OnceLock<Selector> = OnceLock::new();
    static CELL: OnceLock<Selector> = OnceLock::new();
    let table_sel = TABLE.get_or_init(|| Selector::parse("table").expect("valid table selector"));
    let cell_sel = CELL.get_or_init(|| Selector::parse("td, th").expect("valid cell selector"));

    let fragment = Html::parse_fragment(raw_html);
    fragment
        .select(table_sel)
        .map(|table| {
            table
                .select(cell_sel)
                .map(|cell| cell.text().collect::<String>().trim().to_string())
                .collect()
        })
        .collect()
}

/// Derive the identifier and document-type label for one captured payload.
pub fn extract(raw_html: &str, tables: &[Vec<String>]) -> ExtractedRecord {
    let document_type = tables
        .iter()
        .find(|cells| cells.iter().any(|c| !c.is_empty()))
        .and_then(|cells| cells.first())
        .map(|c| c.split_whitespace().collect::<String>())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_string());

    let identifier = scan_flexible(raw_html)
        .or_else(|| {
            // Identifier may sit inside structured markup the raw regex
            // missed; retry against the flattened table text.
            let flat = tables
                .iter()
                .flat_map(|cells| cells.iter())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            scan_flexible(&flat)
        })
        .unwrap_or_else(|| Local::now().format("%Y%m%d%H%M%S").to_string());

    ExtractedRecord {
        identifier: normalize_identifier(&identifier),
        document_type,
        raw_html: raw_html.to_string(),
    }
}

/// First six-group hyphenated token within the plausible length window.
fn scan_flexible(text: &str) -> Option<String> {
    cuce_pattern()
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|m| (MIN_CUCE_LEN..=MAX_CUCE_LEN).contains(&m.len()))
        .map(str::to_string)
}

fn normalize_identifier(identifier: &str) -> String {
    identifier.replace('/', "-").trim().to_string()
}
