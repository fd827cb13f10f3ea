use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};

// ---------------------------------------------------------------------------
// HarvestConfig — environment-sourced run configuration
// ---------------------------------------------------------------------------

pub const ENV_STORAGE_BUCKET: &str = "STORAGE_BUCKET";
pub const ENV_STORAGE_FOLDER: &str = "STORAGE_FOLDER";
pub const ENV_DATE_FROM: &str = "DATE_FROM";
pub const ENV_DATE_TO: &str = "DATE_TO";
pub const ENV_BASE_URL: &str = "SICOES_BASE_URL";

const DEFAULT_BUCKET: &str = "sicoescan";
const DEFAULT_FOLDER: &str = "forms";
const DEFAULT_BASE_URL: &str = "https://www.sicoes.gob.bo/portal/index.php";

/// The portal's date-field format.
const DATE_FORMAT: &str = "%d/%m/%Y";

/// Inclusive publication-date bounds submitted to the portal's search form.
///
/// Immutable for the run. Defaults to yesterday–yesterday: the job is meant
/// to run daily and sweep the previous day's publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl SearchWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            bail!("search window is inverted: {} > {}", from, to);
        }
        Ok(Self { from, to })
    }

    /// Yesterday–yesterday, the default daily sweep.
    pub fn yesterday() -> Self {
        let today = Local::now().date_naive();
        let yesterday = today.pred_opt().unwrap_or(today);
        Self {
            from: yesterday,
            to: yesterday,
        }
    }

    /// Parse `dd/mm/yyyy` bounds as given by `DATE_FROM` / `DATE_TO`.
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        let from = NaiveDate::parse_from_str(from.trim(), DATE_FORMAT)
            .with_context(|| format!("invalid DATE_FROM '{}' (expected dd/mm/yyyy)", from))?;
        let to = NaiveDate::parse_from_str(to.trim(), DATE_FORMAT)
            .with_context(|| format!("invalid DATE_TO '{}' (expected dd/mm/yyyy)", to))?;
        Self::new(from, to)
    }

    /// Value typed into the `publicacionDesde` field.
    pub fn from_field(&self) -> String {
        self.from.format(DATE_FORMAT).to_string()
    }

    /// Value typed into the `publicacionHasta` field.
    pub fn to_field(&self) -> String {
        self.to.format(DATE_FORMAT).to_string()
    }
}

/// Top-level run configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub base_url: String,
    pub bucket: String,
    pub folder: String,
    pub window: SearchWindow,
}

impl HarvestConfig {
    /// Resolve from the environment. Either both `DATE_FROM` and `DATE_TO`
    /// override the window, or one side overrides and the other keeps its
    /// yesterday default.
    pub fn from_env() -> Result<Self> {
        let default_window = SearchWindow::yesterday();
        let from = std::env::var(ENV_DATE_FROM)
            .ok()
            .filter(|v| !v.trim().is_empty());
        let to = std::env::var(ENV_DATE_TO)
            .ok()
            .filter(|v| !v.trim().is_empty());

        let window = match (from, to) {
            (None, None) => default_window,
            (from, to) => {
                let from = from.unwrap_or_else(|| default_window.from_field());
                let to = to.unwrap_or_else(|| default_window.to_field());
                SearchWindow::parse(&from, &to)?
            }
        };

        Ok(Self {
            base_url: env_or(ENV_BASE_URL, DEFAULT_BASE_URL),
            bucket: env_or(ENV_STORAGE_BUCKET, DEFAULT_BUCKET),
            folder: env_or(ENV_STORAGE_FOLDER, DEFAULT_FOLDER),
            window,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_parse_roundtrip() {
        let w = SearchWindow::parse("01/02/2025", "03/02/2025").unwrap();
        assert_eq!(w.from_field(), "01/02/2025");
        assert_eq!(w.to_field(), "03/02/2025");
    }

    #[test]
    fn test_window_rejects_inversion() {
        assert!(SearchWindow::parse("03/02/2025", "01/02/2025").is_err());
    }

    #[test]
    fn test_window_rejects_garbage() {
        assert!(SearchWindow::parse("2025-02-01", "2025-02-03").is_err());
        assert!(SearchWindow::parse("", "").is_err());
    }

    #[test]
    fn test_default_window_is_single_day() {
        let w = SearchWindow::yesterday();
        assert_eq!(w.from, w.to);
        assert!(w.from < Local::now().date_naive());
    }
}
