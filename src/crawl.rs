//! The crawl state machine.
//!
//! `Init → PopupDismiss → SearchNavigate → SearchSubmit → PageItemsLoop →
//! ItemProcess* → Paginate → (PageItemsLoop | Done)`.
//!
//! Only this module holds cross-item state (the pagination cursor lives in
//! the page itself; counters live in [`RunState`]). Errors inside a single
//! item degrade that item to "skipped" and never abort the run; the only
//! fatal paths are browser launch and the initial navigation.

use crate::browser::interact::{element_visible, settle, wait_for_xpath, InteractionDriver};
use crate::browser::manager;
use crate::capture::{self, CaptureOutcome, ResponseCapture};
use crate::core::config::HarvestConfig;
use crate::core::types::{CapturedDocument, RunState};
use crate::extract;
use crate::storage::{BlobStore, DedupStore, PersistOutcome};
use anyhow::{Context, Result};
use chromiumoxide::Page;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Anchor text of one clickable form row on the results page.
const ITEM_XPATH: &str = "//a[contains(text(), 'FORM')]";
/// Entry point into the search form.
const SEARCH_ENTRY_XPATH: &str = "//h4[contains(text(), 'Convocatorias')]";
/// Pagination advance control and its (possibly disabled) container.
const NEXT_XPATH: &str = "//a[contains(text(), 'Siguiente')]";
const NEXT_PARENT_XPATH: &str = "//a[contains(text(), 'Siguiente')]/..";
/// The AJAX endpoint whose response carries the form document.
const ENDPOINT_FRAGMENT: &str = "verFormulario.php";

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(15);
const SEARCH_ENTRY_TIMEOUT: Duration = Duration::from_secs(20);

/// Decides pagination termination from the next-control container's class.
pub fn pagination_done(container_class: Option<&str>) -> bool {
    container_class.is_some_and(|c| c.contains("disabled"))
}

/// The portal's filter radios: index 1 is the broadening "Todos" control.
/// Fixed-position by necessity — the controls carry no distinguishing
/// markup. Returns `None` when the layout has fewer radios than expected.
pub fn pick_broadening_filter<T>(radios: &[T]) -> Option<&T> {
    radios.get(1)
}

/// Run one full harvest: launch the browser, crawl every result page in the
/// configured window, release the session on every exit path. Returns the
/// number of files saved.
pub async fn run<S: BlobStore>(config: &HarvestConfig, store: &DedupStore<S>) -> Result<u32> {
    let (mut browser, pump) = manager::launch_session()
        .await
        .context("browser launch failed")?;

    let result: Result<u32> = async {
        info!("Navigating to SICOES portal...");
        let page = browser
            .new_page(config.base_url.as_str())
            .await
            .context("initial navigation failed")?;
        let mut crawler = Crawler {
            page,
            config,
            store,
            state: RunState::new(),
        };
        crawler.crawl().await?;
        Ok(crawler.state.saved_files)
    }
    .await;

    // Best-effort cleanup — don't let a close error shadow the crawl error.
    if let Err(e) = browser.close().await {
        warn!("Browser close error (non-fatal): {}", e);
    }
    pump.abort();

    result
}

struct Crawler<'a, S: BlobStore> {
    page: Page,
    config: &'a HarvestConfig,
    store: &'a DedupStore<S>,
    state: RunState,
}

impl<S: BlobStore> Crawler<'_, S> {
    fn driver(&self) -> InteractionDriver<'_> {
        InteractionDriver::new(&self.page)
    }

    async fn crawl(&mut self) -> Result<()> {
        // Generous settle: the portal renders client-side, with no reliable
        // load event to wait on.
        settle(4500, 6500).await;

        self.dismiss_welcome_popup().await;
        self.open_search().await?;
        self.submit_search().await?;

        loop {
            let item_count = match self.page.find_xpaths(ITEM_XPATH).await {
                Ok(items) => items.len(),
                Err(e) => {
                    info!("No form list on this page ({}); crawl complete", e);
                    break;
                }
            };
            info!("Found {} forms on page.", item_count);
            settle(1500, 2500).await;

            for i in 0..item_count {
                if (i + 1) % 5 == 0 {
                    info!("☕ Taking a human-paced rest...");
                    settle(4500, 10500).await;
                }
                if !self.process_item(i).await {
                    // The page mutated under us; re-deriving beats guessing.
                    break;
                }
            }

            if self.advance_page().await == PageAdvance::Done {
                break;
            }
        }
        Ok(())
    }

    /// Best-effort dismissal of the announcements modal shown on first load.
    async fn dismiss_welcome_popup(&self) {
        let Ok(popup) = self.page.find_element("#modalComunicados").await else {
            return;
        };
        if !element_visible(&popup).await {
            return;
        }
        match self.page.find_element("#modalComunicados .close").await {
            Ok(close) => {
                if let Err(e) = self.driver().js_click(&close).await {
                    warn!("⚠️ Welcome popup dismissal failed: {}", e);
                } else {
                    settle(1500, 2500).await;
                }
            }
            Err(e) => warn!("⚠️ Welcome popup close control missing: {}", e),
        }
    }

    /// Wait for the search entry point, scroll to it, click it.
    async fn open_search(&self) -> Result<()> {
        let entry = wait_for_xpath(&self.page, SEARCH_ENTRY_XPATH, SEARCH_ENTRY_TIMEOUT)
            .await
            .context("search entry point never became available")?;
        let driver = self.driver();
        driver.scroll_to(&entry).await?;
        settle(500, 1500).await;
        driver.js_click(&entry).await?;
        settle(2500, 4500).await;
        Ok(())
    }

    /// Fill the date window, broaden the filter, submit, and let the
    /// AJAX-backed results render.
    async fn submit_search(&self) -> Result<()> {
        let driver = self.driver();
        let window = &self.config.window;

        let from_field = self
            .page
            .find_element("input[name='publicacionDesde']")
            .await
            .context("publicacionDesde field missing")?;
        driver.clear_and_type(&from_field, &window.from_field()).await?;

        let to_field = self
            .page
            .find_element("input[name='publicacionHasta']")
            .await
            .context("publicacionHasta field missing")?;
        driver.clear_and_type(&to_field, &window.to_field()).await?;

        // Broadening "Todos" filter.
        match self.page.find_elements(".iradio_minimal-blue").await {
            Ok(radios) => {
                debug!("Filter radios on page: {}", radios.len());
                match pick_broadening_filter(&radios) {
                    Some(todos) => {
                        if let Err(e) = todos.click().await {
                            warn!("⚠️ Could not select 'Todos' filter: {}", e);
                        }
                    }
                    None => warn!("⚠️ Expected filter radios missing; keeping default filter"),
                }
            }
            Err(e) => warn!("⚠️ Filter radio lookup failed: {}", e),
        }

        // Submit via script click — the button can sit behind the fixed navbar.
        let submit = self
            .page
            .find_element(".busquedaForm")
            .await
            .context("search submit control missing")?;
        driver.scroll_to(&submit).await?;
        settle(500, 1500).await;
        driver.js_click(&submit).await?;

        settle(8500, 12500).await;
        Ok(())
    }

    /// Process the item at position `i`. Returns `false` when the inner loop
    /// should stop because the item list mutated out from under us.
    async fn process_item(&mut self, i: usize) -> bool {
        // Re-fetch defensively: indices shift after modal closes and AJAX
        // refreshes. Never trust a handle across a page mutation.
        let items = match self.page.find_xpaths(ITEM_XPATH).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Form list unavailable ({}); stopping page loop", e);
                return false;
            }
        };
        let Some(item) = items.into_iter().nth(i) else {
            warn!("Form {} out of range; page mutated, stopping page loop", i + 1);
            return false;
        };

        info!("Processing Form {}...", i + 1);
        if let Err(e) = self.handle_item(&item, i).await {
            error!("Error on Form {}: {:#}", i + 1, e);
        }
        self.dismiss_result_modal().await;
        true
    }

    async fn handle_item(&mut self, item: &chromiumoxide::Element, i: usize) -> Result<()> {
        // Arm before the click — the response fires immediately after it.
        let observer = ResponseCapture::arm(&self.page).await?;

        if !self.driver().human_click(item).await {
            warn!("⚠️ Could not click Form {}; skipping", i + 1);
            return Ok(());
        }

        match observer.capture(ENDPOINT_FRAGMENT, CAPTURE_TIMEOUT).await {
            CaptureOutcome::InterruptedByAlert(text) => {
                error!("❌ Skipping Form {} — blocked by dialog: {}", i + 1, text);
            }
            CaptureOutcome::TimedOut => {
                warn!("Timed out waiting for Form {} data.", i + 1);
            }
            CaptureOutcome::Body(body) => {
                let document = CapturedDocument::from_envelope(&body);
                if document.is_empty() {
                    warn!("Form {} response had no data field; nothing to save", i + 1);
                    return Ok(());
                }
                let tables = extract::parse_tables(&document.raw_html);
                let record = extract::extract(&document.raw_html, &tables);
                match self.store.persist(&mut self.state, &record).await {
                    PersistOutcome::Saved => {
                        self.state.record_saved();
                        info!("✅ Saved: {}_{}", record.identifier, record.document_type);
                    }
                    PersistOutcome::AlreadyExists => {
                        info!(
                            "↩️ Already stored: {}_{}",
                            record.identifier, record.document_type
                        );
                    }
                    PersistOutcome::Failed(reason) => {
                        error!("❌ Persist failed for Form {}: {}", i + 1, reason);
                    }
                }
            }
        }
        Ok(())
    }

    /// Close whatever modal the item click left open. If a dialog pre-empts
    /// the keystroke, accept it; anything else is logged and swallowed.
    async fn dismiss_result_modal(&self) {
        if let Err(e) = self.driver().press_escape().await {
            if let Err(e2) = capture::accept_dialog(&self.page).await {
                warn!("⚠️ Could not close result modal: {} (dialog accept: {})", e, e2);
            }
        }
        settle(800, 1500).await;
    }

    /// Locate and follow the "Siguiente" control, or finish.
    async fn advance_page(&self) -> PageAdvance {
        let Ok(next) = self.page.find_xpath(NEXT_XPATH).await else {
            info!("No next-page control; crawl complete");
            return PageAdvance::Done;
        };
        let container_class = match self.page.find_xpath(NEXT_PARENT_XPATH).await {
            Ok(parent) => parent.attribute("class").await.ok().flatten(),
            Err(_) => None,
        };
        if pagination_done(container_class.as_deref()) {
            info!("Next-page control disabled; crawl complete");
            return PageAdvance::Done;
        }
        // Script click — the control sits behind the fixed navigation bar.
        if let Err(e) = self.driver().js_click(&next).await {
            warn!("Pagination click failed ({}); treating as end of results", e);
            return PageAdvance::Done;
        }
        settle(3500, 5500).await;
        PageAdvance::Next
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PageAdvance {
    Next,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_done_on_disabled_marker() {
        assert!(pagination_done(Some("page-item disabled")));
        assert!(pagination_done(Some("disabled")));
        assert!(!pagination_done(Some("page-item")));
        assert!(!pagination_done(None));
    }

    #[test]
    fn test_broadening_filter_is_second_radio() {
        let radios = ["especifico", "todos", "otro"];
        assert_eq!(pick_broadening_filter(&radios), Some(&"todos"));
        // Layout drift: fewer radios than expected selects nothing.
        let short = ["solo"];
        assert_eq!(pick_broadening_filter(&short), None);
        let empty: [&str; 0] = [];
        assert_eq!(pick_broadening_filter(&empty), None);
    }
}
