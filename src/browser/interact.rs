//! Human-paced UI interaction primitives.
//!
//! The portal's bot detection is sensitive to instantaneous, pixel-perfect
//! script clicks. Every action here is interleaved with randomized dwell
//! times and pointer offsets, but stealth never blocks correctness: the
//! script-level click fallback guarantees forward progress.

use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::{Element, Page};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sleep a random interval drawn uniformly from `[min_ms, max_ms)`.
///
/// The sample is taken before the await point — `rand::rng()` is
/// thread-local and must not be held across it.
pub async fn settle(min_ms: u64, max_ms: u64) {
    use rand::distr::{Distribution, Uniform};
    let ms = {
        let mut rng = rand::rng();
        match Uniform::new(min_ms, max_ms) {
            Ok(dist) => dist.sample(&mut rng),
            Err(_) => min_ms,
        }
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn random_offset() -> (i64, i64) {
    use rand::distr::{Distribution, Uniform};
    let mut rng = rand::rng();
    match Uniform::new_inclusive(-5i64, 5) {
        Ok(dist) => (dist.sample(&mut rng), dist.sample(&mut rng)),
        Err(_) => (0, 0),
    }
}

/// Poll for an element by XPath until it appears or the timeout elapses.
pub async fn wait_for_xpath(page: &Page, xpath: &str, timeout: Duration) -> Result<Element> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(el) = page.find_xpath(xpath).await {
            return Ok(el);
        }
        if Instant::now() >= deadline {
            return Err(anyhow!("element not found within {:?}: {}", timeout, xpath));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Visibility probe — mirrors the DOM notion of "rendered and laid out".
pub async fn element_visible(el: &Element) -> bool {
    el.call_js_fn("function() { return this.offsetParent !== null; }", false)
        .await
        .ok()
        .and_then(|ret| ret.result.value)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Stateless driver over the live page handle.
pub struct InteractionDriver<'a> {
    page: &'a Page,
}

impl<'a> InteractionDriver<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }

    /// Click like a person: scroll to center, dwell, move the pointer to a
    /// small random offset from the element center, dwell again, click.
    ///
    /// Falls back to a script-level click when the simulated-pointer path
    /// fails (element detached, intercepted click, driver error). Returns
    /// `false` only when both paths fail.
    pub async fn human_click(&self, el: &Element) -> bool {
        match self.pointer_click(el).await {
            Ok(()) => {
                debug!("🖱️ Human click succeeded");
                true
            }
            Err(e) => {
                warn!("⚠️ Pointer click failed, using JS fallback: {}", e);
                match self.js_click(el).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("⚠️ JS click fallback also failed: {}", e);
                        false
                    }
                }
            }
        }
    }

    async fn pointer_click(&self, el: &Element) -> Result<()> {
        el.call_js_fn(
            "function() { this.scrollIntoView({behavior: 'instant', block: 'center', inline: 'center'}); }",
            false,
        )
        .await?;
        settle(1000, 1500).await;

        let point = el.clickable_point().await?;
        let (dx, dy) = random_offset();
        let x = point.x + dx as f64;
        let y = point.y + dy as f64;

        self.dispatch_mouse(DispatchMouseEventType::MouseMoved, x, y, None)
            .await?;
        settle(300, 700).await;
        self.dispatch_mouse(DispatchMouseEventType::MousePressed, x, y, Some(1))
            .await?;
        self.dispatch_mouse(DispatchMouseEventType::MouseReleased, x, y, Some(1))
            .await?;
        Ok(())
    }

    async fn dispatch_mouse(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
        click_count: Option<i64>,
    ) -> Result<()> {
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(MouseButton::Left);
        if let Some(count) = click_count {
            builder = builder.click_count(count);
        }
        let params = builder.build().map_err(|e| anyhow!(e))?;
        self.page.execute(params).await?;
        Ok(())
    }

    /// Deterministic script-level click — the forward-progress guarantee,
    /// and the right tool for controls hidden behind the fixed navbar.
    pub async fn js_click(&self, el: &Element) -> Result<()> {
        el.call_js_fn("function() { this.click(); }", false).await?;
        Ok(())
    }

    /// Scroll a control to viewport center without clicking it.
    pub async fn scroll_to(&self, el: &Element) -> Result<()> {
        el.call_js_fn(
            "function() { this.scrollIntoView({behavior: 'smooth', block: 'center'}); }",
            false,
        )
        .await?;
        Ok(())
    }

    /// Clear a form field, then type into it.
    pub async fn clear_and_type(&self, el: &Element, text: &str) -> Result<()> {
        el.click().await?;
        el.call_js_fn("function() { this.value = ''; }", false)
            .await?;
        el.type_str(text).await?;
        Ok(())
    }

    /// Dispatch an ESC keystroke to the page — closes the result modal.
    pub async fn press_escape(&self) -> Result<()> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key("Escape")
                .code("Escape")
                .windows_virtual_key_code(27)
                .native_virtual_key_code(27)
                .build()
                .map_err(|e| anyhow!(e))?;
            self.page.execute(params).await?;
        }
        Ok(())
    }
}
