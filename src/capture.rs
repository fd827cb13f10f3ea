//! Passive network-response capture with dialog short-circuiting.
//!
//! The portal performs an AJAX call after a form click rather than a full
//! navigation, so waiting on page-load events is insufficient — the response
//! body has to be recovered from the browser's own network instrumentation.
//! Dialog checking must come first on every tick: with a JavaScript dialog
//! open, every other CDP command stalls.

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventResponseReceived, GetResponseBodyParams, GetResponseBodyReturns, RequestId,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::{FutureExt, Stream, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Decoded body of the first response matching the endpoint fragment.
    Body(String),
    /// A browser dialog (the portal's CAPTCHA-style block) pre-empted the
    /// response. Carries the dialog text; the item must be skipped, not the run.
    InterruptedByAlert(String),
    /// No dialog and no matching response within the timeout, or the
    /// debugging channel broke mid-poll.
    TimedOut,
}

/// What the poll loop saw first: a dialog, a matching response, or nothing
/// before the deadline.
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome<T> {
    Dialog(String),
    Matched(T),
    TimedOut,
}

/// Poll the event sources until a dialog opens, a response URL contains the
/// fragment, or the deadline passes. Dialog checking always comes first on a
/// tick. Returns within `timeout` plus at most one poll interval.
async fn poll_events<D, R, T>(
    mut dialogs: D,
    mut responses: R,
    endpoint_fragment: &str,
    timeout: Duration,
) -> PollOutcome<T>
where
    D: Stream<Item = String> + Unpin,
    R: Stream<Item = (String, T)> + Unpin,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(Some(message)) = dialogs.next().now_or_never() {
            return PollOutcome::Dialog(message);
        }

        // Drain whatever the network instrumentation saw since last tick.
        while let Some(Some((url, token))) = responses.next().now_or_never() {
            if url.contains(endpoint_fragment) {
                debug!("📡 Matched response: {}", url);
                return PollOutcome::Matched(token);
            }
        }

        if Instant::now() >= deadline {
            return PollOutcome::TimedOut;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// One armed observer over the page's network traffic.
///
/// Must be armed *before* the triggering click so no event is missed; a
/// fresh instance per item plays the role of clearing the event buffer.
pub struct ResponseCapture {
    page: Page,
    dialogs: EventStream<EventJavascriptDialogOpening>,
    responses: EventStream<EventResponseReceived>,
}

impl ResponseCapture {
    /// Register the event listeners. Call immediately before the click.
    pub async fn arm(page: &Page) -> Result<Self> {
        // Idempotent; makes sure responseReceived events actually flow.
        page.execute(network::EnableParams::default()).await?;
        let dialogs = page.event_listener::<EventJavascriptDialogOpening>().await?;
        let responses = page.event_listener::<EventResponseReceived>().await?;
        Ok(Self {
            page: page.clone(),
            dialogs,
            responses,
        })
    }

    /// Poll until the endpoint responds, a dialog interrupts, or the timeout
    /// elapses. Always returns within `timeout` plus one body fetch.
    pub async fn capture(self, endpoint_fragment: &str, timeout: Duration) -> CaptureOutcome {
        let Self {
            page,
            dialogs,
            responses,
        } = self;
        let dialogs = dialogs.map(|d| d.message.clone());
        let responses = responses.map(|e| (e.response.url.clone(), e.request_id.clone()));

        match poll_events(dialogs, responses, endpoint_fragment, timeout).await {
            PollOutcome::Dialog(text) => {
                warn!("🛑 Dialog detected: {}", text);
                if let Err(e) = accept_dialog(&page).await {
                    warn!("⚠️ Dialog accept failed: {}", e);
                }
                CaptureOutcome::InterruptedByAlert(text)
            }
            PollOutcome::Matched(request_id) => match fetch_body(&page, request_id).await {
                Ok(body) => CaptureOutcome::Body(body),
                Err(e) => {
                    // A broken debugging channel cannot recover mid-run;
                    // bail out instead of retrying.
                    error!("❌ Response body fetch failed: {}", e);
                    CaptureOutcome::TimedOut
                }
            },
            PollOutcome::TimedOut => CaptureOutcome::TimedOut,
        }
    }
}

async fn fetch_body(page: &Page, request_id: RequestId) -> Result<String> {
    let resp = page.execute(GetResponseBodyParams::new(request_id)).await?;
    decode_body(&resp.result)
}

/// Decode a CDP response body, honoring its base64 flag.
pub fn decode_body(returns: &GetResponseBodyReturns) -> Result<String> {
    if returns.base64_encoded {
        let bytes = BASE64.decode(returns.body.as_bytes())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Ok(returns.body.clone())
    }
}

/// Accept (dismiss) a pending JavaScript dialog.
pub async fn accept_dialog(page: &Page) -> Result<()> {
    page.execute(HandleJavaScriptDialogParams::new(true)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_on_silent_streams() {
        let started = Instant::now();
        let timeout = Duration::from_secs(15);
        let outcome: PollOutcome<String> = poll_events(
            stream::pending::<String>(),
            stream::pending::<(String, String)>(),
            "verFormulario.php",
            timeout,
        )
        .await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        // Bounded return: deadline plus at most one poll tick.
        assert!(started.elapsed() <= timeout + POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dialog_preempts_matching_response() {
        let dialogs = stream::iter(vec!["Complete el captcha".to_string()]);
        let responses = stream::iter(vec![(
            "https://nuevomercado.sicoes.gob.bo/verFormulario.php".to_string(),
            "req-1".to_string(),
        )]);
        let outcome = poll_events(dialogs, responses, "verFormulario.php", Duration::from_secs(15)).await;
        assert_eq!(outcome, PollOutcome::Dialog("Complete el captcha".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_matching_responses_are_skipped() {
        let responses = stream::iter(vec![
            ("https://nuevomercado.sicoes.gob.bo/logo.png".to_string(), "req-1".to_string()),
            ("https://nuevomercado.sicoes.gob.bo/style.css".to_string(), "req-2".to_string()),
            (
                "https://nuevomercado.sicoes.gob.bo/verFormulario.php?id=9".to_string(),
                "req-3".to_string(),
            ),
        ]);
        let outcome = poll_events(
            stream::pending::<String>(),
            responses,
            "verFormulario.php",
            Duration::from_secs(15),
        )
        .await;
        assert_eq!(outcome, PollOutcome::Matched("req-3".to_string()));
    }

    #[test]
    fn test_decode_plain_body() {
        let returns = GetResponseBodyReturns {
            body: r#"{"data": "<b>hola</b>"}"#.to_string(),
            base64_encoded: false,
        };
        assert_eq!(decode_body(&returns).unwrap(), r#"{"data": "<b>hola</b>"}"#);
    }

    #[test]
    fn test_decode_base64_body() {
        let returns = GetResponseBodyReturns {
            body: BASE64.encode(r#"{"data": "x"}"#),
            base64_encoded: true,
        };
        assert_eq!(decode_body(&returns).unwrap(), r#"{"data": "x"}"#);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let returns = GetResponseBodyReturns {
            body: "!!! not base64 !!!".to_string(),
            base64_encoded: true,
        };
        assert!(decode_body(&returns).is_err());
    }
}
