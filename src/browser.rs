use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventRequestWillBeSent, GetResponseBodyParams, RequestId,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::stream::BoxStream;
use futures::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::ResponseMatcher;
use crate::config::ScrapeConfig;
use crate::error::ScrapeError;

/// How often an element wait re-queries the DOM.
const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One running Chromium plus the event pump that keeps CDP traffic flowing.
pub struct BrowserHandle {
    browser: tokio::sync::Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl BrowserHandle {
    /// Launches the browser and spawns its event pump.
    pub async fn launch(config: &ScrapeConfig) -> Result<Self, ScrapeError> {
        let mut builder = BrowserConfig::builder().window_size(960, 540);
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(ScrapeError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config).await?;
        let pump = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        info!("browser launched");

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            handler: pump,
        })
    }

    /// Opens a fresh page with network events enabled.
    pub async fn new_session(&self) -> Result<SessionPage, ScrapeError> {
        let page = self.browser.lock().await.new_page("about:blank").await?;
        page.execute(EnableParams::default()).await?;
        Ok(SessionPage { page })
    }

    /// Closes the browser process. Errors here are logged, not surfaced;
    /// there is nothing left to do with a browser that will not die cleanly.
    pub async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(err) = browser.close().await {
            warn!("failed to close browser: {err}");
        }
        let _ = browser.wait().await;
        self.handler.abort();
    }
}

/// One worker slot's page, reused across jobs.
pub struct SessionPage {
    page: Page,
}

impl SessionPage {
    /// Whether the underlying target still answers trivial evaluation. A
    /// page that fails this is dead and must be replaced, not retried on.
    pub async fn is_usable(&self) -> bool {
        self.page.evaluate("1 + 1").await.is_ok()
    }

    /// Navigates and waits for the load to settle, bounded by `timeout`.
    pub async fn goto(&self, url: &str, timeout: Duration) -> Result<(), ScrapeError> {
        debug!(url, "navigating");
        with_timeout(timeout, "navigation", async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok(())
        })
        .await
    }

    /// Waits for `selector` to appear in the DOM.
    pub async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Element, ScrapeError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(_) if Instant::now() < deadline => {
                    tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
                }
                Err(_) => return Err(ScrapeError::Timeout(format!("element {selector}"))),
            }
        }
    }

    /// Waits for `selector`, then clicks it.
    pub async fn click(&self, selector: &str, timeout: Duration) -> Result<(), ScrapeError> {
        let element = self.wait_for_element(selector, timeout).await?;
        element.click().await?;
        Ok(())
    }

    /// Closes the page. Best-effort: a page that cannot be closed is already
    /// gone.
    pub async fn close(self) {
        if let Err(err) = self.page.close().await {
            debug!("failed to close page: {err}");
        }
    }
}

/// Randomized pause before UI interactions so clicks do not land at machine
/// cadence.
pub async fn human_delay(min_ms: u64, max_ms: u64) {
    let ms = if max_ms > min_ms {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    } else {
        min_ms
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// One-shot wait for the network response picked out by a
/// [`ResponseMatcher`].
///
/// Subscribing is separate from receiving so the caller can register the
/// listener *before* triggering navigation or a click; the payload can land
/// while the page is still settling, and a listener attached afterwards
/// would miss it.
pub struct ResponseWaiter {
    page: Page,
    matcher: ResponseMatcher,
    requests: BoxStream<'static, std::sync::Arc<EventRequestWillBeSent>>,
    finished: BoxStream<'static, std::sync::Arc<EventLoadingFinished>>,
}

impl ResponseWaiter {
    pub async fn subscribe(
        session: &SessionPage,
        matcher: ResponseMatcher,
    ) -> Result<Self, ScrapeError> {
        let requests = session
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await?
            .boxed();
        let finished = session
            .page
            .event_listener::<EventLoadingFinished>()
            .await?
            .boxed();
        Ok(Self {
            page: session.page.clone(),
            matcher,
            requests,
            finished,
        })
    }

    /// Waits until a matching request finishes loading, then pulls its body
    /// off the wire.
    pub async fn recv(mut self, timeout: Duration) -> Result<String, ScrapeError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut matched: Vec<RequestId> = Vec::new();

        let request_id = loop {
            tokio::select! {
                maybe_request = self.requests.next() => {
                    let Some(event) = maybe_request else {
                        return Err(ScrapeError::SessionClosed(
                            "network event stream ended".into(),
                        ));
                    };
                    let request = &event.request;
                    if self
                        .matcher
                        .matches(&request.url, &request.method, request.post_data.as_deref())
                    {
                        debug!(url = %request.url, "matched sales request");
                        matched.push(event.request_id.clone());
                    }
                }
                maybe_finished = self.finished.next() => {
                    let Some(event) = maybe_finished else {
                        return Err(ScrapeError::SessionClosed(
                            "network event stream ended".into(),
                        ));
                    };
                    if matched.contains(&event.request_id) {
                        break event.request_id.clone();
                    }
                }
                _ = &mut deadline => {
                    return Err(ScrapeError::Timeout("sales response".into()));
                }
            }
        };

        self.fetch_body(request_id).await
    }

    async fn fetch_body(&self, request_id: RequestId) -> Result<String, ScrapeError> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(request_id))
            .await?;
        if response.base64_encoded {
            let bytes = STANDARD
                .decode(response.body.as_bytes())
                .map_err(|err| ScrapeError::MalformedResponse(format!("base64 body: {err}")))?;
            String::from_utf8(bytes)
                .map_err(|err| ScrapeError::MalformedResponse(format!("non-utf8 body: {err}")))
        } else {
            Ok(response.body.clone())
        }
    }
}

async fn with_timeout<T>(
    duration: Duration,
    what: &str,
    operation: impl std::future::Future<Output = Result<T, CdpError>>,
) -> Result<T, ScrapeError> {
    match tokio::time::timeout(duration, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ScrapeError::Timeout(what.to_string())),
    }
}
