//! Headless Chromium page renderer (cargo feature `browser`).
//!
//! Every render launches a fresh browser process so no state leaks between
//! collections. Two timeouts apply: the per-request CDP timeout, and an outer
//! ceiling on the whole load/wait/extract sequence. The browser is closed and
//! its event task aborted on every exit path.

use super::browser::PageRenderer;
use crate::config::ChromeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, instrument, warn};

const SETTLE_DELAY: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// [`PageRenderer`] backed by a local Chromium launched per render.
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    headless: bool,
    page_timeout: Duration,
    collection_timeout: Duration,
}

impl ChromeRenderer {
    /// Renderer using the `chrome` section of the app config. Zero timeouts
    /// are raised to one second.
    pub fn new(config: &ChromeConfig) -> Self {
        Self {
            headless: config.headless,
            page_timeout: Duration::from_secs(config.timeout_secs.max(1)),
            collection_timeout: Duration::from_secs(config.collection_timeout_secs.max(1)),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(self.page_timeout)
            .window_size(1920, 1080)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if !self.headless {
            builder = builder.with_head();
        }
        builder.build().map_err(Error::Render)
    }

    async fn load(
        &self,
        browser: &Browser,
        url: &str,
        wait_selector: Option<&str>,
    ) -> Result<String> {
        let page = browser.new_page(url).await.map_err(render_error)?;

        match wait_selector {
            Some(selector) => {
                let deadline = Instant::now() + self.page_timeout;
                while page.find_element(selector).await.is_err() {
                    if Instant::now() >= deadline {
                        return Err(Error::Render(format!(
                            "{url}: selector {selector:?} did not appear within {:?}",
                            self.page_timeout
                        )));
                    }
                    sleep(POLL_INTERVAL).await;
                }
            }
            None => sleep(SETTLE_DELAY).await,
        }

        page.content().await.map_err(render_error)
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    /// Launch, load, wait, read the HTML, then close the browser whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// [`Error::Render`] when Chromium cannot start, the page fails to load,
    /// `wait_selector` never appears within the page timeout, or the whole
    /// sequence exceeds the collection timeout.
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn render(&self, url: &str, wait_selector: Option<&str>) -> Result<String> {
        let (mut browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(render_error)?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let outcome = timeout(
            self.collection_timeout,
            self.load(&browser, url, wait_selector),
        )
        .await;

        if let Err(e) = browser.close().await {
            warn!(error = %e, "Browser close failed");
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "Browser process wait failed");
        }
        events.abort();

        match outcome {
            Ok(Ok(html)) => {
                debug!(bytes = html.len(), "Rendered page");
                Ok(html)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Render(format!(
                "{url}: collection exceeded {:?}",
                self.collection_timeout
            ))),
        }
    }
}

fn render_error(e: chromiumoxide::error::CdpError) -> Error {
    Error::Render(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_from_config() {
        let config = ChromeConfig {
            headless: true,
            timeout_secs: 20,
            collection_timeout_secs: 0,
        };
        let renderer = ChromeRenderer::new(&config);
        assert_eq!(renderer.page_timeout, Duration::from_secs(20));
        assert_eq!(renderer.collection_timeout, Duration::from_secs(1));
        assert!(renderer.headless);
    }
}
