use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::EventLifecycleEvent;
use chromiumoxide::Page;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::markdown;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page did not reach network idle within {0:?}")]
    Timeout(Duration),
    #[error("failed to read page content: {0}")]
    Content(String),
}

/// Produces the fully rendered HTML of a page.
#[async_trait]
pub trait PageRenderer {
    async fn render(&self, url: &str) -> Result<String, RenderError>;
}

/// Render `url` and convert it to Markdown. Failures are logged and yield `None`.
pub async fn render_to_markdown<R: PageRenderer + ?Sized>(
    renderer: &R,
    url: &str,
) -> Option<String> {
    match renderer.render(url).await {
        Ok(html) => markdown::html_to_markdown(&html),
        Err(e) => {
            warn!("Error fetching page {}: {}", url, e);
            None
        }
    }
}

/// Headless Chromium, one fresh browser process per page.
pub struct ChromeRenderer {
    executable: Option<PathBuf>,
    no_sandbox: bool,
    timeout: Duration,
}

impl ChromeRenderer {
    pub fn new(config: &Config) -> Self {
        ChromeRenderer {
            executable: config.chrome_executable.clone(),
            no_sandbox: config.no_sandbox,
            timeout: config.navigation_timeout(),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, RenderError> {
        let mut builder = BrowserConfig::builder();
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        builder.build().map_err(RenderError::Launch)
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let session = BrowserSession::launch(self.browser_config()?).await?;
        let result = session.capture(url, self.timeout).await;
        session.close().await;
        result
    }
}

/// A launched browser plus the task driving its CDP connection.
///
/// Must be released with [`BrowserSession::close`]; the caller does so on
/// every path once `capture` returns.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(config: BrowserConfig) -> Result<Self, RenderError> {
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(BrowserSession { browser, handler })
    }

    async fn capture(&self, url: &str, timeout: Duration) -> Result<String, RenderError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        tokio::time::timeout(timeout, navigate_until_idle(&page, url))
            .await
            .map_err(|_| RenderError::Timeout(timeout))??;

        page.content()
            .await
            .map_err(|e| RenderError::Content(e.to_string()))
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser wait failed: {}", e);
        }
        self.handler.abort();
    }
}

/// Navigate the page and wait for the main frame's new document to go network idle.
async fn navigate_until_idle(page: &Page, url: &str) -> Result<(), RenderError> {
    let nav_err = |e: chromiumoxide::error::CdpError| RenderError::Navigation(e.to_string());

    let main_frame = page.mainframe().await.map_err(nav_err)?;
    let mut events = page
        .event_listener::<EventLifecycleEvent>()
        .await
        .map_err(nav_err)?;

    page.goto(url).await.map_err(nav_err)?;

    let mut loader = None;
    while let Some(event) = events.next().await {
        if main_frame.as_ref() != Some(&event.frame_id) {
            continue;
        }
        match event.name.as_str() {
            "init" => loader = Some(event.loader_id.clone()),
            "networkIdle" if loader.as_ref() == Some(&event.loader_id) => return Ok(()),
            _ => {}
        }
    }

    Err(RenderError::Navigation(format!(
        "event stream closed before {} went idle",
        url
    )))
}
