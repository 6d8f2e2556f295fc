use super::live::LivePage;
use crate::capture::{
    stitch_tiles, CaptureSessions, CapturedTile, ContextMetrics, StitchedImage, TileCursor,
};
use crate::config::CaptureConfig;
use crate::detect::TargetSummary;
use crate::page::Rect;
use crate::error::{CaptureError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;

pub struct ChromeDriver {
    browser: Browser,
    temp_dir: Option<PathBuf>,
}

/// Connection mode for Chrome browser
pub enum ConnectionMode {
    /// Launches Chrome from the system installation
    Sandboxed {
        chrome_path: Option<String>,
        no_sandbox: bool,
        headless: bool,
    },
    /// Connects to an existing Chrome on a debug port
    DebugPort(u16),
}

/// Result of a full scroll-target capture
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub target: TargetSummary,
    pub tiles: usize,
    pub image: StitchedImage,
}

const CHROME_NOT_FOUND_HELP: &str = "\n\n\
    Chrome not found. You can:\n\
    - Install Chrome: https://www.google.com/chrome/\n\
    - Ubuntu/Debian: sudo apt install chromium-browser\n\
    - Fedora: sudo dnf install chromium\n\
    - macOS: brew install --cask google-chrome\n\
    - Or specify path: --chrome-path /path/to/chrome\n\
    - Linux sandbox issue? Try: --no-sandbox";

impl ChromeDriver {
    /// Current active page, excluding Chrome's new-tab-page
    async fn get_active_page(&self) -> Result<Page> {
        let pages = self.browser.pages().await?;

        for page in pages.iter() {
            if let Ok(Some(url)) = page.url().await {
                if !url.starts_with("chrome://") {
                    return Ok(page.clone());
                }
            }
        }

        if let Some(page) = pages.last() {
            return Ok(page.clone());
        }

        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| CaptureError::Other(format!("Failed to create page: {}", e)))
    }

    /// Launch Chrome with a custom executable path
    pub async fn launch_with_path(
        chrome_path: String,
        no_sandbox: bool,
        headless: bool,
    ) -> Result<Self> {
        Self::new(ConnectionMode::Sandboxed {
            chrome_path: Some(chrome_path),
            no_sandbox,
            headless,
        })
        .await
    }

    /// Launch headless Chrome, adding `--no-sandbox` in CI environments
    pub async fn launch_auto() -> Result<Self> {
        let is_ci = std::env::var("CI").is_ok()
            || std::env::var("GITHUB_ACTIONS").is_ok()
            || std::env::var("GITLAB_CI").is_ok()
            || std::env::var("JENKINS_HOME").is_ok()
            || std::env::var("CIRCLECI").is_ok();

        Self::new(ConnectionMode::Sandboxed {
            chrome_path: None,
            no_sandbox: is_ci,
            headless: true,
        })
        .await
    }

    pub async fn connect_debug_port(port: u16) -> Result<Self> {
        Self::new(ConnectionMode::DebugPort(port)).await
    }

    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        let (browser, temp_dir) = match mode {
            ConnectionMode::Sandboxed {
                chrome_path,
                no_sandbox,
                headless,
            } => {
                // One profile directory per instance so parallel runs never share state
                let unique_id = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos();
                let temp_dir = std::env::temp_dir().join(format!("scroll-capture-{}", unique_id));
                std::fs::create_dir_all(&temp_dir).map_err(|e| {
                    CaptureError::LaunchFailed(format!("Failed to create temp directory: {}", e))
                })?;

                let mut config = if headless {
                    BrowserConfig::builder()
                } else {
                    BrowserConfig::builder().with_head()
                };
                config = config.user_data_dir(&temp_dir);
                if no_sandbox {
                    config = config.arg("--no-sandbox");
                }
                if let Some(path) = chrome_path {
                    config = config.chrome_executable(path);
                }

                let config = config.build().map_err(|e| {
                    CaptureError::LaunchFailed(format!("{}.{}", e, CHROME_NOT_FOUND_HELP))
                })?;
                let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
                    CaptureError::LaunchFailed(format!("{}.{}", e, CHROME_NOT_FOUND_HELP))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Drain browser events
                    }
                });

                log::info!("Launched Chrome (headless: {})", headless);
                (browser, Some(temp_dir))
            }
            ConnectionMode::DebugPort(port) => {
                let url = format!("http://localhost:{}", port);
                let (browser, mut handler) = Browser::connect(&url).await.map_err(|e| {
                    CaptureError::ConnectionFailed(format!(
                        "Failed to connect to Chrome on port {}. \
                             Make sure Chrome is running with --remote-debugging-port={}: {}",
                        port, port, e
                    ))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Drain browser events
                    }
                });

                log::info!("Connected to Chrome on port {}", port);
                (browser, None)
            }
        };

        Ok(Self { browser, temp_dir })
    }

    /// Navigate the single working tab to `url` and wait for the load event
    pub async fn navigate(&self, url: &str) -> Result<()> {
        use chromiumoxide::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};

        let normalized_url = if !url.starts_with("http://")
            && !url.starts_with("https://")
            && !url.starts_with("file://")
            && !url.starts_with("about:")
            && !url.starts_with("data:")
        {
            log::debug!("Normalizing URL: {} -> https://{}", url, url);
            format!("https://{}", url)
        } else {
            url.to_string()
        };

        log::info!("Navigating to {}", normalized_url);

        // Keep exactly one tab around
        let mut pages = self.browser.pages().await?;
        for p in pages.iter().skip(1) {
            let _ = p
                .execute(
                    chromiumoxide::cdp::browser_protocol::target::CloseTargetParams::new(
                        p.target_id().clone(),
                    ),
                )
                .await;
        }
        pages = self.browser.pages().await?;

        let page = match pages.first() {
            Some(page) => page.clone(),
            None => self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| CaptureError::NavigationFailed(e.to_string()))?,
        };

        let params = NavigateParams::builder()
            .url(&normalized_url)
            .build()
            .map_err(|e| {
                CaptureError::NavigationFailed(format!("Invalid URL {}: {}", normalized_url, e))
            })?;

        // Subscribe before navigating so a fast load event is not missed
        let mut load_events = page.event_listener::<EventLoadEventFired>().await?;

        let response = page.execute(params).await.map_err(|e| {
            let error_str = e.to_string();
            // "oneshot canceled" means the browser connection is gone
            if error_str.contains("oneshot canceled") {
                CaptureError::NavigationFailed(
                    "Browser connection lost. The browser may have been closed or crashed."
                        .to_string(),
                )
            } else {
                CaptureError::NavigationFailed(format!(
                    "Failed to navigate to {}: {}",
                    normalized_url, e
                ))
            }
        })?;

        if let Some(error_text) = response.result.error_text.clone() {
            log::error!("Navigation error from browser: {}", error_text);
            return Err(CaptureError::NavigationFailed(format!(
                "Navigation error: {}",
                error_text
            )));
        }

        match tokio::time::timeout(tokio::time::Duration::from_secs(30), load_events.next()).await
        {
            Ok(Some(_)) => log::debug!("Load event fired for {}", normalized_url),
            Ok(None) => log::warn!("Load event stream closed for {}", normalized_url),
            Err(_) => {
                return Err(CaptureError::NavigationFailed(format!(
                    "Timed out after 30s waiting for {} to load",
                    normalized_url
                )));
            }
        }

        Ok(())
    }

    pub async fn title(&self) -> Result<String> {
        let page = self.get_active_page().await?;
        page.get_title().await?.ok_or(CaptureError::NoPage)
    }

    /// Emulate a viewport size and device pixel ratio on the active tab
    pub async fn set_viewport(&self, width: u32, height: u32, device_pixel_ratio: f64) -> Result<()> {
        use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;

        let page = self.get_active_page().await?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            width as i64,
            height as i64,
            device_pixel_ratio,
            false,
        ))
        .await?;
        log::debug!("Viewport set to {}x{} @{}x", width, height, device_pixel_ratio);
        Ok(())
    }

    /// Screenshot of a document-relative region, in CSS pixels
    async fn screenshot_region(&self, page: &Page, left: f64, top: f64, width: f64, height: f64) -> Result<Vec<u8>> {
        use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};

        let params = chromiumoxide::page::ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(Viewport {
                x: left,
                y: top,
                width,
                height,
                scale: 1.0,
            })
            .build();

        page.screenshot(params)
            .await
            .map_err(|e| CaptureError::Other(format!("Failed to take screenshot: {}", e)))
    }

    /// The active tab as a detection host
    pub async fn live_page(&self) -> Result<LivePage> {
        Ok(LivePage::new(self.get_active_page().await?))
    }

    /// Capture sessions bound to the active tab
    pub async fn capture_sessions(&self, config: &CaptureConfig) -> Result<CaptureSessions<LivePage>> {
        let host = Arc::new(self.live_page().await?);
        CaptureSessions::new(host, config)
    }

    /// Detect the scroll target of the active tab and capture all of its
    /// content, one client-height tile at a time.
    pub async fn capture_scroll_target(&self, config: &CaptureConfig) -> Result<CaptureOutcome> {
        let sessions = self.capture_sessions(config).await?;

        let init = sessions.init_capture_context(&serde_json::json!({})).await;
        let (Some(context_id), Some(target), Some(metrics)) =
            (init.context_id, init.target, init.metrics)
        else {
            return Err(CaptureError::Other(format!(
                "{}: {}",
                init.reason.unwrap_or_default(),
                init.debug.unwrap_or_default()
            )));
        };
        let ratio = init.page.map(|p| p.device_pixel_ratio).unwrap_or(1.0);
        log::info!("Capturing {:?} target {}", target.kind, target.description);

        let tiles = self
            .capture_tiles(&sessions, &context_id, metrics, config.tiles.max_tiles)
            .await;
        sessions.release_capture_context(&context_id);
        let tiles = tiles?;

        let image = stitch_tiles(&tiles, ratio)?;
        Ok(CaptureOutcome {
            target,
            tiles: tiles.len(),
            image,
        })
    }

    async fn capture_tiles(
        &self,
        sessions: &CaptureSessions<LivePage>,
        context_id: &str,
        mut metrics: ContextMetrics,
        max_tiles: usize,
    ) -> Result<Vec<CapturedTile>> {
        let page = sessions.host().page().clone();
        let mut cursor = TileCursor::new();
        let mut tiles = Vec::new();
        cursor.set_visible_height(Self::visible_clip(sessions, context_id).await?.height);

        while let Some(top) = cursor.next(&metrics) {
            if tiles.len() >= max_tiles {
                log::warn!("Stopping after {} tiles; target is still growing", max_tiles);
                break;
            }

            let reply = sessions.scroll_context_to(context_id, top).await;
            let settled = reply.scroll_top.ok_or_else(|| {
                CaptureError::Other(reply.error.unwrap_or_else(|| "scroll failed".to_string()))
            })?;
            cursor.settled_at(settled);

            let clip = Self::visible_clip(sessions, context_id).await?;
            cursor.set_visible_height(clip.height);
            let window = sessions.page_metrics().await?;
            let bytes = self
                .screenshot_region(
                    &page,
                    clip.left + window.scroll_x,
                    clip.top + window.scroll_y,
                    clip.width,
                    clip.height,
                )
                .await?;
            tiles.push(CapturedTile::from_encoded(settled, &bytes)?);
            log::debug!("Captured tile {} at {:.0}", tiles.len(), settled);

            let refreshed = sessions.get_context_metrics(context_id).await;
            metrics = refreshed.metrics.ok_or_else(|| {
                CaptureError::Other(refreshed.error.unwrap_or_else(|| "metrics failed".to_string()))
            })?;
        }

        Ok(tiles)
    }

    /// Part of the context's target inside the viewport
    async fn visible_clip(sessions: &CaptureSessions<LivePage>, context_id: &str) -> Result<Rect> {
        let clip = sessions
            .context_clip(context_id)
            .await?
            .ok_or_else(|| CaptureError::Other(format!("Context {} vanished", context_id)))?;
        if clip.width < 1.0 || clip.height < 1.0 {
            return Err(CaptureError::Other(format!(
                "Context {} target is outside the viewport",
                context_id
            )));
        }
        Ok(clip)
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        if let Some(temp_dir) = &self.temp_dir {
            if temp_dir.exists() {
                let _ = std::fs::remove_dir_all(temp_dir);
            }
        }
    }
}
