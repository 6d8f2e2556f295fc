//! Capture-context table for one page

use super::settle::wait_until_stable;
use super::{
    ContextMetrics, InitReply, MetricsReply, PageMetrics, ReleaseReply, ScrollReply, INIT_ERROR,
    INVALID_CONTEXT, NO_SCROLL_TARGET, UNKNOWN_CONTEXT,
};
use crate::config::{CaptureConfig, SettleConfig};
use crate::detect::{Detector, ScrollTarget, TargetKind, TargetSummary};
use crate::error::{CaptureError, Result};
use crate::page::{PageHost, Rect};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What a context scrolls
#[derive(Debug, Clone, PartialEq)]
pub enum ContextTarget<E> {
    Window,
    Element(E),
}

/// A resolved scroll target bound to a context id
#[derive(Debug, Clone)]
pub struct CaptureContext<E> {
    pub target: ContextTarget<E>,
    pub description: String,
}

impl<E> CaptureContext<E> {
    pub fn kind(&self) -> TargetKind {
        match self.target {
            ContextTarget::Window => TargetKind::Window,
            ContextTarget::Element(_) => TargetKind::Element,
        }
    }

    pub fn summary(&self) -> TargetSummary {
        TargetSummary {
            kind: self.kind(),
            description: self.description.clone(),
        }
    }
}

/// Owns every capture context created on one page.
///
/// Contexts are plain records: releasing one frees nothing on the page, and
/// several contexts may point at the same element.
pub struct CaptureSessions<H: PageHost> {
    host: Arc<H>,
    detector: Detector,
    settle: SettleConfig,
    contexts: Mutex<HashMap<String, CaptureContext<H::Element>>>,
    counter: AtomicU64,
}

impl<H: PageHost> CaptureSessions<H> {
    pub fn new(host: Arc<H>, config: &CaptureConfig) -> Result<Self> {
        let detector = Detector::new(config.detection.clone())?;
        Ok(Self::with_detector(host, detector, config.settle.clone()))
    }

    pub fn with_detector(host: Arc<H>, detector: Detector, settle: SettleConfig) -> Self {
        Self {
            host,
            detector,
            settle,
            contexts: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn context_count(&self) -> usize {
        self.lock().len()
    }

    /// Detect the scroll target and open a context on it.
    ///
    /// `options` is accepted for wire compatibility and currently ignored.
    pub async fn init_capture_context(&self, options: &serde_json::Value) -> InitReply {
        log::debug!("Initializing capture context (options: {})", options);
        match self.try_init().await {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("Capture context initialization failed: {}", e);
                InitReply::failure(INIT_ERROR, e.to_string())
            }
        }
    }

    async fn try_init(&self) -> Result<InitReply> {
        let host = self.host.as_ref();
        let target = self.detector.find_scroll_target(host).await?;

        let context = match target {
            ScrollTarget::Window { description } => CaptureContext {
                target: ContextTarget::Window,
                description,
            },
            ScrollTarget::Element { el, description } => CaptureContext {
                target: ContextTarget::Element(el),
                description,
            },
            ScrollTarget::None => {
                let location = host.location().await?;
                let viewport = host.viewport().await?;
                let window = host.window_scroll().await?;
                let debug = format!(
                    "no scroll target on {} (viewport {:.0}x{:.0}, document height {:.0})",
                    location.url, viewport.width, viewport.height, window.scroll_height
                );
                return Ok(InitReply::failure(NO_SCROLL_TARGET, debug));
            }
        };

        let metrics = self.metrics_for(&context.target).await?;
        let page = self.page_metrics().await?;
        let summary = context.summary();

        let context_id = self.next_context_id();
        log::info!(
            "Opened capture context {} on {:?} target {}",
            context_id,
            summary.kind,
            summary.description
        );
        self.lock().insert(context_id.clone(), context);

        Ok(InitReply {
            ok: true,
            context_id: Some(context_id),
            target: Some(summary),
            metrics: Some(metrics),
            page: Some(page),
            ..Default::default()
        })
    }

    /// Scroll the context's target to `top` and wait for it to settle.
    ///
    /// Negative and non-finite offsets are treated as 0; the host clamps the
    /// upper end.
    pub async fn scroll_context_to(&self, context_id: &str, top: f64) -> ScrollReply {
        let Some(target) = self.target(context_id) else {
            return ScrollReply::failure(INVALID_CONTEXT);
        };
        let top = if top.is_finite() { top.max(0.0) } else { 0.0 };

        match self.scroll_and_settle(&target, top).await {
            Ok(settled) => {
                log::debug!("Context {} settled at {:.1} (requested {:.1})", context_id, settled, top);
                ScrollReply::settled(settled)
            }
            Err(e) => {
                log::warn!("Scrolling context {} failed: {}", context_id, e);
                ScrollReply::failure(e.to_string())
            }
        }
    }

    async fn scroll_and_settle(&self, target: &ContextTarget<H::Element>, top: f64) -> Result<f64> {
        let host = self.host.as_ref();
        match target {
            ContextTarget::Window => host.scroll_window_to(top).await?,
            ContextTarget::Element(el) => host.set_scroll_top(el, top).await?,
        }
        wait_until_stable(
            || host.next_frame(),
            || async move { Ok::<f64, CaptureError>(self.metrics_for(target).await?.scroll_top) },
            &self.settle,
        )
        .await
    }

    /// Current metrics of a live context; never moves the scroll position
    pub async fn get_context_metrics(&self, context_id: &str) -> MetricsReply {
        let Some(target) = self.target(context_id) else {
            return MetricsReply::failure(INVALID_CONTEXT);
        };
        match self.metrics_for(&target).await {
            Ok(metrics) => MetricsReply {
                ok: true,
                metrics: Some(metrics),
                error: None,
            },
            Err(e) => MetricsReply::failure(e.to_string()),
        }
    }

    pub fn release_capture_context(&self, context_id: &str) -> ReleaseReply {
        match self.lock().remove(context_id) {
            Some(context) => {
                log::info!("Released capture context {} ({})", context_id, context.description);
                ReleaseReply { ok: true, error: None }
            }
            None => ReleaseReply {
                ok: false,
                error: Some(UNKNOWN_CONTEXT.to_string()),
            },
        }
    }

    pub async fn page_metrics(&self) -> Result<PageMetrics> {
        let host = self.host.as_ref();
        let viewport = host.viewport().await?;
        let window = host.window_scroll().await?;
        let location = host.location().await?;
        Ok(PageMetrics {
            scroll_height: window.scroll_height,
            scroll_width: window.scroll_width,
            viewport_height: viewport.height,
            viewport_width: viewport.width,
            scroll_y: window.scroll_top,
            scroll_x: window.scroll_left,
            device_pixel_ratio: viewport.device_pixel_ratio,
            url: location.url,
            title: location.title,
        })
    }

    /// Instant window scroll; returns the resulting offset
    pub async fn scroll_window_to(&self, y: f64) -> Result<f64> {
        let y = if y.is_finite() { y.max(0.0) } else { 0.0 };
        self.host.scroll_window_to(y).await?;
        Ok(self.host.window_scroll().await?.scroll_top)
    }

    /// Viewport-relative region showing the context's target, or `None` for
    /// an unknown id
    pub async fn context_clip(&self, context_id: &str) -> Result<Option<Rect>> {
        let Some(target) = self.target(context_id) else {
            return Ok(None);
        };
        let view = self.host.viewport().await?.rect();
        let clip = match target {
            ContextTarget::Window => view,
            ContextTarget::Element(el) => {
                let rect = self.host.bounding_rect(&el).await?;
                rect.intersection(&view).unwrap_or_default()
            }
        };
        Ok(Some(clip))
    }

    async fn metrics_for(&self, target: &ContextTarget<H::Element>) -> Result<ContextMetrics> {
        let sb = match target {
            ContextTarget::Window => self.host.window_scroll().await?,
            ContextTarget::Element(el) => self.host.scroll_box(el).await?,
        };
        Ok(sb.into())
    }

    fn target(&self, context_id: &str) -> Option<ContextTarget<H::Element>> {
        self.lock().get(context_id).map(|c| c.target.clone())
    }

    fn next_context_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("ctx_{}_{}", n, chrono::Utc::now().timestamp_millis())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CaptureContext<H::Element>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{NodeSpec, PageModel};
    use serde_json::json;

    fn pane_page() -> PageModel {
        let mut page = PageModel::new("https://example.com/", 1000.0, 800.0).unwrap();
        page.append(
            page.body_id(),
            NodeSpec::div()
                .id("pane")
                .rect(100.0, 100.0, 800.0, 600.0)
                .overflow_y("auto")
                .scroll_height(3000.0),
        );
        page
    }

    fn sessions(page: PageModel) -> CaptureSessions<PageModel> {
        CaptureSessions::new(Arc::new(page), &CaptureConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_ids_are_unique() {
        let sessions = sessions(pane_page());
        let a = sessions.init_capture_context(&json!({})).await;
        let b = sessions.init_capture_context(&json!({})).await;
        assert!(a.ok && b.ok);
        assert_ne!(a.context_id, b.context_id);
        assert!(a.context_id.unwrap().starts_with("ctx_1_"));
        assert_eq!(sessions.context_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_twice_reports_unknown() {
        let sessions = sessions(pane_page());
        let id = sessions
            .init_capture_context(&json!({}))
            .await
            .context_id
            .unwrap();
        assert!(sessions.release_capture_context(&id).ok);
        let again = sessions.release_capture_context(&id);
        assert!(!again.ok);
        assert_eq!(again.error.as_deref(), Some(UNKNOWN_CONTEXT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_offset_clamps_to_zero() {
        let sessions = sessions(pane_page());
        let id = sessions
            .init_capture_context(&json!({}))
            .await
            .context_id
            .unwrap();
        sessions.scroll_context_to(&id, 700.0).await;
        let reply = sessions.scroll_context_to(&id, f64::INFINITY).await;
        assert_eq!(reply.scroll_top, Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_failure_becomes_init_error() {
        let page = pane_page();
        page.fail_viewport(true);
        let reply = sessions(page).init_capture_context(&json!({})).await;
        assert!(!reply.ok);
        assert_eq!(reply.reason.as_deref(), Some(INIT_ERROR));
        assert!(reply.debug.unwrap().contains("viewport"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_element_clip_is_limited_to_viewport() {
        let mut page = PageModel::new("https://example.com/", 1000.0, 800.0).unwrap();
        page.append(
            page.body_id(),
            NodeSpec::div()
                .rect(0.0, 400.0, 1000.0, 600.0)
                .overflow_y("scroll")
                .scroll_height(5000.0),
        );
        let sessions = sessions(page);
        let id = sessions
            .init_capture_context(&json!({}))
            .await
            .context_id
            .unwrap();
        let clip = sessions.context_clip(&id).await.unwrap().unwrap();
        assert_eq!(clip, Rect::new(0.0, 400.0, 1000.0, 400.0));
        assert_eq!(sessions.context_clip("ctx_404").await.unwrap(), None);
    }
}
