//! Scroll-target detection
//!
//! [`Detector::find_scroll_target`] resolves the page's primary scrollable
//! region through a strict five-stage waterfall:
//!
//! 1. known host-scoped selectors
//! 2. the window, when the document overflows by more than the threshold
//! 3. heuristic scoring of sampled candidates
//! 4. scroll probing under three viewport points
//! 5. the window, when the document overflows at all
//!
//! Each stage runs only if the previous one found nothing.

pub mod classifier;
pub mod heuristic;
pub mod known;
pub mod probe;

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::page::PageHost;
use serde::{Deserialize, Serialize};

pub use classifier::{classify, is_scrollable_candidate, CandidateFacts, Rejection, Verdict};
pub use known::KnownSelectorTable;
pub use probe::can_scroll_by_probe;

/// An element picked by one of the detection stages
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedElement<E> {
    pub el: E,
    /// Which stage or selector produced the element
    pub description: String,
}

/// Result of one detection pass
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollTarget<E> {
    /// The document itself scrolls
    Window { description: String },
    Element { el: E, description: String },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Window,
    Element,
    None,
}

/// Wire form of a target, without the element handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub kind: TargetKind,
    pub description: String,
}

impl<E> ScrollTarget<E> {
    pub fn kind(&self) -> TargetKind {
        match self {
            ScrollTarget::Window { .. } => TargetKind::Window,
            ScrollTarget::Element { .. } => TargetKind::Element,
            ScrollTarget::None => TargetKind::None,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ScrollTarget::Window { description } | ScrollTarget::Element { description, .. } => {
                description
            }
            ScrollTarget::None => "none",
        }
    }

    pub fn element(&self) -> Option<&E> {
        match self {
            ScrollTarget::Element { el, .. } => Some(el),
            _ => None,
        }
    }

    pub fn summary(&self) -> TargetSummary {
        TargetSummary {
            kind: self.kind(),
            description: self.description().to_string(),
        }
    }
}

impl<E> From<DetectedElement<E>> for ScrollTarget<E> {
    fn from(found: DetectedElement<E>) -> Self {
        ScrollTarget::Element {
            el: found.el,
            description: found.description,
        }
    }
}

/// Detection configuration plus the compiled known-selector table
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectionConfig,
    known: KnownSelectorTable,
}

impl Detector {
    pub fn new(config: DetectionConfig) -> Result<Self> {
        let known = KnownSelectorTable::with_extra(&config.extra_known_selectors)?;
        Ok(Self { config, known })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn known_selectors(&self) -> &KnownSelectorTable {
        &self.known
    }

    pub async fn is_scrollable_candidate<H: PageHost>(&self, host: &H, el: &H::Element) -> bool {
        match host.viewport().await {
            Ok(viewport) => is_scrollable_candidate(host, &self.config, &viewport, el).await,
            Err(_) => false,
        }
    }

    pub async fn find_known_selector_target<H: PageHost>(
        &self,
        host: &H,
    ) -> Result<Option<DetectedElement<H::Element>>> {
        let viewport = host.viewport().await?;
        let location = host.location().await?;
        Ok(self
            .known
            .find_target(host, &self.config, &viewport, &location)
            .await)
    }

    pub async fn find_best_scroll_target<H: PageHost>(
        &self,
        host: &H,
    ) -> Result<Option<DetectedElement<H::Element>>> {
        let viewport = host.viewport().await?;
        Ok(heuristic::find_best_scroll_target(host, &self.config, &viewport).await)
    }

    /// Run the five-stage waterfall. Host failures outside the per-element
    /// checks (viewport, location, window metrics) are returned as errors.
    pub async fn find_scroll_target<H: PageHost>(&self, host: &H) -> Result<ScrollTarget<H::Element>> {
        let viewport = host.viewport().await?;
        let location = host.location().await?;
        let cfg = &self.config;

        log::debug!("Stage 1: known selectors for {}{}", location.hostname, location.pathname);
        if let Some(found) = self.known.find_target(host, cfg, &viewport, &location).await {
            log::info!("Scroll target found by known selector: {}", found.description);
            return Ok(found.into());
        }

        let window = host.window_scroll().await?;
        let window_delta = window.scrollable_delta();
        log::debug!("Stage 2: window scroll delta {:.0}px", window_delta);
        if window_delta > cfg.min_scroll_delta {
            log::info!("Scroll target is the window (delta {:.0}px)", window_delta);
            return Ok(ScrollTarget::Window {
                description: "window".to_string(),
            });
        }

        log::debug!("Stage 3: heuristic scoring");
        if let Some(found) = heuristic::find_best_scroll_target(host, cfg, &viewport).await {
            log::info!("Scroll target found by heuristics: {}", found.description);
            return Ok(found.into());
        }

        log::debug!("Stage 4: probe fallback");
        if let Some(found) = probe::find_probe_target(host, cfg, &viewport).await {
            log::info!("Scroll target found by probing: {}", found.description);
            return Ok(found.into());
        }

        log::debug!("Stage 5: minimal window overflow");
        if window.scroll_height > window.client_height + cfg.window_overflow_slack {
            log::info!(
                "Scroll target is the window (minimal overflow {:.0}px)",
                window_delta
            );
            return Ok(ScrollTarget::Window {
                description: "window:minimal-overflow".to_string(),
            });
        }

        log::warn!("No scroll target found on {}", location.url);
        Ok(ScrollTarget::None)
    }
}
