//! Candidate classifier
//!
//! Decides whether an element looks like a genuine content pane: visible,
//! user-scrollable, carrying a meaningful amount of hidden content, large
//! enough and on screen. The filter is deliberately conservative so tooltips,
//! dropdowns and decorative overflow boxes never qualify.

use crate::config::DetectionConfig;
use crate::page::{ComputedStyle, PageHost, Rect, ScrollBox, Viewport};

/// Why an element is not a scrollable candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    DocumentRoot,
    Detached,
    StyleUnavailable,
    Hidden,
    OverflowNotScrollable,
    InsufficientScroll,
    TooSmall,
    OutsideViewport,
}

/// Everything the classifier read about an element
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFacts {
    pub style: ComputedStyle,
    pub scroll: ScrollBox,
    pub rect: Rect,
}

impl CandidateFacts {
    /// Checks in order: visibility, overflow, scroll delta, size, on-screen
    pub fn check(&self, config: &DetectionConfig, viewport: &Viewport) -> Result<(), Rejection> {
        if self.style.is_hidden() {
            return Err(Rejection::Hidden);
        }
        if !self.style.overflow_scrolls() {
            return Err(Rejection::OverflowNotScrollable);
        }
        self.check_geometry(config, viewport)
    }

    /// Passes every check except the `overflow-y` one. Custom-scrollbar
    /// libraries set `overflow: hidden` and drive `scrollTop` from script.
    pub fn plausible_ignoring_overflow(
        &self,
        config: &DetectionConfig,
        viewport: &Viewport,
    ) -> bool {
        !self.style.is_hidden() && self.check_geometry(config, viewport).is_ok()
    }

    fn check_geometry(&self, config: &DetectionConfig, viewport: &Viewport) -> Result<(), Rejection> {
        if self.scroll.scrollable_delta() < config.min_scroll_delta {
            return Err(Rejection::InsufficientScroll);
        }
        if self.rect.width < config.min_width || self.rect.height < config.min_height {
            return Err(Rejection::TooSmall);
        }
        if self.rect.intersection(&viewport.rect()).is_none() {
            return Err(Rejection::OutsideViewport);
        }
        Ok(())
    }
}

/// Outcome of classifying one element
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(CandidateFacts),
    Rejected {
        reason: Rejection,
        facts: Option<CandidateFacts>,
    },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }

    pub fn facts(&self) -> Option<&CandidateFacts> {
        match self {
            Verdict::Accepted(facts) => Some(facts),
            Verdict::Rejected { facts, .. } => facts.as_ref(),
        }
    }

    fn rejected(reason: Rejection) -> Self {
        Verdict::Rejected {
            reason,
            facts: None,
        }
    }
}

/// Read the facts for `el` and run the ordered checks.
///
/// Host failures never escape: an element whose style or geometry cannot be
/// read is simply not a candidate.
pub async fn classify<H: PageHost>(
    host: &H,
    config: &DetectionConfig,
    viewport: &Viewport,
    el: &H::Element,
) -> Verdict {
    match host.is_document_root(el).await {
        Ok(true) => return Verdict::rejected(Rejection::DocumentRoot),
        Ok(false) => {}
        Err(e) => {
            log::debug!("Classifier could not inspect {:?}: {}", el, e);
            return Verdict::rejected(Rejection::StyleUnavailable);
        }
    }

    if !host.is_connected(el).await.unwrap_or(false) {
        return Verdict::rejected(Rejection::Detached);
    }

    let style = match host.computed_style(el).await {
        Ok(style) => style,
        Err(e) => {
            log::debug!("Computed style unavailable for {:?}: {}", el, e);
            return Verdict::rejected(Rejection::StyleUnavailable);
        }
    };

    let (scroll, rect) = match (host.scroll_box(el).await, host.bounding_rect(el).await) {
        (Ok(scroll), Ok(rect)) => (scroll, rect),
        (Err(e), _) | (_, Err(e)) => {
            log::debug!("Geometry unavailable for {:?}: {}", el, e);
            return Verdict::rejected(Rejection::StyleUnavailable);
        }
    };

    let facts = CandidateFacts {
        style,
        scroll,
        rect,
    };
    match facts.check(config, viewport) {
        Ok(()) => Verdict::Accepted(facts),
        Err(reason) => Verdict::Rejected {
            reason,
            facts: Some(facts),
        },
    }
}

pub async fn is_scrollable_candidate<H: PageHost>(
    host: &H,
    config: &DetectionConfig,
    viewport: &Viewport,
    el: &H::Element,
) -> bool {
    classify(host, config, viewport, el).await.is_accepted()
}
