//! Heuristic scorer
//!
//! Collects scrollable candidates under a grid of viewport sample points (or,
//! failing that, anywhere in the body) and picks the one that best looks like
//! the page's main content pane.

use super::classifier::{classify, CandidateFacts, Verdict};
use super::DetectedElement;
use crate::config::{DetectionConfig, ScoreWeights};
use crate::page::{PageHost, Rect, ScrollBox, Viewport};
use std::collections::HashSet;

/// A classifier-approved element with the facts read while classifying it
#[derive(Debug, Clone)]
pub struct Candidate<E> {
    pub el: E,
    pub facts: CandidateFacts,
}

/// Score of one candidate:
/// `coverage * 6 + scroll_factor * 2 - center_distance * 0.75 + depth * 0.01`
/// with the default weights.
pub fn score(
    rect: &Rect,
    scroll: &ScrollBox,
    depth: usize,
    viewport: &Viewport,
    weights: &ScoreWeights,
) -> f64 {
    let view = viewport.rect();
    let viewport_area = view.area().max(1.0);

    let (coverage, center_distance) = match rect.intersection(&view) {
        Some(visible) => {
            let (cx, cy) = visible.center();
            let (vx, vy) = view.center();
            let half_diagonal = (vx * vx + vy * vy).sqrt().max(1.0);
            let distance = ((cx - vx).powi(2) + (cy - vy).powi(2)).sqrt() / half_diagonal;
            (visible.area() / viewport_area, distance)
        }
        None => (0.0, 1.0),
    };

    let client_height = scroll.client_height.max(1.0);
    let scroll_factor = (scroll.scrollable_delta() / (2.0 * client_height)).clamp(0.0, 1.0);

    coverage * weights.coverage + scroll_factor * weights.scroll
        - center_distance * weights.center_penalty
        + depth as f64 * weights.depth
}

/// Candidates under the sample points, ancestors included, in first-seen order
pub async fn sample_candidates<H: PageHost>(
    host: &H,
    config: &DetectionConfig,
    viewport: &Viewport,
) -> Vec<Candidate<H::Element>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for point in &config.sample_points {
        let x = viewport.width * point.x;
        let y = viewport.height * point.y;
        let hit = match host.element_from_point(x, y).await {
            Ok(Some(el)) => el,
            Ok(None) => continue,
            Err(e) => {
                log::debug!("Hit test at ({:.0}, {:.0}) failed: {}", x, y, e);
                continue;
            }
        };
        let Ok(chain) = host.ancestors_inclusive(&hit).await else {
            continue;
        };
        for el in chain {
            // A seen element means its whole ancestor chain was seen too
            if !seen.insert(el.clone()) {
                break;
            }
            if let Verdict::Accepted(facts) = classify(host, config, viewport, &el).await {
                out.push(Candidate { el, facts });
            }
        }
    }

    out
}

/// Depth-first walk of the body, capped at `max_walk_nodes` visited elements
pub async fn walk_candidates<H: PageHost>(
    host: &H,
    config: &DetectionConfig,
    viewport: &Viewport,
) -> Vec<Candidate<H::Element>> {
    let Ok(Some(body)) = host.body().await else {
        return Vec::new();
    };
    let nodes = match host.descendants(&body, config.max_walk_nodes).await {
        Ok(nodes) => nodes,
        Err(e) => {
            log::debug!("Descendant walk failed: {}", e);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for el in nodes {
        if let Verdict::Accepted(facts) = classify(host, config, viewport, &el).await {
            out.push(Candidate { el, facts });
        }
    }
    out
}

/// Highest-scoring candidate. Exact ties keep the first-seen candidate.
pub async fn find_best_scroll_target<H: PageHost>(
    host: &H,
    config: &DetectionConfig,
    viewport: &Viewport,
) -> Option<DetectedElement<H::Element>> {
    let mut candidates = sample_candidates(host, config, viewport).await;
    if candidates.is_empty() {
        log::debug!("No candidates under sample points, walking the document");
        candidates = walk_candidates(host, config, viewport).await;
    }

    let mut best: Option<(f64, Candidate<H::Element>)> = None;
    for candidate in candidates {
        let depth = host.dom_depth(&candidate.el).await.unwrap_or(0);
        let s = score(
            &candidate.facts.rect,
            &candidate.facts.scroll,
            depth,
            viewport,
            &config.weights,
        );
        log::trace!("Candidate {:?} scored {:.3}", candidate.el, s);
        if best.as_ref().map_or(true, |(top, _)| s > *top) {
            best = Some((s, candidate));
        }
    }

    let (s, winner) = best?;
    let label = host.describe(&winner.el).await.unwrap_or_default();
    Some(DetectedElement {
        el: winner.el,
        description: format!("heuristic:{} score={:.3}", label, s),
    })
}
