//! Scroll probe
//!
//! Confirms scrollability empirically: nudge `scrollTop` by a pixel, read it
//! back, restore it. Catches panes whose computed `overflow-y` is `hidden`
//! but which scroll under script control.

use super::DetectedElement;
use crate::config::DetectionConfig;
use crate::page::{PageHost, Viewport};
use std::collections::HashSet;

/// True when a 1px `scrollTop` nudge is observed to move the element.
/// Any host failure counts as "does not scroll".
pub async fn can_scroll_by_probe<H: PageHost>(
    host: &H,
    config: &DetectionConfig,
    el: &H::Element,
) -> bool {
    let original = match host.scroll_box(el).await {
        Ok(sb) => sb.scroll_top,
        Err(_) => return false,
    };

    if host
        .set_scroll_top(el, original + config.probe_nudge)
        .await
        .is_err()
    {
        return false;
    }
    let readback = host.scroll_box(el).await.map(|sb| sb.scroll_top);
    if let Err(e) = host.set_scroll_top(el, original).await {
        log::warn!("Failed to restore scrollTop after probe on {:?}: {}", el, e);
    }

    match readback {
        Ok(top) => (top - original).abs() > config.probe_epsilon,
        Err(_) => false,
    }
}

/// Pipeline stage 4: hit-test the probe points and return the first
/// ancestor with enough hidden content, an adequate size and a positive probe.
pub async fn find_probe_target<H: PageHost>(
    host: &H,
    config: &DetectionConfig,
    viewport: &Viewport,
) -> Option<DetectedElement<H::Element>> {
    let mut seen = HashSet::new();

    for point in &config.probe_points {
        let x = viewport.width * point.x;
        let y = viewport.height * point.y;
        let Ok(Some(hit)) = host.element_from_point(x, y).await else {
            continue;
        };
        let Ok(chain) = host.ancestors_inclusive(&hit).await else {
            continue;
        };

        for el in chain {
            if !seen.insert(el.clone()) {
                break;
            }
            if host.is_document_root(&el).await.unwrap_or(true) {
                continue;
            }
            let (Ok(sb), Ok(rect)) = (host.scroll_box(&el).await, host.bounding_rect(&el).await)
            else {
                continue;
            };
            if sb.scrollable_delta() < config.min_scroll_delta
                || rect.width < config.min_width
                || rect.height < config.min_height
            {
                continue;
            }
            if can_scroll_by_probe(host, config, &el).await {
                let label = host.describe(&el).await.unwrap_or_default();
                return Some(DetectedElement {
                    el,
                    description: format!("probe:{}", label),
                });
            }
        }
    }

    None
}
