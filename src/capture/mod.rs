//! Capture contexts
//!
//! A capture context binds a resolved scroll target to an opaque id for the
//! duration of a multi-shot screenshot. The orchestrator calls
//! init → scroll (repeatedly) → metrics (optionally) → release.
//!
//! All public operations return reply structs carrying `ok` and, on failure,
//! a machine-readable reason or error string. They never return `Err`.

pub mod session;
pub mod settle;
pub mod tiles;

use crate::detect::TargetSummary;
use crate::page::ScrollBox;
use serde::{Deserialize, Serialize};

pub use session::{CaptureContext, CaptureSessions, ContextTarget};
pub use settle::wait_until_stable;
pub use tiles::{plan_tiles, stitch_tiles, CapturedTile, StitchedImage, TileCursor};

/// Detection exhausted every stage
pub const NO_SCROLL_TARGET: &str = "NO_SCROLL_TARGET";
/// Detection failed on a host error
pub const INIT_ERROR: &str = "INIT_ERROR";
pub const INVALID_CONTEXT: &str = "Invalid contextId";
pub const UNKNOWN_CONTEXT: &str = "Unknown contextId";

/// Scroll geometry reported for a context
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
    /// Always `max(0, scroll_height - client_height)`
    pub max_scroll_top: f64,
    pub client_width: f64,
    pub scroll_width: f64,
}

impl From<ScrollBox> for ContextMetrics {
    fn from(sb: ScrollBox) -> Self {
        Self {
            scroll_top: sb.scroll_top,
            scroll_height: sb.scroll_height,
            client_height: sb.client_height,
            max_scroll_top: sb.max_scroll_top(),
            client_width: sb.client_width,
            scroll_width: sb.scroll_width,
        }
    }
}

/// Whole-page metrics, as answered to `GET_PAGE_METRICS`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    pub scroll_height: f64,
    pub scroll_width: f64,
    pub viewport_height: f64,
    pub viewport_width: f64,
    pub scroll_y: f64,
    pub scroll_x: f64,
    pub device_pixel_ratio: f64,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ContextMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl InitReply {
    pub fn failure(reason: &str, debug: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
            debug: Some(debug.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_top: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrollReply {
    pub fn settled(scroll_top: f64) -> Self {
        Self {
            ok: true,
            scroll_top: Some(scroll_top),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            scroll_top: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ContextMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricsReply {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            metrics: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to `SCROLL_TO`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollToReply {
    #[serde(rename = "scrollY")]
    pub scroll_y: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_derive_max_scroll_top() {
        let metrics = ContextMetrics::from(ScrollBox {
            scroll_top: 10.0,
            scroll_height: 300.0,
            client_height: 500.0,
            ..Default::default()
        });
        assert_eq!(metrics.max_scroll_top, 0.0);
    }

    #[test]
    fn test_failure_replies_omit_absent_fields() {
        let json = serde_json::to_value(InitReply::failure(NO_SCROLL_TARGET, "none")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ok": false, "reason": "NO_SCROLL_TARGET", "debug": "none"})
        );

        let json = serde_json::to_value(ScrollReply::failure(INVALID_CONTEXT)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ok": false, "error": "Invalid contextId"})
        );
    }

    #[test]
    fn test_page_metrics_wire_names() {
        let metrics = PageMetrics {
            scroll_height: 2000.0,
            scroll_width: 1000.0,
            viewport_height: 800.0,
            viewport_width: 1000.0,
            scroll_y: 5.0,
            scroll_x: 0.0,
            device_pixel_ratio: 2.0,
            url: "https://example.com/".to_string(),
            title: "Example".to_string(),
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["scrollY"], 5.0);
        assert_eq!(json["devicePixelRatio"], 2.0);
        assert_eq!(json["viewportHeight"], 800.0);
    }
}
