//! Tunables for scroll-target detection, scroll settling and tiled capture.
//!
//! Every struct has a `Default` matching the behaviour the capture pipeline was
//! tuned with, and every field can be overridden from a JSON file:
//!
//! ```json
//! {
//!   "detection": { "min_scroll_delta": 48.0 },
//!   "settle": { "timeout_ms": 1200 }
//! }
//! ```

use crate::error::{CaptureError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// A point expressed as fractions of the viewport width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativePoint {
    pub x: f64,
    pub y: f64,
}

impl RelativePoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Weights of the heuristic score
/// `coverage * coverage_weight + scroll_factor * scroll_weight
///  - center_distance * center_penalty + dom_depth * depth_weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub coverage: f64,
    pub scroll: f64,
    pub center_penalty: f64,
    pub depth: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            coverage: 6.0,
            scroll: 2.0,
            center_penalty: 0.75,
            depth: 0.01,
        }
    }
}

/// A user-supplied known-selector entry, tried before the built-in table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownSelectorSpec {
    /// Short label used in target descriptions (`known:<label>:<selector>`)
    pub label: String,

    /// Regex matched against the page hostname
    pub host: String,

    /// Optional regex matched against the page path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// CSS selectors in trust order
    pub selectors: Vec<String>,
}

/// Thresholds used by the classifier, scorer and pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum `scrollHeight - clientHeight` for a candidate, and the window
    /// overflow that short-circuits to a window target
    pub min_scroll_delta: f64,

    /// Minimum bounding box width of a candidate
    pub min_width: f64,

    /// Minimum bounding box height of a candidate
    pub min_height: f64,

    /// Hit-test points for the heuristic scorer
    pub sample_points: Vec<RelativePoint>,

    /// Hit-test points for the probe fallback stage
    pub probe_points: Vec<RelativePoint>,

    /// Cap on elements visited by the descendant walk fallback
    pub max_walk_nodes: usize,

    pub weights: ScoreWeights,

    /// Pixels added to `scrollTop` by the probe
    pub probe_nudge: f64,

    /// Minimum movement for the probe to count as a scroll
    pub probe_epsilon: f64,

    /// Overflow that still counts for the last-resort window target
    pub window_overflow_slack: f64,

    /// Extra host-scoped selectors, tried before the built-in table
    pub extra_known_selectors: Vec<KnownSelectorSpec>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_scroll_delta: 32.0,
            min_width: 300.0,
            min_height: 250.0,
            sample_points: Self::default_sample_points(),
            probe_points: Self::default_probe_points(),
            max_walk_nodes: 5000,
            weights: ScoreWeights::default(),
            probe_nudge: 1.0,
            probe_epsilon: 0.5,
            window_overflow_slack: 1.0,
            extra_known_selectors: Vec::new(),
        }
    }
}

impl DetectionConfig {
    /// Center, the four edge midpoints of the inner half, and the four
    /// corner-ish points at 25%/75%
    pub fn default_sample_points() -> Vec<RelativePoint> {
        vec![
            RelativePoint::new(0.5, 0.5),
            RelativePoint::new(0.5, 0.25),
            RelativePoint::new(0.5, 0.75),
            RelativePoint::new(0.25, 0.5),
            RelativePoint::new(0.75, 0.5),
            RelativePoint::new(0.25, 0.25),
            RelativePoint::new(0.75, 0.25),
            RelativePoint::new(0.25, 0.75),
            RelativePoint::new(0.75, 0.75),
        ]
    }

    /// Center, upper-center and lower-center
    pub fn default_probe_points() -> Vec<RelativePoint> {
        vec![
            RelativePoint::new(0.5, 0.5),
            RelativePoint::new(0.5, 0.25),
            RelativePoint::new(0.5, 0.75),
        ]
    }
}

/// How `scroll_context_to` decides that a scroll has come to rest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Consecutive paint ticks that must each move less than `epsilon`
    pub stable_frames: u32,

    /// Movement (px) below which a tick counts as stable
    pub epsilon: f64,

    /// Overall deadline for the settle wait
    pub timeout_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            stable_frames: 2,
            epsilon: 0.5,
            timeout_ms: 800,
        }
    }
}

impl SettleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Everything the capture binary can be configured with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub detection: DetectionConfig,
    pub settle: SettleConfig,
    pub tiles: TileConfig,
}

/// Limits for tiled full-page capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Hard cap on screenshots per capture, guards against endless
    /// virtualized lists
    pub max_tiles: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self { max_tiles: 40 }
    }
}

impl CaptureConfig {
    /// Load a config file; absent fields keep their defaults
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| CaptureError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if !(d.min_scroll_delta.is_finite() && d.min_scroll_delta >= 0.0) {
            return Err(CaptureError::Config(
                "detection.min_scroll_delta must be a non-negative number".to_string(),
            ));
        }
        if d.sample_points.is_empty() {
            return Err(CaptureError::Config(
                "detection.sample_points must not be empty".to_string(),
            ));
        }
        let out_of_range = d
            .sample_points
            .iter()
            .chain(d.probe_points.iter())
            .any(|p| !(0.0..=1.0).contains(&p.x) || !(0.0..=1.0).contains(&p.y));
        if out_of_range {
            return Err(CaptureError::Config(
                "sample and probe points must lie within 0.0..=1.0".to_string(),
            ));
        }
        if self.settle.stable_frames == 0 {
            return Err(CaptureError::Config(
                "settle.stable_frames must be at least 1".to_string(),
            ));
        }
        if self.tiles.max_tiles == 0 {
            return Err(CaptureError::Config(
                "tiles.max_tiles must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_detection_config() {
        let config = DetectionConfig::default();
        assert_eq!(config.min_scroll_delta, 32.0);
        assert_eq!(config.min_width, 300.0);
        assert_eq!(config.min_height, 250.0);
        assert_eq!(config.sample_points.len(), 9);
        assert_eq!(config.probe_points.len(), 3);
        assert_eq!(config.max_walk_nodes, 5000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            CaptureConfig::from_json(r#"{"settle": {"timeout_ms": 1500}}"#).expect("valid config");
        assert_eq!(config.settle.timeout(), Duration::from_millis(1500));
        assert_eq!(config.settle.stable_frames, 2);
        assert_eq!(config.detection.weights, ScoreWeights::default());
    }

    #[test]
    fn test_rejects_out_of_range_sample_point() {
        let err = CaptureConfig::from_json(
            r#"{"detection": {"sample_points": [{"x": 1.5, "y": 0.5}]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_stable_frames() {
        assert!(CaptureConfig::from_json(r#"{"settle": {"stable_frames": 0}}"#).is_err());
    }
}
