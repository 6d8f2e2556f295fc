//! Tile planning and stitching for full-target screenshots
//!
//! The target is captured one client-height at a time, or less when only
//! part of it is inside the viewport. Tiles are placed at
//! their scroll offset on a tall canvas; where the last tile is clamped to
//! `maxScrollTop` it overlaps its predecessor and simply paints over it.

use super::ContextMetrics;
use crate::error::{CaptureError, Result};
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage};
use std::path::Path;

/// Sub-pixel remainder below which the target counts as fully covered
const COVERAGE_SLACK: f64 = 0.5;

/// Yields successive scroll offsets, re-reading metrics at every step so a
/// growing (lazy or virtualized) target keeps producing tiles.
#[derive(Debug, Clone, Default)]
pub struct TileCursor {
    last: Option<f64>,
    visible_height: Option<f64>,
}

impl TileCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the next tile, or `None` once the bottom has been captured.
    ///
    /// `metrics` should be the freshest reading for the target; the caller
    /// is expected to report where the previous tile actually settled via
    /// [`TileCursor::settled_at`].
    pub fn next(&mut self, metrics: &ContextMetrics) -> Option<f64> {
        let max = metrics.max_scroll_top;
        let step = match self.visible_height {
            Some(visible) if visible > 0.0 => metrics.client_height.min(visible),
            _ => metrics.client_height,
        };
        let next = match self.last {
            None => 0.0,
            Some(_) if step <= 0.0 => return None,
            Some(last) if last >= max - COVERAGE_SLACK => return None,
            Some(last) => (last + step).min(max),
        };
        self.last = Some(next);
        Some(next)
    }

    /// Height of the target that one screenshot actually shows. A target
    /// reaching past the viewport edge is advanced by this instead of its
    /// full client height so consecutive tiles leave no gap.
    pub fn set_visible_height(&mut self, height: f64) {
        self.visible_height = Some(height);
    }

    /// Record the offset the target really settled at
    pub fn settled_at(&mut self, scroll_top: f64) {
        self.last = Some(scroll_top);
    }
}

/// All tile offsets for a target whose size does not change
pub fn plan_tiles(metrics: &ContextMetrics) -> Vec<f64> {
    let mut cursor = TileCursor::new();
    std::iter::from_fn(|| cursor.next(metrics)).collect()
}

/// One screenshot, taken with the target scrolled to `scroll_top`
#[derive(Debug, Clone)]
pub struct CapturedTile {
    pub scroll_top: f64,
    pub image: RgbaImage,
}

impl CapturedTile {
    /// Decode a PNG (or any format `image` understands) screenshot
    pub fn from_encoded(scroll_top: f64, bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| CaptureError::Image(format!("Failed to decode tile: {}", e)))?
            .to_rgba8();
        Ok(Self { scroll_top, image })
    }
}

/// Final PNG plus a content hash
#[derive(Debug, Clone)]
pub struct StitchedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

impl StitchedImage {
    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, &self.png).await?;
        log::info!(
            "Saved {}x{} capture to {} (sha256 {})",
            self.width,
            self.height,
            path.display(),
            self.sha256
        );
        Ok(())
    }
}

/// Paint every tile at `scroll_top * device_pixel_ratio` and encode the
/// result as PNG. Later tiles overwrite earlier ones where they overlap.
pub fn stitch_tiles(tiles: &[CapturedTile], device_pixel_ratio: f64) -> Result<StitchedImage> {
    if tiles.is_empty() {
        return Err(CaptureError::Image("No tiles to stitch".to_string()));
    }
    let ratio = if device_pixel_ratio > 0.0 { device_pixel_ratio } else { 1.0 };
    let offset = |tile: &CapturedTile| (tile.scroll_top * ratio).round().max(0.0) as u32;

    let width = tiles.iter().map(|t| t.image.width()).max().unwrap_or(0);
    let height = tiles
        .iter()
        .map(|t| offset(t) + t.image.height())
        .max()
        .unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(CaptureError::Image("Tiles are empty".to_string()));
    }

    let mut canvas = RgbaImage::new(width, height);
    for tile in tiles {
        image::imageops::replace(&mut canvas, &tile.image, 0, offset(tile) as i64);
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(canvas.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| CaptureError::Image(format!("PNG encoding failed: {}", e)))?;

    Ok(StitchedImage {
        sha256: hash_bytes(&png),
        png,
        width,
        height,
    })
}

fn hash_bytes(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
