//! Page capability interface
//!
//! Detection and capture never touch a browser directly. They go through
//! [`PageHost`], which exposes opaque element handles and exactly the DOM
//! operations scroll-target detection needs. Two hosts ship with the crate:
//! [`model::PageModel`] (in-memory layout model) and
//! [`crate::browser::live::LivePage`] (Chrome over CDP).

pub mod model;
pub mod selector;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

pub use model::{NodeId, NodeSpec, PageModel};

/// Rectangle in viewport (CSS pixel) coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.right() && y >= self.top && y < self.bottom()
    }

    /// Overlap of two rectangles, `None` when they do not intersect
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > left && bottom > top {
            Some(Rect::new(left, top, right - left, bottom - top))
        } else {
            None
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }
}

/// The layout viewport of the page
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub device_pixel_ratio: f64,
}

impl Viewport {
    pub fn rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

/// Scroll geometry of an element or of the document scrolling element
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollBox {
    pub scroll_top: f64,
    pub scroll_left: f64,
    pub scroll_height: f64,
    pub scroll_width: f64,
    pub client_height: f64,
    pub client_width: f64,
}

impl ScrollBox {
    /// `scrollHeight - clientHeight`, may be negative for odd layouts
    pub fn scrollable_delta(&self) -> f64 {
        self.scroll_height - self.client_height
    }

    pub fn max_scroll_top(&self) -> f64 {
        self.scrollable_delta().max(0.0)
    }
}

/// Computed style properties the classifier looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub overflow_y: String,
}

impl ComputedStyle {
    pub fn is_hidden(&self) -> bool {
        self.display == "none" || self.visibility == "hidden"
    }

    /// `overflow-y` lets the element scroll under user control
    pub fn overflow_scrolls(&self) -> bool {
        matches!(self.overflow_y.as_str(), "auto" | "scroll" | "overlay")
    }
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            overflow_y: "visible".to_string(),
        }
    }
}

/// Where the page lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLocation {
    pub url: String,
    pub hostname: String,
    pub pathname: String,
    pub title: String,
}

/// Operations scroll-target detection needs from a page.
///
/// Every method may fail; callers in the classifier treat a failure as
/// "not a candidate" rather than propagating it.
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Opaque, cheaply cloned element reference
    type Element: Clone + Eq + Hash + Debug + Send + Sync;

    async fn location(&self) -> Result<PageLocation>;

    async fn viewport(&self) -> Result<Viewport>;

    /// Scroll geometry of `document.scrollingElement`
    async fn window_scroll(&self) -> Result<ScrollBox>;

    async fn scroll_window_to(&self, top: f64) -> Result<()>;

    async fn body(&self) -> Result<Option<Self::Element>>;

    /// True for `<body>` and the root `<html>` element
    async fn is_document_root(&self, el: &Self::Element) -> Result<bool>;

    /// Topmost element at a viewport point
    async fn element_from_point(&self, x: f64, y: f64) -> Result<Option<Self::Element>>;

    async fn parent(&self, el: &Self::Element) -> Result<Option<Self::Element>>;

    /// Element children in document order
    async fn children(&self, el: &Self::Element) -> Result<Vec<Self::Element>>;

    async fn query_selector(&self, selector: &str) -> Result<Option<Self::Element>>;

    async fn is_connected(&self, el: &Self::Element) -> Result<bool>;

    async fn computed_style(&self, el: &Self::Element) -> Result<ComputedStyle>;

    async fn bounding_rect(&self, el: &Self::Element) -> Result<Rect>;

    async fn scroll_box(&self, el: &Self::Element) -> Result<ScrollBox>;

    async fn set_scroll_top(&self, el: &Self::Element, top: f64) -> Result<()>;

    /// Short diagnostic label such as `div#main.content`
    async fn describe(&self, el: &Self::Element) -> Result<String>;

    /// Resolves after the next paint tick
    async fn next_frame(&self) -> Result<()>;

    /// The element itself followed by its ancestors, nearest first
    async fn ancestors_inclusive(&self, el: &Self::Element) -> Result<Vec<Self::Element>> {
        let mut chain = vec![el.clone()];
        let mut current = el.clone();
        while let Some(parent) = self.parent(&current).await? {
            chain.push(parent.clone());
            current = parent;
        }
        Ok(chain)
    }

    /// Element descendants of `root` in document order, at most `limit`
    async fn descendants(&self, root: &Self::Element, limit: usize) -> Result<Vec<Self::Element>> {
        let mut out = Vec::new();
        let mut stack = self.children(root).await?;
        stack.reverse();
        while let Some(el) = stack.pop() {
            if out.len() >= limit {
                break;
            }
            let mut kids = self.children(&el).await?;
            kids.reverse();
            stack.extend(kids);
            out.push(el);
        }
        Ok(out)
    }

    /// Number of ancestors between the element and `<body>`
    async fn dom_depth(&self, el: &Self::Element) -> Result<usize> {
        let mut depth = 0;
        let mut current = el.clone();
        while let Some(parent) = self.parent(&current).await? {
            if self.is_document_root(&parent).await? {
                break;
            }
            depth += 1;
            current = parent;
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(50.0, 50.0, 100.0, 100.0);
        assert_eq!(a.intersection(&b), Some(Rect::new(50.0, 50.0, 50.0, 50.0)));

        let c = Rect::new(100.0, 0.0, 10.0, 10.0);
        assert_eq!(a.intersection(&c), None, "touching edges do not overlap");
    }

    #[test]
    fn test_scroll_box_max_scroll_top_is_never_negative() {
        let sb = ScrollBox {
            scroll_height: 100.0,
            client_height: 400.0,
            ..Default::default()
        };
        assert_eq!(sb.scrollable_delta(), -300.0);
        assert_eq!(sb.max_scroll_top(), 0.0);
    }

    #[test]
    fn test_overflow_tokens() {
        for token in ["auto", "scroll", "overlay"] {
            let style = ComputedStyle {
                overflow_y: token.to_string(),
                ..Default::default()
            };
            assert!(style.overflow_scrolls(), "{} should scroll", token);
        }
        for token in ["visible", "hidden", "clip"] {
            let style = ComputedStyle {
                overflow_y: token.to_string(),
                ..Default::default()
            };
            assert!(!style.overflow_scrolls(), "{} should not scroll", token);
        }
    }
}
