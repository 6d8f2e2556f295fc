//! Shared in-memory pages for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use scroll_capture::page::{
    ComputedStyle, NodeId, NodeSpec, PageHost, PageLocation, PageModel, Rect, ScrollBox, Viewport,
};
use scroll_capture::Result;
use std::sync::atomic::{AtomicUsize, Ordering};

/// `#x`: a 500x400 `overflow-y:auto` pane holding 2000px of content,
/// centered in a 1000x800 viewport
pub fn centered_pane() -> (PageModel, NodeId) {
    let mut page = PageModel::new("https://example.com/articles/1", 1000.0, 800.0).unwrap();
    let pane = page.append(
        page.body_id(),
        NodeSpec::div()
            .id("x")
            .rect(250.0, 200.0, 500.0, 400.0)
            .overflow_y("auto")
            .scroll_height(2000.0)
            .child(NodeSpec::new("p").rect(250.0, 200.0, 500.0, 2000.0)),
    );
    (page, pane)
}

/// A Google Docs editor: the `.kix-appview-editor` pane plus a narrower
/// scrolling outline that would also qualify heuristically
pub fn docs_editor(overflow: &str) -> (PageModel, NodeId) {
    let mut page =
        PageModel::new("https://docs.google.com/document/d/abc/edit", 1200.0, 900.0).unwrap();
    page.append(
        page.body_id(),
        NodeSpec::div()
            .class("navigation-widget")
            .rect(0.0, 100.0, 320.0, 800.0)
            .overflow_y("auto")
            .scroll_height(3000.0),
    );
    let editor = page.append(
        page.body_id(),
        NodeSpec::div()
            .class("kix-appview-editor")
            .rect(320.0, 100.0, 880.0, 800.0)
            .overflow_y(overflow)
            .scroll_height(12000.0),
    );
    (page, editor)
}

/// Wraps a page and counts hit-tests, which only the heuristic and probe
/// stages perform
pub struct CountingHost {
    pub inner: PageModel,
    hit_tests: AtomicUsize,
}

impl CountingHost {
    pub fn new(inner: PageModel) -> Self {
        Self {
            inner,
            hit_tests: AtomicUsize::new(0),
        }
    }

    pub fn hit_tests(&self) -> usize {
        self.hit_tests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageHost for CountingHost {
    type Element = NodeId;

    async fn location(&self) -> Result<PageLocation> {
        self.inner.location().await
    }

    async fn viewport(&self) -> Result<Viewport> {
        self.inner.viewport().await
    }

    async fn window_scroll(&self) -> Result<ScrollBox> {
        self.inner.window_scroll().await
    }

    async fn scroll_window_to(&self, top: f64) -> Result<()> {
        self.inner.scroll_window_to(top).await
    }

    async fn body(&self) -> Result<Option<NodeId>> {
        self.inner.body().await
    }

    async fn is_document_root(&self, el: &NodeId) -> Result<bool> {
        self.inner.is_document_root(el).await
    }

    async fn element_from_point(&self, x: f64, y: f64) -> Result<Option<NodeId>> {
        self.hit_tests.fetch_add(1, Ordering::SeqCst);
        self.inner.element_from_point(x, y).await
    }

    async fn parent(&self, el: &NodeId) -> Result<Option<NodeId>> {
        self.inner.parent(el).await
    }

    async fn children(&self, el: &NodeId) -> Result<Vec<NodeId>> {
        self.inner.children(el).await
    }

    async fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        self.inner.query_selector(selector).await
    }

    async fn is_connected(&self, el: &NodeId) -> Result<bool> {
        self.inner.is_connected(el).await
    }

    async fn computed_style(&self, el: &NodeId) -> Result<ComputedStyle> {
        self.inner.computed_style(el).await
    }

    async fn bounding_rect(&self, el: &NodeId) -> Result<Rect> {
        self.inner.bounding_rect(el).await
    }

    async fn scroll_box(&self, el: &NodeId) -> Result<ScrollBox> {
        self.inner.scroll_box(el).await
    }

    async fn set_scroll_top(&self, el: &NodeId, top: f64) -> Result<()> {
        self.inner.set_scroll_top(el, top).await
    }

    async fn describe(&self, el: &NodeId) -> Result<String> {
        self.inner.describe(el).await
    }

    async fn next_frame(&self) -> Result<()> {
        self.inner.next_frame().await
    }
}
