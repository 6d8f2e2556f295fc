//! In-memory page model
//!
//! A retained layout tree with explicit boxes, styles and scroll extents. It
//! implements [`PageHost`] so the detection pipeline and capture sessions can
//! run without a browser: in tests, against JSON fixtures from the CLI, and
//! for replaying layouts captured from real pages.
//!
//! Layout boxes are given in document coordinates as if nothing were scrolled.
//! Bounding rects subtract the window scroll offset and the scroll offset of
//! every scroll-container ancestor, which is what `getBoundingClientRect`
//! reports for ordinary flow content.

use super::selector::{self, Markup};
use super::{ComputedStyle, PageHost, PageLocation, Rect, ScrollBox, Viewport};
use crate::error::{CaptureError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Handle of a node in a [`PageModel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

const HTML: NodeId = NodeId(0);
const BODY: NodeId = NodeId(1);

/// Description of one element, used both by the builder API and fixtures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    pub style: ComputedStyle,

    /// Border box in document coordinates
    pub rect: Rect,

    /// Defaults to the box height
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_width: Option<f64>,

    /// Makes `computed_style` fail, like a cross-origin or torn-down node
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub style_error: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            tag: "div".to_string(),
            id: None,
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            style: ComputedStyle::default(),
            rect: Rect::default(),
            scroll_height: None,
            client_height: None,
            scroll_width: None,
            client_width: None,
            style_error: false,
            children: Vec::new(),
        }
    }
}

impl NodeSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn div() -> Self {
        Self::new("div")
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.extend(class.split_whitespace().map(String::from));
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn rect(mut self, left: f64, top: f64, width: f64, height: f64) -> Self {
        self.rect = Rect::new(left, top, width, height);
        self
    }

    pub fn overflow_y(mut self, overflow: &str) -> Self {
        self.style.overflow_y = overflow.to_string();
        self
    }

    pub fn display(mut self, display: &str) -> Self {
        self.style.display = display.to_string();
        self
    }

    pub fn visibility(mut self, visibility: &str) -> Self {
        self.style.visibility = visibility.to_string();
        self
    }

    /// Total content height; client height stays the box height
    pub fn scroll_height(mut self, height: f64) -> Self {
        self.scroll_height = Some(height);
        self
    }

    pub fn client_height(mut self, height: f64) -> Self {
        self.client_height = Some(height);
        self
    }

    pub fn style_error(mut self) -> Self {
        self.style_error = true;
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }
}

/// A whole page as stored in JSON fixtures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFixture {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub viewport: Viewport,
    /// Document scroll height; defaults to the viewport height
    #[serde(default)]
    pub document_height: Option<f64>,
    #[serde(default)]
    pub document_width: Option<f64>,
    #[serde(default)]
    pub body: Vec<NodeSpec>,
}

impl PageFixture {
    pub fn into_model(self) -> Result<PageModel> {
        let mut model = PageModel::new(&self.url, self.viewport.width, self.viewport.height)?
            .with_title(&self.title)
            .with_device_pixel_ratio(self.viewport.device_pixel_ratio);
        if let Some(height) = self.document_height {
            model.set_document_height(height);
        }
        if let Some(width) = self.document_width {
            model.document_width = width;
        }
        for spec in self.body {
            model.append(model.body_id(), spec);
        }
        Ok(model)
    }
}

#[derive(Debug)]
struct Node {
    spec: NodeSpec,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScrollKey {
    Window,
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, Default)]
struct Animated {
    current: f64,
    target: f64,
    frames_left: u32,
}

/// Scroll height that keeps growing while frames are painted
#[derive(Debug, Clone, Copy)]
struct LazyGrowth {
    key: ScrollKey,
    step: f64,
    limit: f64,
}

#[derive(Debug, Default)]
struct LiveState {
    positions: HashMap<ScrollKey, Animated>,
    extra_height: HashMap<ScrollKey, f64>,
    growth: Vec<LazyGrowth>,
    detached: HashSet<NodeId>,
    frames: u64,
}

/// In-memory implementation of [`PageHost`]
#[derive(Debug)]
pub struct PageModel {
    location: PageLocation,
    viewport: Viewport,
    document_height: f64,
    document_width: f64,
    nodes: Vec<Node>,
    state: Mutex<LiveState>,
    smooth_frames: u32,
    frame_interval: Duration,
    fail_viewport: AtomicBool,
}

impl PageModel {
    /// Empty page: `<html><body></body></html>` filling the viewport
    pub fn new(url: &str, viewport_width: f64, viewport_height: f64) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| CaptureError::Other(format!("Invalid page URL {}: {}", url, e)))?;

        let html = NodeSpec::new("html").rect(0.0, 0.0, viewport_width, viewport_height);
        let body = NodeSpec::new("body").rect(0.0, 0.0, viewport_width, viewport_height);

        Ok(Self {
            location: PageLocation {
                url: url.to_string(),
                hostname: parsed.host_str().unwrap_or_default().to_string(),
                pathname: parsed.path().to_string(),
                title: String::new(),
            },
            viewport: Viewport {
                width: viewport_width,
                height: viewport_height,
                device_pixel_ratio: 1.0,
            },
            document_height: viewport_height,
            document_width: viewport_width,
            nodes: vec![
                Node {
                    spec: html,
                    parent: None,
                    children: vec![BODY],
                },
                Node {
                    spec: body,
                    parent: Some(HTML),
                    children: Vec::new(),
                },
            ],
            state: Mutex::new(LiveState::default()),
            smooth_frames: 0,
            frame_interval: Duration::from_millis(16),
            fail_viewport: AtomicBool::new(false),
        })
    }

    pub fn from_fixture_json(json: &str) -> Result<Self> {
        let fixture: PageFixture = serde_json::from_str(json)
            .map_err(|e| CaptureError::Other(format!("Invalid page fixture: {}", e)))?;
        fixture.into_model()
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.location.title = title.to_string();
        self
    }

    pub fn with_device_pixel_ratio(mut self, ratio: f64) -> Self {
        self.viewport.device_pixel_ratio = ratio;
        self
    }

    /// Programmatic scrolls take `frames` paint ticks to reach their target
    pub fn with_smooth_scrolling(mut self, frames: u32) -> Self {
        self.smooth_frames = frames;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Document height; the body box stretches with it
    pub fn set_document_height(&mut self, height: f64) {
        self.document_height = height;
        self.nodes[HTML.0].spec.rect.height = height.max(self.viewport.height);
        self.nodes[BODY.0].spec.rect.height = height;
    }

    pub fn body_id(&self) -> NodeId {
        BODY
    }

    pub fn html_id(&self) -> NodeId {
        HTML
    }

    /// Append `spec` (and its nested children) under `parent`
    pub fn append(&mut self, parent: NodeId, mut spec: NodeSpec) -> NodeId {
        let children = std::mem::take(&mut spec.children);
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            spec,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        for child in children {
            self.append(id, child);
        }
        id
    }

    /// First node whose `id` attribute equals `dom_id`
    pub fn find_by_dom_id(&self, dom_id: &str) -> Option<NodeId> {
        self.document_order()
            .into_iter()
            .find(|n| self.nodes[n.0].spec.id.as_deref() == Some(dom_id))
    }

    /// Remove a node (and so its subtree) from the live document
    pub fn detach(&self, id: NodeId) {
        self.lock().detached.insert(id);
    }

    /// Scroll height of `id` (or of the window when `None`) grows by `step`
    /// on every paint tick until it has grown by `limit` in total
    pub fn grow_lazily(&self, id: Option<NodeId>, step: f64, limit: f64) {
        let key = self.key_for(id);
        self.lock().growth.push(LazyGrowth { key, step, limit });
    }

    /// Make viewport queries fail
    pub fn fail_viewport(&self, fail: bool) {
        self.fail_viewport.store(fail, Ordering::SeqCst);
    }

    pub fn frames_painted(&self) -> u64 {
        self.lock().frames
    }

    fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_for(&self, id: Option<NodeId>) -> ScrollKey {
        match id {
            None | Some(HTML) => ScrollKey::Window,
            Some(node) => ScrollKey::Node(node),
        }
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or(CaptureError::StaleElement(id.0 as u64))
    }

    fn connected(&self, state: &LiveState, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(n) = current {
            if state.detached.contains(&n) {
                return false;
            }
            current = self.nodes[n.0].parent;
        }
        true
    }

    /// Markup mirror of the connected subtree at `id`
    fn render(&self, state: &LiveState, id: NodeId, markup: &mut Markup) {
        if state.detached.contains(&id) {
            return;
        }
        let spec = &self.nodes[id.0].spec;
        let class = spec.classes.join(" ");
        let attrs = spec
            .id
            .as_deref()
            .map(|v| ("id", v))
            .into_iter()
            .chain((!class.is_empty()).then_some(("class", class.as_str())))
            .chain(
                spec.attrs
                    .iter()
                    .filter(|(k, _)| k.as_str() != "id" && k.as_str() != "class")
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );
        markup.open(&spec.tag, id.0, attrs);
        for &child in &self.nodes[id.0].children {
            self.render(state, child, markup);
        }
        markup.close(&spec.tag);
    }

    fn document_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![HTML];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev());
        }
        out
    }

    fn extents(&self, state: &LiveState, key: ScrollKey) -> (f64, f64) {
        let extra = state.extra_height.get(&key).copied().unwrap_or(0.0);
        match key {
            ScrollKey::Window => (self.document_height + extra, self.viewport.height),
            ScrollKey::Node(id) => {
                let spec = &self.nodes[id.0].spec;
                let client = spec.client_height.unwrap_or(spec.rect.height);
                (spec.scroll_height.unwrap_or(client) + extra, client)
            }
        }
    }

    fn position(state: &LiveState, key: ScrollKey) -> f64 {
        state.positions.get(&key).map(|a| a.current).unwrap_or(0.0)
    }

    fn scroll_key(&self, key: ScrollKey, top: f64) {
        let mut state = self.lock();
        if let ScrollKey::Node(id) = key {
            if self.nodes[id.0].spec.style.overflow_y == "visible" {
                return;
            }
        }
        let (scroll_height, client_height) = self.extents(&state, key);
        let max = (scroll_height - client_height).max(0.0);
        let target = if top.is_finite() { top.clamp(0.0, max) } else { 0.0 };
        let smooth = self.smooth_frames;
        let entry = state.positions.entry(key).or_default();
        entry.target = target;
        if smooth == 0 {
            entry.current = target;
            entry.frames_left = 0;
        } else {
            entry.frames_left = smooth;
        }
    }

    fn rect_of(&self, state: &LiveState, id: NodeId) -> Rect {
        let mut rect = self.nodes[id.0].spec.rect;
        rect.top -= Self::position(state, ScrollKey::Window);
        let mut ancestor = self.nodes[id.0].parent;
        while let Some(a) = ancestor {
            if a != HTML && a != BODY && self.nodes[a.0].spec.style.overflow_y != "visible" {
                rect.top -= Self::position(state, ScrollKey::Node(a));
            }
            ancestor = self.nodes[a.0].parent;
        }
        rect
    }

    fn hit(&self, state: &LiveState, id: NodeId, x: f64, y: f64) -> Option<NodeId> {
        if state.detached.contains(&id) || self.nodes[id.0].spec.style.is_hidden() {
            return None;
        }
        if !self.rect_of(state, id).contains(x, y) {
            return None;
        }
        self.nodes[id.0]
            .children
            .iter()
            .rev()
            .find_map(|&child| self.hit(state, child, x, y))
            .or(Some(id))
    }
}

#[async_trait]
impl PageHost for PageModel {
    type Element = NodeId;

    async fn location(&self) -> Result<PageLocation> {
        Ok(self.location.clone())
    }

    async fn viewport(&self) -> Result<Viewport> {
        if self.fail_viewport.load(Ordering::SeqCst) {
            return Err(CaptureError::Script("viewport is unavailable".to_string()));
        }
        Ok(self.viewport)
    }

    async fn window_scroll(&self) -> Result<ScrollBox> {
        let state = self.lock();
        let (scroll_height, client_height) = self.extents(&state, ScrollKey::Window);
        Ok(ScrollBox {
            scroll_top: Self::position(&state, ScrollKey::Window),
            scroll_left: 0.0,
            scroll_height,
            scroll_width: self.document_width.max(self.viewport.width),
            client_height,
            client_width: self.viewport.width,
        })
    }

    async fn scroll_window_to(&self, top: f64) -> Result<()> {
        self.scroll_key(ScrollKey::Window, top);
        Ok(())
    }

    async fn body(&self) -> Result<Option<NodeId>> {
        Ok(Some(BODY))
    }

    async fn is_document_root(&self, el: &NodeId) -> Result<bool> {
        Ok(*el == HTML || *el == BODY)
    }

    async fn element_from_point(&self, x: f64, y: f64) -> Result<Option<NodeId>> {
        if !self.viewport.rect().contains(x, y) {
            return Ok(None);
        }
        let state = self.lock();
        Ok(self.hit(&state, BODY, x, y).or(Some(HTML)))
    }

    async fn parent(&self, el: &NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(*el)?.parent)
    }

    async fn children(&self, el: &NodeId) -> Result<Vec<NodeId>> {
        let node = self.node(*el)?;
        let state = self.lock();
        Ok(node
            .children
            .iter()
            .copied()
            .filter(|c| !state.detached.contains(c))
            .collect())
    }

    async fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let selector = selector::parse(selector)?;
        let mut markup = Markup::new();
        {
            let state = self.lock();
            self.render(&state, HTML, &mut markup);
        }
        let document = markup.into_document();
        Ok(selector::first_match(&document, &selector).map(NodeId))
    }

    async fn is_connected(&self, el: &NodeId) -> Result<bool> {
        self.node(*el)?;
        Ok(self.connected(&self.lock(), *el))
    }

    async fn computed_style(&self, el: &NodeId) -> Result<ComputedStyle> {
        let node = self.node(*el)?;
        if node.spec.style_error {
            return Err(CaptureError::Script(format!(
                "getComputedStyle failed for node {}",
                el.0
            )));
        }
        Ok(node.spec.style.clone())
    }

    async fn bounding_rect(&self, el: &NodeId) -> Result<Rect> {
        self.node(*el)?;
        let state = self.lock();
        if !self.connected(&state, *el) || self.nodes[el.0].spec.style.display == "none" {
            return Ok(Rect::default());
        }
        Ok(self.rect_of(&state, *el))
    }

    async fn scroll_box(&self, el: &NodeId) -> Result<ScrollBox> {
        let node = self.node(*el)?;
        if *el == HTML {
            return self.window_scroll().await;
        }
        let state = self.lock();
        let key = ScrollKey::Node(*el);
        let (scroll_height, client_height) = self.extents(&state, key);
        let client_width = node.spec.client_width.unwrap_or(node.spec.rect.width);
        Ok(ScrollBox {
            scroll_top: Self::position(&state, key),
            scroll_left: 0.0,
            scroll_height,
            scroll_width: node.spec.scroll_width.unwrap_or(client_width),
            client_height,
            client_width,
        })
    }

    async fn set_scroll_top(&self, el: &NodeId, top: f64) -> Result<()> {
        self.node(*el)?;
        self.scroll_key(self.key_for(Some(*el)), top);
        Ok(())
    }

    async fn describe(&self, el: &NodeId) -> Result<String> {
        let spec = &self.node(*el)?.spec;
        let mut label = spec.tag.clone();
        if let Some(id) = &spec.id {
            label.push('#');
            label.push_str(id);
        }
        for class in spec.classes.iter().take(3) {
            label.push('.');
            label.push_str(class);
        }
        Ok(label)
    }

    async fn next_frame(&self) -> Result<()> {
        tokio::time::sleep(self.frame_interval).await;
        let mut state = self.lock();
        state.frames += 1;
        for anim in state.positions.values_mut() {
            if anim.frames_left > 0 {
                anim.current += (anim.target - anim.current) / anim.frames_left as f64;
                anim.frames_left -= 1;
            }
        }
        let growth = state.growth.clone();
        for g in growth {
            let extra = state.extra_height.entry(g.key).or_insert(0.0);
            *extra = (*extra + g.step).min(g.limit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_page() -> (PageModel, NodeId, NodeId) {
        let mut page = PageModel::new("https://example.com/app/inbox", 1000.0, 800.0).unwrap();
        let pane = page.append(
            page.body_id(),
            NodeSpec::div()
                .id("pane")
                .rect(100.0, 100.0, 600.0, 500.0)
                .overflow_y("auto")
                .scroll_height(2000.0),
        );
        let row = page.append(pane, NodeSpec::div().class("row").rect(100.0, 300.0, 600.0, 40.0));
        (page, pane, row)
    }

    #[tokio::test]
    async fn test_location_is_parsed_from_url() {
        let (page, _, _) = sample_page();
        let location = page.location().await.unwrap();
        assert_eq!(location.hostname, "example.com");
        assert_eq!(location.pathname, "/app/inbox");
    }

    #[tokio::test]
    async fn test_hit_testing_returns_deepest_node() {
        let (page, pane, row) = sample_page();
        assert_eq!(page.element_from_point(200.0, 310.0).await.unwrap(), Some(row));
        assert_eq!(page.element_from_point(200.0, 150.0).await.unwrap(), Some(pane));
        assert_eq!(
            page.element_from_point(900.0, 700.0).await.unwrap(),
            Some(page.body_id())
        );
        assert_eq!(page.element_from_point(1200.0, 10.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scroll_top_is_clamped_and_moves_descendants() {
        let (page, pane, row) = sample_page();
        page.set_scroll_top(&pane, 5000.0).await.unwrap();
        let sb = page.scroll_box(&pane).await.unwrap();
        assert_eq!(sb.scroll_top, 1500.0);
        assert_eq!(sb.max_scroll_top(), 1500.0);

        page.set_scroll_top(&pane, 100.0).await.unwrap();
        let rect = page.bounding_rect(&row).await.unwrap();
        assert_eq!(rect.top, 200.0);
    }

    #[tokio::test]
    async fn test_overflow_visible_nodes_do_not_scroll() {
        let (page, _, row) = sample_page();
        page.set_scroll_top(&row, 10.0).await.unwrap();
        assert_eq!(page.scroll_box(&row).await.unwrap().scroll_top, 0.0);
    }

    #[tokio::test]
    async fn test_query_selector_skips_detached_nodes() {
        let (page, pane, row) = sample_page();
        assert_eq!(page.query_selector(".row").await.unwrap(), Some(row));
        page.detach(pane);
        assert_eq!(page.query_selector(".row").await.unwrap(), None);
        assert!(!page.is_connected(&row).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_smooth_scroll_converges_over_frames() {
        let (page, pane, _) = sample_page();
        let page = page.with_smooth_scrolling(4);
        page.set_scroll_top(&pane, 400.0).await.unwrap();
        assert_eq!(page.scroll_box(&pane).await.unwrap().scroll_top, 0.0);
        for _ in 0..4 {
            page.next_frame().await.unwrap();
        }
        assert_eq!(page.scroll_box(&pane).await.unwrap().scroll_top, 400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_growth_extends_scroll_height() {
        let (page, pane, _) = sample_page();
        page.grow_lazily(Some(pane), 100.0, 250.0);
        for _ in 0..5 {
            page.next_frame().await.unwrap();
        }
        assert_eq!(page.scroll_box(&pane).await.unwrap().scroll_height, 2250.0);
    }

    #[test]
    fn test_fixture_round_trip_builds_nested_nodes() {
        let json = r#"{
            "url": "https://docs.google.com/document/d/abc/edit",
            "title": "Doc",
            "viewport": {"width": 1200, "height": 900, "device_pixel_ratio": 2},
            "body": [
                {"tag": "div", "id": "docs-editor", "rect": {"left": 0, "top": 0, "width": 1200, "height": 900},
                 "children": [
                    {"tag": "div", "classes": ["kix-appview-editor"],
                     "style": {"display": "block", "visibility": "visible", "overflow_y": "scroll"},
                     "rect": {"left": 0, "top": 100, "width": 1200, "height": 800},
                     "scroll_height": 6000}
                 ]}
            ]
        }"#;
        let page = PageModel::from_fixture_json(json).unwrap();
        assert_eq!(page.viewport.device_pixel_ratio, 2.0);
        assert!(page.find_by_dom_id("docs-editor").is_some());
        assert_eq!(page.nodes.len(), 4);
    }
}
