//! [`PageHost`] over a live Chrome tab
//!
//! Elements cannot cross the CDP boundary by value, so the page keeps a small
//! registry (`window.__scrollCapture`) mapping DOM nodes to integer handles.
//! Every host call is one `Runtime.evaluate` round-trip; the registry is
//! (re)installed on demand, so navigation simply starts a fresh table and
//! old handles report as stale. Handles hold their nodes weakly; a node the
//! page has dropped and the engine has collected also reports as stale.

use crate::error::{CaptureError, Result};
use crate::page::{ComputedStyle, PageHost, PageLocation, Rect, ScrollBox, Viewport};
use async_trait::async_trait;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Integer handle into the in-page element registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(pub u64);

const REGISTRY_SCRIPT: &str = r#"(() => {
    const nodes = [null];
    const ids = new WeakMap();
    const registry = {
        handle(el) {
            if (!el) return null;
            let id = ids.get(el);
            if (id === undefined) {
                id = nodes.length;
                nodes.push(new WeakRef(el));
                ids.set(el, id);
            }
            return id;
        },
        node(id) {
            const el = nodes[id] && nodes[id].deref();
            if (!el) throw new Error('stale:' + id);
            return el;
        },
    };
    Object.defineProperty(window, '__scrollCapture', { value: registry, configurable: true });
    return registry;
})"#;

/// Document scroll box. Client size comes from the scrolling element so a
/// horizontal scrollbar is not counted as visible content.
const WINDOW_SCROLL_SCRIPT: &str = r#"(() => {
    const s = document.scrollingElement || document.documentElement;
    return {
        scroll_top: window.scrollY,
        scroll_left: window.scrollX,
        scroll_height: s.scrollHeight,
        scroll_width: s.scrollWidth,
        client_height: s.clientHeight,
        client_width: s.clientWidth,
    };
})()"#;

#[derive(Deserialize)]
struct Envelope<T> {
    v: T,
}

/// A Chrome tab seen through the detection host interface
#[derive(Clone)]
pub struct LivePage {
    page: Page,
}

impl std::fmt::Debug for LivePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePage")
            .field("target", self.page.target_id())
            .finish()
    }
}

impl LivePage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Evaluate `body` with the registry bound to `h` and decode its value
    async fn eval<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        let expression = format!(
            "(async () => {{ const h = window.__scrollCapture || ({})(); return {{ v: (await ({})) ?? null }}; }})()",
            REGISTRY_SCRIPT, body
        );
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(CaptureError::Script)?;

        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(map_eval_error)?;
        let envelope: Envelope<T> = result
            .into_value()
            .map_err(|e| CaptureError::Script(format!("Unexpected script result: {}", e)))?;
        Ok(envelope.v)
    }
}

fn map_eval_error(e: chromiumoxide::error::CdpError) -> CaptureError {
    let message = e.to_string();
    if let Some(rest) = message.split("stale:").nth(1) {
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(id) = digits.parse() {
            return CaptureError::StaleElement(id);
        }
    }
    CaptureError::Script(message)
}

/// JS literal for a coordinate; non-finite values become 0
fn js_number(value: f64) -> String {
    if value.is_finite() {
        format!("{}", value)
    } else {
        "0".to_string()
    }
}

#[async_trait]
impl PageHost for LivePage {
    type Element = ElementHandle;

    async fn location(&self) -> Result<PageLocation> {
        self.eval(
            "({ url: location.href, hostname: location.hostname, pathname: location.pathname, title: document.title })",
        )
        .await
    }

    async fn viewport(&self) -> Result<Viewport> {
        self.eval(
            "({ width: window.innerWidth, height: window.innerHeight, device_pixel_ratio: window.devicePixelRatio || 1 })",
        )
        .await
    }

    async fn window_scroll(&self) -> Result<ScrollBox> {
        self.eval(WINDOW_SCROLL_SCRIPT).await
    }

    async fn scroll_window_to(&self, top: f64) -> Result<()> {
        let script = format!(
            "(window.scrollTo({{ top: {}, left: window.scrollX, behavior: 'instant' }}), true)",
            js_number(top)
        );
        self.eval::<bool>(&script).await.map(|_| ())
    }

    async fn body(&self) -> Result<Option<ElementHandle>> {
        self.eval("h.handle(document.body)").await
    }

    async fn is_document_root(&self, el: &ElementHandle) -> Result<bool> {
        let script = format!(
            "(() => {{ const e = h.node({}); return e === document.body || e === document.documentElement; }})()",
            el.0
        );
        self.eval(&script).await
    }

    async fn element_from_point(&self, x: f64, y: f64) -> Result<Option<ElementHandle>> {
        let script = format!(
            "h.handle(document.elementFromPoint({}, {}))",
            js_number(x),
            js_number(y)
        );
        self.eval(&script).await
    }

    async fn parent(&self, el: &ElementHandle) -> Result<Option<ElementHandle>> {
        self.eval(&format!("h.handle(h.node({}).parentElement)", el.0))
            .await
    }

    async fn children(&self, el: &ElementHandle) -> Result<Vec<ElementHandle>> {
        self.eval(&format!(
            "Array.from(h.node({}).children, c => h.handle(c))",
            el.0
        ))
        .await
    }

    async fn query_selector(&self, selector: &str) -> Result<Option<ElementHandle>> {
        let literal = serde_json::to_string(selector)
            .map_err(|e| CaptureError::Script(format!("Cannot encode selector: {}", e)))?;
        self.eval(&format!("h.handle(document.querySelector({}))", literal))
            .await
    }

    async fn is_connected(&self, el: &ElementHandle) -> Result<bool> {
        self.eval(&format!("h.node({}).isConnected", el.0)).await
    }

    async fn computed_style(&self, el: &ElementHandle) -> Result<ComputedStyle> {
        let script = format!(
            r#"(() => {{
                const s = getComputedStyle(h.node({}));
                return {{ display: s.display, visibility: s.visibility, overflow_y: s.overflowY }};
            }})()"#,
            el.0
        );
        self.eval(&script).await
    }

    async fn bounding_rect(&self, el: &ElementHandle) -> Result<Rect> {
        let script = format!(
            r#"(() => {{
                const r = h.node({}).getBoundingClientRect();
                return {{ left: r.left, top: r.top, width: r.width, height: r.height }};
            }})()"#,
            el.0
        );
        self.eval(&script).await
    }

    async fn scroll_box(&self, el: &ElementHandle) -> Result<ScrollBox> {
        let script = format!(
            r#"(() => {{
                const e = h.node({});
                return {{
                    scroll_top: e.scrollTop,
                    scroll_left: e.scrollLeft,
                    scroll_height: e.scrollHeight,
                    scroll_width: e.scrollWidth,
                    client_height: e.clientHeight,
                    client_width: e.clientWidth,
                }};
            }})()"#,
            el.0
        );
        self.eval(&script).await
    }

    async fn set_scroll_top(&self, el: &ElementHandle, top: f64) -> Result<()> {
        let script = format!("(h.node({}).scrollTop = {}, true)", el.0, js_number(top));
        self.eval::<bool>(&script).await.map(|_| ())
    }

    async fn describe(&self, el: &ElementHandle) -> Result<String> {
        let script = format!(
            r#"(() => {{
                const e = h.node({});
                let label = e.tagName.toLowerCase();
                if (e.id) label += '#' + e.id;
                for (const c of Array.from(e.classList).slice(0, 3)) label += '.' + c;
                return label;
            }})()"#,
            el.0
        );
        self.eval(&script).await
    }

    async fn next_frame(&self) -> Result<()> {
        self.eval::<bool>("new Promise(resolve => requestAnimationFrame(() => resolve(true)))")
            .await
            .map(|_| ())
    }

    async fn ancestors_inclusive(&self, el: &ElementHandle) -> Result<Vec<ElementHandle>> {
        let script = format!(
            r#"(() => {{
                const out = [];
                for (let e = h.node({}); e; e = e.parentElement) out.push(h.handle(e));
                return out;
            }})()"#,
            el.0
        );
        self.eval(&script).await
    }

    async fn descendants(&self, root: &ElementHandle, limit: usize) -> Result<Vec<ElementHandle>> {
        let script = format!(
            r#"(() => {{
                const out = [];
                const walker = document.createTreeWalker(h.node({}), NodeFilter.SHOW_ELEMENT);
                while (out.length < {} && walker.nextNode()) out.push(h.handle(walker.currentNode));
                return out;
            }})()"#,
            root.0, limit
        );
        self.eval(&script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_number_rejects_non_finite() {
        assert_eq!(js_number(12.5), "12.5");
        assert_eq!(js_number(f64::NAN), "0");
        assert_eq!(js_number(f64::NEG_INFINITY), "0");
    }

    #[test]
    fn test_registry_holds_nodes_weakly() {
        assert!(REGISTRY_SCRIPT.contains("nodes.push(new WeakRef(el))"));
        assert!(REGISTRY_SCRIPT.contains("nodes[id].deref()"));
        assert!(!REGISTRY_SCRIPT.contains("nodes.push(el)"));
    }

    #[test]
    fn test_window_client_size_excludes_scrollbars() {
        assert!(WINDOW_SCROLL_SCRIPT.contains("client_height: s.clientHeight"));
        assert!(WINDOW_SCROLL_SCRIPT.contains("client_width: s.clientWidth"));
        assert!(!WINDOW_SCROLL_SCRIPT.contains("innerHeight"));
    }

    #[test]
    fn test_handles_serialize_as_plain_integers() {
        let handles: Vec<Option<ElementHandle>> = serde_json::from_str("[3, null]").unwrap();
        assert_eq!(handles, vec![Some(ElementHandle(3)), None]);
    }
}
