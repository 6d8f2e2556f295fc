//! CSS selector matching for the in-memory page model
//!
//! The model renders its connected nodes as markup and `scraper` (servo's
//! `selectors` engine) does the parsing and matching. Every rendered element
//! carries its node index in [`NODE_ATTR`], so a match maps straight back to
//! a model node.

use crate::error::{CaptureError, Result};
use scraper::{Html, Selector};

/// Attribute holding the model node index of a rendered element
pub const NODE_ATTR: &str = "data-scroll-capture-node";

pub fn parse(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| CaptureError::Other(format!("Invalid selector '{}': {:?}", selector, e)))
}

/// Builds the markup mirror of a node tree
pub struct Markup {
    buf: String,
}

impl Default for Markup {
    fn default() -> Self {
        Self::new()
    }
}

impl Markup {
    pub fn new() -> Self {
        Self {
            buf: String::from("<!DOCTYPE html>"),
        }
    }

    pub fn open<'a>(
        &mut self,
        tag: &str,
        node: usize,
        attrs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push_str(&format!(" {}=\"{}\"", NODE_ATTR, node));
        for (name, value) in attrs {
            if name == NODE_ATTR {
                continue;
            }
            self.buf.push(' ');
            self.buf.push_str(name);
            self.buf.push_str("=\"");
            push_escaped(&mut self.buf, value);
            self.buf.push('"');
        }
        self.buf.push('>');
    }

    pub fn close(&mut self, tag: &str) {
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
    }

    pub fn into_document(self) -> Html {
        Html::parse_document(&self.buf)
    }
}

fn push_escaped(buf: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => buf.push_str("&amp;"),
            '"' => buf.push_str("&quot;"),
            '<' => buf.push_str("&lt;"),
            c => buf.push(c),
        }
    }
}

/// Node index of the first element in document order matching `selector`
pub fn first_match(document: &Html, selector: &Selector) -> Option<usize> {
    document
        .select(selector)
        .find_map(|el| el.value().attr(NODE_ATTR)?.parse().ok())
}
