//! Known-selector table
//!
//! Hand-curated selectors for the main scroll container of web apps whose
//! layout defeats the generic heuristics (editors with virtual canvases,
//! chat apps with nested scrollers, ...). Entries are tried in declaration
//! order and the first acceptable match wins; there is no scoring here.

use super::classifier::{classify, Verdict};
use super::probe::can_scroll_by_probe;
use super::DetectedElement;
use crate::config::{DetectionConfig, KnownSelectorSpec};
use crate::error::{CaptureError, Result};
use crate::page::{PageHost, PageLocation, Viewport};
use regex::Regex;

/// One host/path-scoped group of selectors
#[derive(Debug, Clone)]
pub struct KnownEntry {
    pub label: String,
    host: Regex,
    path: Option<Regex>,
    pub selectors: Vec<String>,
}

impl KnownEntry {
    pub fn new(label: &str, host: &str, path: Option<&str>, selectors: &[&str]) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                CaptureError::Config(format!(
                    "Invalid pattern '{}' for known selector '{}': {}",
                    pattern, label, e
                ))
            })
        };
        Ok(Self {
            label: label.to_string(),
            host: compile(host)?,
            path: path.map(compile).transpose()?,
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn applies_to(&self, location: &PageLocation) -> bool {
        self.host.is_match(&location.hostname)
            && self
                .path
                .as_ref()
                .map_or(true, |p| p.is_match(&location.pathname))
    }
}

impl TryFrom<&KnownSelectorSpec> for KnownEntry {
    type Error = CaptureError;

    fn try_from(spec: &KnownSelectorSpec) -> Result<Self> {
        let selectors: Vec<&str> = spec.selectors.iter().map(String::as_str).collect();
        Self::new(&spec.label, &spec.host, spec.path.as_deref(), &selectors)
    }
}

/// Ordered list of known entries, ending with the generic catch-all
#[derive(Debug, Clone)]
pub struct KnownSelectorTable {
    entries: Vec<KnownEntry>,
}

/// (label, host regex, path regex, selectors)
type BuiltinEntry = (
    &'static str,
    &'static str,
    Option<&'static str>,
    &'static [&'static str],
);

const BUILTIN: &[BuiltinEntry] = &[
    (
        "docs.google.com",
        r"^docs\.google\.com$",
        Some(r"^/document/"),
        &[
            ".kix-appview-editor",
            "#kix-appview-editor",
            ".kix-rotatingtilemanager",
            "#docs-editor",
        ],
    ),
    (
        "docs.google.com",
        r"^docs\.google\.com$",
        Some(r"^/spreadsheets/"),
        &["#waffle-grid-container", ".grid-scrollable-wrapper", ".grid4-inner-container"],
    ),
    (
        "docs.google.com",
        r"^docs\.google\.com$",
        Some(r"^/presentation/"),
        &[".punch-filmstrip-scroll", ".punch-viewer-content"],
    ),
    (
        "office",
        r"(^|\.)(sharepoint\.com|officeapps\.live\.com|office\.com|onedrive\.live\.com)$",
        None,
        &["#WACViewPanel", "#PagesContainer", "#WACContainer", ".WACViewPanel"],
    ),
    (
        "notion",
        r"(^|\.)notion\.(so|site)$",
        None,
        &[".notion-frame .notion-scroller", ".notion-scroller.vertical"],
    ),
    (
        "confluence",
        r"\.atlassian\.net$",
        Some(r"^/wiki/"),
        &[
            "[data-testid=\"page-content-area\"]",
            "#content-body",
            "#main-content",
        ],
    ),
    (
        "jira",
        r"\.atlassian\.net$",
        Some(r"^/(browse|jira)/"),
        &[
            "[data-testid=\"issue.views.issue-details.issue-layout.container-left\"]",
            "[data-testid=\"issue-detail-view\"]",
        ],
    ),
    (
        "github",
        r"^github\.com$",
        Some(r"/(issues|pull|discussions)/"),
        &["[data-testid=\"issue-viewer-container\"]", ".js-discussion"],
    ),
    (
        "mediawiki",
        r"(^|\.)(wikipedia|wikimedia|fandom)\.(org|com)$",
        None,
        &["#mw-content-text", "#content"],
    ),
    (
        "slack",
        r"^app\.slack\.com$",
        None,
        &[
            ".p-workspace__primary_view_body .c-virtual_list__scroll_container",
            ".c-virtual_list__scroll_container",
        ],
    ),
    (
        "discord",
        r"(^|\.)discord\.com$",
        Some(r"^/channels/"),
        &["[class*=\"messagesWrapper\"] [class*=\"scroller\"]", "main [class*=\"scroller\"]"],
    ),
    (
        "teams",
        r"^teams\.(microsoft|live)\.com$",
        None,
        &["[data-tid=\"message-pane-list-viewport\"]", ".ts-message-list-container"],
    ),
    (
        "gmail",
        r"^mail\.google\.com$",
        None,
        &["div[role=\"main\"] .Tm", "div[role=\"main\"]"],
    ),
    (
        "chatgpt",
        r"^(chatgpt\.com|chat\.openai\.com)$",
        None,
        &["main [class*=\"overflow-y-auto\"]"],
    ),
    (
        "generic",
        r".*",
        None,
        &[
            "[data-scroll-container]",
            "[data-scrollable=\"true\"]",
            "main[role=\"main\"]",
            "[role=\"main\"]",
            "main",
        ],
    ),
];

impl KnownSelectorTable {
    /// The built-in table
    pub fn builtin() -> Result<Self> {
        Self::with_extra(&[])
    }

    /// User entries first, then the built-in table
    pub fn with_extra(extra: &[KnownSelectorSpec]) -> Result<Self> {
        let mut entries = extra
            .iter()
            .map(KnownEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        for (label, host, path, selectors) in BUILTIN {
            entries.push(KnownEntry::new(label, host, *path, selectors)?);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[KnownEntry] {
        &self.entries
    }

    pub fn matching<'a>(
        &'a self,
        location: &'a PageLocation,
    ) -> impl Iterator<Item = &'a KnownEntry> + 'a {
        self.entries.iter().filter(move |e| e.applies_to(location))
    }

    /// Pipeline stage 1. A selector hit is accepted when it passes the
    /// classifier, or when it fails only the overflow check and the scroll
    /// probe shows it moves.
    pub async fn find_target<H: PageHost>(
        &self,
        host: &H,
        config: &DetectionConfig,
        viewport: &Viewport,
        location: &PageLocation,
    ) -> Option<DetectedElement<H::Element>> {
        for entry in self.matching(location) {
            for selector in &entry.selectors {
                let el = match host.query_selector(selector).await {
                    Ok(Some(el)) => el,
                    Ok(None) => continue,
                    Err(e) => {
                        log::debug!("Known selector '{}' failed: {}", selector, e);
                        continue;
                    }
                };

                match classify(host, config, viewport, &el).await {
                    Verdict::Accepted(_) => {
                        return Some(DetectedElement {
                            el,
                            description: format!("known:{}:{}", entry.label, selector),
                        });
                    }
                    Verdict::Rejected {
                        facts: Some(facts),
                        reason,
                    } if facts.plausible_ignoring_overflow(config, viewport) => {
                        if can_scroll_by_probe(host, config, &el).await {
                            return Some(DetectedElement {
                                el,
                                description: format!("known-probe:{}:{}", entry.label, selector),
                            });
                        }
                        log::trace!("Known selector '{}' rejected ({:?})", selector, reason);
                    }
                    Verdict::Rejected { reason, .. } => {
                        log::trace!("Known selector '{}' rejected ({:?})", selector, reason);
                    }
                }
            }
        }
        None
    }
}
