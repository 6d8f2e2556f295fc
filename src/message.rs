//! Message dispatch
//!
//! The capture subsystem answers a fixed set of message types arriving over
//! the orchestrator's channel. Every other message type is declined so that
//! other handlers sharing the channel can pick it up.

use crate::capture::{CaptureSessions, ScrollToReply};
use crate::page::PageHost;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Message types this subsystem owns
pub const HANDLED_TYPES: &[&str] = &[
    "INIT_CAPTURE_CONTEXT",
    "SCROLL_CONTEXT_TO",
    "GET_CONTEXT_METRICS",
    "RELEASE_CAPTURE_CONTEXT",
    "GET_PAGE_METRICS",
    "SCROLL_TO",
];

/// A request addressed to the capture subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureMessage {
    InitCaptureContext {
        #[serde(default)]
        options: Value,
    },
    ScrollContextTo {
        #[serde(rename = "contextId", default)]
        context_id: String,
        /// Missing or null is treated like NaN and clamps to 0
        #[serde(default)]
        top: Option<f64>,
    },
    GetContextMetrics {
        #[serde(rename = "contextId", default)]
        context_id: String,
    },
    ReleaseCaptureContext {
        #[serde(rename = "contextId", default)]
        context_id: String,
    },
    GetPageMetrics,
    ScrollTo {
        #[serde(default)]
        y: Option<f64>,
    },
}

impl CaptureMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            CaptureMessage::InitCaptureContext { .. } => "INIT_CAPTURE_CONTEXT",
            CaptureMessage::ScrollContextTo { .. } => "SCROLL_CONTEXT_TO",
            CaptureMessage::GetContextMetrics { .. } => "GET_CONTEXT_METRICS",
            CaptureMessage::ReleaseCaptureContext { .. } => "RELEASE_CAPTURE_CONTEXT",
            CaptureMessage::GetPageMetrics => "GET_PAGE_METRICS",
            CaptureMessage::ScrollTo { .. } => "SCROLL_TO",
        }
    }

    /// Replies that are only available after awaiting page work. The
    /// channel must be held open for these.
    pub fn responds_asynchronously(&self) -> bool {
        matches!(
            self,
            CaptureMessage::InitCaptureContext { .. } | CaptureMessage::ScrollContextTo { .. }
        )
    }
}

/// Routes raw channel messages to a page's [`CaptureSessions`]
pub struct Dispatcher<H: PageHost> {
    sessions: Arc<CaptureSessions<H>>,
}

impl<H: PageHost> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<H: PageHost> Dispatcher<H> {
    pub fn new(sessions: Arc<CaptureSessions<H>>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<CaptureSessions<H>> {
        &self.sessions
    }

    /// Whether `message` is addressed to this subsystem
    pub fn accepts(message: &Value) -> bool {
        message
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| HANDLED_TYPES.contains(&t))
    }

    /// Answer a raw message. `None` means the message was declined.
    pub async fn handle(&self, message: &Value) -> Option<Value> {
        if !Self::accepts(message) {
            log::trace!("Declining message {}", message);
            return None;
        }
        match serde_json::from_value::<CaptureMessage>(message.clone()) {
            Ok(parsed) => Some(self.dispatch(parsed).await),
            Err(e) => {
                log::warn!("Malformed capture message {}: {}", message, e);
                Some(json!({ "error": format!("Malformed message: {}", e) }))
            }
        }
    }

    pub async fn dispatch(&self, message: CaptureMessage) -> Value {
        log::debug!(
            "Handling {} (async reply: {})",
            message.message_type(),
            message.responds_asynchronously()
        );
        let sessions = &self.sessions;
        let reply = match message {
            CaptureMessage::InitCaptureContext { options } => {
                serde_json::to_value(sessions.init_capture_context(&options).await)
            }
            CaptureMessage::ScrollContextTo { context_id, top } => serde_json::to_value(
                sessions
                    .scroll_context_to(&context_id, top.unwrap_or(f64::NAN))
                    .await,
            ),
            CaptureMessage::GetContextMetrics { context_id } => {
                serde_json::to_value(sessions.get_context_metrics(&context_id).await)
            }
            CaptureMessage::ReleaseCaptureContext { context_id } => {
                serde_json::to_value(sessions.release_capture_context(&context_id))
            }
            CaptureMessage::GetPageMetrics => match sessions.page_metrics().await {
                Ok(metrics) => serde_json::to_value(metrics),
                Err(e) => Ok(json!({ "error": e.to_string() })),
            },
            CaptureMessage::ScrollTo { y } => {
                match sessions.scroll_window_to(y.unwrap_or(0.0)).await {
                    Ok(scroll_y) => serde_json::to_value(ScrollToReply { scroll_y }),
                    Err(e) => Ok(json!({ "error": e.to_string() })),
                }
            }
        };
        reply.unwrap_or_else(|e| json!({ "error": format!("Failed to encode reply: {}", e) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types_parse() {
        let msg: CaptureMessage = serde_json::from_value(json!({
            "type": "SCROLL_CONTEXT_TO",
            "contextId": "ctx_1_0",
            "top": 120.5
        }))
        .unwrap();
        assert_eq!(
            msg,
            CaptureMessage::ScrollContextTo {
                context_id: "ctx_1_0".to_string(),
                top: Some(120.5)
            }
        );
        assert!(msg.responds_asynchronously());

        let msg: CaptureMessage =
            serde_json::from_value(json!({ "type": "GET_PAGE_METRICS" })).unwrap();
        assert_eq!(msg, CaptureMessage::GetPageMetrics);
        assert!(!msg.responds_asynchronously());
    }

    #[test]
    fn test_init_options_default_to_null() {
        let msg: CaptureMessage =
            serde_json::from_value(json!({ "type": "INIT_CAPTURE_CONTEXT" })).unwrap();
        assert_eq!(msg, CaptureMessage::InitCaptureContext { options: Value::Null });
    }

    #[test]
    fn test_accepts_only_owned_types() {
        for ty in HANDLED_TYPES {
            assert!(Dispatcher::<crate::page::PageModel>::accepts(&json!({ "type": ty })));
        }
        assert!(!Dispatcher::<crate::page::PageModel>::accepts(
            &json!({ "type": "EXTRACT_PAGE_CONTENT" })
        ));
        assert!(!Dispatcher::<crate::page::PageModel>::accepts(&json!({ "kind": "SCROLL_TO" })));
    }

    #[test]
    fn test_message_type_matches_wire_tag() {
        let msg = CaptureMessage::ReleaseCaptureContext {
            context_id: "x".to_string(),
        };
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], msg.message_type());
    }
}
