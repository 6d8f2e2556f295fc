//! Raw channel messages through the dispatcher

mod page_fixtures;

use page_fixtures::centered_pane;
use scroll_capture::capture::CaptureSessions;
use scroll_capture::config::CaptureConfig;
use scroll_capture::message::Dispatcher;
use scroll_capture::page::PageModel;
use serde_json::{json, Value};
use std::sync::Arc;

fn dispatcher(page: PageModel) -> Dispatcher<PageModel> {
    let sessions = CaptureSessions::new(Arc::new(page), &CaptureConfig::default()).unwrap();
    Dispatcher::new(Arc::new(sessions))
}

#[tokio::test(start_paused = true)]
async fn test_foreign_message_types_are_declined() {
    let (page, _) = centered_pane();
    let dispatcher = dispatcher(page);

    for message in [
        json!({ "type": "EXTRACT_PAGE_CONTENT" }),
        json!({ "type": "init_capture_context" }),
        json!({ "type": 7 }),
        json!({ "contextId": "ctx_1_0" }),
        json!("SCROLL_TO"),
    ] {
        assert_eq!(dispatcher.handle(&message).await, None, "{}", message);
    }
    assert_eq!(dispatcher.sessions().context_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_owned_message_gets_an_error_reply() {
    let (page, _) = centered_pane();
    let dispatcher = dispatcher(page);

    let reply = dispatcher
        .handle(&json!({ "type": "SCROLL_CONTEXT_TO", "contextId": 12, "top": "far" }))
        .await
        .unwrap();
    assert!(reply["error"]
        .as_str()
        .unwrap()
        .starts_with("Malformed message"));
}

#[tokio::test(start_paused = true)]
async fn test_full_capture_flow_over_the_channel() {
    let (page, _) = centered_pane();
    let dispatcher = dispatcher(page);

    let init = dispatcher
        .handle(&json!({ "type": "INIT_CAPTURE_CONTEXT", "options": {} }))
        .await
        .unwrap();
    assert_eq!(init["ok"], true);
    assert_eq!(init["target"]["kind"], "element");
    assert_eq!(init["metrics"]["maxScrollTop"], 1600.0);
    assert_eq!(init["page"]["viewportHeight"], 800.0);
    let id = init["contextId"].as_str().unwrap().to_string();
    assert!(id.starts_with("ctx_"));

    let scrolled = dispatcher
        .handle(&json!({ "type": "SCROLL_CONTEXT_TO", "contextId": id, "top": 400 }))
        .await
        .unwrap();
    assert_eq!(scrolled, json!({ "ok": true, "scrollTop": 400.0 }));

    let metrics = dispatcher
        .handle(&json!({ "type": "GET_CONTEXT_METRICS", "contextId": id }))
        .await
        .unwrap();
    assert_eq!(metrics["ok"], true);
    assert_eq!(metrics["metrics"]["scrollTop"], 400.0);
    assert_eq!(metrics["metrics"]["clientHeight"], 400.0);

    let released = dispatcher
        .handle(&json!({ "type": "RELEASE_CAPTURE_CONTEXT", "contextId": id }))
        .await
        .unwrap();
    assert_eq!(released, json!({ "ok": true }));

    let again = dispatcher
        .handle(&json!({ "type": "SCROLL_CONTEXT_TO", "contextId": id, "top": 0 }))
        .await
        .unwrap();
    assert_eq!(again, json!({ "ok": false, "error": "Invalid contextId" }));
}

#[tokio::test(start_paused = true)]
async fn test_missing_top_scrolls_to_start() {
    let (page, _) = centered_pane();
    let dispatcher = dispatcher(page);
    let init = dispatcher
        .handle(&json!({ "type": "INIT_CAPTURE_CONTEXT" }))
        .await
        .unwrap();
    let id = init["contextId"].clone();

    dispatcher
        .handle(&json!({ "type": "SCROLL_CONTEXT_TO", "contextId": id, "top": 900 }))
        .await;
    let reply = dispatcher
        .handle(&json!({ "type": "SCROLL_CONTEXT_TO", "contextId": id, "top": null }))
        .await
        .unwrap();
    assert_eq!(reply["scrollTop"], 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_page_metrics_and_window_scroll() {
    let mut page = PageModel::new("https://example.com/feed", 1000.0, 800.0)
        .unwrap()
        .with_title("Feed")
        .with_device_pixel_ratio(2.0);
    page.set_document_height(3000.0);
    let dispatcher = dispatcher(page);

    let metrics = dispatcher
        .handle(&json!({ "type": "GET_PAGE_METRICS" }))
        .await
        .unwrap();
    assert_eq!(metrics["scrollHeight"], 3000.0);
    assert_eq!(metrics["viewportWidth"], 1000.0);
    assert_eq!(metrics["devicePixelRatio"], 2.0);
    assert_eq!(metrics["scrollY"], 0.0);
    assert_eq!(metrics["url"], "https://example.com/feed");
    assert_eq!(metrics["title"], "Feed");

    let scrolled = dispatcher
        .handle(&json!({ "type": "SCROLL_TO", "y": 1500 }))
        .await
        .unwrap();
    assert_eq!(scrolled, json!({ "scrollY": 1500.0 }));

    // Past the end clamps to the document's max offset
    let scrolled = dispatcher
        .handle(&json!({ "type": "SCROLL_TO", "y": 10_000 }))
        .await
        .unwrap();
    assert_eq!(scrolled["scrollY"], 2200.0);

    let metrics = dispatcher
        .handle(&json!({ "type": "GET_PAGE_METRICS" }))
        .await
        .unwrap();
    assert_eq!(metrics["scrollY"], 2200.0);
}

#[tokio::test(start_paused = true)]
async fn test_page_metrics_failure_is_reported_in_band() {
    let (page, _) = centered_pane();
    page.fail_viewport(true);
    let dispatcher = dispatcher(page);

    let reply = dispatcher
        .handle(&json!({ "type": "GET_PAGE_METRICS" }))
        .await
        .unwrap();
    assert!(reply.get("error").and_then(Value::as_str).is_some());
}
