//! End-to-end detection and capture in headless Chrome
//!
//! Ignored by default; run with `cargo test -- --ignored` on a machine with
//! Chrome installed.


use scroll_capture::config::CaptureConfig;
use scroll_capture::{ChromeDriver, ConnectionMode, PageHost, TargetKind};
use serde_json::json;
use std::sync::Arc;
use test_server::TestServer;

async fn headless_driver() -> anyhow::Result<ChromeDriver> {
    let driver = ChromeDriver::new(ConnectionMode::Sandboxed {
        chrome_path: None,
        no_sandbox: true,
        headless: true,
    })
    .await
    .map_err(|e| anyhow::anyhow!("Failed to launch Chrome: {}", e))?;
    driver.set_viewport(1000, 800, 1.0).await?;
    Ok(driver)
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_long_document_resolves_to_window() -> anyhow::Result<()> {
    let server = TestServer::start().await;
    server.wait_ready().await?;
    let driver = headless_driver().await?;
    driver.navigate(&server.url("long")).await?;

    let sessions = driver.capture_sessions(&CaptureConfig::default()).await?;
    let init = sessions.init_capture_context(&json!({})).await;
    assert!(init.ok, "{:?}", init);
    assert_eq!(init.target.unwrap().kind, TargetKind::Window);

    let id = init.context_id.unwrap();
    let reply = sessions.scroll_context_to(&id, 1000.0).await;
    assert_eq!(reply.scroll_top, Some(1000.0));
    assert!(sessions.release_capture_context(&id).ok);

    driver.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_inner_pane_is_detected_and_captured() -> anyhow::Result<()> {
    let server = TestServer::start().await;
    server.wait_ready().await?;
    let driver = headless_driver().await?;
    driver.navigate(&server.url("pane")).await?;

    let outcome = driver.capture_scroll_target(&CaptureConfig::default()).await?;
    assert_eq!(outcome.target.kind, TargetKind::Element);
    assert!(
        outcome.target.description.contains("div#pane"),
        "unexpected target {}",
        outcome.target.description
    );
    // 40 rows of 100px (plus borders) in a 740px pane
    assert!(outcome.tiles >= 6);
    assert_eq!(outcome.image.width, 1000);
    assert!(outcome.image.height >= 4000);
    assert_eq!(outcome.image.sha256.len(), 64);

    driver.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_static_page_has_no_target() -> anyhow::Result<()> {
    let server = TestServer::start().await;
    server.wait_ready().await?;
    let driver = headless_driver().await?;
    driver.navigate(&server.url("card")).await?;

    let host = Arc::new(driver.live_page().await?);
    let sessions =
        scroll_capture::capture::CaptureSessions::new(host, &CaptureConfig::default())?;
    let init = sessions.init_capture_context(&json!({})).await;
    assert!(!init.ok);
    assert_eq!(init.reason.as_deref(), Some("NO_SCROLL_TARGET"));

    driver.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_partly_visible_pane_is_stitched_without_gaps() -> anyhow::Result<()> {
    let server = TestServer::start().await;
    server.wait_ready().await?;
    let driver = headless_driver().await?;
    driver.navigate(&server.url("low-pane")).await?;

    let outcome = driver.capture_scroll_target(&CaptureConfig::default()).await?;
    assert!(outcome.target.description.contains("div#pane"));
    // Only 400px of the 600px pane are on screen
    assert!(outcome.tiles >= 8, "captured {} tiles", outcome.tiles);

    let image = image::load_from_memory(&outcome.image.png)?.to_rgba8();
    // 400px tiles up to the last offset, about 3030 - 600
    assert!((2800..=2860).contains(&image.height()), "height {}", image.height());
    for y in 0..image.height() {
        assert_eq!(image.get_pixel(10, y)[3], 255, "transparent row at {}", y);
    }

    driver.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_window_client_height_matches_document_element() -> anyhow::Result<()> {
    let server = TestServer::start().await;
    server.wait_ready().await?;
    let driver = headless_driver().await?;
    driver.navigate(&server.url("wide")).await?;

    let live = driver.live_page().await?;
    let window = live.window_scroll().await?;
    let client_height: f64 = live
        .page()
        .evaluate("document.documentElement.clientHeight")
        .await?
        .into_value()?;
    let inner_height: f64 = live.page().evaluate("window.innerHeight").await?.into_value()?;

    assert_eq!(window.client_height, client_height);
    assert!(window.client_height <= inner_height);
    assert_eq!(window.max_scroll_top(), window.scroll_height - client_height);

    driver.close().await?;
    Ok(())
}
