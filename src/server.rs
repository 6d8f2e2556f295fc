//! HTTP binding for the message channel
//!
//! `POST /message` carries one channel message per request. Declined
//! message types answer `422` so a caller can route them elsewhere.

use crate::capture::CaptureSessions;
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::message::Dispatcher;
use crate::page::PageHost;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

/// The page currently being served and its capture contexts
pub struct ServerState<H: PageHost> {
    config: CaptureConfig,
    dispatcher: RwLock<Dispatcher<H>>,
}

impl<H: PageHost + 'static> ServerState<H> {
    pub fn new(host: Arc<H>, config: CaptureConfig) -> Result<Self> {
        let sessions = CaptureSessions::new(host, &config)?;
        Ok(Self {
            config,
            dispatcher: RwLock::new(Dispatcher::new(Arc::new(sessions))),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub async fn dispatcher(&self) -> Dispatcher<H> {
        self.dispatcher.read().await.clone()
    }

    /// Drop every open context, e.g. after the page navigated
    pub async fn reset(&self, host: Arc<H>) -> Result<()> {
        let sessions = CaptureSessions::new(host, &self.config)?;
        let mut dispatcher = self.dispatcher.write().await;
        let dropped = dispatcher.sessions().context_count();
        *dispatcher = Dispatcher::new(Arc::new(sessions));
        if dropped > 0 {
            log::info!("Discarded {} capture context(s) on page reset", dropped);
        }
        Ok(())
    }
}

pub fn health() -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "ok" })))
}

pub fn message<H: PageHost + 'static>(
    state: Arc<ServerState<H>>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone());

    warp::path("message")
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter)
        .and_then(handle_message)
}

async fn handle_message<H: PageHost + 'static>(
    message: Value,
    state: Arc<ServerState<H>>,
) -> std::result::Result<warp::reply::WithStatus<warp::reply::Json>, warp::Rejection> {
    let dispatcher = state.dispatcher().await;
    match dispatcher.handle(&message).await {
        Some(reply) => Ok(warp::reply::with_status(
            warp::reply::json(&reply),
            StatusCode::OK,
        )),
        None => {
            let ty = message.get("type").cloned().unwrap_or(Value::Null);
            log::debug!("Declined message type {}", ty);
            Ok(warp::reply::with_status(
                warp::reply::json(&json!({ "error": "declined", "type": ty })),
                StatusCode::UNPROCESSABLE_ENTITY,
            ))
        }
    }
}
