//! 实时推送订阅（Server-Sent Events）
//!
//! 每个 SSE 事件的 data 是推送载荷 JSON（`{"messageAdded": {...}}` 等）。
//! 连接关闭时流被丢弃，订阅随之注销。

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::http::HttpServerState;
use crate::infra::live_feed::{topics, FeedSubscription};
use crate::model::UserId;

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/subscriptions/message-added/{user_id}", get(message_added))
        .route("/subscriptions/message-updated", get(message_updated))
        .route("/subscriptions/message-deleted", get(message_deleted))
        .route("/subscriptions/online-users", get(online_users))
}

fn into_sse(subscription: FeedSubscription) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("📡 SSE listener attached to {}", subscription.topic());
    let stream = subscription.filter_map(|payload| match Event::default().json_data(&payload) {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            warn!("⚠️ Could not encode feed payload: {}", e);
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn message_added(
    State(state): State<HttpServerState>,
    Path(user_id): Path<UserId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    into_sse(state.feed.subscribe(topics::message_added(user_id)))
}

async fn message_updated(
    State(state): State<HttpServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    into_sse(state.feed.subscribe(topics::MESSAGE_UPDATED_GLOBAL))
}

async fn message_deleted(
    State(state): State<HttpServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    into_sse(state.feed.subscribe(topics::MESSAGE_DELETED_GLOBAL))
}

async fn online_users(
    State(state): State<HttpServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    into_sse(state.feed.subscribe(topics::ONLINE_USERS_UPDATED))
}
