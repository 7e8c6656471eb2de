//! 在线状态路由
//!
//! - GET  /presence          当前在线列表
//! - POST /presence/online   标记当前用户在线（需认证）
//! - POST /presence/offline  标记当前用户离线（需认证）

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};

use crate::http::{CurrentUser, HttpServerState};
use crate::infra::presence_tracker::OnlineUsersSnapshot;

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/presence", get(online_users))
        .route("/presence/online", post(set_online))
        .route("/presence/offline", post(set_offline))
}

async fn online_users(State(state): State<HttpServerState>) -> Json<OnlineUsersSnapshot> {
    Json(state.presence.online_users())
}

async fn set_online(State(state): State<HttpServerState>, CurrentUser(caller): CurrentUser) -> Json<bool> {
    state.presence.set_online(caller.id);
    Json(true)
}

async fn set_offline(State(state): State<HttpServerState>, CurrentUser(caller): CurrentUser) -> Json<bool> {
    state.presence.set_offline(caller.id);
    Json(true)
}
