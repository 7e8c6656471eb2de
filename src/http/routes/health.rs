//! GET /health

use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use crate::http::HttpServerState;

pub async fn health_handler(State(state): State<HttpServerState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "topics": state.feed.topic_count(),
        "online": state.presence.online_count(),
    }))
}
