//! HTTP 路由模块
//!
//! 路由结构：
//! - `/messages/*`       - 消息查询与变更（变更需要 bearer token）
//! - `/conversations/*`  - 会话查询与变更
//! - `/users/*`          - 用户创建与查询
//! - `/presence/*`       - 在线状态
//! - `/subscriptions/*`  - 实时推送（SSE）
//! - `/health`、`/metrics`

pub mod conversations;
pub mod health;
pub mod messages;
pub mod metrics;
pub mod presence;
pub mod subscriptions;
pub mod users;

use axum::{routing::get, Router};

use crate::http::HttpServerState;

/// 创建所有路由
pub fn create_routes() -> Router<HttpServerState> {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(messages::create_route())
        .merge(conversations::create_route())
        .merge(users::create_route())
        .merge(presence::create_route())
        .merge(subscriptions::create_route())
}
