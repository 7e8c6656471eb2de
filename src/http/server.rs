//! HTTP 服务器 - 共享状态与路由组装

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::auth::{Authenticator, JwtAuthenticator};
use crate::error::{Result, ServerError};
use crate::http::routes;
use crate::infra::live_feed::LiveFeedRegistry;
use crate::infra::presence_tracker::PresenceTracker;
use crate::repository::ChatStore;
use crate::service::MessageService;

/// HTTP 共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub store: Arc<dyn ChatStore>,
    pub messages: Arc<MessageService>,
    pub feed: LiveFeedRegistry,
    pub presence: Arc<PresenceTracker>,
    pub authenticator: Arc<dyn Authenticator>,
    /// 创建用户时签发 token
    pub token_issuer: Arc<JwtAuthenticator>,
}

/// 组装全部路由并挂上 CORS
///
/// CORS 只放行配置的单一来源，并允许携带凭证。
pub fn build_router(state: HttpServerState, cors_origin: &str) -> Result<Router> {
    let origin: HeaderValue = cors_origin
        .parse()
        .map_err(|_| ServerError::Configuration(format!("invalid CORS origin: {}", cors_origin)))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Ok(routes::create_routes().layer(cors).with_state(state))
}
