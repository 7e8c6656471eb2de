//! 认证提取器

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use crate::auth::CallerIdentity;
use crate::context::RequestContext;
use crate::error::ServerError;
use crate::http::HttpServerState;

/// 已认证调用方；缺少或无效的 bearer token 时以 401 拒绝
#[derive(Debug, Clone)]
pub struct CurrentUser(pub CallerIdentity);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<HttpServerState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpServerState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ServerError::Unauthorized("missing bearer token".to_string()))?;
        let caller = state.authenticator.authenticate(token)?;
        debug!("🔐 Authenticated user {}", caller.id);
        Ok(CurrentUser(caller))
    }
}

/// 请求上下文：可选的调用方 + 本请求的批量加载器
impl FromRequestParts<HttpServerState> for RequestContext {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpServerState,
    ) -> Result<Self, Self::Rejection> {
        let mut ctx = RequestContext::new(state.store.clone());
        if let Some(token) = bearer_token(parts) {
            // 匿名可访问的接口上，无效 token 视为匿名
            if let Ok(caller) = state.authenticator.authenticate(token) {
                ctx = ctx.with_caller(caller);
            }
        }
        Ok(ctx)
    }
}
