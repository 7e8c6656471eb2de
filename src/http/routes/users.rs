//! 用户路由
//!
//! - POST /users        创建用户并签发 token
//! - GET  /users/me     当前用户（需认证）
//! - GET  /users/{id}   用户 + 参与的会话 + 发送的消息

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::auth::CallerIdentity;
use crate::context::RequestContext;
use crate::error::{Result, ServerError};
use crate::http::{CurrentUser, HttpServerState};
use crate::model::{Conversation, Message, NewUser, User, UserId};

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/me", get(me))
        .route("/users/{id}", get(get_user))
}

#[derive(Debug, Serialize)]
pub struct AuthPayload {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
}

async fn create_user(
    State(state): State<HttpServerState>,
    Json(request): Json<NewUser>,
) -> Result<(StatusCode, Json<AuthPayload>)> {
    if !request.email.contains('@') {
        return Err(ServerError::Validation(format!("invalid email: {}", request.email)));
    }
    let user = state.store.create_user(request).await?;
    let token = state.token_issuer.issue_token(&CallerIdentity {
        id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
    })?;
    Ok((StatusCode::CREATED, Json(AuthPayload { user, token })))
}

async fn user_view(ctx: &RequestContext, id: UserId) -> Result<UserView> {
    let user = ctx
        .loaders
        .users
        .load(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("user {} not found", id)))?;
    let conversations = ctx.loaders.user_conversations.load(id).await?;
    let messages = ctx.loaders.user_messages.load(id).await?;
    Ok(UserView {
        user,
        conversations,
        messages,
    })
}

async fn me(CurrentUser(caller): CurrentUser, ctx: RequestContext) -> Result<Json<UserView>> {
    Ok(Json(user_view(&ctx, caller.id).await?))
}

async fn get_user(ctx: RequestContext, Path(id): Path<UserId>) -> Result<Json<UserView>> {
    Ok(Json(user_view(&ctx, id).await?))
}
