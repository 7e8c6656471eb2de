//! 消息路由
//!
//! - GET    /messages              列表（可按 conversationId / userId 过滤）
//! - GET    /messages/{id}
//! - POST   /messages              发送（需认证）
//! - PATCH  /messages/{id}         修改内容（需认证）
//! - DELETE /messages/{id}         删除（需认证）
//! - POST   /messages/{id}/relay   仅重试中继步骤（需认证）

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::RequestContext;
use crate::error::Result;
use crate::http::{CurrentUser, HttpServerState};
use crate::model::{ConversationId, Message, MessageFilter, MessageId, User, UserId};

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/messages", get(list_messages).post(send_message))
        .route(
            "/messages/{id}",
            get(get_message).patch(update_message).delete(delete_message),
        )
        .route("/messages/{id}/relay", post(retry_relay))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub conversation_id: Option<ConversationId>,
    pub user_id: Option<UserId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

/// 消息 + 作者
#[derive(Debug, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub author: Option<User>,
}

async fn with_authors(ctx: &RequestContext, messages: Vec<Message>) -> Result<Vec<MessageView>> {
    let author_ids: Vec<UserId> = messages.iter().map(|m| m.user_id).collect();
    let authors = ctx.loaders.users.load_many(&author_ids).await?;
    Ok(messages
        .into_iter()
        .zip(authors)
        .map(|(message, author)| MessageView { message, author })
        .collect())
}

async fn list_messages(
    State(state): State<HttpServerState>,
    ctx: RequestContext,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<MessageView>>> {
    let filter = MessageFilter {
        conversation_ids: query.conversation_id.into_iter().collect(),
        user_ids: query.user_id.into_iter().collect(),
        limit: query.limit,
    };
    let messages = state.store.find_messages(&filter).await?;
    Ok(Json(with_authors(&ctx, messages).await?))
}

async fn get_message(
    State(state): State<HttpServerState>,
    ctx: RequestContext,
    Path(id): Path<MessageId>,
) -> Result<Json<MessageView>> {
    let message = state.messages.message(id).await?;
    let author = ctx.loaders.users.load(message.user_id).await?;
    Ok(Json(MessageView { message, author }))
}

async fn send_message(
    State(state): State<HttpServerState>,
    CurrentUser(caller): CurrentUser,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>)> {
    info!(
        "📨 User {} sends a message to conversation {}",
        caller.id, request.conversation_id
    );
    let message = state
        .messages
        .send_message(&caller, request.conversation_id, request.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn update_message(
    State(state): State<HttpServerState>,
    CurrentUser(_caller): CurrentUser,
    Path(id): Path<MessageId>,
    Json(request): Json<UpdateMessageRequest>,
) -> Result<Json<Message>> {
    Ok(Json(state.messages.update_message(id, request.content).await?))
}

async fn delete_message(
    State(state): State<HttpServerState>,
    CurrentUser(_caller): CurrentUser,
    Path(id): Path<MessageId>,
) -> Result<Json<bool>> {
    Ok(Json(state.messages.delete_message(id).await?))
}

async fn retry_relay(
    State(state): State<HttpServerState>,
    CurrentUser(_caller): CurrentUser,
    Path(id): Path<MessageId>,
) -> Result<Json<Message>> {
    Ok(Json(state.messages.retry_relay(id).await?))
}
