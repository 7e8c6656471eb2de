//! 会话路由
//!
//! - GET    /conversations          列表（含参与者与消息）
//! - GET    /conversations/mine     当前用户参与的会话（需认证）
//! - GET    /conversations/{id}     单个会话（含参与者与消息）
//! - POST   /conversations          创建，创建者自动加入（需认证）
//! - DELETE /conversations/{id}     删除（需认证）

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tracing::info;

use crate::context::RequestContext;
use crate::error::{Result, ServerError};
use crate::http::{CurrentUser, HttpServerState};
use crate::model::{Conversation, ConversationId, Message, NewConversation, User};

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/conversations", get(list_conversations).post(create_conversation))
        .route("/conversations/mine", get(my_conversations))
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
}

/// 会话 + 参与者 + 消息
#[derive(Debug, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants: Vec<User>,
    pub messages: Vec<Message>,
}

/// 通过批量加载器一次性补齐参与者与消息
async fn resolve(ctx: &RequestContext, conversations: Vec<Conversation>) -> Result<Vec<ConversationView>> {
    let ids: Vec<ConversationId> = conversations.iter().map(|c| c.id).collect();
    let participants = ctx.loaders.participants.load_many(&ids).await?;
    let messages = ctx.loaders.conversation_messages.load_many(&ids).await?;

    Ok(conversations
        .into_iter()
        .zip(participants.into_iter().zip(messages))
        .map(|(conversation, (participants, messages))| ConversationView {
            conversation,
            participants,
            messages,
        })
        .collect())
}

async fn list_conversations(
    State(state): State<HttpServerState>,
    ctx: RequestContext,
) -> Result<Json<Vec<ConversationView>>> {
    let conversations = state.store.list_conversations().await?;
    Ok(Json(resolve(&ctx, conversations).await?))
}

async fn my_conversations(
    CurrentUser(caller): CurrentUser,
    ctx: RequestContext,
) -> Result<Json<Vec<Conversation>>> {
    Ok(Json(ctx.loaders.user_conversations.load(caller.id).await?))
}

async fn get_conversation(
    State(state): State<HttpServerState>,
    ctx: RequestContext,
    Path(id): Path<ConversationId>,
) -> Result<Json<ConversationView>> {
    let conversation = state
        .store
        .find_conversation(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("conversation {} not found", id)))?;
    let mut views = resolve(&ctx, vec![conversation]).await?;
    views
        .pop()
        .map(Json)
        .ok_or_else(|| ServerError::Internal("conversation view missing".to_string()))
}

async fn create_conversation(
    State(state): State<HttpServerState>,
    CurrentUser(caller): CurrentUser,
    Json(request): Json<NewConversation>,
) -> Result<(StatusCode, Json<Conversation>)> {
    let conversation = state
        .store
        .create_conversation(request.including(caller.id))
        .await?;
    info!(
        "🗨️ Conversation {} created by user {} ({} participants)",
        conversation.id,
        caller.id,
        conversation.participant_ids.len()
    );
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn delete_conversation(
    State(state): State<HttpServerState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<ConversationId>,
) -> Result<Json<bool>> {
    if !state.store.delete_conversation(id).await? {
        return Err(ServerError::NotFound(format!("conversation {} not found", id)));
    }
    info!("🗑️ Conversation {} deleted by user {}", id, caller.id);
    Ok(Json(true))
}
