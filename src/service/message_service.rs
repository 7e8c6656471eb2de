//! 消息变更服务（生产端）
//!
//! 每个变更按固定顺序执行：落库 -> 代理发布 -> 本进程直接推送。
//! 代理发布失败不会回滚已落库的数据，也不会跳过直接推送；
//! 失败以 [`ServerError::RelayFailed`] 返回，调用方可用 [`MessageService::retry_relay`] 单独重试。

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::CallerIdentity;
use crate::domain::{DomainEvent, EventAuthor, MessageCreated, MessageDeleted, MessageUpdated};
use crate::error::{Result, ServerError};
use crate::infra::broker::{BrokerError, BrokerGateway};
use crate::infra::live_feed::FeedPublisher;
use crate::model::{ConversationId, Message, MessageId, NewMessage, UserId};
use crate::repository::{message_not_found, ChatStore};
use crate::service::event_relay::EventRelay;

pub struct MessageService {
    store: Arc<dyn ChatStore>,
    broker: Arc<BrokerGateway>,
    /// 直接推送与中继共用同一套扇出规则
    direct: EventRelay,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        broker: Arc<BrokerGateway>,
        feed: Arc<dyn FeedPublisher>,
    ) -> Self {
        Self {
            store,
            broker,
            direct: EventRelay::new(feed),
        }
    }

    /// 发送消息
    pub async fn send_message(
        &self,
        caller: &CallerIdentity,
        conversation_id: ConversationId,
        content: String,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(ServerError::Validation("message content must not be empty".to_string()));
        }
        if self.store.find_conversation(conversation_id).await?.is_none() {
            return Err(ServerError::NotFound(format!(
                "conversation {} not found",
                conversation_id
            )));
        }

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id,
                user_id: caller.id,
                content,
            })
            .await?;
        info!("💬 Message {} saved in conversation {}", message.id, conversation_id);

        let participants = self.participants_or_empty(conversation_id).await;
        let author = EventAuthor {
            id: caller.id,
            username: caller.username(),
            email: caller.email.clone(),
        };
        let event = DomainEvent::MessageCreated(MessageCreated::new(&message, author, participants));

        self.dispatch(event, message.id).await?;
        Ok(message)
    }

    /// 更新消息内容
    pub async fn update_message(&self, message_id: MessageId, content: String) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(ServerError::Validation("message content must not be empty".to_string()));
        }
        let message = self
            .store
            .update_message(message_id, &content)
            .await?
            .ok_or_else(|| message_not_found(message_id))?;
        info!("✏️ Message {} updated", message_id);

        let event = DomainEvent::MessageUpdated(MessageUpdated {
            message_id: message.id,
            content: message.content.clone(),
            conversation_id: message.conversation_id,
            user_id: message.user_id,
        });
        self.dispatch(event, message.id).await?;
        Ok(message)
    }

    /// 删除消息
    pub async fn delete_message(&self, message_id: MessageId) -> Result<bool> {
        let message = self
            .store
            .delete_message(message_id)
            .await?
            .ok_or_else(|| message_not_found(message_id))?;
        info!("🗑️ Message {} deleted", message_id);

        let event = DomainEvent::MessageDeleted(MessageDeleted {
            message_id: message.id,
            conversation_id: message.conversation_id,
            user_id: message.user_id,
        });
        self.dispatch(event, message.id).await?;
        Ok(true)
    }

    /// 仅重试中继步骤：按已落库的消息重建创建事件并经代理发布
    pub async fn retry_relay(&self, message_id: MessageId) -> Result<Message> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| message_not_found(message_id))?;
        let author = self
            .store
            .find_user(message.user_id)
            .await?
            .map(|user| EventAuthor {
                id: user.id,
                username: user.username(),
                email: user.email,
            })
            .ok_or_else(|| ServerError::NotFound(format!("user {} not found", message.user_id)))?;
        let participants = self.participants_or_empty(message.conversation_id).await;

        let event = DomainEvent::MessageCreated(MessageCreated::new(&message, author, participants));
        self.broker
            .publish(&event)
            .await
            .map_err(|error| relay_failed(message.id, error))?;
        info!("🔁 Message {} relayed again", message.id);
        Ok(message)
    }

    pub async fn message(&self, message_id: MessageId) -> Result<Message> {
        self.store
            .find_message(message_id)
            .await?
            .ok_or_else(|| message_not_found(message_id))
    }

    /// 参与者查询失败只记录日志，按空集合继续
    async fn participants_or_empty(&self, conversation_id: ConversationId) -> BTreeSet<UserId> {
        match self.store.participant_ids(conversation_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    "⚠️ Could not resolve participants of conversation {}: {}",
                    conversation_id, e
                );
                BTreeSet::new()
            }
        }
    }

    /// 代理发布 + 直接推送；直接推送总会执行
    async fn dispatch(&self, event: DomainEvent, message_id: MessageId) -> Result<()> {
        let published = self.broker.publish(&event).await;
        self.direct.handle(event);
        published.map_err(|error| relay_failed(message_id, error))
    }
}

fn relay_failed(message_id: MessageId, error: BrokerError) -> ServerError {
    ServerError::RelayFailed { message_id, error }
}
