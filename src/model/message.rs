use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageId, UserId};

/// 消息模型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub conversation_id: ConversationId,
    /// 作者
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新消息（落库前）
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub content: String,
}

/// 消息查询条件
///
/// 各字段之间为 AND；集合字段为 "id in set"。空集合表示不过滤。
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub conversation_ids: Vec<ConversationId>,
    pub user_ids: Vec<UserId>,
    pub limit: Option<usize>,
}

impl MessageFilter {
    pub fn by_conversations(ids: impl IntoIterator<Item = ConversationId>) -> Self {
        Self {
            conversation_ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn by_users(ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            user_ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    /// 判断消息是否满足条件（内存实现使用）
    pub fn matches(&self, message: &Message) -> bool {
        (self.conversation_ids.is_empty() || self.conversation_ids.contains(&message.conversation_id))
            && (self.user_ids.is_empty() || self.user_ids.contains(&message.user_id))
    }
}
