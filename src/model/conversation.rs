use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, UserId};

/// 多人会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub name: Option<String>,
    /// 参与者集合（有序，便于稳定输出）
    pub participant_ids: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// 用户是否为会话参与者
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }
}

/// 创建会话的输入
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub name: Option<String>,
    pub participant_ids: BTreeSet<UserId>,
}

impl NewConversation {
    pub fn new(participant_ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            name: None,
            participant_ids: participant_ids.into_iter().collect(),
        }
    }

    /// 确保创建者本人也在参与者中
    pub fn including(mut self, user_id: UserId) -> Self {
        self.participant_ids.insert(user_id);
        self
    }
}
