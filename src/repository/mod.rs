//! 持久化协作方
//!
//! 变更服务和批量加载器只依赖 [`ChatStore`]，部署时按配置选择：
//! - [`InMemoryStore`]：未配置 DATABASE_URL 时使用
//! - [`PgStore`]：PostgreSQL（表结构见 `migrations/001_init.sql`）

pub mod memory_store;
pub mod pg_store;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    Conversation, ConversationId, Message, MessageFilter, MessageId, NewConversation, NewMessage,
    NewUser, User, UserId,
};

pub use memory_store::InMemoryStore;
pub use pg_store::PgStore;

/// 聊天数据存储
#[async_trait]
pub trait ChatStore: Send + Sync {
    // ---------- 用户 ----------

    async fn create_user(&self, new_user: NewUser) -> Result<User>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>>;

    /// "id in set" 查询，返回顺序不保证
    async fn find_users(&self, ids: &[UserId]) -> Result<Vec<User>>;

    // ---------- 会话 ----------

    async fn create_conversation(&self, new_conversation: NewConversation) -> Result<Conversation>;

    async fn find_conversation(&self, id: ConversationId) -> Result<Option<Conversation>>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// "id in set" 查询，返回顺序不保证
    async fn find_conversations(&self, ids: &[ConversationId]) -> Result<Vec<Conversation>>;

    /// "participant in set" 查询：包含任一给定用户的会话
    async fn conversations_with_participants(&self, user_ids: &[UserId]) -> Result<Vec<Conversation>>;

    /// 删除会话及其消息，返回是否存在
    async fn delete_conversation(&self, id: ConversationId) -> Result<bool>;

    /// 会话参与者；会话不存在时返回 NotFound
    async fn participant_ids(&self, conversation_id: ConversationId) -> Result<BTreeSet<UserId>> {
        self.find_conversation(conversation_id)
            .await?
            .map(|c| c.participant_ids)
            .ok_or_else(|| conversation_not_found(conversation_id))
    }

    // ---------- 消息 ----------

    async fn create_message(&self, new_message: NewMessage) -> Result<Message>;

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// 按条件查询，结果按 id 升序（即创建顺序）
    async fn find_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>>;

    /// 更新内容，消息不存在时返回 None
    async fn update_message(&self, id: MessageId, content: &str) -> Result<Option<Message>>;

    /// 删除消息，返回被删除的行
    async fn delete_message(&self, id: MessageId) -> Result<Option<Message>>;
}

pub(crate) fn conversation_not_found(id: ConversationId) -> crate::error::ServerError {
    crate::error::ServerError::NotFound(format!("conversation {} not found", id))
}

pub(crate) fn message_not_found(id: MessageId) -> crate::error::ServerError {
    crate::error::ServerError::NotFound(format!("message {} not found", id))
}

/// 把参与者行 (conversation_id, user_id) 聚合成集合
pub(crate) fn group_participants(
    rows: impl IntoIterator<Item = (ConversationId, UserId)>,
) -> HashMap<ConversationId, BTreeSet<UserId>> {
    let mut grouped: HashMap<ConversationId, BTreeSet<UserId>> = HashMap::new();
    for (conversation_id, user_id) in rows {
        grouped.entry(conversation_id).or_default().insert(user_id);
    }
    grouped
}
