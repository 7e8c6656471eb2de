//! 请求级批量加载器
//!
//! 同一请求内对同类实体的多次查找合并为一次 "id in set" 查询，并按 key 缓存。
//! 批量函数必须返回与输入 key 等长、同序的结果（输入允许重复）。

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, ServerError};
use crate::model::{Conversation, ConversationId, Message, MessageFilter, User, UserId};
use crate::repository::ChatStore;

/// 批量函数：`keys` 已去重，返回值与 `keys` 等长同序
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync {
    async fn load(&self, keys: &[K]) -> Result<Vec<V>>;
}

/// 带缓存的批量加载器
pub struct Loader<K, V> {
    name: &'static str,
    batch: Box<dyn BatchFn<K, V>>,
    cache: Mutex<HashMap<K, V>>,
}

impl<K, V> Loader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(name: &'static str, batch: impl BatchFn<K, V> + 'static) -> Self {
        Self {
            name,
            batch: Box::new(batch),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(&self, key: K) -> Result<V> {
        let mut values = self.load_many(std::slice::from_ref(&key)).await?;
        values
            .pop()
            .ok_or_else(|| ServerError::Internal(format!("loader {} returned nothing", self.name)))
    }

    /// 按输入顺序返回结果；未缓存的 key 合并为一次批量调用
    pub async fn load_many(&self, keys: &[K]) -> Result<Vec<V>> {
        let missing: Vec<K> = {
            let cache = self.cache.lock();
            let mut seen = std::collections::HashSet::new();
            keys.iter()
                .filter(|k| !cache.contains_key(*k) && seen.insert((*k).clone()))
                .cloned()
                .collect()
        };

        if !missing.is_empty() {
            let values = self.batch.load(&missing).await?;
            if values.len() != missing.len() {
                return Err(ServerError::Internal(format!(
                    "loader {} returned {} values for {} keys",
                    self.name,
                    values.len(),
                    missing.len()
                )));
            }
            debug!("📦 Loader {} fetched {} keys", self.name, missing.len());
            self.cache.lock().extend(missing.into_iter().zip(values));
        }

        let cache = self.cache.lock();
        keys.iter()
            .map(|k| {
                cache.get(k).cloned().ok_or_else(|| {
                    ServerError::Internal(format!("loader {} lost a cached key", self.name))
                })
            })
            .collect()
    }

    /// 清空缓存（变更后需要重新读取时）
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

/// 按 ID 加载用户，不存在为 None
pub struct UsersById(pub Arc<dyn ChatStore>);

#[async_trait]
impl BatchFn<UserId, Option<User>> for UsersById {
    async fn load(&self, keys: &[UserId]) -> Result<Vec<Option<User>>> {
        let mut found: HashMap<UserId, User> = self
            .0
            .find_users(keys)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        Ok(keys.iter().map(|k| found.remove(k)).collect())
    }
}

/// 会话参与者（用户实体）
pub struct ParticipantsByConversation(pub Arc<dyn ChatStore>);

#[async_trait]
impl BatchFn<ConversationId, Vec<User>> for ParticipantsByConversation {
    async fn load(&self, keys: &[ConversationId]) -> Result<Vec<Vec<User>>> {
        let conversations: HashMap<ConversationId, BTreeSet<UserId>> = self
            .0
            .find_conversations(keys)
            .await?
            .into_iter()
            .map(|c| (c.id, c.participant_ids))
            .collect();
        let all_ids: Vec<UserId> = conversations
            .values()
            .flatten()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let users: HashMap<UserId, User> = self
            .0
            .find_users(&all_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        Ok(keys
            .iter()
            .map(|k| {
                conversations
                    .get(k)
                    .map(|ids| ids.iter().filter_map(|id| users.get(id).cloned()).collect())
                    .unwrap_or_default()
            })
            .collect())
    }
}

/// 会话内的消息
pub struct MessagesByConversation(pub Arc<dyn ChatStore>);

#[async_trait]
impl BatchFn<ConversationId, Vec<Message>> for MessagesByConversation {
    async fn load(&self, keys: &[ConversationId]) -> Result<Vec<Vec<Message>>> {
        let messages = self
            .0
            .find_messages(&MessageFilter::by_conversations(keys.iter().copied()))
            .await?;
        Ok(group_by(keys, messages, |m| m.conversation_id))
    }
}

/// 用户参与的会话
pub struct ConversationsByUser(pub Arc<dyn ChatStore>);

#[async_trait]
impl BatchFn<UserId, Vec<Conversation>> for ConversationsByUser {
    async fn load(&self, keys: &[UserId]) -> Result<Vec<Vec<Conversation>>> {
        let conversations = self.0.conversations_with_participants(keys).await?;
        Ok(keys
            .iter()
            .map(|k| {
                conversations
                    .iter()
                    .filter(|c| c.has_participant(*k))
                    .cloned()
                    .collect()
            })
            .collect())
    }
}

/// 用户发送的消息
pub struct MessagesByUser(pub Arc<dyn ChatStore>);

#[async_trait]
impl BatchFn<UserId, Vec<Message>> for MessagesByUser {
    async fn load(&self, keys: &[UserId]) -> Result<Vec<Vec<Message>>> {
        let messages = self
            .0
            .find_messages(&MessageFilter::by_users(keys.iter().copied()))
            .await?;
        Ok(group_by(keys, messages, |m| m.user_id))
    }
}

fn group_by<K, T>(keys: &[K], items: Vec<T>, key_of: impl Fn(&T) -> K) -> Vec<Vec<T>>
where
    K: Eq + Hash + Copy,
{
    let mut grouped: HashMap<K, Vec<T>> = HashMap::new();
    for item in items {
        grouped.entry(key_of(&item)).or_default().push(item);
    }
    keys.iter()
        .map(|k| grouped.remove(k).unwrap_or_default())
        .collect()
}

/// 一个请求使用的全部加载器
pub struct Loaders {
    pub users: Loader<UserId, Option<User>>,
    pub participants: Loader<ConversationId, Vec<User>>,
    pub conversation_messages: Loader<ConversationId, Vec<Message>>,
    pub user_conversations: Loader<UserId, Vec<Conversation>>,
    pub user_messages: Loader<UserId, Vec<Message>>,
}

impl Loaders {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            users: Loader::new("users", UsersById(store.clone())),
            participants: Loader::new("participants", ParticipantsByConversation(store.clone())),
            conversation_messages: Loader::new(
                "conversation_messages",
                MessagesByConversation(store.clone()),
            ),
            user_conversations: Loader::new("user_conversations", ConversationsByUser(store.clone())),
            user_messages: Loader::new("user_messages", MessagesByUser(store)),
        }
    }
}
