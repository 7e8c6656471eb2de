//! 内存存储（单进程部署与测试）

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{conversation_not_found, ChatStore};
use crate::error::{Result, ServerError};
use crate::model::{
    Conversation, ConversationId, Message, MessageFilter, MessageId, NewConversation, NewMessage,
    NewUser, User, UserId,
};

#[derive(Default)]
struct State {
    users: BTreeMap<UserId, User>,
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: BTreeMap<MessageId, Message>,
    next_user_id: i64,
    next_conversation_id: i64,
    next_message_id: i64,
}

impl State {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

/// 内存存储，ID 从 1 开始顺序分配
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let mut state = self.state.lock();
        if state.users.values().any(|u| u.email == new_user.email) {
            return Err(ServerError::Validation(format!(
                "email {} already registered",
                new_user.email
            )));
        }
        let id = State::next_id(&mut state.next_user_id);
        let user = User {
            id,
            email: new_user.email,
            name: new_user.name,
            created_at: Utc::now(),
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.lock().users.get(&id).cloned())
    }

    async fn find_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let state = self.state.lock();
        let wanted: BTreeSet<_> = ids.iter().copied().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| state.users.get(&id).cloned())
            .collect())
    }

    async fn create_conversation(&self, new_conversation: NewConversation) -> Result<Conversation> {
        let mut state = self.state.lock();
        if let Some(missing) = new_conversation
            .participant_ids
            .iter()
            .find(|id| !state.users.contains_key(id))
        {
            return Err(ServerError::NotFound(format!("user {} not found", missing)));
        }
        let id = State::next_id(&mut state.next_conversation_id);
        let now = Utc::now();
        let conversation = Conversation {
            id,
            name: new_conversation.name,
            participant_ids: new_conversation.participant_ids,
            created_at: now,
            updated_at: now,
        };
        state.conversations.insert(id, conversation.clone());
        Ok(conversation)
    }

    async fn find_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.state.lock().conversations.get(&id).cloned())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.state.lock().conversations.values().cloned().collect())
    }

    async fn find_conversations(&self, ids: &[ConversationId]) -> Result<Vec<Conversation>> {
        let state = self.state.lock();
        let wanted: BTreeSet<_> = ids.iter().copied().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| state.conversations.get(&id).cloned())
            .collect())
    }

    async fn conversations_with_participants(&self, user_ids: &[UserId]) -> Result<Vec<Conversation>> {
        let state = self.state.lock();
        Ok(state
            .conversations
            .values()
            .filter(|c| user_ids.iter().any(|u| c.has_participant(*u)))
            .cloned()
            .collect())
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        let mut state = self.state.lock();
        if state.conversations.remove(&id).is_none() {
            return Ok(false);
        }
        state.messages.retain(|_, m| m.conversation_id != id);
        Ok(true)
    }

    async fn create_message(&self, new_message: NewMessage) -> Result<Message> {
        let mut state = self.state.lock();
        if !state.conversations.contains_key(&new_message.conversation_id) {
            return Err(conversation_not_found(new_message.conversation_id));
        }
        let id = State::next_id(&mut state.next_message_id);
        let now = Utc::now();
        let message = Message {
            id,
            content: new_message.content,
            conversation_id: new_message.conversation_id,
            user_id: new_message.user_id,
            created_at: now,
            updated_at: now,
        };
        state.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.state.lock().messages.get(&id).cloned())
    }

    async fn find_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        let state = self.state.lock();
        let matching = state.messages.values().filter(|m| filter.matches(m)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn update_message(&self, id: MessageId, content: &str) -> Result<Option<Message>> {
        let mut state = self.state.lock();
        Ok(state.messages.get_mut(&id).map(|message| {
            message.content = content.to_string();
            message.updated_at = Utc::now();
            message.clone()
        }))
    }

    async fn delete_message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.state.lock().messages.remove(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (InMemoryStore, Conversation) {
        let store = InMemoryStore::new();
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            store
                .create_user(NewUser {
                    email: email.to_string(),
                    name: None,
                })
                .await
                .unwrap();
        }
        let conversation = store
            .create_conversation(NewConversation::new([1, 2]))
            .await
            .unwrap();
        (store, conversation)
    }

    fn new_message(conversation_id: ConversationId, user_id: UserId, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            user_id,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let (store, conversation) = seeded().await;
        assert_eq!(conversation.id, 1);

        let first = store.create_message(new_message(1, 1, "a")).await.unwrap();
        let second = store.create_message(new_message(1, 2, "b")).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));
    }

    #[tokio::test]
    async fn test_message_requires_existing_conversation() {
        let (store, _) = seeded().await;
        let err = store.create_message(new_message(99, 1, "x")).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_queries() {
        let (store, _) = seeded().await;
        store
            .create_conversation(NewConversation::new([2, 3]))
            .await
            .unwrap();
        store.create_message(new_message(1, 1, "a")).await.unwrap();
        store.create_message(new_message(2, 3, "b")).await.unwrap();
        store.create_message(new_message(2, 2, "c")).await.unwrap();

        let users = store.find_users(&[3, 1, 3, 42]).await.unwrap();
        assert_eq!(users.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 3]);

        let with_three = store.conversations_with_participants(&[3]).await.unwrap();
        assert_eq!(with_three.len(), 1);
        assert_eq!(with_three[0].id, 2);

        let in_two = store
            .find_messages(&MessageFilter::by_conversations([2]))
            .await
            .unwrap();
        assert_eq!(in_two.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);

        let by_two = store.find_messages(&MessageFilter::by_users([2])).await.unwrap();
        assert_eq!(by_two.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (store, _) = seeded().await;
        let message = store.create_message(new_message(1, 1, "a")).await.unwrap();

        let updated = store.update_message(message.id, "edited").await.unwrap().unwrap();
        assert_eq!(updated.content, "edited");
        assert!(store.update_message(99, "x").await.unwrap().is_none());

        assert_eq!(store.delete_message(message.id).await.unwrap().map(|m| m.id), Some(message.id));
        assert!(store.find_message(message.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_conversation_removes_messages() {
        let (store, _) = seeded().await;
        store.create_message(new_message(1, 1, "a")).await.unwrap();

        assert!(store.delete_conversation(1).await.unwrap());
        assert!(!store.delete_conversation(1).await.unwrap());
        assert!(store.find_messages(&MessageFilter::default()).await.unwrap().is_empty());
        assert!(matches!(
            store.participant_ids(1).await,
            Err(ServerError::NotFound(_))
        ));
    }
}
