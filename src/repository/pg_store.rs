//! PostgreSQL 存储

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{conversation_not_found, group_participants, ChatStore};
use crate::error::{Result, ServerError};
use crate::model::{
    Conversation, ConversationId, Message, MessageFilter, MessageId, NewConversation, NewMessage,
    NewUser, User, UserId,
};

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: ConversationId,
    name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = "id, content, conversation_id, user_id, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 为会话行补齐参与者集合（一次查询）
    async fn attach_participants(&self, rows: Vec<ConversationRow>) -> Result<Vec<Conversation>> {
        let ids: Vec<ConversationId> = rows.iter().map(|r| r.id).collect();
        let pairs: Vec<(ConversationId, UserId)> = sqlx::query_as(
            "SELECT conversation_id, user_id FROM conversation_participants WHERE conversation_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut grouped = group_participants(pairs);

        Ok(rows
            .into_iter()
            .map(|row| Conversation {
                participant_ids: grouped.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect())
    }
}

/// users.email 唯一约束冲突与内存存储一致，按参数错误返回
fn duplicate_email(err: sqlx::Error, email: &str) -> ServerError {
    if matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation()) {
        return ServerError::Validation(format!("email {} already registered", email));
    }
    err.into()
}

#[async_trait]
impl ChatStore for PgStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (email, name) VALUES ($1, $2) RETURNING id, email, name, created_at",
        )
        .bind(&new_user.email)
        .bind(&new_user.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| duplicate_email(e, &new_user.email))?;
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, email, name, created_at FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn create_conversation(&self, new_conversation: NewConversation) -> Result<Conversation> {
        let participant_ids: Vec<UserId> = new_conversation.participant_ids.iter().copied().collect();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ConversationRow>(
            "INSERT INTO conversations (name) VALUES ($1) RETURNING id, name, created_at, updated_at",
        )
        .bind(&new_conversation.name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id)
             SELECT $1, unnest($2::bigint[])",
        )
        .bind(row.id)
        .bind(&participant_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Conversation {
            id: row.id,
            name: row.name,
            participant_ids: new_conversation.participant_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn find_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, name, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(self.attach_participants(rows).await?.into_iter().next())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, name, created_at, updated_at FROM conversations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        self.attach_participants(rows).await
    }

    async fn find_conversations(&self, ids: &[ConversationId]) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, name, created_at, updated_at FROM conversations WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        self.attach_participants(rows).await
    }

    async fn conversations_with_participants(&self, user_ids: &[UserId]) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, name, created_at, updated_at FROM conversations
             WHERE id IN (SELECT conversation_id FROM conversation_participants WHERE user_id = ANY($1))
             ORDER BY id",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        self.attach_participants(rows).await
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        // 参与者与消息通过 ON DELETE CASCADE 一并删除
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn participant_ids(&self, conversation_id: ConversationId) -> Result<BTreeSet<UserId>> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(conversation_not_found(conversation_id));
        }
        let ids: Vec<UserId> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn create_message(&self, new_message: NewMessage) -> Result<Message> {
        let sql = format!(
            "INSERT INTO messages (content, conversation_id, user_id) VALUES ($1, $2, $3) RETURNING {}",
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(&new_message.content)
            .bind(new_message.conversation_id)
            .bind(new_message.user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(message)
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>> {
        let sql = format!("SELECT {} FROM messages WHERE id = $1", MESSAGE_COLUMNS);
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn find_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        // 空数组表示不过滤；LIMIT NULL 表示不限制
        let sql = format!(
            "SELECT {} FROM messages
             WHERE (cardinality($1::bigint[]) = 0 OR conversation_id = ANY($1))
               AND (cardinality($2::bigint[]) = 0 OR user_id = ANY($2))
             ORDER BY id
             LIMIT $3",
            MESSAGE_COLUMNS
        );
        let messages = sqlx::query_as::<_, Message>(&sql)
            .bind(&filter.conversation_ids)
            .bind(&filter.user_ids)
            .bind(filter.limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await?;
        Ok(messages)
    }

    async fn update_message(&self, id: MessageId, content: &str) -> Result<Option<Message>> {
        let sql = format!(
            "UPDATE messages SET content = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(id)
            .bind(content)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn delete_message(&self, id: MessageId) -> Result<Option<Message>> {
        let sql = format!("DELETE FROM messages WHERE id = $1 RETURNING {}", MESSAGE_COLUMNS);
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::fmt;

    #[derive(Debug)]
    struct UniqueViolation;

    impl fmt::Display for UniqueViolation {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("duplicate key value violates unique constraint \"users_email_key\"")
        }
    }

    impl std::error::Error for UniqueViolation {}

    impl DatabaseError for UniqueViolation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23505"))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn test_duplicate_email_is_validation_error() {
        let err = duplicate_email(sqlx::Error::Database(Box::new(UniqueViolation)), "a@example.com");
        assert_eq!(
            err,
            ServerError::Validation("email a@example.com already registered".to_string())
        );
    }

    #[test]
    fn test_other_database_errors_pass_through() {
        assert!(matches!(
            duplicate_email(sqlx::Error::PoolTimedOut, "a@example.com"),
            ServerError::Database(_)
        ));
        assert!(matches!(
            duplicate_email(sqlx::Error::RowNotFound, "a@example.com"),
            ServerError::NotFound(_)
        ));
    }
}
