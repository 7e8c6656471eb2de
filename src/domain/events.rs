use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{ConversationId, Message, MessageId, UserId};

/// 共享工作队列名称（持久化队列）
pub const MESSAGES_QUEUE: &str = "messages_queue";

/// Domain Events（领域事件）
///
/// 序列化形状即代理信封：`{"pattern": "message_created", "payload": {...}}`。
/// 新增变体时，中继层的 `match` 会在编译期强制补齐处理分支。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", content = "payload")]
pub enum DomainEvent {
    /// 消息已创建（已落库），自带参与者集合
    #[serde(rename = "message_created")]
    MessageCreated(MessageCreated),

    /// 消息内容已更新；不携带参与者
    #[serde(rename = "message_updated")]
    MessageUpdated(MessageUpdated),

    /// 消息已删除；不携带参与者
    #[serde(rename = "message_deleted")]
    MessageDeleted(MessageDeleted),
}

/// 事件作者快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAuthor {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

/// 事件所属会话快照（参与者随事件一起下发，中继侧无需再查库）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConversation {
    pub id: ConversationId,
    pub participant_ids: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreated {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: EventAuthor,
    pub conversation: EventConversation,
}

impl MessageCreated {
    /// 由已落库的消息、作者和参与者集合组装事件
    pub fn new(message: &Message, author: EventAuthor, participant_ids: BTreeSet<UserId>) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            user_id: message.user_id,
            content: message.content.clone(),
            created_at: message.created_at,
            updated_at: message.updated_at,
            author,
            conversation: EventConversation {
                id: message.conversation_id,
                participant_ids,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdated {
    pub message_id: MessageId,
    pub content: String,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

/// 代理路由模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPattern {
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
}

impl EventPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPattern::MessageCreated => "message_created",
            EventPattern::MessageUpdated => "message_updated",
            EventPattern::MessageDeleted => "message_deleted",
        }
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventPattern {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message_created" => Ok(EventPattern::MessageCreated),
            "message_updated" => Ok(EventPattern::MessageUpdated),
            "message_deleted" => Ok(EventPattern::MessageDeleted),
            other => Err(EnvelopeError::UnknownPattern(other.to_string())),
        }
    }
}

/// 信封解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("unknown event pattern: {0}")]
    UnknownPattern(String),
    #[error("malformed payload for {pattern}: {reason}")]
    Decode { pattern: String, reason: String },
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// 代理线上信封
///
/// payload 保持为原始 JSON，未知 pattern 也能完整记录到日志。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub pattern: String,
    pub payload: Value,
}

impl BrokerMessage {
    /// 编码为 JSON 字节
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// 从 JSON 字节解码
    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(data).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

impl DomainEvent {
    pub fn pattern(&self) -> EventPattern {
        match self {
            DomainEvent::MessageCreated(_) => EventPattern::MessageCreated,
            DomainEvent::MessageUpdated(_) => EventPattern::MessageUpdated,
            DomainEvent::MessageDeleted(_) => EventPattern::MessageDeleted,
        }
    }

    /// 事件涉及的消息 ID（用于日志）
    pub fn message_id(&self) -> MessageId {
        match self {
            DomainEvent::MessageCreated(e) => e.id,
            DomainEvent::MessageUpdated(e) => e.message_id,
            DomainEvent::MessageDeleted(e) => e.message_id,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            DomainEvent::MessageCreated(e) => e.conversation_id,
            DomainEvent::MessageUpdated(e) => e.conversation_id,
            DomainEvent::MessageDeleted(e) => e.conversation_id,
        }
    }

    /// 封装为代理信封
    pub fn to_envelope(&self) -> Result<BrokerMessage, serde_json::Error> {
        let payload = match self {
            DomainEvent::MessageCreated(e) => serde_json::to_value(e)?,
            DomainEvent::MessageUpdated(e) => serde_json::to_value(e)?,
            DomainEvent::MessageDeleted(e) => serde_json::to_value(e)?,
        };
        Ok(BrokerMessage {
            pattern: self.pattern().as_str().to_string(),
            payload,
        })
    }

    /// 从代理信封还原事件
    pub fn from_envelope(envelope: &BrokerMessage) -> Result<Self, EnvelopeError> {
        let pattern: EventPattern = envelope.pattern.parse()?;
        let decode_err = |e: serde_json::Error| EnvelopeError::Decode {
            pattern: envelope.pattern.clone(),
            reason: e.to_string(),
        };
        let payload = envelope.payload.clone();
        let event = match pattern {
            EventPattern::MessageCreated => {
                DomainEvent::MessageCreated(serde_json::from_value(payload).map_err(decode_err)?)
            }
            EventPattern::MessageUpdated => {
                DomainEvent::MessageUpdated(serde_json::from_value(payload).map_err(decode_err)?)
            }
            EventPattern::MessageDeleted => {
                DomainEvent::MessageDeleted(serde_json::from_value(payload).map_err(decode_err)?)
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn created_event() -> MessageCreated {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        MessageCreated {
            id: 42,
            conversation_id: 7,
            user_id: 1,
            content: "hi".to_string(),
            created_at: at,
            updated_at: at,
            author: EventAuthor {
                id: 1,
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
            },
            conversation: EventConversation {
                id: 7,
                participant_ids: [1, 2, 3].into_iter().collect(),
            },
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let event = DomainEvent::MessageCreated(created_event());
        let envelope = event.to_envelope().unwrap();

        assert_eq!(envelope.pattern, "message_created");
        assert_eq!(envelope.payload["conversationId"], json!(7));
        assert_eq!(envelope.payload["author"]["username"], json!("alice"));
        assert_eq!(envelope.payload["conversation"]["participantIds"], json!([1, 2, 3]));

        // 派生的 Serialize 与手工信封一致
        assert_eq!(serde_json::to_value(&event).unwrap(), serde_json::to_value(&envelope).unwrap());
    }

    #[test]
    fn test_every_event_survives_broker_boundary() {
        let events = [
            DomainEvent::MessageCreated(created_event()),
            DomainEvent::MessageUpdated(MessageUpdated {
                message_id: 42,
                content: "edited".to_string(),
                conversation_id: 7,
                user_id: 1,
            }),
            DomainEvent::MessageDeleted(MessageDeleted {
                message_id: 42,
                conversation_id: 7,
                user_id: 1,
            }),
        ];

        for event in events {
            let bytes = event.to_envelope().unwrap().to_bytes().unwrap();
            let envelope = BrokerMessage::from_bytes(&bytes).unwrap();
            assert_eq!(envelope.pattern, event.pattern().as_str());

            let decoded = DomainEvent::from_envelope(&envelope).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn test_update_and_delete_payloads() {
        let update = DomainEvent::MessageUpdated(MessageUpdated {
            message_id: 5,
            content: "edited".to_string(),
            conversation_id: 2,
            user_id: 9,
        });
        let envelope = update.to_envelope().unwrap();
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "pattern": "message_updated",
                "payload": {"messageId": 5, "content": "edited", "conversationId": 2, "userId": 9}
            })
        );

        let delete = DomainEvent::MessageDeleted(MessageDeleted {
            message_id: 5,
            conversation_id: 2,
            user_id: 9,
        });
        assert_eq!(delete.to_envelope().unwrap().pattern, "message_deleted");
        assert_eq!(delete.message_id(), 5);
        assert_eq!(delete.conversation_id(), 2);
    }

    #[test]
    fn test_unknown_pattern_is_rejected() {
        let envelope = BrokerMessage {
            pattern: "message_pinned".to_string(),
            payload: json!({}),
        };
        assert_eq!(
            DomainEvent::from_envelope(&envelope),
            Err(EnvelopeError::UnknownPattern("message_pinned".to_string()))
        );
    }

    #[test]
    fn test_payload_shape_mismatch_is_decode_error() {
        let envelope = BrokerMessage {
            pattern: "message_deleted".to_string(),
            payload: json!({"messageId": "not-a-number"}),
        };
        assert!(matches!(
            DomainEvent::from_envelope(&envelope),
            Err(EnvelopeError::Decode { .. })
        ));
        assert!(matches!(
            BrokerMessage::from_bytes(b"not json"),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}
