//! 事件中继：代理消费端 -> 实时推送
//!
//! - `message_created`：按参与者逐个发布到 `messageAdded_<userId>`（包括作者本人）
//! - `message_updated` / `message_deleted`：发布到全局主题
//!
//! 处理失败只记录日志，从不向消费端抛错，信封照常确认。

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::domain::{BrokerMessage, DomainEvent, EnvelopeError};
use crate::infra::broker::DeliveryHandler;
use crate::infra::live_feed::{topics, FeedPayload, FeedPublisher};
use crate::infra::metrics;

/// 中继处理错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// 单个事件的中继结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayOutcome {
    /// 发布到的主题数量
    pub topics: usize,
    /// 实际送达的订阅者数量
    pub delivered: usize,
}

pub struct EventRelay {
    feed: Arc<dyn FeedPublisher>,
}

impl EventRelay {
    pub fn new(feed: Arc<dyn FeedPublisher>) -> Self {
        Self { feed }
    }

    /// 把一个领域事件扇出到推送主题
    pub fn handle(&self, event: DomainEvent) -> RelayOutcome {
        let pattern = event.pattern();
        metrics::record_relay_event(pattern.as_str());

        let outcome = match event {
            DomainEvent::MessageCreated(created) => {
                let participants = created.conversation.participant_ids.clone();
                if participants.is_empty() {
                    debug!("📭 Message {} has no participants, nothing to relay", created.id);
                }
                let payload = FeedPayload::MessageAdded(created);
                let mut outcome = RelayOutcome::default();
                for user_id in participants {
                    outcome.topics += 1;
                    outcome.delivered += self
                        .feed
                        .publish(&topics::message_added(user_id), payload.clone());
                }
                outcome
            }
            DomainEvent::MessageUpdated(updated) => RelayOutcome {
                topics: 1,
                delivered: self.feed.publish(
                    topics::MESSAGE_UPDATED_GLOBAL,
                    FeedPayload::MessageUpdated(updated),
                ),
            },
            DomainEvent::MessageDeleted(deleted) => RelayOutcome {
                topics: 1,
                delivered: self.feed.publish(
                    topics::MESSAGE_DELETED_GLOBAL,
                    FeedPayload::MessageDeleted(deleted),
                ),
            },
        };

        info!(
            "📨 Relayed {} to {} topics ({} listeners)",
            pattern, outcome.topics, outcome.delivered
        );
        outcome
    }

    /// 解析信封并中继
    pub fn handle_envelope(&self, envelope: &BrokerMessage) -> Result<RelayOutcome, RelayError> {
        let event = DomainEvent::from_envelope(envelope)?;
        Ok(self.handle(event))
    }

    /// 处理原始投递字节；任何错误都被记录并吞掉
    pub fn handle_bytes(&self, data: &[u8]) -> Option<RelayOutcome> {
        let result = BrokerMessage::from_bytes(data)
            .map_err(RelayError::from)
            .and_then(|envelope| self.handle_envelope(&envelope));

        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                metrics::record_relay_error();
                error!("❌ Error processing broker delivery: {}", e);
                None
            }
        }
    }
}

impl DeliveryHandler for EventRelay {
    fn handle_delivery(&self, data: &[u8]) {
        self.handle_bytes(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventAuthor, EventConversation, MessageCreated, MessageUpdated};
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingFeed(Mutex<Vec<(String, FeedPayload)>>);

    impl FeedPublisher for RecordingFeed {
        fn publish(&self, topic: &str, payload: FeedPayload) -> usize {
            self.0.lock().push((topic.to_string(), payload));
            1
        }
    }

    fn created(participants: &[i64]) -> DomainEvent {
        let now = Utc::now();
        DomainEvent::MessageCreated(MessageCreated {
            id: 10,
            conversation_id: 4,
            user_id: 1,
            content: "hello".to_string(),
            created_at: now,
            updated_at: now,
            author: EventAuthor {
                id: 1,
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
            },
            conversation: EventConversation {
                id: 4,
                participant_ids: participants.iter().copied().collect(),
            },
        })
    }

    fn relay() -> (EventRelay, Arc<RecordingFeed>) {
        let feed = Arc::new(RecordingFeed::default());
        (EventRelay::new(feed.clone()), feed)
    }

    #[test]
    fn test_created_fans_out_per_participant_including_author() {
        let (relay, feed) = relay();

        let outcome = relay.handle(created(&[1, 2, 3]));

        assert_eq!(outcome, RelayOutcome { topics: 3, delivered: 3 });
        let topics: Vec<_> = feed.0.lock().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(topics, vec!["messageAdded_1", "messageAdded_2", "messageAdded_3"]);
    }

    #[test]
    fn test_created_without_participants_publishes_nothing() {
        let (relay, feed) = relay();
        assert_eq!(relay.handle(created(&[])), RelayOutcome::default());
        assert!(feed.0.lock().is_empty());
    }

    #[test]
    fn test_update_goes_to_global_topic() {
        let (relay, feed) = relay();
        relay.handle(DomainEvent::MessageUpdated(MessageUpdated {
            message_id: 10,
            content: "edited".to_string(),
            conversation_id: 4,
            user_id: 1,
        }));

        let published = feed.0.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, topics::MESSAGE_UPDATED_GLOBAL);
    }

    #[test]
    fn test_delete_envelope_goes_to_global_topic() {
        let (relay, feed) = relay();
        let envelope = BrokerMessage {
            pattern: "message_deleted".to_string(),
            payload: json!({"messageId": 10, "conversationId": 4, "userId": 1}),
        };

        relay.handle_envelope(&envelope).unwrap();

        assert_eq!(feed.0.lock()[0].0, topics::MESSAGE_DELETED_GLOBAL);
    }

    #[test]
    fn test_bad_deliveries_are_swallowed() {
        let (relay, feed) = relay();

        assert_eq!(relay.handle_bytes(b"{not json"), None);
        assert_eq!(
            relay.handle_bytes(br#"{"pattern":"message_pinned","payload":{}}"#),
            None
        );
        assert_eq!(
            relay.handle_bytes(br#"{"pattern":"message_created","payload":{"id":1}}"#),
            None
        );
        // 通过 trait 调用同样不会 panic
        relay.handle_delivery(b"");
        assert!(feed.0.lock().is_empty());
    }
}
