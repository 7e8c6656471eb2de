//! 进程内实时推送总线（Live Feed Registry）
//!
//! - 主题按需创建：首次订阅时建立，最后一个订阅者断开时回收
//! - 发布即广播：同一主题的每个订阅者都收到一份独立副本
//! - 无缓冲：发布时没有订阅者的载荷直接丢弃，不会留给之后加入的订阅者
//! - 同一主题内按 `publish` 调用顺序投递（持锁扇出）

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::{MessageCreated, MessageDeleted, MessageUpdated};
use crate::infra::metrics;
use crate::infra::presence_tracker::OnlineUsersSnapshot;

/// 对外约定的主题名称，客户端依赖这些字符串
pub mod topics {
    use crate::model::UserId;

    pub const MESSAGE_UPDATED_GLOBAL: &str = "messageUpdated_global";
    pub const MESSAGE_DELETED_GLOBAL: &str = "messageDeleted_global";
    pub const ONLINE_USERS_UPDATED: &str = "onlineUsersUpdated";

    /// 某个接收者的新消息主题：`messageAdded_<userId>`
    pub fn message_added(user_id: UserId) -> String {
        format!("messageAdded_{}", user_id)
    }
}

/// 推送载荷
///
/// 外部标签序列化：`{"messageAdded": {...}}`、`{"onlineUsersUpdated": {"online": [...]}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedPayload {
    MessageAdded(MessageCreated),
    MessageUpdated(MessageUpdated),
    MessageDeleted(MessageDeleted),
    OnlineUsersUpdated(OnlineUsersSnapshot),
}

/// 发布端抽象
///
/// 中继、在线状态和变更服务都通过构造注入持有它，测试可替换为记录型实现。
pub trait FeedPublisher: Send + Sync {
    /// 发布到主题，返回实际送达的订阅者数量。没有订阅者时返回 0，从不失败。
    fn publish(&self, topic: &str, payload: FeedPayload) -> usize;
}

struct Listener {
    id: u64,
    tx: mpsc::UnboundedSender<FeedPayload>,
}

#[derive(Default)]
struct RegistryInner {
    /// topic -> 当前订阅者
    topics: Mutex<HashMap<String, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove_listener(&self, topic: &str, id: u64) {
        let mut topics = self.topics.lock();
        if let Some(listeners) = topics.get_mut(topic) {
            listeners.retain(|l| l.id != id);
            if listeners.is_empty() {
                topics.remove(topic);
                debug!("🧹 Topic {} has no listeners left, removed", topic);
            }
        }
        metrics::record_active_subscriptions(total_listeners(&topics));
    }
}

fn total_listeners(topics: &HashMap<String, Vec<Listener>>) -> usize {
    topics.values().map(Vec::len).sum()
}

/// 实时推送注册表
///
/// 克隆开销很小，所有克隆共享同一张主题表。
#[derive(Clone, Default)]
pub struct LiveFeedRegistry {
    inner: Arc<RegistryInner>,
}

impl LiveFeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅主题
    ///
    /// 返回的流在被丢弃（连接关闭）之前一直有效；丢弃即退订。
    pub fn subscribe(&self, topic: impl Into<String>) -> FeedSubscription {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut topics = self.inner.topics.lock();
        topics
            .entry(topic.clone())
            .or_default()
            .push(Listener { id, tx });
        metrics::record_active_subscriptions(total_listeners(&topics));
        drop(topics);

        debug!("👂 Listener {} subscribed to {}", id, topic);

        FeedSubscription {
            topic,
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// 当前主题的订阅者数量
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// 当前存活的主题数量
    pub fn topic_count(&self) -> usize {
        self.inner.topics.lock().len()
    }

    /// 移除进程内全部订阅者（关闭时调用），返回移除数量
    ///
    /// 所有未结束的订阅流随后会返回 `None`。
    pub fn teardown(&self) -> usize {
        let mut topics = self.inner.topics.lock();
        let removed = total_listeners(&topics);
        topics.clear();
        metrics::record_active_subscriptions(0);
        info!("🧹 LiveFeedRegistry teardown: removed {} listeners", removed);
        removed
    }
}

impl FeedPublisher for LiveFeedRegistry {
    fn publish(&self, topic: &str, payload: FeedPayload) -> usize {
        let mut topics = self.inner.topics.lock();
        let Some(listeners) = topics.get_mut(topic) else {
            debug!("📭 No listeners on {}, payload dropped", topic);
            metrics::record_feed_publish(topic_kind(topic), 0);
            return 0;
        };

        // 接收端已关闭但 Drop 尚未执行的监听者在这里顺带清理
        listeners.retain(|l| l.tx.send(payload.clone()).is_ok());
        let delivered = listeners.len();
        if listeners.is_empty() {
            topics.remove(topic);
        }
        drop(topics);

        metrics::record_feed_publish(topic_kind(topic), delivered);
        debug!("📢 Published to {} ({} listeners)", topic, delivered);
        delivered
    }
}

/// 指标标签：去掉接收者 ID，避免标签基数膨胀
fn topic_kind(topic: &str) -> &str {
    topic.split('_').next().unwrap_or(topic)
}

/// 单个订阅（一个长连接监听者）
///
/// 实现 `Stream<Item = FeedPayload>`：惰性、无限、不可重启。
pub struct FeedSubscription {
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<FeedPayload>,
    registry: Weak<RegistryInner>,
}

impl FeedSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 非阻塞地取出一条已到达的载荷
    pub fn try_next(&mut self) -> Option<FeedPayload> {
        self.rx.try_recv().ok()
    }
}

impl Stream for FeedSubscription {
    type Item = FeedPayload;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove_listener(&self.topic, self.id);
        }
        debug!("👋 Listener {} left {}", self.id, self.topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageDeleted;
    use futures::{FutureExt, StreamExt};

    fn deleted(message_id: i64) -> FeedPayload {
        FeedPayload::MessageDeleted(MessageDeleted {
            message_id,
            conversation_id: 1,
            user_id: 1,
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let registry = LiveFeedRegistry::new();

        assert_eq!(registry.publish("messageAdded_1", deleted(1)), 0);

        // 之后加入的订阅者收不到之前的载荷
        let mut sub = registry.subscribe("messageAdded_1");
        assert!(sub.next().now_or_never().is_none());
        assert_eq!(registry.publish("messageAdded_1", deleted(2)), 1);
        assert_eq!(sub.next().await, Some(deleted(2)));
    }

    #[tokio::test]
    async fn test_broadcast_to_every_subscriber() {
        let registry = LiveFeedRegistry::new();
        let mut a = registry.subscribe(topics::MESSAGE_DELETED_GLOBAL);
        let mut b = registry.subscribe(topics::MESSAGE_DELETED_GLOBAL);

        assert_eq!(registry.publish(topics::MESSAGE_DELETED_GLOBAL, deleted(7)), 2);

        assert_eq!(a.next().await, Some(deleted(7)));
        assert_eq!(b.next().await, Some(deleted(7)));
    }

    #[tokio::test]
    async fn test_fifo_within_topic() {
        let registry = LiveFeedRegistry::new();
        let mut sub = registry.subscribe("t");

        for id in 0..50 {
            registry.publish("t", deleted(id));
        }
        for id in 0..50 {
            assert_eq!(sub.next().await, Some(deleted(id)));
        }
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let registry = LiveFeedRegistry::new();
        let mut one = registry.subscribe(topics::message_added(1));
        let mut two = registry.subscribe(topics::message_added(2));

        registry.publish(&topics::message_added(1), deleted(1));

        assert_eq!(one.try_next(), Some(deleted(1)));
        assert_eq!(two.try_next(), None);
    }

    #[test]
    fn test_topic_collected_after_last_subscriber_drops() {
        let registry = LiveFeedRegistry::new();
        let a = registry.subscribe("t");
        let b = registry.subscribe("t");
        assert_eq!(registry.subscriber_count("t"), 2);

        drop(a);
        assert_eq!(registry.subscriber_count("t"), 1);
        drop(b);
        assert_eq!(registry.subscriber_count("t"), 0);
        assert_eq!(registry.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_ends_all_streams() {
        let registry = LiveFeedRegistry::new();
        let mut a = registry.subscribe("a");
        let mut b = registry.subscribe("b");

        assert_eq!(registry.teardown(), 2);
        assert_eq!(registry.topic_count(), 0);
        assert_eq!(a.next().await, None);
        assert_eq!(b.next().await, None);

        // 关闭后发布不会出错
        assert_eq!(registry.publish("a", deleted(1)), 0);
    }

    #[test]
    fn test_payload_wire_shape() {
        let value = serde_json::to_value(deleted(3)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"messageDeleted": {"messageId": 3, "conversationId": 1, "userId": 1}})
        );
        assert_eq!(topics::message_added(42), "messageAdded_42");
    }
}
