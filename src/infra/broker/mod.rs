//! 消息代理网关
//!
//! 生产端：把领域事件封装为 `{pattern, payload}` 信封投递到持久化工作队列，
//! 投递语义为至少一次。消费端：从同一队列取出信封交给 [`DeliveryHandler`]。
//!
//! 传输实现：
//! - [`AmqpTransport`] / [`AmqpConsumer`]：RabbitMQ（lapin）
//! - [`LocalQueue`]：进程内队列，单进程部署与测试使用

pub mod amqp;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::{BrokerMessage, DomainEvent};
use crate::infra::metrics;

pub use amqp::{AmqpConsumer, AmqpTransport};
pub use local::LocalQueue;

/// 代理错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum BrokerError {
    /// 传输层不可达（连接失败、超时、连接已断开）
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// 代理拒收（nack）或信封无法编码
    #[error("broker rejected envelope: {0}")]
    Rejected(String),
}

/// 代理传输层
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// 建立连接并声明队列
    async fn connect(&self) -> Result<(), BrokerError>;

    /// 投递一个信封，返回前等待代理确认
    async fn publish(&self, envelope: &BrokerMessage) -> Result<(), BrokerError>;

    /// 关闭连接
    async fn close(&self) -> Result<(), BrokerError>;
}

/// 消费端投递处理器
///
/// 实现方不得向外抛错：处理完成（无论成败）后信封都会被确认。
pub trait DeliveryHandler: Send + Sync {
    fn handle_delivery(&self, data: &[u8]);
}

/// 代理网关（生产端）
pub struct BrokerGateway {
    transport: Arc<dyn BrokerTransport>,
    publish_timeout: Duration,
}

impl BrokerGateway {
    pub fn new(transport: Arc<dyn BrokerTransport>, publish_timeout: Duration) -> Self {
        Self {
            transport,
            publish_timeout,
        }
    }

    /// 启动时连接；必须在接收变更请求之前完成
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.transport.connect().await?;
        info!("🐇 Broker gateway connected ({})", self.transport.name());
        Ok(())
    }

    /// 发布领域事件，pattern 由事件变体决定
    pub async fn publish(&self, event: &DomainEvent) -> Result<(), BrokerError> {
        let pattern = event.pattern();
        let result = match event.to_envelope() {
            Ok(envelope) => {
                match tokio::time::timeout(self.publish_timeout, self.transport.publish(&envelope)).await {
                    Ok(result) => result,
                    Err(_) => Err(BrokerError::Unavailable(format!(
                        "publish timed out after {:?}",
                        self.publish_timeout
                    ))),
                }
            }
            Err(e) => Err(BrokerError::Rejected(format!("envelope encoding failed: {}", e))),
        };

        metrics::record_broker_publish(pattern.as_str(), result.is_ok());
        match &result {
            Ok(()) => info!("📤 {} sent to broker: message {}", pattern, event.message_id()),
            Err(e) => error!(
                "❌ Error sending {} to broker (message {}): {}",
                pattern,
                event.message_id(),
                e
            ),
        }
        result
    }

    /// 优雅关闭：尽力而为，已关闭等错误只记录不返回
    pub async fn close(&self) {
        match self.transport.close().await {
            Ok(()) => info!("🐇 Broker gateway closed"),
            Err(e) => warn!("⚠️ Error closing broker connection (ignored): {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageDeleted;
    use parking_lot::Mutex;

    struct StubTransport {
        outcome: Result<(), BrokerError>,
        delay: Duration,
        sent: Mutex<Vec<BrokerMessage>>,
    }

    impl StubTransport {
        fn new(outcome: Result<(), BrokerError>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                delay,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BrokerTransport for StubTransport {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn connect(&self) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish(&self, envelope: &BrokerMessage) -> Result<(), BrokerError> {
            tokio::time::sleep(self.delay).await;
            self.sent.lock().push(envelope.clone());
            self.outcome.clone()
        }

        async fn close(&self) -> Result<(), BrokerError> {
            Err(BrokerError::Unavailable("already closed".to_string()))
        }
    }

    fn event() -> DomainEvent {
        DomainEvent::MessageDeleted(MessageDeleted {
            message_id: 1,
            conversation_id: 2,
            user_id: 3,
        })
    }

    #[tokio::test]
    async fn test_publish_uses_event_pattern() {
        let transport = StubTransport::new(Ok(()), Duration::ZERO);
        let gateway = BrokerGateway::new(transport.clone(), Duration::from_secs(1));

        gateway.publish(&event()).await.unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].pattern, "message_deleted");
        assert_eq!(sent[0].payload["messageId"], 1);
    }

    #[tokio::test]
    async fn test_rejection_is_propagated() {
        let transport = StubTransport::new(Err(BrokerError::Rejected("nack".to_string())), Duration::ZERO);
        let gateway = BrokerGateway::new(transport, Duration::from_secs(1));

        assert_eq!(
            gateway.publish(&event()).await,
            Err(BrokerError::Rejected("nack".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_unavailable() {
        let transport = StubTransport::new(Ok(()), Duration::from_secs(30));
        let gateway = BrokerGateway::new(transport, Duration::from_secs(5));

        assert!(matches!(
            gateway.publish(&event()).await,
            Err(BrokerError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_close_swallows_errors() {
        let transport = StubTransport::new(Ok(()), Duration::ZERO);
        let gateway = BrokerGateway::new(transport, Duration::from_secs(1));
        gateway.close().await;
    }
}
