//! RabbitMQ 传输（lapin）
//!
//! 生产端开启 publisher confirms，消息写入持久化队列（默认交换机，路由键即队列名）。
//! 消费端断线后按固定间隔重连，直到收到关闭信号。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BrokerError, BrokerTransport, DeliveryHandler};
use crate::domain::BrokerMessage;

fn unavailable(context: &str, err: lapin::Error) -> BrokerError {
    BrokerError::Unavailable(format!("{}: {}", context, err))
}

/// 声明持久化队列（生产端与消费端共用，参数必须一致）
async fn declare_queue(channel: &Channel, queue: &str) -> Result<(), BrokerError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| unavailable("failed to declare queue", e))?;
    Ok(())
}

struct AmqpLink {
    connection: Connection,
    channel: Channel,
}

impl AmqpLink {
    async fn open(url: &str, queue: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| unavailable("failed to connect to RabbitMQ", e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| unavailable("failed to create channel", e))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| unavailable("failed to enable publisher confirms", e))?;
        declare_queue(&channel, queue).await?;
        Ok(Self { connection, channel })
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// RabbitMQ 生产端
pub struct AmqpTransport {
    url: String,
    queue: String,
    link: Mutex<Option<AmqpLink>>,
}

impl AmqpTransport {
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            link: Mutex::new(None),
        }
    }

    /// 取得可用的 channel；连接已断开时尝试重连一次
    async fn channel(&self) -> Result<Channel, BrokerError> {
        let mut link = self.link.lock().await;
        match link.as_ref() {
            Some(current) if current.is_open() => return Ok(current.channel.clone()),
            Some(_) => warn!("⚠️ RabbitMQ link lost, reconnecting"),
            None => return Err(BrokerError::Unavailable("broker not connected".to_string())),
        }
        let fresh = AmqpLink::open(&self.url, &self.queue).await?;
        let channel = fresh.channel.clone();
        *link = Some(fresh);
        info!("🐇 RabbitMQ link re-established");
        Ok(channel)
    }
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    fn name(&self) -> &'static str {
        "amqp"
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        let fresh = AmqpLink::open(&self.url, &self.queue).await?;
        *self.link.lock().await = Some(fresh);
        info!("🐇 Connected to RabbitMQ, queue '{}'", self.queue);
        Ok(())
    }

    async fn publish(&self, envelope: &BrokerMessage) -> Result<(), BrokerError> {
        let body = envelope
            .to_bytes()
            .map_err(|e| BrokerError::Rejected(format!("envelope encoding failed: {}", e)))?;
        let channel = self.channel().await?;

        let confirm = channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| unavailable("failed to publish message", e))?;

        let confirmation = confirm
            .await
            .map_err(|e| unavailable("failed to await publisher confirm", e))?;
        if confirmation.is_nack() {
            return Err(BrokerError::Rejected(format!(
                "broker nacked {} envelope",
                envelope.pattern
            )));
        }
        debug!("✅ {} confirmed by RabbitMQ ({} bytes)", envelope.pattern, body.len());
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };
        link.channel
            .close(200, "shutdown")
            .await
            .map_err(|e| unavailable("failed to close channel", e))?;
        link.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| unavailable("failed to close connection", e))?;
        Ok(())
    }
}

/// RabbitMQ 消费端
///
/// 每条投递交给处理器后立即确认；处理器内部错误不会导致重投。
pub struct AmqpConsumer {
    url: String,
    queue: String,
    prefetch: u16,
    reconnect_delay: Duration,
}

impl AmqpConsumer {
    pub fn new(
        url: impl Into<String>,
        queue: impl Into<String>,
        prefetch: u16,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            prefetch,
            reconnect_delay,
        }
    }

    /// 启动消费循环，`shutdown` 置为 true（或发送端被丢弃）时退出
    pub fn spawn(
        self,
        handler: Arc<dyn DeliveryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                match self.consume(handler.as_ref(), &mut shutdown).await {
                    Ok(()) => break,
                    Err(e) => {
                        error!(
                            "❌ RabbitMQ consumer error: {}; retrying in {:?}",
                            e, self.reconnect_delay
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
            }
            info!("🛑 RabbitMQ consumer stopped");
        })
    }

    /// 单次连接的消费过程；收到关闭信号返回 Ok，链路异常返回 Err
    async fn consume(
        &self,
        handler: &dyn DeliveryHandler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| unavailable("failed to connect to RabbitMQ", e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| unavailable("failed to create channel", e))?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| unavailable("failed to set prefetch", e))?;
        declare_queue(&channel, &self.queue).await?;

        let tag = format!("chatfeed-{}", uuid::Uuid::new_v4());
        let mut consumer = channel
            .basic_consume(
                &self.queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| unavailable("failed to start consumer", e))?;
        info!("👂 Consuming '{}' as {}", self.queue, tag);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if let Err(e) = connection.close(200, "shutdown").await {
                        debug!("RabbitMQ consumer close: {}", e);
                    }
                    return Ok(());
                }
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => {
                        handler.handle_delivery(&delivery.data);
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            warn!("⚠️ Failed to ack delivery {}: {}", delivery.delivery_tag, e);
                        }
                    }
                    Some(Err(e)) => return Err(unavailable("delivery stream failed", e)),
                    None => {
                        return Err(BrokerError::Unavailable("delivery stream ended".to_string()))
                    }
                },
            }
        }
    }
}
