//! 进程内队列传输
//!
//! 语义与持久化工作队列一致：消费者未运行时信封留在队列中，
//! 消费者停止后接收端归还，下一个消费者从断点继续。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{BrokerError, BrokerTransport, DeliveryHandler};
use crate::domain::BrokerMessage;

pub struct LocalQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>>,
    connected: AtomicBool,
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            connected: AtomicBool::new(false),
        }
    }

    /// 启动消费者；同一时刻只允许一个消费者
    pub fn spawn_consumer(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, BrokerError> {
        let mut rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| BrokerError::Unavailable("local queue already has a consumer".to_string()))?;
        let slot = Arc::clone(&self.rx);

        Ok(tokio::spawn(async move {
            info!("👂 Local queue consumer started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    data = rx.recv() => match data {
                        Some(data) => handler.handle_delivery(&data),
                        None => break,
                    },
                }
            }
            *slot.lock() = Some(rx);
            info!("🛑 Local queue consumer stopped");
        }))
    }
}

#[async_trait]
impl BrokerTransport for LocalQueue {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, envelope: &BrokerMessage) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker not connected".to_string()));
        }
        let body = envelope
            .to_bytes()
            .map_err(|e| BrokerError::Rejected(format!("envelope encoding failed: {}", e)))?;
        self.tx
            .send(body)
            .map_err(|_| BrokerError::Unavailable("local queue closed".to_string()))?;
        debug!("📥 {} enqueued locally", envelope.pattern);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("local queue already closed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Collect(Mutex<Vec<BrokerMessage>>);

    impl DeliveryHandler for Collect {
        fn handle_delivery(&self, data: &[u8]) {
            self.0.lock().push(BrokerMessage::from_bytes(data).unwrap());
        }
    }

    fn envelope(n: i64) -> BrokerMessage {
        BrokerMessage {
            pattern: "message_deleted".to_string(),
            payload: json!({"messageId": n}),
        }
    }

    #[tokio::test]
    async fn test_publish_requires_connect() {
        let queue = LocalQueue::new();
        assert!(matches!(
            queue.publish(&envelope(1)).await,
            Err(BrokerError::Unavailable(_))
        ));
        queue.connect().await.unwrap();
        queue.publish(&envelope(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_envelopes_retained_until_consumer_starts() {
        let queue = LocalQueue::new();
        queue.connect().await.unwrap();
        queue.publish(&envelope(1)).await.unwrap();
        queue.publish(&envelope(2)).await.unwrap();

        let handler = Arc::new(Collect::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = queue.spawn_consumer(handler.clone(), stop_rx).unwrap();

        for _ in 0..100 {
            if handler.0.lock().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        let seen: Vec<_> = handler.0.lock().iter().map(|e| e.payload["messageId"].clone()).collect();
        assert_eq!(seen, vec![json!(1), json!(2)]);

        // 接收端已归还，可以再启动新的消费者
        let (_tx, rx) = watch::channel(false);
        assert!(queue.spawn_consumer(handler, rx).is_ok());
    }

    #[tokio::test]
    async fn test_second_consumer_is_refused() {
        let queue = LocalQueue::new();
        let (_tx, rx) = watch::channel(false);
        let _first = queue
            .spawn_consumer(Arc::new(Collect::default()), rx.clone())
            .unwrap();
        assert!(queue.spawn_consumer(Arc::new(Collect::default()), rx).is_err());
    }

    #[tokio::test]
    async fn test_double_close_reports_error() {
        let queue = LocalQueue::new();
        queue.connect().await.unwrap();
        assert!(queue.close().await.is_ok());
        assert!(queue.close().await.is_err());
    }
}
