use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatfeed::auth::CallerIdentity;
use chatfeed::domain::BrokerMessage;
use chatfeed::infra::{
    topics, BrokerError, BrokerGateway, BrokerTransport, FeedPayload, FeedSubscription,
    LiveFeedRegistry, LocalQueue,
};
use chatfeed::model::{NewConversation, NewUser, User};
use chatfeed::repository::{ChatStore, InMemoryStore};
use chatfeed::service::{EventRelay, MessageService};
use chatfeed::ServerError;
use futures::StreamExt;
use tokio::sync::watch;

/// 代理端始终拒收
struct RejectingTransport;

#[async_trait]
impl BrokerTransport for RejectingTransport {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish(&self, _envelope: &BrokerMessage) -> Result<(), BrokerError> {
        Err(BrokerError::Rejected("queue is full".to_string()))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

fn caller(user: &User) -> CallerIdentity {
    CallerIdentity {
        id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
    }
}

async fn seed(store: &InMemoryStore) -> (User, User, User, i64) {
    let mut users = Vec::new();
    for name in ["alice", "bob", "carol"] {
        users.push(
            store
                .create_user(NewUser {
                    email: format!("{}@example.com", name),
                    name: Some(name.to_string()),
                })
                .await
                .unwrap(),
        );
    }
    let carol = users.pop().unwrap();
    let bob = users.pop().unwrap();
    let alice = users.pop().unwrap();
    let conversation = store
        .create_conversation(NewConversation::new([alice.id, bob.id]))
        .await
        .unwrap();
    (alice, bob, carol, conversation.id)
}

async fn next_payload(sub: &mut FeedSubscription) -> FeedPayload {
    tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("no payload within timeout")
        .expect("subscription ended")
}

#[tokio::test]
async fn test_single_process_delivers_direct_and_relayed_copies() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, bob, carol, conversation_id) = seed(&store).await;

    let queue = Arc::new(LocalQueue::new());
    let gateway = Arc::new(BrokerGateway::new(queue.clone(), Duration::from_secs(1)));
    gateway.connect().await.unwrap();

    let feed = LiveFeedRegistry::new();
    let relay = Arc::new(EventRelay::new(Arc::new(feed.clone())));
    let (stop_tx, stop_rx) = watch::channel(false);
    let consumer = queue.spawn_consumer(relay, stop_rx).unwrap();

    let service = MessageService::new(store.clone(), gateway.clone(), Arc::new(feed.clone()));

    let mut bob_sub = feed.subscribe(topics::message_added(bob.id));
    let mut alice_sub = feed.subscribe(topics::message_added(alice.id));
    let mut carol_sub = feed.subscribe(topics::message_added(carol.id));

    let message = service
        .send_message(&caller(&alice), conversation_id, "hello bob".to_string())
        .await
        .unwrap();

    // 直接推送一份，经代理中继再到一份
    for sub in [&mut bob_sub, &mut alice_sub] {
        for _ in 0..2 {
            match next_payload(sub).await {
                FeedPayload::MessageAdded(created) => {
                    assert_eq!(created.id, message.id);
                    assert_eq!(created.content, "hello bob");
                    assert_eq!(created.author.username, "alice");
                    assert!(created.conversation.participant_ids.contains(&bob.id));
                }
                other => panic!("unexpected payload {:?}", other),
            }
        }
    }

    // 非参与者收不到
    assert!(carol_sub.try_next().is_none());

    stop_tx.send(true).unwrap();
    consumer.await.unwrap();
    gateway.close().await;
}

#[tokio::test]
async fn test_separate_consumer_process_receives_relayed_events() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, bob, _carol, conversation_id) = seed(&store).await;

    let queue = Arc::new(LocalQueue::new());
    let gateway = Arc::new(BrokerGateway::new(queue.clone(), Duration::from_secs(1)));
    gateway.connect().await.unwrap();

    // 生产端与消费端各自拥有独立的推送注册表
    let producer_feed = LiveFeedRegistry::new();
    let consumer_feed = LiveFeedRegistry::new();
    let service = MessageService::new(store.clone(), gateway.clone(), Arc::new(producer_feed));

    let message = service
        .send_message(&caller(&alice), conversation_id, "queued first".to_string())
        .await
        .unwrap();

    // 消费端晚于发布启动，信封仍在队列中等待
    let mut bob_sub = consumer_feed.subscribe(topics::message_added(bob.id));
    let relay = Arc::new(EventRelay::new(Arc::new(consumer_feed.clone())));
    let (stop_tx, stop_rx) = watch::channel(false);
    let consumer = queue.spawn_consumer(relay, stop_rx).unwrap();

    match next_payload(&mut bob_sub).await {
        FeedPayload::MessageAdded(created) => assert_eq!(created.id, message.id),
        other => panic!("unexpected payload {:?}", other),
    }

    // 更新与删除走全局主题
    let mut updated_sub = consumer_feed.subscribe(topics::MESSAGE_UPDATED_GLOBAL);
    let mut deleted_sub = consumer_feed.subscribe(topics::MESSAGE_DELETED_GLOBAL);

    service
        .update_message(message.id, "edited".to_string())
        .await
        .unwrap();
    assert!(service.delete_message(message.id).await.unwrap());

    match next_payload(&mut updated_sub).await {
        FeedPayload::MessageUpdated(updated) => {
            assert_eq!(updated.message_id, message.id);
            assert_eq!(updated.content, "edited");
        }
        other => panic!("unexpected payload {:?}", other),
    }
    match next_payload(&mut deleted_sub).await {
        FeedPayload::MessageDeleted(deleted) => assert_eq!(deleted.message_id, message.id),
        other => panic!("unexpected payload {:?}", other),
    }

    stop_tx.send(true).unwrap();
    consumer.await.unwrap();
}

#[tokio::test]
async fn test_rejected_publish_keeps_the_write() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, bob, _carol, conversation_id) = seed(&store).await;

    let gateway = Arc::new(BrokerGateway::new(
        Arc::new(RejectingTransport),
        Duration::from_secs(1),
    ));
    gateway.connect().await.unwrap();

    let feed = LiveFeedRegistry::new();
    let service = MessageService::new(store.clone(), gateway, Arc::new(feed.clone()));
    let mut bob_sub = feed.subscribe(topics::message_added(bob.id));

    let err = service
        .send_message(&caller(&alice), conversation_id, "still saved".to_string())
        .await
        .unwrap_err();

    let message_id = match err {
        ServerError::RelayFailed { message_id, error } => {
            assert_eq!(error, BrokerError::Rejected("queue is full".to_string()));
            message_id
        }
        other => panic!("unexpected error {:?}", other),
    };

    let stored = store.find_message(message_id).await.unwrap().unwrap();
    assert_eq!(stored.content, "still saved");

    // 直接推送不受代理失败影响
    assert!(matches!(bob_sub.try_next(), Some(FeedPayload::MessageAdded(_))));

    // 单独重试中继仍然失败，但消息保持不变
    assert!(matches!(
        service.retry_relay(message_id).await,
        Err(ServerError::RelayFailed { .. })
    ));
    assert_eq!(service.message(message_id).await.unwrap(), stored);
}
