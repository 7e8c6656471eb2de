// Infrastructure layer - 基础设施层
// 负责消息代理、实时推送、在线状态、数据库连接与监控指标

pub mod broker;
pub mod database;
pub mod live_feed;
pub mod metrics;
pub mod presence_tracker;

// 重新导出主要类型
pub use broker::{
    AmqpConsumer, AmqpTransport, BrokerError, BrokerGateway, BrokerTransport, DeliveryHandler,
    LocalQueue,
};
pub use database::Database;
pub use live_feed::{topics, FeedPayload, FeedPublisher, FeedSubscription, LiveFeedRegistry};
pub use presence_tracker::{
    Clock, OnlineUser, OnlineUsersSnapshot, PresenceConfig, PresenceTracker, SystemClock,
};
