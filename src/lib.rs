//! ChatFeed：实时聊天推送核心
//!
//! 变更写入存储后，领域事件经消息代理中继，再扇出到按主题订阅的长连接；
//! 同时维护在线用户列表并整体推送快照。

pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod http;
pub mod infra;
pub mod loader;
pub mod logging;
pub mod model;
pub mod repository;
pub mod server;
pub mod service;

pub use config::ServerConfig;
pub use context::RequestContext;
pub use domain::{BrokerMessage, DomainEvent, EventPattern};
pub use error::{Result, ServerError};
pub use infra::{BrokerGateway, LiveFeedRegistry, PresenceTracker};
pub use model::*;
pub use server::ChatServer;
pub use service::{EventRelay, MessageService};
