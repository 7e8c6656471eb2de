//! 数据模型模块
//!
//! 持久化层与 HTTP 层共享的实体：用户、会话、消息。

pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::{Conversation, NewConversation};
pub use message::{Message, MessageFilter, NewMessage};
pub use user::{NewUser, User};

/// 用户 ID（数据库 BIGINT）
pub type UserId = i64;
/// 会话 ID
pub type ConversationId = i64;
/// 消息 ID
pub type MessageId = i64;
