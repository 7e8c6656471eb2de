//! 领域层：消息生命周期事件及其代理信封

pub mod events;

pub use events::{
    BrokerMessage, DomainEvent, EnvelopeError, EventAuthor, EventConversation, EventPattern,
    MessageCreated, MessageDeleted, MessageUpdated, MESSAGES_QUEUE,
};
