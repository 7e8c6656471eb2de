// 业务服务层模块
pub mod event_relay;
pub mod message_service;

pub use event_relay::{EventRelay, RelayError, RelayOutcome};
pub use message_service::MessageService;
