//! HTTP 服务器模块 - 使用 Axum 提供变更/查询 API 与 SSE 订阅
//!
//! 功能包括：
//! - 消息、会话、用户的 JSON 接口
//! - 在线状态接口
//! - 实时推送订阅（Server-Sent Events）
//! - 健康检查与 Prometheus 指标

pub mod middleware;
pub mod routes;
pub mod server;

pub use middleware::auth::CurrentUser;
pub use server::{build_router, HttpServerState};
