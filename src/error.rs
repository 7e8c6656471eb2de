use std::fmt;
use std::error::Error as StdError;
use serde::{Serialize, Deserialize};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response, Json},
};

use crate::infra::broker::BrokerError;
use crate::model::MessageId;

/// 服务器错误类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerError {
    /// 内部错误
    Internal(String),
    /// 未授权（缺少或无效的 bearer 凭证）
    Unauthorized(String),
    /// 验证错误
    Validation(String),
    /// 资源未找到
    NotFound(String),
    /// 错误请求
    BadRequest(String),
    /// 数据库错误
    Database(String),
    /// 序列化错误
    Serialization(String),
    /// 配置错误
    Configuration(String),
    /// 消息代理错误（未关联已落库的数据）
    Broker(BrokerError),
    /// 写入已成功，但事件未能投递到消息代理
    ///
    /// 调用方可以单独重试中继步骤，数据不会回滚。
    RelayFailed {
        message_id: MessageId,
        error: BrokerError,
    },
}

impl ServerError {
    /// 取出底层的代理错误（如果有）
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            ServerError::Broker(e) | ServerError::RelayFailed { error: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ServerError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ServerError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ServerError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ServerError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ServerError::Database(msg) => write!(f, "Database error: {}", msg),
            ServerError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ServerError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ServerError::Broker(e) => write!(f, "Broker error: {}", e),
            ServerError::RelayFailed { message_id, error } => write!(
                f,
                "Message {} was saved but could not be relayed: {}",
                message_id, error
            ),
        }
    }
}

impl StdError for ServerError {}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Validation(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Broker(BrokerError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Broker(_) | ServerError::RelayFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_response = match &self {
            ServerError::RelayFailed { message_id, .. } => {
                ErrorResponse::with_details(&self, format!("persisted message id: {}", message_id))
            }
            _ => ErrorResponse::new(&self),
        };
        (status_code, Json(error_response)).into_response()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServerError::NotFound("row not found".to_string()),
            other => ServerError::Database(other.to_string()),
        }
    }
}

impl From<BrokerError> for ServerError {
    fn from(err: BrokerError) -> Self {
        ServerError::Broker(err)
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 内部错误
    Internal = 1000,
    /// 认证错误
    Unauthorized = 1001,
    /// 验证错误
    Validation = 1003,
    /// 数据库错误
    Database = 2000,
    /// 序列化错误
    Serialization = 2002,
    /// 配置错误
    Configuration = 2003,
    /// 错误请求
    BadRequest = 5004,
    /// 资源未找到
    NotFound = 5005,
    /// 消息代理不可用
    BrokerUnavailable = 6000,
    /// 消息代理拒绝
    BrokerRejected = 6001,
    /// 已落库但未中继
    RelayFailed = 6002,
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::Internal(_) => ErrorCode::Internal,
            ServerError::Unauthorized(_) => ErrorCode::Unauthorized,
            ServerError::Validation(_) => ErrorCode::Validation,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::BadRequest(_) => ErrorCode::BadRequest,
            ServerError::Database(_) => ErrorCode::Database,
            ServerError::Serialization(_) => ErrorCode::Serialization,
            ServerError::Configuration(_) => ErrorCode::Configuration,
            ServerError::Broker(BrokerError::Unavailable(_)) => ErrorCode::BrokerUnavailable,
            ServerError::Broker(BrokerError::Rejected(_)) => ErrorCode::BrokerRejected,
            ServerError::RelayFailed { .. } => ErrorCode::RelayFailed,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 详细信息
    pub details: Option<String>,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &ServerError) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.to_string(),
            details: None,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    /// 创建带详细信息的错误响应
    pub fn with_details(error: &ServerError, details: String) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.to_string(),
            details: Some(details),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_failure_maps_to_bad_gateway() {
        let err = ServerError::RelayFailed {
            message_id: 3,
            error: BrokerError::Rejected("nack".to_string()),
        };
        assert_eq!(err.broker_error(), Some(&BrokerError::Rejected("nack".to_string())));
        assert_eq!(ErrorCode::from(&err), ErrorCode::RelayFailed);
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_unauthorized_status() {
        let response = ServerError::Unauthorized("missing token".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_broker_unavailable_status() {
        let err: ServerError = BrokerError::Unavailable("connection refused".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
