use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::CallerIdentity;
use crate::error::{Result, ServerError};
use crate::loader::Loaders;
use crate::repository::ChatStore;

/// 请求上下文
///
/// 每个 HTTP 请求新建一份，批量加载器的缓存只在本请求内有效。
pub struct RequestContext {
    /// 调用方（匿名请求为 None）
    pub caller: Option<CallerIdentity>,
    pub loaders: Loaders,
    /// 请求时间戳
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            caller: None,
            loaders: Loaders::new(store),
            received_at: Utc::now(),
        }
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = Some(caller);
        self
    }

    /// 是否已认证
    pub fn is_authenticated(&self) -> bool {
        self.caller.is_some()
    }

    pub fn caller(&self) -> Result<&CallerIdentity> {
        self.caller
            .as_ref()
            .ok_or_else(|| ServerError::Unauthorized("authentication required".to_string()))
    }
}
