use serde::{Deserialize, Serialize};

use crate::model::UserId;

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// JWT 标准字段 - 签发者
    pub iss: String,
    /// JWT 标准字段 - 主题 (用户ID)
    pub sub: String,
    /// JWT 标准字段 - 过期时间 (Unix timestamp)
    pub exp: i64,
    /// JWT 标准字段 - 签发时间
    pub iat: i64,

    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// 已认证的调用方
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
}

impl CallerIdentity {
    /// 事件中使用的用户名：优先显示名称，否则退回邮箱
    pub fn username(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.email.clone())
    }
}
