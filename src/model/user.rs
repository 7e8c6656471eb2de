use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// 用户信息
///
/// 密码哈希不在此模型中：账号体系由外部认证协作方负责。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// 显示名称（可为空）
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// 事件中使用的用户名：优先显示名称，否则退回邮箱
    pub fn username(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.email.clone())
    }
}

/// 创建用户的输入
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
}
