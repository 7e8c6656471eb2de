// 认证模块 - 账号体系由外部协作方负责，这里只校验 bearer token

pub mod jwt_service;
pub mod models;

pub use jwt_service::JwtAuthenticator;
pub use models::{CallerIdentity, TokenClaims};

use crate::error::Result;

/// 把 bearer 凭证解析为调用方身份
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, bearer: &str) -> Result<CallerIdentity>;
}
