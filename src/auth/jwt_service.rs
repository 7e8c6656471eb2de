use crate::auth::models::{CallerIdentity, TokenClaims};
use crate::auth::Authenticator;
use crate::error::{Result, ServerError};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

const ISSUER: &str = "chatfeed";

/// JWT 认证 (HS256 对称加密)
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: i64,
}

impl JwtAuthenticator {
    pub fn new(secret: &str, token_ttl: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl,
        }
    }

    /// 签发 token（开发工具与测试使用）
    pub fn issue_token(&self, caller: &CallerIdentity) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            iss: ISSUER.to_string(),
            sub: caller.id.to_string(),
            exp: now + self.token_ttl,
            iat: now,
            email: caller.email.clone(),
            name: caller.name.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServerError::Internal(format!("JWT 签发失败: {}", e)))
    }

    /// 验证 token
    pub fn verify_token(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);

        let token_data = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| ServerError::Unauthorized(format!("invalid token: {}", e)))?;
        Ok(token_data.claims)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, bearer: &str) -> Result<CallerIdentity> {
        let claims = self.verify_token(bearer)?;
        let id = claims
            .sub
            .parse()
            .map_err(|_| ServerError::Unauthorized(format!("invalid subject: {}", claims.sub)))?;
        Ok(CallerIdentity {
            id,
            email: claims.email,
            name: claims.name,
        })
    }
}
