use axum::Json;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// 订阅档位，由外部认证层签进 token，决定能否拿到 ETA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionTier {
    Free,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_tier")]
    pub tier: SubscriptionTier,
    pub exp: i64, // 过期时间
    pub iat: i64, // 签发时间
}

fn default_tier() -> SubscriptionTier {
    SubscriptionTier::Free
}

/// 校验外部认证层签发的 token；签发本身不在本服务内
pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub resp_data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: None,
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const AUTH_FAILED: i32 = 1002;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const ROUTE_UNAVAILABLE: i32 = 1006;
    pub const INTERNAL_ERROR: i32 = 5000;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".into(),
            redis_url: "redis://localhost".into(),
            jwt_secret: "test-secret".into(),
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            routing_api_key: None,
            routing_base_url: "https://routes.googleapis.com".into(),
            routing_timeout_secs: 10,
            eta_cache_ttl_secs: 600,
            eta_bucket_decimals: 2,
            presence_bucket_decimals: 3,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            rate_limit_fail_open: true,
            max_search_radius: 50_000.0,
        }
    }

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn verify_token_decodes_tier_claims() {
        let config = test_config();
        let claims = Claims {
            sub: "9f1b2c4e-0000-0000-0000-000000000001".into(),
            email: Some("a@example.com".into()),
            tier: SubscriptionTier::Paid,
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        };
        let decoded = verify_token(&sign(&claims, &config.jwt_secret), &config).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.tier, SubscriptionTier::Paid);
    }

    #[test]
    fn verify_token_rejects_wrong_secret() {
        let config = test_config();
        let claims = Claims {
            sub: "user".into(),
            email: None,
            tier: SubscriptionTier::Free,
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        };
        assert!(verify_token(&sign(&claims, "other-secret"), &config).is_err());
    }
}
