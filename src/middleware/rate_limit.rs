use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{
    config::Config,
    utils::{error_codes, error_to_api_response},
};

/// 单次限流判定结果；skipped 表示存储不可用、本次未真正计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: Option<u32>,
    pub skipped: bool,
}

#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    config: Arc<Config>,
}

impl RateLimiter {
    pub fn new(redis: Arc<redis::Client>, config: Config) -> Self {
        Self {
            redis,
            config: Arc::new(config),
        }
    }

    /// 对 (场景, 用户, IP, 时间窗) 计数并判定；检查即计数，对调用方原子
    ///
    /// 存储不可用时按 rate_limit_fail_open 决定放行还是拒绝，错误永不外抛：
    /// 限流失效比整个功能不可用可接受
    pub async fn check(
        &self,
        scope: &str,
        actor: &str,
        ip: &str,
        window: Duration,
        max_requests: u32,
    ) -> RateLimitDecision {
        match self.try_check(scope, actor, ip, window, max_requests).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    "Rate limit store unavailable ({}), {}",
                    e,
                    if self.config.rate_limit_fail_open {
                        "failing open"
                    } else {
                        "failing closed"
                    }
                );
                RateLimitDecision {
                    allowed: self.config.rate_limit_fail_open,
                    remaining: None,
                    skipped: true,
                }
            }
        }
    }

    async fn try_check(
        &self,
        scope: &str,
        actor: &str,
        ip: &str,
        window: Duration,
        max_requests: u32,
    ) -> Result<RateLimitDecision, redis::RedisError> {
        let window_secs = window.as_secs().max(1);
        // 窗口编号写进 key，新窗口自然从零计数
        let slot = chrono::Utc::now().timestamp() as u64 / window_secs;
        let key = format!("rate_limit:{}:{}:{}:{}", scope, actor, ip, slot);

        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let count: u32 = conn.incr(&key, 1).await?;
        if count == 1 {
            // 首次计数时挂上过期时间
            let _: () = conn.expire(&key, window_secs as i64).await?;
        }

        Ok(RateLimitDecision {
            allowed: count <= max_requests,
            remaining: Some(max_requests.saturating_sub(count)),
            skipped: false,
        })
    }

    pub async fn check_rate_limit(
        self: Arc<Self>,
        req: Request<Body>,
        next: Next,
    ) -> Result<Response, StatusCode> {
        // 从连接信息获取原始IP
        let remote_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());
        // 从请求头中获取IP，或者使用连接信息中的IP作为默认值
        let ip = req
            .headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .or_else(|| {
                req.headers()
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
            .or_else(|| remote_ip.as_deref())
            .unwrap_or("unknown")
            .trim()
            .to_string();

        let decision = self
            .check(
                "ip",
                "-",
                &ip,
                self.config.rate_limit_window(),
                self.config.rate_limit_requests,
            )
            .await;

        if !decision.allowed {
            return Ok((
                StatusCode::OK,
                error_to_api_response::<()>(
                    error_codes::RATE_LIMIT,
                    format!(
                        "请求过于频繁，请在{}秒后重试",
                        self.config.rate_limit_window().as_secs()
                    ),
                ),
            )
                .into_response());
        }

        Ok(next.run(req).await)
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    limiter.check_rate_limit(req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(fail_open: bool) -> RateLimiter {
        let config = Config {
            database_url: "postgres://localhost/test".into(),
            // 无人监听的端口，模拟限流存储故障
            redis_url: "redis://127.0.0.1:1/".into(),
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
            rate_limit_fail_open: fail_open,
            max_search_radius: 50_000.0,
        };
        let client = redis::Client::open(config.redis_url.clone()).unwrap();
        RateLimiter::new(Arc::new(client), config)
    }

    #[tokio::test]
    async fn broken_store_fails_open_without_propagating() {
        let limiter = limiter_with(true);
        let decision = limiter
            .check("eta", "user-1", "10.0.0.1", Duration::from_secs(60), 5)
            .await;
        assert!(decision.allowed);
        assert!(decision.skipped);
        assert_eq!(decision.remaining, None);
    }

    #[tokio::test]
    async fn broken_store_can_fail_closed_when_configured() {
        let limiter = limiter_with(false);
        let decision = limiter
            .check("eta", "user-1", "10.0.0.1", Duration::from_secs(60), 5)
            .await;
        assert!(!decision.allowed);
        assert!(decision.skipped);
    }
}
