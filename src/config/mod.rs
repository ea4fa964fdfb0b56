use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    // 路线服务配置，api_key 缺失时视为未配置，走降级路径
    pub routing_api_key: Option<String>,
    pub routing_base_url: String,
    pub routing_timeout_secs: u64,
    pub eta_cache_ttl_secs: u64,
    pub eta_bucket_decimals: u32,
    pub presence_bucket_decimals: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_fail_open: bool,
    pub max_search_radius: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".to_string()),
            routing_api_key: env::var("ROUTING_API_KEY").ok().filter(|k| !k.is_empty()),
            routing_base_url: env::var("ROUTING_BASE_URL")
                .unwrap_or_else(|_| "https://routes.googleapis.com".to_string()),
            routing_timeout_secs: env::var("ROUTING_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            eta_cache_ttl_secs: env::var("ETA_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            eta_bucket_decimals: env::var("ETA_BUCKET_DECIMALS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            presence_bucket_decimals: env::var("PRESENCE_BUCKET_DECIMALS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            rate_limit_fail_open: env::var("RATE_LIMIT_FAIL_OPEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            max_search_radius: env::var("MAX_SEARCH_RADIUS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50_000.0),
        })
    }

    pub fn routing_timeout(&self) -> Duration {
        Duration::from_secs(self.routing_timeout_secs)
    }

    pub fn eta_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.eta_cache_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}
