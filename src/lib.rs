use std::sync::Arc;

use config::Config;
use middleware::RateLimiter;
use redis::Client as RedisClient;
use routing::RoutingClient;
use sqlx::PgPool;

pub mod config;
pub mod geo;
pub mod middleware;
pub mod routing;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    pub routing: Arc<RoutingClient>,
    pub limiter: Arc<RateLimiter>,
}
