use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use proximity_backend::{
    AppState,
    config::Config,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit},
    routes,
    routing::RoutingClient,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'proximity_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端（限流计数器）
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client);

    // 路线服务客户端与限流器在进程启动时各构造一次，显式注入，不做模块级单例
    let routing = Arc::new(RoutingClient::from_config(&config));
    let limiter = Arc::new(RateLimiter::new(redis_arc.clone(), config.clone()));

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        redis: redis_arc,
        routing,
        limiter: limiter.clone(),
    };

    // 健康检查不需要认证
    let public_routes = Router::new().route("/health", get(routes::health));

    let protected_routes = Router::new()
        // 位置上报与查询
        .route("/presence/update", post(routes::presence::update_location))
        .route("/presence/me", get(routes::presence::get_me))
        // 附近候选人排序
        .route("/nearby", get(routes::nearby::rank_nearby))
        // 点对点 ETA 与导航
        .route("/eta/resolve", post(routes::eta::resolve_eta))
        .route("/eta/directions", post(routes::eta::get_directions))
        // 应用认证中间件
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // 创建基础路由
    let router = Router::new().nest(
        &config.api_base_uri.clone(),
        Router::new().merge(public_routes).merge(protected_routes),
    );

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        // 设置开发环境的CORS，允许所有来源
        let cors = CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
