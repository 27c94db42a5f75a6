use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use qna_backend::{
    AppState,
    billing::client::BillingClient,
    config::Config,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit},
    notify::Notifier,
    routes,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;

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
                conn.execute("SET application_name = 'qna_backend';").await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client.clone());

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        redis: redis_arc,
        notifier: Arc::new(Notifier::new(&config)),
        billing: Arc::new(BillingClient::new(&config)),
    };

    // 设置限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    // 将路由分为公开路由和受保护路由
    let public_routes = Router::new()
        // 用户公开路由
        .route("/users/register", post(routes::user::register))
        .route("/users/login", post(routes::user::login))
        .route("/users/verify-otp", post(routes::user::verify_otp))
        // 提问列表、回答列表与动态流公开可读
        .route("/questions/list", get(routes::question::list))
        .route("/answers/list", get(routes::answer::list))
        .route("/posts/feed", get(routes::post::feed))
        // 支付网关回调
        .route("/webhooks/billing", post(routes::webhook::billing_webhook));

    let protected_routes = Router::new()
        // 用户
        .route("/users/login-history", get(routes::user::login_history))
        // 提问
        .route("/questions/ask", post(routes::question::ask))
        .route("/questions/delete", post(routes::question::delete))
        .route("/questions/vote", post(routes::question::vote))
        // 回答
        .route("/answers/create", post(routes::answer::create))
        .route("/answers/delete", post(routes::answer::delete))
        // 动态
        .route("/posts/create", post(routes::post::create))
        .route("/posts/stats", get(routes::post::stats))
        // 好友
        .route("/friends/send", post(routes::friend::send))
        .route("/friends/confirm", post(routes::friend::confirm))
        .route("/friends/reject", post(routes::friend::reject))
        .route("/friends/remove", post(routes::friend::remove))
        .route("/friends/list", get(routes::friend::list))
        .route("/friends/requests", get(routes::friend::requests))
        // 订阅
        .route("/subscriptions/current", get(routes::subscription::current))
        .route("/subscriptions/cancel", post(routes::subscription::cancel))
        .route("/subscriptions/checkout", post(routes::subscription::checkout))
        .route("/subscriptions/payments", get(routes::subscription::payments))
        // 应用认证中间件
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let router = Router::new().merge(public_routes).merge(protected_routes);

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
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
