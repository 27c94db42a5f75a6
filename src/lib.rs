use std::sync::Arc;

use config::Config;
use redis::Client as RedisClient;
use sqlx::PgPool;

pub mod api;
pub mod billing;
pub mod cache;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod gate;
pub mod middleware;
pub mod notify;
pub mod routes;
pub mod social;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    pub notifier: Arc<notify::Notifier>,
    pub billing: Arc<billing::client::BillingClient>,
}
