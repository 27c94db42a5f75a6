//! 订阅记录与每日计数的存储层。
//!
//! 计数的「跨天归零 + 自增」必须是同一条带条件的 upsert，
//! 多实例并发时不允许两个请求同时在 limit-1 处通过。

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::policy::{ActionKind, Plan, SubscriptionStatus};

/// 订阅记录
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub user_id: Uuid,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    /// None 表示不限额的哨兵
    pub daily_quota: Option<i32>,
    pub cancel_at_period_end: bool,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub provider_price_id: Option<String>,
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    user_id: Uuid,
    plan: String,
    status: String,
    daily_quota: Option<i32>,
    cancel_at_period_end: bool,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    provider_customer_id: Option<String>,
    provider_subscription_id: Option<String>,
    provider_price_id: Option<String>,
}

impl SubscriptionRow {
    fn into_record(self) -> SubscriptionRecord {
        SubscriptionRecord {
            user_id: self.user_id,
            plan: Plan::from_str(&self.plan).unwrap_or(Plan::Free),
            status: SubscriptionStatus::from_str(&self.status)
                .unwrap_or(SubscriptionStatus::Canceled),
            daily_quota: self.daily_quota,
            cancel_at_period_end: self.cancel_at_period_end,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            provider_customer_id: self.provider_customer_id,
            provider_subscription_id: self.provider_subscription_id,
            provider_price_id: self.provider_price_id,
        }
    }
}

/// 条件消费的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// 计入成功，返回含本次在内的今日已用次数
    Consumed(i32),
    /// 限额已满，未计入
    LimitReached,
}

/// 配额引擎依赖的存储能力
pub trait EntitlementStore {
    fn fetch_or_create_subscription(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<SubscriptionRecord, sqlx::Error>> + Send;

    /// 原子的「归零+自增」：cap 为 None 表示不限额。
    /// 只有在计入后不超过 cap 时才会写入并返回 Consumed。
    fn try_consume(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        today: NaiveDate,
        cap: Option<i32>,
    ) -> impl Future<Output = Result<ConsumeOutcome, sqlx::Error>> + Send;

    fn used_today(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        today: NaiveDate,
    ) -> impl Future<Output = Result<i32, sqlx::Error>> + Send;
}

const SUBSCRIPTION_COLUMNS: &str = "user_id, plan, status, daily_quota, cancel_at_period_end, \
     current_period_start, current_period_end, \
     provider_customer_id, provider_subscription_id, provider_price_id";

/// Postgres 实现
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl EntitlementStore for PgEntitlementStore {
    async fn fetch_or_create_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<SubscriptionRecord, sqlx::Error> {
        // 首次访问时惰性建立免费订阅
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, plan, status, daily_quota, current_period_end)
            VALUES ($1, 'FREE', 'ACTIVE', 1, now() + interval '365 days')
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_record())
    }

    async fn try_consume(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        today: NaiveDate,
        cap: Option<i32>,
    ) -> Result<ConsumeOutcome, sqlx::Error> {
        let used: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO daily_counters (user_id, action_kind, used_today, last_action_date)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (user_id, action_kind) DO UPDATE
            SET used_today = CASE
                    WHEN daily_counters.last_action_date <> $3 THEN 1
                    ELSE daily_counters.used_today + 1
                END,
                last_action_date = $3
            WHERE $4::int IS NULL
               OR (CASE
                       WHEN daily_counters.last_action_date <> $3 THEN 0
                       ELSE daily_counters.used_today
                   END) < $4
            RETURNING used_today
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(today)
        .bind(cap)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match used {
            Some(n) => ConsumeOutcome::Consumed(n),
            None => ConsumeOutcome::LimitReached,
        })
    }

    async fn used_today(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        today: NaiveDate,
    ) -> Result<i32, sqlx::Error> {
        let used: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT used_today FROM daily_counters
            WHERE user_id = $1 AND action_kind = $2 AND last_action_date = $3
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;

        // 今日无记录（或记录停留在往日）视为0
        Ok(used.unwrap_or(0))
    }
}
