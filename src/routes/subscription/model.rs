use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::entitlement::store::SubscriptionRecord;

/// 面向前端的订阅视图
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub plan: String,
    pub status: String,
    /// None 表示不限额
    pub daily_quota: Option<i32>,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl From<SubscriptionRecord> for SubscriptionView {
    fn from(record: SubscriptionRecord) -> Self {
        SubscriptionView {
            plan: record.plan.as_str().to_string(),
            status: record.status.as_str().to_string(),
            daily_quota: record.daily_quota,
            cancel_at_period_end: record.cancel_at_period_end,
            current_period_end: record.current_period_end,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// 目标套餐：BRONZE / SILVER / GOLD
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

#[derive(Debug, Serialize, FromRow)]
pub struct PaymentView {
    pub invoice_id: String,
    pub amount: i64,
    pub currency: String,
    pub plan: String,
    pub status: String,
    pub paid_at: DateTime<Utc>,
}

impl PaymentView {
    pub async fn list_recent(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, PaymentView>(
            r#"
            SELECT invoice_id, amount, currency, plan, status, paid_at
            FROM payments
            WHERE user_id = $1
            ORDER BY paid_at DESC
            LIMIT 20
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}

/// 到期不续费：只打标记，当期权益保留到周期结束
pub async fn mark_cancel_at_period_end(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET cancel_at_period_end = true, updated_at = now()
        WHERE user_id = $1 AND status = 'ACTIVE' AND plan <> 'FREE'
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
