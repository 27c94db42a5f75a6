//! 账单事件对账器：把已验签的网关事件幂等地落到订阅存储。
//!
//! 网关投递是 at-least-once，同一事件重复应用必须得到相同的终态。
//! 引用了本地不存在的订阅/用户时记日志并确认收到，避免重投风暴。

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::event::{
    BillingEvent, CheckoutData, InvoiceData, ProviderSubscriptionData, map_provider_status,
};
use super::plan_quota_column;
use crate::entitlement::policy::{Plan, SubscriptionStatus};

/// 支付记录
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub invoice_id: String,
    pub user_id: Uuid,
    pub payment_intent_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub plan: Plan,
    pub succeeded: bool,
    pub paid_at: DateTime<Utc>,
}

/// 对账器依赖的存储能力
pub trait BillingStore {
    fn upsert_from_checkout(
        &self,
        data: CheckoutUpsert,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// 按网关订阅ID反查本地订阅
    fn find_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> impl Future<Output = Result<Option<(Uuid, Plan)>, sqlx::Error>> + Send;

    /// 记录一笔支付；invoice 已存在时不重复写入，返回 false
    fn record_payment(
        &self,
        payment: PaymentRecord,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn mark_past_due(
        &self,
        provider_subscription_id: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn sync_subscription(
        &self,
        provider_subscription_id: &str,
        status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        cancel_at_period_end: bool,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// 降级为免费档：FREE/CANCELED、限额1、计数清零、
    /// 清除网关订阅/价格ID（保留客户ID以便再次订阅）
    fn downgrade_to_free(
        &self,
        provider_subscription_id: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
}

/// 结账完成时写入订阅的全部字段
#[derive(Debug, Clone)]
pub struct CheckoutUpsert {
    pub user_id: Uuid,
    pub plan: Plan,
    pub daily_quota: Option<i32>,
    pub provider_customer_id: String,
    pub provider_subscription_id: String,
    pub provider_price_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

pub struct BillingReconciler<S> {
    store: S,
}

impl<S: BillingStore> BillingReconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// 应用一个事件。数据完整性问题（未知订阅等）记日志后按成功确认。
    pub async fn apply(&self, event: BillingEvent) -> Result<(), sqlx::Error> {
        match event {
            BillingEvent::CheckoutCompleted(data) => self.on_checkout_completed(data).await,
            BillingEvent::InvoicePaid(data) => self.on_invoice(data, true).await,
            BillingEvent::InvoicePaymentFailed(data) => self.on_invoice_failed(data).await,
            BillingEvent::SubscriptionUpdated(data) => self.on_subscription_updated(data).await,
            BillingEvent::SubscriptionDeleted(data) => self.on_subscription_deleted(data).await,
            BillingEvent::Ignored(event_type) => {
                tracing::debug!("Ignoring unhandled billing event type: {}", event_type);
                Ok(())
            }
        }
    }

    async fn on_checkout_completed(&self, data: CheckoutData) -> Result<(), sqlx::Error> {
        let Some(plan) = Plan::from_str(&data.metadata.plan) else {
            tracing::warn!(
                "Checkout event for user {} carries unknown plan {:?}, dropping",
                data.metadata.user_id,
                data.metadata.plan
            );
            return Ok(());
        };

        self.store
            .upsert_from_checkout(CheckoutUpsert {
                user_id: data.metadata.user_id,
                plan,
                daily_quota: plan_quota_column(plan),
                provider_customer_id: data.customer,
                provider_subscription_id: data.subscription,
                provider_price_id: data.price_id,
                current_period_start: data.current_period_start.and_then(from_unix),
                current_period_end: data.current_period_end.and_then(from_unix),
            })
            .await?;
        tracing::info!(
            "Subscription upserted for user {} on plan {}",
            data.metadata.user_id,
            plan.as_str()
        );
        Ok(())
    }

    async fn on_invoice(&self, data: InvoiceData, succeeded: bool) -> Result<(), sqlx::Error> {
        let Some(subscription_id) = data.subscription.clone() else {
            tracing::debug!("Invoice {} has no subscription, skipping", data.id);
            return Ok(());
        };
        let Some((user_id, plan)) = self
            .store
            .find_by_provider_subscription(&subscription_id)
            .await?
        else {
            tracing::warn!(
                "Invoice {} references unknown subscription {}, dropping",
                data.id,
                subscription_id
            );
            return Ok(());
        };

        let amount = data.amount_paid.or(data.amount_due).unwrap_or(0);
        let inserted = self
            .store
            .record_payment(PaymentRecord {
                invoice_id: data.id.clone(),
                user_id,
                payment_intent_id: data.payment_intent,
                amount,
                currency: data.currency.to_uppercase(),
                plan,
                succeeded,
                paid_at: from_unix(data.created).unwrap_or_else(Utc::now),
            })
            .await?;
        if !inserted {
            tracing::debug!("Invoice {} already recorded, redelivery ignored", data.id);
        }
        Ok(())
    }

    async fn on_invoice_failed(&self, data: InvoiceData) -> Result<(), sqlx::Error> {
        let Some(subscription_id) = data.subscription.clone() else {
            tracing::debug!("Failed invoice {} has no subscription, skipping", data.id);
            return Ok(());
        };

        if !self.store.mark_past_due(&subscription_id).await? {
            tracing::warn!(
                "Payment-failed event references unknown subscription {}, dropping",
                subscription_id
            );
            return Ok(());
        }
        tracing::info!("Subscription {} marked PAST_DUE", subscription_id);

        // 失败流水也记一笔
        self.on_invoice(data, false).await
    }

    async fn on_subscription_updated(
        &self,
        data: ProviderSubscriptionData,
    ) -> Result<(), sqlx::Error> {
        let status = map_provider_status(&data.status);
        let found = self
            .store
            .sync_subscription(
                &data.id,
                status,
                data.current_period_start.and_then(from_unix),
                data.current_period_end.and_then(from_unix),
                data.cancel_at_period_end,
            )
            .await?;
        if !found {
            tracing::warn!("Update event references unknown subscription {}, dropping", data.id);
        }
        Ok(())
    }

    async fn on_subscription_deleted(
        &self,
        data: ProviderSubscriptionData,
    ) -> Result<(), sqlx::Error> {
        if self.store.downgrade_to_free(&data.id).await? {
            tracing::info!("Subscription {} downgraded to FREE", data.id);
        } else {
            tracing::warn!("Delete event references unknown subscription {}, dropping", data.id);
        }
        Ok(())
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Postgres 实现
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl BillingStore for PgBillingStore {
    async fn upsert_from_checkout(&self, data: CheckoutUpsert) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (user_id, plan, status, daily_quota, cancel_at_period_end,
                 current_period_start, current_period_end,
                 provider_customer_id, provider_subscription_id, provider_price_id, updated_at)
            VALUES ($1, $2, 'ACTIVE', $3, false, $4, $5, $6, $7, $8, now())
            ON CONFLICT (user_id) DO UPDATE SET
                plan = $2, status = 'ACTIVE', daily_quota = $3,
                cancel_at_period_end = false,
                current_period_start = $4, current_period_end = $5,
                provider_customer_id = $6, provider_subscription_id = $7,
                provider_price_id = $8, updated_at = now()
            "#,
        )
        .bind(data.user_id)
        .bind(data.plan.as_str())
        .bind(data.daily_quota)
        .bind(data.current_period_start)
        .bind(data.current_period_end)
        .bind(&data.provider_customer_id)
        .bind(&data.provider_subscription_id)
        .bind(&data.provider_price_id)
        .execute(&mut *tx)
        .await?;

        // 升级套餐同时把当日提问计数清零
        sqlx::query("DELETE FROM daily_counters WHERE user_id = $1 AND action_kind = 'question'")
            .bind(data.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    async fn find_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<(Uuid, Plan)>, sqlx::Error> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT user_id, plan FROM subscriptions WHERE provider_subscription_id = $1",
        )
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, plan)| (user_id, Plan::from_str(&plan).unwrap_or(Plan::Free))))
    }

    async fn record_payment(&self, payment: PaymentRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments
                (invoice_id, user_id, payment_intent_id, amount, currency, plan, status, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (invoice_id) DO NOTHING
            "#,
        )
        .bind(&payment.invoice_id)
        .bind(payment.user_id)
        .bind(&payment.payment_intent_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.plan.as_str())
        .bind(if payment.succeeded { "succeeded" } else { "failed" })
        .bind(payment.paid_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_past_due(&self, provider_subscription_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET status = 'PAST_DUE', updated_at = now()
            WHERE provider_subscription_id = $1
            "#,
        )
        .bind(provider_subscription_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn sync_subscription(
        &self,
        provider_subscription_id: &str,
        status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        cancel_at_period_end: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                current_period_start = COALESCE($3, current_period_start),
                current_period_end = COALESCE($4, current_period_end),
                cancel_at_period_end = $5,
                updated_at = now()
            WHERE provider_subscription_id = $1
            "#,
        )
        .bind(provider_subscription_id)
        .bind(status.as_str())
        .bind(period_start)
        .bind(period_end)
        .bind(cancel_at_period_end)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn downgrade_to_free(&self, provider_subscription_id: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM subscriptions WHERE provider_subscription_id = $1",
        )
        .bind(provider_subscription_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            return Ok(false);
        };

        sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan = 'FREE', status = 'CANCELED', daily_quota = 1,
                cancel_at_period_end = false,
                provider_subscription_id = NULL, provider_price_id = NULL,
                updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM daily_counters WHERE user_id = $1 AND action_kind = 'question'")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::billing::event::CheckoutMetadata;

    /// 内存版订阅状态，与 Pg 实现遵守相同契约
    #[derive(Debug, Clone, PartialEq)]
    struct MemSubscription {
        plan: Plan,
        status: SubscriptionStatus,
        daily_quota: Option<i32>,
        cancel_at_period_end: bool,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        customer_id: Option<String>,
        subscription_id: Option<String>,
        price_id: Option<String>,
        used_today: i32,
    }

    #[derive(Default)]
    struct MemBillingStore {
        subs: Mutex<HashMap<Uuid, MemSubscription>>,
        payments: Mutex<HashMap<String, PaymentRecord>>,
    }

    impl MemBillingStore {
        fn subscription(&self, user_id: Uuid) -> Option<MemSubscription> {
            self.subs.lock().unwrap().get(&user_id).cloned()
        }

        fn find_user(&self, sub_id: &str) -> Option<(Uuid, Plan)> {
            self.subs
                .lock()
                .unwrap()
                .iter()
                .find(|(_, s)| s.subscription_id.as_deref() == Some(sub_id))
                .map(|(user, s)| (*user, s.plan))
        }
    }

    impl BillingStore for Arc<MemBillingStore> {
        async fn upsert_from_checkout(&self, data: CheckoutUpsert) -> Result<(), sqlx::Error> {
            self.subs.lock().unwrap().insert(
                data.user_id,
                MemSubscription {
                    plan: data.plan,
                    status: SubscriptionStatus::Active,
                    daily_quota: data.daily_quota,
                    cancel_at_period_end: false,
                    period_start: data.current_period_start,
                    period_end: data.current_period_end,
                    customer_id: Some(data.provider_customer_id),
                    subscription_id: Some(data.provider_subscription_id),
                    price_id: data.provider_price_id,
                    used_today: 0,
                },
            );
            Ok(())
        }

        async fn find_by_provider_subscription(
            &self,
            provider_subscription_id: &str,
        ) -> Result<Option<(Uuid, Plan)>, sqlx::Error> {
            Ok(self.find_user(provider_subscription_id))
        }

        async fn record_payment(&self, payment: PaymentRecord) -> Result<bool, sqlx::Error> {
            let mut payments = self.payments.lock().unwrap();
            if payments.contains_key(&payment.invoice_id) {
                return Ok(false);
            }
            payments.insert(payment.invoice_id.clone(), payment);
            Ok(true)
        }

        async fn mark_past_due(
            &self,
            provider_subscription_id: &str,
        ) -> Result<bool, sqlx::Error> {
            let mut subs = self.subs.lock().unwrap();
            for sub in subs.values_mut() {
                if sub.subscription_id.as_deref() == Some(provider_subscription_id) {
                    sub.status = SubscriptionStatus::PastDue;
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn sync_subscription(
            &self,
            provider_subscription_id: &str,
            status: SubscriptionStatus,
            period_start: Option<DateTime<Utc>>,
            period_end: Option<DateTime<Utc>>,
            cancel_at_period_end: bool,
        ) -> Result<bool, sqlx::Error> {
            let mut subs = self.subs.lock().unwrap();
            for sub in subs.values_mut() {
                if sub.subscription_id.as_deref() == Some(provider_subscription_id) {
                    sub.status = status;
                    if period_start.is_some() {
                        sub.period_start = period_start;
                    }
                    if period_end.is_some() {
                        sub.period_end = period_end;
                    }
                    sub.cancel_at_period_end = cancel_at_period_end;
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn downgrade_to_free(
            &self,
            provider_subscription_id: &str,
        ) -> Result<bool, sqlx::Error> {
            let mut subs = self.subs.lock().unwrap();
            for sub in subs.values_mut() {
                if sub.subscription_id.as_deref() == Some(provider_subscription_id) {
                    sub.plan = Plan::Free;
                    sub.status = SubscriptionStatus::Canceled;
                    sub.daily_quota = Some(1);
                    sub.cancel_at_period_end = false;
                    sub.subscription_id = None;
                    sub.price_id = None;
                    sub.used_today = 0;
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }

    fn checkout_event(user_id: Uuid, plan: &str, sub_id: &str) -> BillingEvent {
        BillingEvent::CheckoutCompleted(CheckoutData {
            customer: "cus_1".to_string(),
            subscription: sub_id.to_string(),
            price_id: Some("price_1".to_string()),
            metadata: CheckoutMetadata {
                user_id,
                plan: plan.to_string(),
            },
            current_period_start: Some(1_700_000_000),
            current_period_end: Some(1_702_592_000),
        })
    }

    #[tokio::test]
    async fn checkout_completed_is_idempotent() {
        let store = Arc::new(MemBillingStore::default());
        let reconciler = BillingReconciler::new(store.clone());
        let user = Uuid::new_v4();

        reconciler
            .apply(checkout_event(user, "SILVER", "sub_1"))
            .await
            .unwrap();
        let first = store.subscription(user).unwrap();

        reconciler
            .apply(checkout_event(user, "SILVER", "sub_1"))
            .await
            .unwrap();
        let second = store.subscription(user).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.plan, Plan::Silver);
        assert_eq!(second.daily_quota, Some(10));
        assert_eq!(second.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn gold_checkout_stores_unlimited_sentinel() {
        let store = Arc::new(MemBillingStore::default());
        let reconciler = BillingReconciler::new(store.clone());
        let user = Uuid::new_v4();

        reconciler
            .apply(checkout_event(user, "GOLD", "sub_g"))
            .await
            .unwrap();
        assert_eq!(store.subscription(user).unwrap().daily_quota, None);
    }

    #[tokio::test]
    async fn payment_failure_marks_past_due_and_records_entry() {
        let store = Arc::new(MemBillingStore::default());
        let reconciler = BillingReconciler::new(store.clone());
        let user = Uuid::new_v4();
        reconciler
            .apply(checkout_event(user, "BRONZE", "sub_2"))
            .await
            .unwrap();

        reconciler
            .apply(BillingEvent::InvoicePaymentFailed(InvoiceData {
                id: "in_fail".to_string(),
                subscription: Some("sub_2".to_string()),
                payment_intent: None,
                amount_paid: None,
                amount_due: Some(10000),
                currency: "inr".to_string(),
                created: 1_700_100_000,
            }))
            .await
            .unwrap();

        let sub = store.subscription(user).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        let payments = store.payments.lock().unwrap();
        assert!(!payments.get("in_fail").unwrap().succeeded);
    }

    #[tokio::test]
    async fn duplicate_invoice_recorded_once() {
        let store = Arc::new(MemBillingStore::default());
        let reconciler = BillingReconciler::new(store.clone());
        let user = Uuid::new_v4();
        reconciler
            .apply(checkout_event(user, "BRONZE", "sub_3"))
            .await
            .unwrap();

        let invoice = InvoiceData {
            id: "in_1".to_string(),
            subscription: Some("sub_3".to_string()),
            payment_intent: Some("pi_1".to_string()),
            amount_paid: Some(10000),
            amount_due: None,
            currency: "inr".to_string(),
            created: 1_700_100_000,
        };
        reconciler
            .apply(BillingEvent::InvoicePaid(invoice.clone()))
            .await
            .unwrap();
        reconciler
            .apply(BillingEvent::InvoicePaid(invoice))
            .await
            .unwrap();

        assert_eq!(store.payments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deletion_downgrades_to_free_and_clears_provider_ids() {
        let store = Arc::new(MemBillingStore::default());
        let reconciler = BillingReconciler::new(store.clone());
        let user = Uuid::new_v4();
        reconciler
            .apply(checkout_event(user, "GOLD", "sub_4"))
            .await
            .unwrap();

        reconciler
            .apply(BillingEvent::SubscriptionDeleted(ProviderSubscriptionData {
                id: "sub_4".to_string(),
                status: "canceled".to_string(),
                current_period_start: None,
                current_period_end: None,
                cancel_at_period_end: false,
            }))
            .await
            .unwrap();

        let sub = store.subscription(user).unwrap();
        assert_eq!(sub.plan, Plan::Free);
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert_eq!(sub.daily_quota, Some(1));
        assert_eq!(sub.subscription_id, None);
        assert_eq!(sub.price_id, None);
        // 保留客户ID便于将来重新订阅
        assert_eq!(sub.customer_id.as_deref(), Some("cus_1"));
    }

    #[tokio::test]
    async fn update_event_syncs_status_and_period() {
        let store = Arc::new(MemBillingStore::default());
        let reconciler = BillingReconciler::new(store.clone());
        let user = Uuid::new_v4();
        reconciler
            .apply(checkout_event(user, "SILVER", "sub_5"))
            .await
            .unwrap();

        reconciler
            .apply(BillingEvent::SubscriptionUpdated(ProviderSubscriptionData {
                id: "sub_5".to_string(),
                status: "past_due".to_string(),
                current_period_start: Some(1_702_600_000),
                current_period_end: Some(1_705_278_400),
                cancel_at_period_end: true,
            }))
            .await
            .unwrap();

        let sub = store.subscription(user).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert!(sub.cancel_at_period_end);
    }

    #[tokio::test]
    async fn unknown_subscription_is_acknowledged() {
        let store = Arc::new(MemBillingStore::default());
        let reconciler = BillingReconciler::new(store.clone());

        // 本地没有对应记录，事件被吞掉但不报错
        let result = reconciler
            .apply(BillingEvent::SubscriptionDeleted(ProviderSubscriptionData {
                id: "sub_missing".to_string(),
                status: "canceled".to_string(),
                current_period_start: None,
                current_period_end: None,
                cancel_at_period_end: false,
            }))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_plan_in_checkout_is_dropped() {
        let store = Arc::new(MemBillingStore::default());
        let reconciler = BillingReconciler::new(store.clone());
        let user = Uuid::new_v4();

        reconciler
            .apply(checkout_event(user, "PLATINUM", "sub_6"))
            .await
            .unwrap();
        assert!(store.subscription(user).is_none());
    }
}
