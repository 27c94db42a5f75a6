//! 配额引擎：决定一个用户此刻是否允许提问/发动态。
//!
//! 提问走套餐限额，发动态走好友数分级限额，两条策略共用同一套
//! 「读计数、比阈值、条件写回」机制但互相独立计数。
//! 依赖（订阅、好友数、计数存储）不可用时一律拒绝（fail closed），
//! 并以独立的错误形态上报，不与正常的配额拒绝混淆。

pub mod policy;
pub mod store;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use uuid::Uuid;

use policy::{ActionKind, DailyLimit, Plan, SubscriptionStatus, effective_plan_limit, social_limit};
use store::{ConsumeOutcome, EntitlementStore, SubscriptionRecord};

/// 好友数查询能力，配额引擎只关心数量，不关心关系模型
pub trait SocialGraph {
    fn friend_count(&self, user_id: Uuid) -> impl Future<Output = Result<i64, sqlx::Error>> + Send;
}

/// 引擎级错误：依赖不可用。正常的配额拒绝不会走这里。
#[derive(Debug)]
pub enum EntitlementError {
    Unavailable,
}

/// 拒绝详情，供调用方渲染「已用N/共M」或「好友数不足」文案
#[derive(Debug, Clone)]
pub struct Denial {
    pub reason: String,
    pub limit: DailyLimit,
    pub used: i32,
}

#[derive(Debug, Clone)]
pub enum EntitlementDecision {
    /// 放行，计数已计入；后续的内容创建由调用方完成
    Allowed { used: i32, limit: DailyLimit },
    Denied(Denial),
}

/// 不消费配额的查询结果，用于展示发帖资格
#[derive(Debug, Clone)]
pub struct EntitlementStats {
    pub limit: DailyLimit,
    pub used: i32,
    pub friend_count: i64,
    pub can_act: bool,
}

pub struct EntitlementEngine<S, G> {
    store: S,
    graph: G,
    tz: FixedOffset,
}

impl<S: EntitlementStore, G: SocialGraph> EntitlementEngine<S, G> {
    pub fn new(store: S, graph: G, tz: FixedOffset) -> Self {
        Self { store, graph, tz }
    }

    /// 跨天以本地日历日为准，零点归零
    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// 检查并消费一次配额。放行时计数已原子计入，调用方直接执行动作即可。
    pub async fn check_and_consume(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<EntitlementDecision, EntitlementError> {
        let today = self.local_date(now);
        let (limit, context) = self.resolve_limit(user_id, kind).await?;

        // 0限额是硬性拦截，与「次数用完」是两种拒绝
        if limit == DailyLimit::Limited(0) {
            return Ok(EntitlementDecision::Denied(Denial {
                reason: zero_limit_reason(kind),
                limit,
                used: 0,
            }));
        }

        let outcome = self
            .store
            .try_consume(user_id, kind, today, limit.as_cap())
            .await
            .map_err(|e| {
                tracing::error!("Entitlement counter update failed for {}: {}", user_id, e);
                EntitlementError::Unavailable
            })?;

        match outcome {
            ConsumeOutcome::Consumed(used) => Ok(EntitlementDecision::Allowed { used, limit }),
            ConsumeOutcome::LimitReached => {
                let used = self
                    .store
                    .used_today(user_id, kind, today)
                    .await
                    .unwrap_or(0);
                Ok(EntitlementDecision::Denied(Denial {
                    reason: limit_reached_reason(kind, limit, used, &context),
                    limit,
                    used,
                }))
            }
        }
    }

    /// 只读查询当前资格，不消费配额
    pub async fn stats(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<EntitlementStats, EntitlementError> {
        let today = self.local_date(now);
        let (limit, context) = self.resolve_limit(user_id, kind).await?;
        let used = self
            .store
            .used_today(user_id, kind, today)
            .await
            .map_err(|_| EntitlementError::Unavailable)?;

        Ok(EntitlementStats {
            limit,
            used,
            friend_count: context.friend_count,
            can_act: limit.allows(used),
        })
    }

    async fn resolve_limit(
        &self,
        user_id: Uuid,
        kind: ActionKind,
    ) -> Result<(DailyLimit, LimitContext), EntitlementError> {
        match kind {
            ActionKind::Question => {
                let sub = self
                    .store
                    .fetch_or_create_subscription(user_id)
                    .await
                    .map_err(|e| {
                        tracing::error!("Subscription lookup failed for {}: {}", user_id, e);
                        EntitlementError::Unavailable
                    })?;
                let limit = effective_plan_limit(sub.plan, sub.status);
                Ok((
                    limit,
                    LimitContext {
                        friend_count: 0,
                        subscription: Some(sub),
                    },
                ))
            }
            ActionKind::Post => {
                let friend_count = self.graph.friend_count(user_id).await.map_err(|e| {
                    tracing::error!("Friend count lookup failed for {}: {}", user_id, e);
                    EntitlementError::Unavailable
                })?;
                Ok((
                    social_limit(friend_count),
                    LimitContext {
                        friend_count,
                        subscription: None,
                    },
                ))
            }
        }
    }
}

struct LimitContext {
    friend_count: i64,
    subscription: Option<SubscriptionRecord>,
}

fn zero_limit_reason(kind: ActionKind) -> String {
    match kind {
        ActionKind::Post => "至少需要1位好友才能发布动态".to_string(),
        // 提问限额来自套餐，正常配置下不会为0
        ActionKind::Question => "当前套餐不允许提问".to_string(),
    }
}

fn limit_reached_reason(
    kind: ActionKind,
    limit: DailyLimit,
    used: i32,
    context: &LimitContext,
) -> String {
    match kind {
        ActionKind::Question => {
            let (plan, status) = context
                .subscription
                .as_ref()
                .map(|s| (s.plan, s.status))
                .unwrap_or((Plan::Free, SubscriptionStatus::Active));
            if status != SubscriptionStatus::Active && plan != Plan::Free {
                format!(
                    "订阅状态为{}，暂按免费档限额执行：每日{}次，今日已用{}次",
                    status.as_str(),
                    limit.label(),
                    used
                )
            } else {
                format!(
                    "{}套餐每日最多提问{}次，今日已提问{}次",
                    plan.as_str(),
                    limit.label(),
                    used
                )
            }
        }
        ActionKind::Post => format!(
            "好友数{}，每日最多发布{}条动态，今日已发布{}条；好友达到10人后不限次数",
            context.friend_count,
            limit.label(),
            used
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use chrono::TimeZone;

    use super::store::memory::{MemoryStore, free_subscription};
    use super::*;

    /// 固定好友数的图
    #[derive(Clone)]
    struct FixedGraph(i64);

    impl SocialGraph for FixedGraph {
        async fn friend_count(&self, _user_id: Uuid) -> Result<i64, sqlx::Error> {
            Ok(self.0)
        }
    }

    struct FailingGraph;

    impl SocialGraph for FailingGraph {
        async fn friend_count(&self, _user_id: Uuid) -> Result<i64, sqlx::Error> {
            Err(sqlx::Error::PoolClosed)
        }
    }

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    fn engine_with_friends(
        store: Arc<MemoryStore>,
        friends: i64,
    ) -> EntitlementEngine<Arc<MemoryStore>, FixedGraph> {
        EntitlementEngine::new(store, FixedGraph(friends), ist())
    }

    fn noon_utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn free_plan_allows_first_question_then_denies() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with_friends(store, 0);
        let user = Uuid::new_v4();
        let now = noon_utc(2026, 3, 2);

        let first = engine
            .check_and_consume(user, ActionKind::Question, now)
            .await
            .unwrap();
        assert!(matches!(
            first,
            EntitlementDecision::Allowed { used: 1, .. }
        ));

        let second = engine
            .check_and_consume(user, ActionKind::Question, now)
            .await
            .unwrap();
        match second {
            EntitlementDecision::Denied(denial) => {
                assert_eq!(denial.limit, DailyLimit::Limited(1));
                assert_eq!(denial.used, 1);
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn gold_plan_is_never_exhausted() {
        let store = Arc::new(MemoryStore::default());
        let user = Uuid::new_v4();
        let mut sub = free_subscription(user);
        sub.plan = Plan::Gold;
        sub.daily_quota = None;
        store.insert_subscription(sub);

        let engine = engine_with_friends(store, 0);
        let now = noon_utc(2026, 3, 2);
        for _ in 0..200 {
            let decision = engine
                .check_and_consume(user, ActionKind::Question, now)
                .await
                .unwrap();
            assert!(matches!(decision, EntitlementDecision::Allowed { .. }));
        }
    }

    #[tokio::test]
    async fn past_due_gold_gets_free_limit() {
        let store = Arc::new(MemoryStore::default());
        let user = Uuid::new_v4();
        let mut sub = free_subscription(user);
        sub.plan = Plan::Gold;
        sub.daily_quota = None;
        sub.status = SubscriptionStatus::PastDue;
        store.insert_subscription(sub);

        let engine = engine_with_friends(store, 0);
        let now = noon_utc(2026, 3, 2);
        let first = engine
            .check_and_consume(user, ActionKind::Question, now)
            .await
            .unwrap();
        assert!(matches!(first, EntitlementDecision::Allowed { .. }));
        let second = engine
            .check_and_consume(user, ActionKind::Question, now)
            .await
            .unwrap();
        assert!(matches!(second, EntitlementDecision::Denied(_)));
    }

    #[tokio::test]
    async fn zero_friends_always_denied_for_posts() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with_friends(store, 0);
        let user = Uuid::new_v4();
        let now = noon_utc(2026, 3, 2);

        for _ in 0..3 {
            let decision = engine
                .check_and_consume(user, ActionKind::Post, now)
                .await
                .unwrap();
            match decision {
                EntitlementDecision::Denied(denial) => {
                    assert_eq!(denial.limit, DailyLimit::Limited(0));
                    assert_eq!(denial.used, 0);
                }
                other => panic!("expected denial, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn friend_count_caps_daily_posts_exactly() {
        for friends in 1..=9i64 {
            let store = Arc::new(MemoryStore::default());
            let engine = engine_with_friends(store, friends);
            let user = Uuid::new_v4();
            let now = noon_utc(2026, 3, 2);

            for _ in 0..friends {
                let decision = engine
                    .check_and_consume(user, ActionKind::Post, now)
                    .await
                    .unwrap();
                assert!(matches!(decision, EntitlementDecision::Allowed { .. }));
            }
            let over = engine
                .check_and_consume(user, ActionKind::Post, now)
                .await
                .unwrap();
            assert!(matches!(over, EntitlementDecision::Denied(_)));
        }
    }

    #[tokio::test]
    async fn ten_friends_means_unlimited_posts() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with_friends(store, 10);
        let user = Uuid::new_v4();
        let now = noon_utc(2026, 3, 2);

        for _ in 0..100 {
            let decision = engine
                .check_and_consume(user, ActionKind::Post, now)
                .await
                .unwrap();
            assert!(matches!(decision, EntitlementDecision::Allowed { .. }));
        }
    }

    #[tokio::test]
    async fn day_rolls_over_at_local_midnight() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with_friends(store, 0);
        let user = Uuid::new_v4();

        // 本地（UTC+5:30）2026-03-02 23:59 与 2026-03-03 00:01
        let late = ist().with_ymd_and_hms(2026, 3, 2, 23, 59, 0).unwrap();
        let early = ist().with_ymd_and_hms(2026, 3, 3, 0, 1, 0).unwrap();

        let first = engine
            .check_and_consume(user, ActionKind::Question, late.with_timezone(&Utc))
            .await
            .unwrap();
        assert!(matches!(first, EntitlementDecision::Allowed { used: 1, .. }));

        // 新的一天从0开始计
        let next_day = engine
            .check_and_consume(user, ActionKind::Question, early.with_timezone(&Utc))
            .await
            .unwrap();
        assert!(matches!(
            next_day,
            EntitlementDecision::Allowed { used: 1, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_requests_consume_at_most_limit() {
        let store = Arc::new(MemoryStore::default());
        let user = Uuid::new_v4();
        store.insert_subscription(free_subscription(user));
        let now = noon_utc(2026, 3, 2);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let engine = EntitlementEngine::new(store, FixedGraph(0), ist());
                engine
                    .check_and_consume(user, ActionKind::Question, now)
                    .await
                    .unwrap()
            }));
        }

        let mut allowed = 0;
        let mut denied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                EntitlementDecision::Allowed { .. } => allowed += 1,
                EntitlementDecision::Denied(_) => denied += 1,
            }
        }
        assert_eq!(allowed, 1);
        assert_eq!(denied, 15);
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = Arc::new(MemoryStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let engine = engine_with_friends(store, 5);
        let user = Uuid::new_v4();
        let now = noon_utc(2026, 3, 2);

        let result = engine.check_and_consume(user, ActionKind::Question, now).await;
        assert!(matches!(result, Err(EntitlementError::Unavailable)));
    }

    #[tokio::test]
    async fn graph_failure_fails_closed_for_posts() {
        let store = Arc::new(MemoryStore::default());
        let engine = EntitlementEngine::new(store, FailingGraph, ist());
        let user = Uuid::new_v4();
        let now = noon_utc(2026, 3, 2);

        let result = engine.check_and_consume(user, ActionKind::Post, now).await;
        assert!(matches!(result, Err(EntitlementError::Unavailable)));
    }

    #[tokio::test]
    async fn stats_do_not_consume() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with_friends(store, 3);
        let user = Uuid::new_v4();
        let now = noon_utc(2026, 3, 2);

        let stats = engine.stats(user, ActionKind::Post, now).await.unwrap();
        assert_eq!(stats.used, 0);
        assert_eq!(stats.friend_count, 3);
        assert!(stats.can_act);

        let stats_again = engine.stats(user, ActionKind::Post, now).await.unwrap();
        assert_eq!(stats_again.used, 0);
    }
}
