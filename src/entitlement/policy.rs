//! 配额策略的纯计算部分：套餐限额、好友数分级限额、放行判定。

use serde::{Deserialize, Serialize};

/// 订阅套餐
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    Free,
    Bronze,
    Silver,
    Gold,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "FREE",
            Plan::Bronze => "BRONZE",
            Plan::Silver => "SILVER",
            Plan::Gold => "GOLD",
        }
    }

    pub fn from_str(s: &str) -> Option<Plan> {
        match s {
            "FREE" => Some(Plan::Free),
            "BRONZE" => Some(Plan::Bronze),
            "SILVER" => Some(Plan::Silver),
            "GOLD" => Some(Plan::Gold),
            _ => None,
        }
    }
}

/// 订阅状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Canceled => "CANCELED",
        }
    }

    pub fn from_str(s: &str) -> Option<SubscriptionStatus> {
        match s {
            "ACTIVE" => Some(SubscriptionStatus::Active),
            "PAST_DUE" => Some(SubscriptionStatus::PastDue),
            "CANCELED" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }
}

/// 受配额约束的动作类型，提问与发动态分别计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Question,
    Post,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Question => "question",
            ActionKind::Post => "post",
        }
    }
}

/// 每日限额。Unlimited 是真正的哨兵值，任何有限计数都不会耗尽它。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyLimit {
    Limited(i32),
    Unlimited,
}

impl DailyLimit {
    /// 已用 used 次后是否还允许下一次动作。边界含限：used == limit 即拒绝。
    pub fn allows(&self, used: i32) -> bool {
        match self {
            DailyLimit::Unlimited => true,
            DailyLimit::Limited(limit) => used < *limit,
        }
    }

    /// 传给存储层的条件值，None 表示不限
    pub fn as_cap(&self) -> Option<i32> {
        match self {
            DailyLimit::Unlimited => None,
            DailyLimit::Limited(limit) => Some(*limit),
        }
    }

    /// 展示用文案
    pub fn label(&self) -> String {
        match self {
            DailyLimit::Unlimited => "不限".to_string(),
            DailyLimit::Limited(limit) => limit.to_string(),
        }
    }
}

/// 套餐对应的每日提问限额
pub fn plan_quota(plan: Plan) -> DailyLimit {
    match plan {
        Plan::Free => DailyLimit::Limited(1),
        Plan::Bronze => DailyLimit::Limited(5),
        Plan::Silver => DailyLimit::Limited(10),
        Plan::Gold => DailyLimit::Unlimited,
    }
}

/// 结合订阅状态的有效限额：非 ACTIVE 的付费套餐只享受免费档限额
pub fn effective_plan_limit(plan: Plan, status: SubscriptionStatus) -> DailyLimit {
    if status == SubscriptionStatus::Active {
        plan_quota(plan)
    } else {
        plan_quota(Plan::Free)
    }
}

/// 好友数对应的每日发动态限额。
/// 0 个好友是硬性拦截（与配额用尽不同），1-9 个好友限额等于好友数，10 个以上不限。
pub fn social_limit(friend_count: i64) -> DailyLimit {
    if friend_count <= 0 {
        DailyLimit::Limited(0)
    } else if friend_count >= 10 {
        DailyLimit::Unlimited
    } else {
        DailyLimit::Limited(friend_count as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_quotas_match_table() {
        assert_eq!(plan_quota(Plan::Free), DailyLimit::Limited(1));
        assert_eq!(plan_quota(Plan::Bronze), DailyLimit::Limited(5));
        assert_eq!(plan_quota(Plan::Silver), DailyLimit::Limited(10));
        assert_eq!(plan_quota(Plan::Gold), DailyLimit::Unlimited);
    }

    #[test]
    fn non_active_paid_plan_falls_back_to_free_limit() {
        assert_eq!(
            effective_plan_limit(Plan::Gold, SubscriptionStatus::PastDue),
            DailyLimit::Limited(1)
        );
        assert_eq!(
            effective_plan_limit(Plan::Silver, SubscriptionStatus::Canceled),
            DailyLimit::Limited(1)
        );
        assert_eq!(
            effective_plan_limit(Plan::Bronze, SubscriptionStatus::Active),
            DailyLimit::Limited(5)
        );
    }

    #[test]
    fn social_tiers() {
        assert_eq!(social_limit(0), DailyLimit::Limited(0));
        for n in 1..=9 {
            assert_eq!(social_limit(n), DailyLimit::Limited(n as i32));
        }
        assert_eq!(social_limit(10), DailyLimit::Unlimited);
        assert_eq!(social_limit(250), DailyLimit::Unlimited);
    }

    #[test]
    fn limit_boundary_is_inclusive() {
        let limit = DailyLimit::Limited(3);
        assert!(limit.allows(2));
        assert!(!limit.allows(3));
        assert!(!limit.allows(4));
    }

    #[test]
    fn unlimited_never_exhausts() {
        assert!(DailyLimit::Unlimited.allows(i32::MAX));
        assert_eq!(DailyLimit::Unlimited.as_cap(), None);
    }

    #[test]
    fn zero_limit_always_denies() {
        assert!(!DailyLimit::Limited(0).allows(0));
    }

    #[test]
    fn plan_round_trips_through_str() {
        for plan in [Plan::Free, Plan::Bronze, Plan::Silver, Plan::Gold] {
            assert_eq!(Plan::from_str(plan.as_str()), Some(plan));
        }
        assert_eq!(Plan::from_str("PLATINUM"), None);
    }
}
