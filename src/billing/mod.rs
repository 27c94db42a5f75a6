//! 支付侧：webhook事件的验签、解析与幂等落库，以及结账会话创建。

pub mod client;
pub mod event;
pub mod reconciler;

use crate::entitlement::policy::Plan;

/// 套餐定价（最小货币单位，INR paise）
pub fn plan_price(plan: Plan) -> Option<(i64, &'static str)> {
    match plan {
        Plan::Free => None,
        Plan::Bronze => Some((10000, "inr")),
        Plan::Silver => Some((30000, "inr")),
        Plan::Gold => Some((100000, "inr")),
    }
}

/// 套餐对应写入订阅记录的每日限额，None 为不限哨兵
pub fn plan_quota_column(plan: Plan) -> Option<i32> {
    use crate::entitlement::policy::{DailyLimit, plan_quota};
    match plan_quota(plan) {
        DailyLimit::Limited(n) => Some(n),
        DailyLimit::Unlimited => None,
    }
}
