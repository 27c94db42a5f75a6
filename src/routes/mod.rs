pub mod answer;
pub mod friend;
pub mod post;
pub mod question;
pub mod subscription;
pub mod user;
pub mod webhook;

use crate::AppState;
use crate::entitlement::EntitlementEngine;
use crate::entitlement::store::PgEntitlementStore;
use crate::social::PgSocialGraph;

/// 令牌里的用户ID是UUID字符串
pub(crate) fn claims_user_id(claims: &crate::utils::Claims) -> Option<uuid::Uuid> {
    uuid::Uuid::parse_str(&claims.sub).ok()
}

/// 各 handler 共用的配额引擎装配
pub(crate) fn entitlement_engine(
    state: &AppState,
) -> EntitlementEngine<PgEntitlementStore, PgSocialGraph> {
    EntitlementEngine::new(
        PgEntitlementStore::new(state.pool.clone()),
        PgSocialGraph::new(state.pool.clone()),
        state.config.local_offset(),
    )
}
