use axum::{
    extract::{Extension, Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    entitlement::{EntitlementDecision, policy::ActionKind},
    routes::{claims_user_id, entitlement_engine},
    utils::{Claims, error_codes, error_to_api_response, success_to_api_response},
};

use super::model::{CreatePostRequest, CreatePostResponse, Post, PostingStats};

/// 发动态。限额由好友数分级决定，0好友直接拦截。
#[axum::debug_handler]
pub async fn create(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    if req.content.trim().is_empty() || req.content.len() > 2000 {
        return (
            StatusCode::OK,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "动态内容长度必须在1到2000个字符之间".to_string(),
            ),
        );
    }

    let engine = entitlement_engine(&state);
    let decision = match engine
        .check_and_consume(user_id, ActionKind::Post, chrono::Utc::now())
        .await
    {
        Ok(decision) => decision,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                error_to_api_response(
                    error_codes::ENGINE_UNAVAILABLE,
                    "服务暂时不可用，请稍后再试".to_string(),
                ),
            );
        }
    };

    let (used, limit) = match decision {
        EntitlementDecision::Allowed { used, limit } => (used, limit),
        EntitlementDecision::Denied(denial) => {
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::QUOTA_EXCEEDED, denial.reason),
            );
        }
    };

    match Post::create(&state.pool, user_id, req.content.trim()).await {
        Ok(post_id) => (
            StatusCode::OK,
            success_to_api_response(CreatePostResponse {
                post_id,
                used_today: used,
                daily_limit: limit.as_cap(),
            }),
        ),
        Err(e) => {
            tracing::error!("Post insert failed for {} after consume: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "发布动态失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn feed(State(state): State<AppState>) -> impl IntoResponse {
    match Post::list_recent(&state.pool, 50).await {
        Ok(posts) => (StatusCode::OK, success_to_api_response(posts)),
        Err(e) => {
            tracing::error!("Failed to load post feed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

/// 只读的资格总览，不消费任何配额
#[axum::debug_handler]
pub async fn stats(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    let engine = entitlement_engine(&state);
    let now = chrono::Utc::now();

    let question = engine.stats(user_id, ActionKind::Question, now).await;
    let post = engine.stats(user_id, ActionKind::Post, now).await;

    match (question, post) {
        (Ok(q), Ok(p)) => (
            StatusCode::OK,
            success_to_api_response(PostingStats {
                question_limit: q.limit.as_cap(),
                questions_used_today: q.used,
                can_ask: q.can_act,
                post_limit: p.limit.as_cap(),
                posts_used_today: p.used,
                can_post: p.can_act,
                friend_count: p.friend_count,
            }),
        ),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_to_api_response(
                error_codes::ENGINE_UNAVAILABLE,
                "服务暂时不可用，请稍后再试".to_string(),
            ),
        ),
    }
}
