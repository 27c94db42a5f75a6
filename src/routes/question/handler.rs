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

use super::model::{
    AskRequest, AskResponse, Question, QuestionIdRequest, VoteRequest, VoteResponse,
};

/// 提问。先过配额引擎（原子消费一次当日额度），放行后才落内容。
#[axum::debug_handler]
pub async fn ask(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    if req.title.trim().is_empty() || req.title.len() > 200 {
        return (
            StatusCode::OK,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "标题长度必须在1到200个字符之间".to_string(),
            ),
        );
    }
    if req.content.trim().is_empty() {
        return (
            StatusCode::OK,
            error_to_api_response(error_codes::VALIDATION_ERROR, "内容不能为空".to_string()),
        );
    }

    let engine = entitlement_engine(&state);
    let decision = match engine
        .check_and_consume(user_id, ActionKind::Question, chrono::Utc::now())
        .await
    {
        Ok(decision) => decision,
        Err(_) => {
            // 依赖不可用时拒绝，与配额用尽区分开
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

    match Question::create(&state.pool, user_id, req.title.trim(), req.content.trim()).await {
        Ok(question_id) => (
            StatusCode::OK,
            success_to_api_response(AskResponse {
                question_id,
                used_today: used,
                daily_limit: limit.as_cap(),
            }),
        ),
        Err(e) => {
            // 配额已消费但内容落库失败，记日志便于排查
            tracing::error!("Question insert failed for {} after consume: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "创建提问失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    match Question::list_recent(&state.pool, 50).await {
        Ok(questions) => (StatusCode::OK, success_to_api_response(questions)),
        Err(e) => {
            tracing::error!("Failed to list questions: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn delete(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<QuestionIdRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    match Question::delete_own(&state.pool, req.question_id, user_id).await {
        Ok(true) => (
            StatusCode::OK,
            success_to_api_response(crate::api::schema::common::EmptyResponse {}),
        ),
        Ok(false) => (
            StatusCode::OK,
            error_to_api_response(error_codes::NOT_FOUND, "提问不存在或无权删除".to_string()),
        ),
        Err(e) => {
            tracing::error!("Failed to delete question: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn vote(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    let vote_type: i16 = match req.vote.as_str() {
        "up" => 1,
        "down" => -1,
        _ => {
            return (
                StatusCode::OK,
                error_to_api_response(
                    error_codes::VALIDATION_ERROR,
                    "投票方向只能是 up 或 down".to_string(),
                ),
            );
        }
    };

    match Question::cast_vote(&state.pool, req.question_id, user_id, vote_type).await {
        Ok((voted, vote_count)) => (
            StatusCode::OK,
            success_to_api_response(VoteResponse { voted, vote_count }),
        ),
        Err(e) => {
            tracing::error!("Failed to toggle vote: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}
