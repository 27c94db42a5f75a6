use axum::{
    extract::{Extension, Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    api::schema::common::EmptyResponse,
    routes::claims_user_id,
    utils::{Claims, error_codes, error_to_api_response, success_to_api_response},
};

use super::model::{Answer, AnswerIdRequest, AnswerRequest, AnswerResponse, ListAnswersQuery};

/// 回答问题。回答不占每日配额，只有提问受配额约束。
#[axum::debug_handler]
pub async fn create(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    let Some(content) = super::model::normalize_content(&req.content) else {
        return (
            StatusCode::OK,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "回答内容长度必须在1到2000个字符之间".to_string(),
            ),
        );
    };

    let answer_id = match Answer::create(&state.pool, req.question_id, user_id, content).await {
        Ok(answer_id) => answer_id,
        // 问题已被删除时外键约束报错
        Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::NOT_FOUND, "提问不存在".to_string()),
            );
        }
        Err(e) => {
            tracing::error!("Answer insert failed for {}: {}", user_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "创建回答失败".to_string()),
            );
        }
    };

    let answer_count = match Answer::count_for_question(&state.pool, req.question_id).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!("Answer count failed for {}: {}", req.question_id, e);
            0
        }
    };

    (
        StatusCode::OK,
        success_to_api_response(AnswerResponse {
            answer_id,
            answer_count,
        }),
    )
}

#[axum::debug_handler]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListAnswersQuery>,
) -> impl IntoResponse {
    match Answer::list_for_question(&state.pool, query.question_id).await {
        Ok(answers) => (StatusCode::OK, success_to_api_response(answers)),
        Err(e) => {
            tracing::error!("Failed to list answers for {}: {}", query.question_id, e);
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
    Json(req): Json<AnswerIdRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    match Answer::delete_own(&state.pool, req.answer_id, user_id).await {
        Ok(true) => (StatusCode::OK, success_to_api_response(EmptyResponse {})),
        Ok(false) => (
            StatusCode::OK,
            error_to_api_response(error_codes::NOT_FOUND, "回答不存在或无权删除".to_string()),
        ),
        Err(e) => {
            tracing::error!("Failed to delete answer: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}
