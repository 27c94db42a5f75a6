use axum::{
    extract::{Extension, Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    api::schema::common::EmptyResponse,
    routes::claims_user_id,
    social::FriendRepository,
    utils::{Claims, error_codes, error_to_api_response, success_to_api_response},
};

#[derive(Debug, Deserialize)]
pub struct FriendTargetRequest {
    pub user_id: Uuid,
}

#[axum::debug_handler]
pub async fn send(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<FriendTargetRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return unauthorized();
    };

    match FriendRepository::send_request(&state.pool, user_id, req.user_id).await {
        Ok(()) => (StatusCode::OK, success_to_api_response(EmptyResponse {})),
        // 业务性拒绝以 Protocol 形态返回
        Err(sqlx::Error::Protocol(msg)) => (
            StatusCode::OK,
            error_to_api_response(error_codes::VALIDATION_ERROR, friendly_message(&msg)),
        ),
        Err(e) => internal(e),
    }
}

#[axum::debug_handler]
pub async fn confirm(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<FriendTargetRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return unauthorized();
    };

    match FriendRepository::confirm_request(&state.pool, user_id, req.user_id).await {
        Ok(()) => (StatusCode::OK, success_to_api_response(EmptyResponse {})),
        Err(sqlx::Error::RowNotFound) => (
            StatusCode::OK,
            error_to_api_response(error_codes::NOT_FOUND, "没有来自该用户的好友申请".to_string()),
        ),
        Err(e) => internal(e),
    }
}

#[axum::debug_handler]
pub async fn reject(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<FriendTargetRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return unauthorized();
    };

    match FriendRepository::reject_request(&state.pool, user_id, req.user_id).await {
        Ok(()) => (StatusCode::OK, success_to_api_response(EmptyResponse {})),
        Err(sqlx::Error::RowNotFound) => (
            StatusCode::OK,
            error_to_api_response(error_codes::NOT_FOUND, "没有来自该用户的好友申请".to_string()),
        ),
        Err(e) => internal(e),
    }
}

#[axum::debug_handler]
pub async fn remove(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<FriendTargetRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return unauthorized();
    };

    match FriendRepository::remove_friend(&state.pool, user_id, req.user_id).await {
        Ok(()) => (StatusCode::OK, success_to_api_response(EmptyResponse {})),
        Err(e) => internal(e),
    }
}

#[axum::debug_handler]
pub async fn list(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return unauthorized();
    };

    match FriendRepository::list_friends(&state.pool, user_id).await {
        Ok(friends) => (StatusCode::OK, success_to_api_response(friends)),
        Err(e) => internal(e),
    }
}

#[axum::debug_handler]
pub async fn requests(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return unauthorized();
    };

    match FriendRepository::list_requests(&state.pool, user_id).await {
        Ok(pending) => (StatusCode::OK, success_to_api_response(pending)),
        Err(e) => internal(e),
    }
}

fn friendly_message(raw: &str) -> String {
    match raw {
        "Cannot befriend yourself" => "不能添加自己为好友".to_string(),
        "Already friends" => "你们已经是好友了".to_string(),
        "Pending request from this user" => "对方已向你发送过申请，请直接确认".to_string(),
        "Request already sent" => "好友申请已发送，请等待对方确认".to_string(),
        _ => "操作失败".to_string(),
    }
}

fn unauthorized<T>() -> (StatusCode, axum::Json<crate::api::schema::common::ApiResponse<T>>) {
    (
        StatusCode::UNAUTHORIZED,
        error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
    )
}

fn internal<T>(e: sqlx::Error) -> (StatusCode, axum::Json<crate::api::schema::common::ApiResponse<T>>) {
    tracing::error!("Friend operation failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
    )
}
