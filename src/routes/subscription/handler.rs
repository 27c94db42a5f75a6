use axum::{
    extract::{Extension, Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    api::schema::common::EmptyResponse,
    entitlement::policy::Plan,
    entitlement::store::{EntitlementStore, PgEntitlementStore},
    gate,
    routes::claims_user_id,
    utils::{Claims, error_codes, error_to_api_response, success_to_api_response},
};

use super::model::{
    CheckoutRequest, CheckoutResponse, PaymentView, SubscriptionView, mark_cancel_at_period_end,
};

/// 当前订阅；没有记录时惰性建立免费档
#[axum::debug_handler]
pub async fn current(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    let store = PgEntitlementStore::new(state.pool.clone());
    match store.fetch_or_create_subscription(user_id).await {
        Ok(record) => (
            StatusCode::OK,
            success_to_api_response(SubscriptionView::from(record)),
        ),
        Err(e) => {
            tracing::error!("Subscription lookup failed for {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn cancel(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    match mark_cancel_at_period_end(&state.pool, user_id).await {
        Ok(true) => (StatusCode::OK, success_to_api_response(EmptyResponse {})),
        Ok(false) => (
            StatusCode::OK,
            error_to_api_response(
                error_codes::SUBSCRIPTION_INACTIVE,
                "没有可取消的有效付费订阅".to_string(),
            ),
        ),
        Err(e) => {
            tracing::error!("Cancel failed for {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

/// 创建结账会话。支付只在配置的时段开放。
#[axum::debug_handler]
pub async fn checkout(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    let Some(plan) = Plan::from_str(&req.plan) else {
        return (
            StatusCode::OK,
            error_to_api_response(error_codes::VALIDATION_ERROR, "未知的套餐".to_string()),
        );
    };
    if plan == Plan::Free {
        return (
            StatusCode::OK,
            error_to_api_response(error_codes::VALIDATION_ERROR, "免费档无需购买".to_string()),
        );
    }

    let hour = gate::local_hour(chrono::Utc::now(), &state.config);
    if hour < state.config.payment_window_start_hour
        || hour >= state.config.payment_window_end_hour
    {
        return (
            StatusCode::OK,
            error_to_api_response(
                error_codes::TIME_BLOCKED,
                format!(
                    "支付仅在{}:00-{}:00之间开放",
                    state.config.payment_window_start_hour, state.config.payment_window_end_hour
                ),
            ),
        );
    }

    let email: Option<String> = match sqlx::query_scalar(
        "SELECT email FROM users WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await
    {
        Ok(email) => email,
        Err(e) => {
            tracing::error!("User lookup failed for {}: {}", user_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };
    let Some(email) = email else {
        return (
            StatusCode::OK,
            error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
        );
    };

    match state
        .billing
        .create_checkout_session(user_id, plan, &email)
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            success_to_api_response(CheckoutResponse {
                checkout_url: session.url,
            }),
        ),
        Err(e) => {
            tracing::error!("Checkout session creation failed for {}: {}", user_id, e);
            (
                StatusCode::OK,
                error_to_api_response(
                    error_codes::INTERNAL_ERROR,
                    "创建支付会话失败，请稍后再试".to_string(),
                ),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn payments(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(user_id) = claims_user_id(&claims) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    match PaymentView::list_recent(&state.pool, user_id).await {
        Ok(list) => (StatusCode::OK, success_to_api_response(list)),
        Err(e) => {
            tracing::error!("Payment history lookup failed for {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}
