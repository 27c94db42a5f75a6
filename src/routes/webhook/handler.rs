use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

use crate::{
    AppState,
    billing::{
        event::{parse_event, verify_signature},
        reconciler::{BillingReconciler, PgBillingStore},
    },
};

const SIGNATURE_HEADER: &str = "stripe-signature";

/// 支付网关回调。验签失败或报文损坏直接400；
/// 落库失败返回500让网关重投，对账本身是幂等的。
#[axum::debug_handler]
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, axum::Json(json!({"error": "missing signature"})));
    };

    if verify_signature(&body, signature, &state.config.webhook_secret).is_err() {
        tracing::warn!("Webhook signature verification failed");
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "invalid signature"})),
        );
    }

    let event = match parse_event(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Webhook payload parse failed: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({"error": "malformed payload"})),
            );
        }
    };

    let reconciler = BillingReconciler::new(PgBillingStore::new(state.pool.clone()));
    match reconciler.apply(event).await {
        Ok(()) => (StatusCode::OK, axum::Json(json!({"received": true}))),
        Err(e) => {
            tracing::error!("Webhook reconciliation failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({"error": "reconciliation failed"})),
            )
        }
    }
}
