use axum::{
    extract::{Extension, Json, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    AppState,
    cache::operations::RedisOtpStore,
    gate::{
        self, GateOutcome, GatePolicy,
        agent::classify,
        otp::{self, OtpStore, OtpVerification},
    },
    utils::{Claims, error_codes, error_to_api_response, generate_token, success_to_api_response},
};

use super::model::{
    LoginHistoryEntry, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, User,
    VerifyOtpRequest, VerifyOtpResponse,
};

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if req.name.trim().is_empty() || req.name.len() > 64 {
        return (
            StatusCode::OK,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "姓名长度必须在1到64个字符之间".to_string(),
            ),
        );
    }
    if !req.email.contains('@') {
        return (
            StatusCode::OK,
            error_to_api_response(error_codes::VALIDATION_ERROR, "邮箱格式无效".to_string()),
        );
    }
    if req.password.len() < 6 || req.password.len() > 72 {
        return (
            StatusCode::OK,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "密码长度必须在6到72个字符之间".to_string(),
            ),
        );
    }

    // 手机号只留数字，至少10位
    if let Some(phone) = req.phone.take() {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 10 {
            return (
                StatusCode::OK,
                error_to_api_response(
                    error_codes::VALIDATION_ERROR,
                    "手机号至少需要10位数字".to_string(),
                ),
            );
        }
        req.phone = Some(digits);
    }

    match User::create(&state.pool, &req).await {
        Ok(user) => {
            let user_key = user.user_id.to_string();
            match generate_token(&user_key, &state.config) {
                Ok((token, expires_at)) => {
                    // 注册视作首次成功登录，同样落审计
                    let agent = classify(
                        headers
                            .get("user-agent")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or(""),
                    );
                    audit(&state, &user, &headers, &agent, "SUCCESS", Some("PASSWORD")).await;
                    (
                        StatusCode::OK,
                        success_to_api_response(RegisterResponse {
                            user_id: user.user_id,
                            name: user.name,
                            email: user.email,
                            token,
                            expires_at,
                        }),
                    )
                }
                Err(_) => (
                    StatusCode::OK,
                    error_to_api_response(error_codes::INTERNAL_ERROR, "生成令牌失败".to_string()),
                ),
            }
        }
        Err(e) => {
            if e.to_string().contains("unique constraint") {
                (
                    StatusCode::OK,
                    error_to_api_response(
                        error_codes::USER_EXISTS,
                        "该邮箱或手机号已注册".to_string(),
                    ),
                )
            } else {
                tracing::error!("Failed to create user: {}", e);
                (
                    StatusCode::OK,
                    error_to_api_response(error_codes::INTERNAL_ERROR, "创建用户失败".to_string()),
                )
            }
        }
    }
}

/// 登录：凭证校验通过后过两道闸门（设备时段、浏览器家族），
/// 结论决定直接发令牌、要求OTP还是拒绝。
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let user = match User::find_by_email(&state.pool, &req.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            // 不暴露邮箱是否存在
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::AUTH_FAILED, "邮箱或密码错误".to_string()),
            );
        }
        Err(e) => {
            tracing::error!("User lookup failed: {}", e);
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };

    match crate::utils::verify_password(&req.password, &user.password_hash) {
        Ok(true) => (),
        Ok(false) => {
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::AUTH_FAILED, "邮箱或密码错误".to_string()),
            );
        }
        Err(e) => {
            tracing::error!("Password verification failed: {}", e);
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::INTERNAL_ERROR, "内部错误".to_string()),
            );
        }
    }

    let user_agent = headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    let agent = classify(user_agent);
    let hour = gate::local_hour(chrono::Utc::now(), &state.config);
    let policy = GatePolicy::from_config(&state.config);

    match gate::evaluate(&agent, hour, &policy) {
        GateOutcome::Blocked => {
            audit(&state, &user, &headers, &agent, "BLOCKED", Some("NONE")).await;
            (
                StatusCode::OK,
                error_to_api_response(
                    error_codes::TIME_BLOCKED,
                    format!(
                        "移动设备仅允许在{}:00-{}:00之间登录",
                        state.config.mobile_window_start_hour, state.config.mobile_window_end_hour
                    ),
                ),
            )
        }
        GateOutcome::OtpRequired => {
            let code = otp::generate_code();
            let user_key = user.user_id.to_string();
            let otp_store = RedisOtpStore::new(state.redis.clone());
            if let Err(e) = otp_store
                .put(&user_key, &code, state.config.otp_ttl_secs)
                .await
            {
                tracing::error!("Failed to store OTP for {}: {}", user.user_id, e);
                return (
                    StatusCode::OK,
                    error_to_api_response(error_codes::INTERNAL_ERROR, "内部错误".to_string()),
                );
            }

            audit(&state, &user, &headers, &agent, "PENDING_OTP", Some("OTP")).await;
            state
                .notifier
                .dispatch_otp(user.email.clone(), user.phone.clone(), code);

            (
                StatusCode::OK,
                success_to_api_response(LoginResponse {
                    otp_required: true,
                    token: None,
                    expires_at: None,
                    // 验证OTP时以 user_id 为键
                    user_id: Some(user.user_id),
                    name: None,
                }),
            )
        }
        GateOutcome::TokenIssued { auth_method } => {
            let user_key = user.user_id.to_string();
            match generate_token(&user_key, &state.config) {
                Ok((token, expires_at)) => {
                    audit(
                        &state,
                        &user,
                        &headers,
                        &agent,
                        "SUCCESS",
                        Some(auth_method.as_str()),
                    )
                    .await;
                    (
                        StatusCode::OK,
                        success_to_api_response(LoginResponse {
                            otp_required: false,
                            token: Some(token),
                            expires_at: Some(expires_at),
                            user_id: Some(user.user_id),
                            name: Some(user.name),
                        }),
                    )
                }
                Err(_) => (
                    StatusCode::OK,
                    error_to_api_response(error_codes::INTERNAL_ERROR, "生成令牌失败".to_string()),
                ),
            }
        }
    }
}

/// OTP校验失败时统一返回一种错误，不区分「不存在」「过期」「不匹配」
#[axum::debug_handler]
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtpRequest>,
) -> impl IntoResponse {
    let invalid = || {
        (
            StatusCode::OK,
            error_to_api_response(error_codes::OTP_INVALID, "验证码无效或已过期".to_string()),
        )
    };

    let user = match User::find_by_id(&state.pool, req.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return invalid(),
        Err(e) => {
            tracing::error!("User lookup failed: {}", e);
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };

    let user_key = user.user_id.to_string();
    let otp_store = RedisOtpStore::new(state.redis.clone());
    match otp::verify_and_consume(&otp_store, &user_key, &req.code).await {
        Ok(OtpVerification::Accepted) => (),
        Ok(OtpVerification::Rejected) => return invalid(),
        Err(e) => {
            tracing::error!("OTP verification failed for {}: {}", user.user_id, e);
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::INTERNAL_ERROR, "内部错误".to_string()),
            );
        }
    }

    if let Err(e) = LoginHistoryEntry::complete_otp(&state.pool, user.user_id).await {
        tracing::warn!("Failed to update login audit for {}: {}", user.user_id, e);
    }

    match generate_token(&user_key, &state.config) {
        Ok((token, expires_at)) => (
            StatusCode::OK,
            success_to_api_response(VerifyOtpResponse {
                token,
                expires_at,
                user_id: user.user_id,
                name: user.name,
            }),
        ),
        Err(_) => (
            StatusCode::OK,
            error_to_api_response(error_codes::INTERNAL_ERROR, "生成令牌失败".to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn login_history(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "无效的令牌".to_string()),
        );
    };

    match LoginHistoryEntry::list_recent(&state.pool, user_id).await {
        Ok(entries) => (StatusCode::OK, success_to_api_response(entries)),
        Err(e) => {
            tracing::error!("Failed to load login history for {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

/// 审计写入失败只记日志，不影响登录主流程
async fn audit(
    state: &AppState,
    user: &User,
    headers: &HeaderMap,
    agent: &crate::gate::agent::ClientAgent,
    outcome: &str,
    auth_method: Option<&str>,
) {
    let ip = client_ip(headers);
    if let Err(e) = LoginHistoryEntry::record(
        &state.pool,
        user.user_id,
        ip.as_deref(),
        &agent.browser,
        &agent.os,
        agent.device.as_str(),
        outcome,
        auth_method,
    )
    .await
    {
        tracing::warn!("Failed to record login audit for {}: {}", user.user_id, e);
    }
}

/// 代理头里的客户端IP，没有就留空
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').next())
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
