use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::{AppState, error::AppError, utils::verify_token};

/// 认证中间件：校验 Bearer 令牌并把 Claims 注入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    let claims = match token {
        Some(token) => verify_token(token, &state.config).map_err(|_| AppError::Unauthorized)?,
        None => return Err(AppError::Unauthorized),
    };

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
