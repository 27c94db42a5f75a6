use axum::{
    body::{Body, to_bytes},
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::error;

/// 日志里最多回放的错误响应体字节数
const ERROR_BODY_LIMIT: usize = 4096;

/// 5xx响应落日志，带上触发它的方法与路径
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    if response.status().is_server_error() {
        let (mut parts, body) = response.into_parts();
        let bytes = match to_bytes(body, ERROR_BODY_LIMIT).await {
            Ok(b) => b,
            Err(e) => {
                error!(
                    "Failed to read error response body for {} {}: {}",
                    method, path, e
                );
                return Response::from_parts(parts, axum::body::Body::empty());
            }
        };
        let body_str = String::from_utf8_lossy(&bytes);

        error!(
            "Server error on {} {} - Status: {}, Body: {}",
            method, path, parts.status, body_str
        );

        // 重置body以便重新构建响应
        parts.headers.remove(axum::http::header::CONTENT_LENGTH);
        Response::from_parts(parts, axum::body::Body::from(bytes))
    } else {
        response
    }
}
