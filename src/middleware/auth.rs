use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    AppState,
    utils::{error_codes, error_to_api_response, verify_token},
};

/// 解析 Bearer token 并把 Claims 注入请求扩展；签发与续期由外部认证服务负责
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response::<()>(error_codes::AUTH_FAILED, "缺少认证令牌".to_string()),
        )
            .into_response();
    };

    match verify_token(token, &state.config) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!("Token verification failed: {}", e);
            (
                StatusCode::UNAUTHORIZED,
                error_to_api_response::<()>(error_codes::AUTH_FAILED, "认证令牌无效".to_string()),
            )
                .into_response()
        }
    }
}
