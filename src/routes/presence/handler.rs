use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    geo::Coordinate,
    utils::{Claims, error_codes, error_to_api_response, success_to_api_response},
};

use super::model::PresenceRecord;

#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub hide_proximity: bool,
}

#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateLocationRequest>,
) -> impl IntoResponse {
    let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "用户标识无效".to_string()),
        );
    };

    // 隐藏模式不需要坐标；其余情况坐标必须有效
    let coord = if req.hide_proximity {
        None
    } else {
        let coord = match (req.lat, req.lng) {
            (Some(lat), Some(lng)) => Coordinate::new(lat, lng),
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    error_to_api_response(error_codes::VALIDATION_ERROR, "缺少坐标".to_string()),
                );
            }
        };
        if !coord.is_valid() {
            return (
                StatusCode::BAD_REQUEST,
                error_to_api_response(error_codes::VALIDATION_ERROR, "坐标无效".to_string()),
            );
        }
        Some(coord)
    };

    match PresenceRecord::upsert(
        &state.pool,
        user_id,
        coord,
        req.accuracy_m,
        req.hide_proximity,
        state.config.presence_bucket_decimals,
    )
    .await
    {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "success": true
            })),
        ),
        Err(e) => {
            tracing::error!("Failed to upsert presence for {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "位置更新失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "用户标识无效".to_string()),
        );
    };

    match PresenceRecord::find_by_user(&state.pool, user_id).await {
        Ok(Some(record)) => (StatusCode::OK, success_to_api_response(record)),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "尚无定位记录".to_string()),
        ),
        Err(e) => {
            tracing::error!("Failed to read presence for {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "查询失败".to_string()),
            )
        }
    }
}
