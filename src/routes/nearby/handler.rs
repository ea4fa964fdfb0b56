use std::net::SocketAddr;

use axum::{
    Extension,
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    geo::Coordinate,
    routing::TravelMode,
    utils::{Claims, error_codes, error_to_api_response, success_to_api_response},
};

use super::model::{RankParams, rank};

#[derive(Debug, Deserialize)]
pub struct RankQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: Option<f64>,
    pub limit: Option<i64>,
    pub eta_top_n: Option<usize>,
    pub eta_ttl_seconds: Option<u64>,
    pub mode: Option<TravelMode>,
}

#[axum::debug_handler]
pub async fn rank_nearby(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<RankQuery>,
) -> impl IntoResponse {
    let Ok(viewer) = Uuid::parse_str(&claims.sub) else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "用户标识无效".to_string()),
        );
    };

    let origin = Coordinate::new(query.lat, query.lng);
    if !origin.is_valid() {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, "坐标无效".to_string()),
        );
    }

    let params = RankParams {
        origin,
        radius_m: query.radius_m,
        limit: query.limit,
        eta_top_n: query.eta_top_n,
        eta_ttl_seconds: query.eta_ttl_seconds,
        mode: query.mode.unwrap_or(TravelMode::Walk),
    };

    match rank(&state, viewer, claims.tier, &addr.ip().to_string(), params).await {
        Ok(response) => (StatusCode::OK, success_to_api_response(response)),
        Err(e) => {
            tracing::error!("Nearby ranking failed for {}: {}", viewer, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "附近查询失败".to_string()),
            )
        }
    }
}
