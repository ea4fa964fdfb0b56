use std::net::SocketAddr;

use axum::{
    Extension,
    extract::{ConnectInfo, Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    geo::{Coordinate, bucket, cache_key, time_slice},
    routing::{Directions, PROVIDER_APPROX, RouteEstimate, TravelMode, approx},
    routes::nearby::model::clamp_ttl_secs,
    utils::{Claims, error_codes, error_to_api_response, success_to_api_response},
};

use super::model::EtaCacheEntry;

#[derive(Debug, Deserialize)]
pub struct EtaRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
    /// 不传则解析全部出行方式
    pub mode: Option<TravelMode>,
    pub ttl_seconds: Option<u64>,
    /// strict 下禁用估算兜底，任何一层失败都报错，便于排查
    #[serde(default)]
    pub strict: bool,
}

/// 按出行方式分组的 ETA 结果，没解析的方式保持 null
#[derive(Debug, Default, Serialize)]
pub struct EtaResponse {
    pub walk: Option<RouteEstimate>,
    pub transit: Option<RouteEstimate>,
    pub drive: Option<RouteEstimate>,
    pub bicycle: Option<RouteEstimate>,
    pub two_wheeler: Option<RouteEstimate>,
}

impl EtaResponse {
    fn set(&mut self, mode: TravelMode, estimate: RouteEstimate) {
        match mode {
            TravelMode::Walk => self.walk = Some(estimate),
            TravelMode::Transit => self.transit = Some(estimate),
            TravelMode::Drive => self.drive = Some(estimate),
            TravelMode::Bicycle => self.bicycle = Some(estimate),
            TravelMode::TwoWheeler => self.two_wheeler = Some(estimate),
        }
    }
}

#[axum::debug_handler]
pub async fn resolve_eta(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<EtaRequest>,
) -> impl IntoResponse {
    if !req.origin.is_valid() || !req.destination.is_valid() {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, "坐标无效".to_string()),
        );
    }

    let modes: Vec<TravelMode> = match req.mode {
        Some(mode) => vec![mode],
        None => TravelMode::ALL.to_vec(),
    };

    let ttl_secs = clamp_ttl_secs(req.ttl_seconds, state.config.eta_cache_ttl_secs);
    let slice = time_slice(Utc::now().timestamp_millis(), ttl_secs as i64 * 1000);
    let origin_bucket = bucket(req.origin, state.config.eta_bucket_decimals);
    let dest_bucket = bucket(req.destination, state.config.eta_bucket_decimals);

    let keys: Vec<String> = modes
        .iter()
        .map(|m| cache_key(&origin_bucket, &dest_bucket, m.as_str(), slice))
        .collect();

    // 缓存不可用按全部未命中处理
    let cached = match EtaCacheEntry::get_many(&state.pool, &keys).await {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!("ETA cache read failed, treating as miss: {}", e);
            Default::default()
        }
    };

    let mut response = EtaResponse::default();
    let mut misses: Vec<(TravelMode, String)> = Vec::new();
    for (mode, key) in modes.iter().zip(&keys) {
        match cached.get(key) {
            Some(entry) => response.set(*mode, entry.to_estimate()),
            None => misses.push((*mode, key.clone())),
        }
    }

    if !misses.is_empty() {
        let decision = state
            .limiter
            .check(
                "eta",
                &claims.sub,
                &addr.ip().to_string(),
                state.config.rate_limit_window(),
                state.config.rate_limit_requests,
            )
            .await;

        if !decision.allowed {
            if req.strict {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    error_to_api_response(error_codes::RATE_LIMIT, "请求过于频繁".to_string()),
                );
            }
            // 限流只保护服务商配额，本地估算不受限
            for (mode, _) in &misses {
                response.set(*mode, approx::estimate(req.origin, req.destination, *mode));
            }
            return (StatusCode::OK, success_to_api_response(response));
        }

        let resolved: Vec<RouteEstimate> = if req.strict {
            let futures = misses
                .iter()
                .map(|(mode, _)| state.routing.resolve_strict(req.origin, req.destination, *mode));
            let mut estimates = Vec::with_capacity(misses.len());
            for result in join_all(futures).await {
                match result {
                    Ok(estimate) => estimates.push(estimate),
                    Err(e) => {
                        return (
                            StatusCode::BAD_GATEWAY,
                            error_to_api_response(
                                error_codes::ROUTE_UNAVAILABLE,
                                format!("路线解析失败: {}", e),
                            ),
                        );
                    }
                }
            }
            estimates
        } else {
            let futures = misses
                .iter()
                .map(|(mode, _)| state.routing.resolve(req.origin, req.destination, *mode));
            join_all(futures).await
        };

        let now = Utc::now();
        let mut entries = Vec::new();
        for ((mode, key), estimate) in misses.iter().zip(&resolved) {
            // 本地估算不落缓存
            if estimate.provider != PROVIDER_APPROX {
                if let Some(entry) = EtaCacheEntry::from_estimate(
                    key,
                    &origin_bucket,
                    &dest_bucket,
                    *mode,
                    estimate,
                    now,
                    ttl_secs,
                ) {
                    entries.push(entry);
                }
            }
            response.set(*mode, estimate.clone());
        }

        if let Err(e) = EtaCacheEntry::put_many(&state.pool, &entries).await {
            tracing::warn!("ETA cache write failed: {}", e);
        }
    }

    (StatusCode::OK, success_to_api_response(response))
}

#[derive(Debug, Deserialize)]
pub struct DirectionsRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub mode: TravelMode,
    #[serde(default)]
    pub strict: bool,
}

#[axum::debug_handler]
pub async fn get_directions(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<DirectionsRequest>,
) -> impl IntoResponse {
    if !req.origin.is_valid() || !req.destination.is_valid() {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response::<Directions>(
                error_codes::VALIDATION_ERROR,
                "坐标无效".to_string(),
            ),
        );
    }

    if req.strict {
        match state
            .routing
            .directions_strict(req.origin, req.destination, req.mode)
            .await
        {
            Ok(directions) => (StatusCode::OK, success_to_api_response(directions)),
            Err(e) => (
                StatusCode::BAD_GATEWAY,
                error_to_api_response(
                    error_codes::ROUTE_UNAVAILABLE,
                    format!("路线解析失败: {}", e),
                ),
            ),
        }
    } else {
        let directions = state
            .routing
            .directions(req.origin, req.destination, req.mode)
            .await;
        (StatusCode::OK, success_to_api_response(directions))
    }
}
