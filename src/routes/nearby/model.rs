use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    AppState,
    geo::{Coordinate, bucket, cache_key, haversine_distance, time_slice},
    routing::{PROVIDER_APPROX, TravelMode},
    utils::SubscriptionTier,
};

use crate::routes::eta::model::EtaCacheEntry;
use crate::routes::presence::model::PresenceRecord;

// 请求参数的安全范围
const MIN_RADIUS_M: f64 = 500.0;
const MAX_RADIUS_M: f64 = 50_000.0;
const DEFAULT_RADIUS_M: f64 = 5_000.0;
const MIN_LIMIT: i64 = 1;
const MAX_LIMIT: i64 = 100;
const DEFAULT_LIMIT: i64 = 20;
// ETA 只算距离最近的前 N 个，限制对服务商的调用量
const MIN_ETA_TOP_N: usize = 5;
const MAX_ETA_TOP_N: usize = 60;
const DEFAULT_ETA_TOP_N: usize = 20;
const MIN_TTL_SECS: u64 = 60;
const MAX_TTL_SECS: u64 = 3_600;

pub fn clamp_radius(requested: Option<f64>, max_search_radius: f64) -> f64 {
    let upper = max_search_radius.clamp(MIN_RADIUS_M, MAX_RADIUS_M);
    requested.unwrap_or(DEFAULT_RADIUS_M).clamp(MIN_RADIUS_M, upper)
}

pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIMIT).clamp(MIN_LIMIT, MAX_LIMIT)
}

pub fn clamp_eta_top_n(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_ETA_TOP_N).clamp(MIN_ETA_TOP_N, MAX_ETA_TOP_N)
}

pub fn clamp_ttl_secs(requested: Option<u64>, default: u64) -> u64 {
    requested.unwrap_or(default).clamp(MIN_TTL_SECS, MAX_TTL_SECS)
}

/// 排序结果中的单个候选人；ETA 解析不出来就保持 null，不用哨兵值
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub user_id: Uuid,
    pub distance_meters: f64,
    pub eta_seconds: Option<i64>,
    pub eta_mode: Option<TravelMode>,
    #[serde(skip)]
    pub bucketed: Coordinate,
}

#[derive(Debug, Serialize)]
pub struct RankResponse {
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct PublicPresenceRow {
    user_id: Uuid,
    bucketed_lat: f64,
    bucketed_lng: f64,
}

/// 把缓存命中的 ETA 合入候选列表，返回未命中的下标
///
/// FREE 档直接返回空未命中集且不改写任何候选：无论缓存里有什么，
/// FREE 档的 eta_seconds 都保持 null
pub fn merge_cached_etas(
    tier: SubscriptionTier,
    candidates: &mut [Candidate],
    keys: &[String],
    cached: &HashMap<String, EtaCacheEntry>,
    mode: TravelMode,
) -> Vec<usize> {
    if tier == SubscriptionTier::Free {
        return Vec::new();
    }

    let mut misses = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        match cached.get(key) {
            Some(entry) => {
                candidates[i].eta_seconds = Some(entry.duration_seconds);
                candidates[i].eta_mode = Some(mode);
            }
            None => misses.push(i),
        }
    }
    misses
}

/// ETA 升序、未知 ETA 排最后，距离做次级排序
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        let ea = a.eta_seconds.unwrap_or(i64::MAX);
        let eb = b.eta_seconds.unwrap_or(i64::MAX);
        ea.cmp(&eb).then(
            a.distance_meters
                .partial_cmp(&b.distance_meters)
                .unwrap_or(Ordering::Equal),
        )
    });
}

/// 从公开网格表找附近候选人：经纬度范围粗筛，再按球面距离精筛
async fn find_nearby(
    pool: &PgPool,
    origin: Coordinate,
    radius: f64,
    limit: i64,
    exclude: Uuid,
) -> Result<Vec<Candidate>, sqlx::Error> {
    let lng_scale = origin.lat.to_radians().cos().abs().max(0.01);
    let lat_range = radius / 111_000.0; // 1度纬度约111km
    let lng_range = radius / (111_000.0 * lng_scale);

    // 粗筛按近似平方度距离排序再截断，密集区域也不会把最近的行挤出结果集
    let rows = sqlx::query_as::<_, PublicPresenceRow>(
        r#"
        SELECT user_id, bucketed_lat, bucketed_lng
        FROM user_presence_public
        WHERE
            user_id <> $1
            AND bucketed_lat IS NOT NULL
            AND bucketed_lng IS NOT NULL
            AND bucketed_lat BETWEEN ($2 - $4) AND ($2 + $4)
            AND bucketed_lng BETWEEN ($3 - $5) AND ($3 + $5)
            AND updated_at > NOW() - INTERVAL '3 days'
        ORDER BY
            (bucketed_lat - $2) * (bucketed_lat - $2)
            + ((bucketed_lng - $3) * $7) * ((bucketed_lng - $3) * $7)
        LIMIT $6
        "#,
    )
    .bind(exclude)
    .bind(origin.lat)
    .bind(origin.lng)
    .bind(lat_range)
    .bind(lng_range)
    // 粗筛多取一些，给精筛留余量
    .bind(limit * 4)
    .bind(lng_scale)
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<Candidate> = rows
        .into_iter()
        .filter_map(|row| {
            let bucketed = Coordinate::new(row.bucketed_lat, row.bucketed_lng);
            let distance = haversine_distance(origin, bucketed);
            (distance <= radius).then_some(Candidate {
                user_id: row.user_id,
                distance_meters: distance,
                eta_seconds: None,
                eta_mode: None,
                bucketed,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_meters
            .partial_cmp(&b.distance_meters)
            .unwrap_or(Ordering::Equal)
    });
    candidates.truncate(limit as usize);
    Ok(candidates)
}

pub struct RankParams {
    pub origin: Coordinate,
    pub radius_m: Option<f64>,
    pub limit: Option<i64>,
    pub eta_top_n: Option<usize>,
    pub eta_ttl_seconds: Option<u64>,
    pub mode: TravelMode,
}

/// 候选人排序主流程
///
/// FREE 档只按距离排；PAID 档对前 N 个候选人批量解析 ETA：
/// 先查缓存，缺的走限流 + 矩阵接口，成功结果写回缓存
pub async fn rank(
    state: &AppState,
    viewer: Uuid,
    tier: SubscriptionTier,
    ip: &str,
    params: RankParams,
) -> Result<RankResponse, sqlx::Error> {
    // 查看者自己隐藏了位置时视为离线，不去查任何人的位置
    if let Some(me) = PresenceRecord::find_by_user(&state.pool, viewer).await? {
        if me.hide_proximity {
            return Ok(RankResponse {
                candidates: Vec::new(),
                warnings: Vec::new(),
            });
        }
    }

    let radius = clamp_radius(params.radius_m, state.config.max_search_radius);
    let limit = clamp_limit(params.limit);
    let mut candidates = find_nearby(&state.pool, params.origin, radius, limit, viewer).await?;

    if tier == SubscriptionTier::Free {
        // FREE 档无论缓存里有什么都不带 ETA
        return Ok(RankResponse {
            candidates,
            warnings: Vec::new(),
        });
    }

    let mut warnings = Vec::new();

    if !state.routing.is_configured() {
        warnings.push("未配置路线服务，仅按距离排序".to_string());
        return Ok(RankResponse { candidates, warnings });
    }

    let top_n = clamp_eta_top_n(params.eta_top_n).min(candidates.len());
    let ttl_secs = clamp_ttl_secs(params.eta_ttl_seconds, state.config.eta_cache_ttl_secs);
    let slice = time_slice(Utc::now().timestamp_millis(), ttl_secs as i64 * 1000);
    let origin_bucket = bucket(params.origin, state.config.eta_bucket_decimals);

    let keys: Vec<String> = candidates[..top_n]
        .iter()
        .map(|c| {
            let dest = bucket(c.bucketed, state.config.eta_bucket_decimals);
            cache_key(&origin_bucket, &dest, params.mode.as_str(), slice)
        })
        .collect();

    // 缓存读失败按全部未命中处理，不影响本次请求
    let cached = match EtaCacheEntry::get_many(&state.pool, &keys).await {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!("ETA cache read failed, treating as miss: {}", e);
            Default::default()
        }
    };

    let misses = merge_cached_etas(
        tier,
        &mut candidates[..top_n],
        &keys,
        &cached,
        params.mode,
    );

    if !misses.is_empty() {
        let decision = state
            .limiter
            .check(
                "eta_batch",
                &viewer.to_string(),
                ip,
                state.config.rate_limit_window(),
                state.config.rate_limit_requests,
            )
            .await;

        if decision.allowed {
            let destinations: Vec<Coordinate> =
                misses.iter().map(|&i| candidates[i].bucketed).collect();
            let estimates = state
                .routing
                .resolve_matrix(params.origin, &destinations, params.mode)
                .await;

            let now = Utc::now();
            let mut entries = Vec::new();
            for (&i, estimate) in misses.iter().zip(&estimates) {
                candidates[i].eta_seconds = Some(estimate.duration_seconds);
                candidates[i].eta_mode = Some(params.mode);
                // 本地估算不落缓存，重算成本为零
                if estimate.provider != PROVIDER_APPROX {
                    let dest = bucket(candidates[i].bucketed, state.config.eta_bucket_decimals);
                    if let Some(entry) = EtaCacheEntry::from_estimate(
                        &keys[i],
                        &origin_bucket,
                        &dest,
                        params.mode,
                        estimate,
                        now,
                        ttl_secs,
                    ) {
                        entries.push(entry);
                    }
                }
            }

            // 缓存写失败只记日志，下一个窗口重算即可
            if let Err(e) = EtaCacheEntry::put_many(&state.pool, &entries).await {
                tracing::warn!("ETA cache write failed: {}", e);
            }
        } else {
            warnings.push("请求过于频繁，部分结果仅按距离排序".to_string());
        }
    }

    sort_candidates(&mut candidates);
    Ok(RankResponse { candidates, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(eta: Option<i64>, dist: f64) -> Candidate {
        Candidate {
            user_id: Uuid::new_v4(),
            distance_meters: dist,
            eta_seconds: eta,
            eta_mode: eta.map(|_| TravelMode::Drive),
            bucketed: Coordinate::new(0.0, 0.0),
        }
    }

    #[test]
    fn sort_puts_unknown_eta_last_and_breaks_ties_by_distance() {
        let mut candidates = vec![
            candidate(Some(120), 500.0),
            candidate(None, 100.0),
            candidate(Some(120), 300.0),
        ];
        sort_candidates(&mut candidates);

        assert_eq!(candidates[0].eta_seconds, Some(120));
        assert_eq!(candidates[0].distance_meters, 300.0);
        assert_eq!(candidates[1].eta_seconds, Some(120));
        assert_eq!(candidates[1].distance_meters, 500.0);
        assert_eq!(candidates[2].eta_seconds, None);
        assert_eq!(candidates[2].distance_meters, 100.0);
    }

    #[test]
    fn radius_is_clamped_to_safe_range() {
        assert_eq!(clamp_radius(None, 50_000.0), 5_000.0);
        assert_eq!(clamp_radius(Some(10.0), 50_000.0), 500.0);
        assert_eq!(clamp_radius(Some(1e9), 50_000.0), 50_000.0);
        // 运营配置的上限进一步收紧
        assert_eq!(clamp_radius(Some(20_000.0), 8_000.0), 8_000.0);
    }

    #[test]
    fn limit_and_top_n_are_clamped() {
        assert_eq!(clamp_limit(None), 20);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(1_000)), 100);
        assert_eq!(clamp_eta_top_n(Some(1)), 5);
        assert_eq!(clamp_eta_top_n(Some(500)), 60);
    }

    #[test]
    fn ttl_is_clamped_to_bounded_staleness() {
        assert_eq!(clamp_ttl_secs(None, 600), 600);
        assert_eq!(clamp_ttl_secs(Some(5), 600), 60);
        assert_eq!(clamp_ttl_secs(Some(86_400), 600), 3_600);
    }

    #[test]
    fn candidate_serializes_without_internal_coordinates() {
        let c = candidate(Some(90), 250.0);
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("bucketed").is_none());
        assert_eq!(json["eta_seconds"], 90);
        assert_eq!(json["eta_mode"], "DRIVE");
    }

    fn cached_entry(key: &str, duration: i64) -> EtaCacheEntry {
        let o = bucket(Coordinate::new(51.5074, -0.1278), 2);
        let d = bucket(Coordinate::new(51.5099, -0.1181), 2);
        let estimate = crate::routing::RouteEstimate {
            duration_seconds: duration,
            distance_meters: 1000.0,
            provider: crate::routing::PROVIDER_ROUTES_V2.to_string(),
            duration_in_traffic_seconds: None,
        };
        EtaCacheEntry::from_estimate(key, &o, &d, TravelMode::Drive, &estimate, Utc::now(), 600)
            .unwrap()
    }

    #[test]
    fn free_tier_never_gains_etas_even_with_warm_cache() {
        let mut candidates = vec![candidate(None, 100.0), candidate(None, 200.0)];
        let keys = vec!["k1".to_string(), "k2".to_string()];
        let mut cached = HashMap::new();
        cached.insert("k1".to_string(), cached_entry("k1", 120));
        cached.insert("k2".to_string(), cached_entry("k2", 240));

        let misses = merge_cached_etas(
            SubscriptionTier::Free,
            &mut candidates,
            &keys,
            &cached,
            TravelMode::Drive,
        );

        // FREE 档既不合入缓存，也不产生未命中去打服务商
        assert!(misses.is_empty());
        assert!(candidates.iter().all(|c| c.eta_seconds.is_none()));
        assert!(candidates.iter().all(|c| c.eta_mode.is_none()));
    }

    #[test]
    fn paid_tier_merges_hits_and_reports_misses() {
        let mut candidates = vec![candidate(None, 100.0), candidate(None, 200.0)];
        let keys = vec!["k1".to_string(), "k2".to_string()];
        let mut cached = HashMap::new();
        cached.insert("k1".to_string(), cached_entry("k1", 120));

        let misses = merge_cached_etas(
            SubscriptionTier::Paid,
            &mut candidates,
            &keys,
            &cached,
            TravelMode::Drive,
        );

        assert_eq!(misses, vec![1]);
        assert_eq!(candidates[0].eta_seconds, Some(120));
        assert_eq!(candidates[0].eta_mode, Some(TravelMode::Drive));
        assert_eq!(candidates[1].eta_seconds, None);
    }

    #[test]
    fn prefilter_order_metric_agrees_with_haversine() {
        // 与 find_nearby 里 ORDER BY 相同的近似平方度距离
        let origin = Coordinate::new(51.5074, -0.1278);
        let lng_scale = origin.lat.to_radians().cos().abs().max(0.01);
        let sq_metric = |p: Coordinate| {
            let dlat = p.lat - origin.lat;
            let dlng = (p.lng - origin.lng) * lng_scale;
            dlat * dlat + dlng * dlng
        };

        let points = [
            Coordinate::new(51.5075, -0.1279),
            Coordinate::new(51.5099, -0.1181),
            Coordinate::new(51.5200, -0.1400),
            Coordinate::new(51.4800, -0.1000),
        ];

        let mut by_metric: Vec<usize> = (0..points.len()).collect();
        by_metric.sort_by(|&a, &b| {
            sq_metric(points[a]).partial_cmp(&sq_metric(points[b])).unwrap()
        });
        let mut by_haversine: Vec<usize> = (0..points.len()).collect();
        by_haversine.sort_by(|&a, &b| {
            haversine_distance(origin, points[a])
                .partial_cmp(&haversine_distance(origin, points[b]))
                .unwrap()
        });

        assert_eq!(by_metric, by_haversine);
    }
}
