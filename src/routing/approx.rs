use crate::geo::{Coordinate, haversine_distance};

use super::types::{PROVIDER_APPROX, RouteEstimate, TravelMode};

// 估算耗时下限，避免近距离出现 0 秒
const MIN_DURATION_SECONDS: i64 = 60;

/// 兜底层：直线距离按市区均速折算耗时，对有限坐标永不失败
pub fn estimate(origin: Coordinate, destination: Coordinate, mode: TravelMode) -> RouteEstimate {
    let distance_meters = haversine_distance(origin, destination);
    let duration_seconds =
        ((distance_meters / mode.assumed_speed_mps()).round() as i64).max(MIN_DURATION_SECONDS);

    RouteEstimate {
        duration_seconds,
        distance_meters,
        provider: PROVIDER_APPROX.to_string(),
        duration_in_traffic_seconds: None,
    }
}
