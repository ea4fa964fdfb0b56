use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// WGS84 坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    // 非有限值（NaN/Inf）和超出范围的坐标一律拒绝
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// 按固定小数位取整后的坐标网格，同一网格内的坐标在缓存中视为同一位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBucket {
    pub lat: f64,
    pub lng: f64,
    pub decimals: u32,
}

impl GeoBucket {
    /// 规范化字符串 "<lat>,<lng>"，精度固定，保证同一网格生成同一个 key
    pub fn key(&self) -> String {
        let d = self.decimals as usize;
        format!("{:.*},{:.*}", d, self.lat, d, self.lng)
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    // -0.0 会格式化成 "-0.00"，归一到 +0.0，零点附近的网格才共享同一个 key
    if rounded == 0.0 { 0.0 } else { rounded }
}

pub fn bucket(coord: Coordinate, decimals: u32) -> GeoBucket {
    GeoBucket {
        lat: round_to(coord.lat, decimals),
        lng: round_to(coord.lng, decimals),
        decimals,
    }
}

/// TTL 窗口编号：同一窗口内的请求落到同一个缓存条目，窗口一过必然失效
pub fn time_slice(now_ms: i64, ttl_ms: i64) -> i64 {
    now_ms.div_euclid(ttl_ms)
}

/// 缓存 key：对 bucket 串做摘要，避免不可信输入注入 key，同时保证分布均匀
pub fn cache_key(origin: &GeoBucket, dest: &GeoBucket, mode: &str, slice: i64) -> String {
    let input = format!("{}|{}|{}|{}", origin.key(), dest.key(), mode, slice);
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Haversine 球面距离，单位米
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let r = 6_371_000.0; // 地球半径（米）
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let delta_phi = (b.lat - a.lat).to_radians();
    let delta_lambda = (b.lng - a.lng).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    r * c
}
