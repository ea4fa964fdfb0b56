use serde::{Deserialize, Serialize};
use std::fmt;

/// 出行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelMode {
    Walk,
    Drive,
    Bicycle,
    Transit,
    TwoWheeler,
}

impl TravelMode {
    pub const ALL: [TravelMode; 5] = [
        TravelMode::Walk,
        TravelMode::Transit,
        TravelMode::Drive,
        TravelMode::Bicycle,
        TravelMode::TwoWheeler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walk => "WALK",
            TravelMode::Drive => "DRIVE",
            TravelMode::Bicycle => "BICYCLE",
            TravelMode::Transit => "TRANSIT",
            TravelMode::TwoWheeler => "TWO_WHEELER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "WALK" => Some(TravelMode::Walk),
            "DRIVE" => Some(TravelMode::Drive),
            "BICYCLE" => Some(TravelMode::Bicycle),
            "TRANSIT" => Some(TravelMode::Transit),
            "TWO_WHEELER" => Some(TravelMode::TwoWheeler),
            _ => None,
        }
    }

    // 实时路况只对机动车模式有意义
    pub fn supports_traffic(&self) -> bool {
        matches!(self, TravelMode::Drive | TravelMode::TwoWheeler)
    }

    // 矩阵接口不支持公交换乘查询
    pub fn supports_matrix(&self) -> bool {
        !matches!(self, TravelMode::Transit)
    }

    /// 本地估算用的市区均速（米/秒）
    pub fn assumed_speed_mps(&self) -> f64 {
        match self {
            TravelMode::Walk => 4.8 / 3.6,
            TravelMode::Drive => 22.0 / 3.6,
            TravelMode::Bicycle => 16.0 / 3.6,
            TravelMode::Transit => 18.0 / 3.6,
            TravelMode::TwoWheeler => 24.0 / 3.6,
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const PROVIDER_ROUTES_V2: &str = "ROUTES_V2";
pub const PROVIDER_MATRIX_V2: &str = "MATRIX_V2";
pub const PROVIDER_APPROX: &str = "approx";

/// 三层路线解析统一的结果形状
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub duration_seconds: i64,
    pub distance_meters: f64,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_in_traffic_seconds: Option<i64>,
}

/// 路线解析失败以值的形式在层间传递，调用方按层降级，不做异常捕获
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// 出行方式不被当前层支持，不发起网络调用
    UnsupportedMode(TravelMode),
    /// 未配置服务商 API key
    NotConfigured,
    /// 服务商返回非 2xx
    ProviderStatus(u16),
    /// 请求超时或传输层失败
    Transport(String),
    /// 响应体缺字段或形状不对
    MalformedResponse(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::UnsupportedMode(m) => write!(f, "unsupported travel mode: {}", m),
            RouteError::NotConfigured => write!(f, "routing provider not configured"),
            RouteError::ProviderStatus(code) => write!(f, "provider returned status {}", code),
            RouteError::Transport(msg) => write!(f, "provider transport error: {}", msg),
            RouteError::MalformedResponse(msg) => write!(f, "malformed provider response: {}", msg),
        }
    }
}

impl std::error::Error for RouteError {}

pub type RouteResult = Result<RouteEstimate, RouteError>;

/// 单条导航步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_meters: f64,
    pub duration_seconds: i64,
}

/// 完整路线：总览 + 逐步导航，matrix 层不产出这种结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directions {
    #[serde(flatten)]
    pub estimate: RouteEstimate,
    pub steps: Vec<RouteStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polyline: Option<String>,
}
