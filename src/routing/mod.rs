use crate::config::Config;
use crate::geo::Coordinate;

pub mod approx;
pub mod provider;
pub mod types;

use provider::ProviderClient;
pub use types::{
    Directions, PROVIDER_APPROX, PROVIDER_MATRIX_V2, PROVIDER_ROUTES_V2, RouteError,
    RouteEstimate, RouteResult, RouteStep, TravelMode,
};

/// 分层路线解析客户端：主接口 -> 矩阵接口 -> 本地估算
///
/// 进程启动时构造一次，放进 AppState 供各 handler 共享
#[derive(Clone)]
pub struct RoutingClient {
    provider: Option<ProviderClient>,
}

impl RoutingClient {
    pub fn from_config(config: &Config) -> Self {
        let provider = config.routing_api_key.as_ref().map(|key| {
            let http = reqwest::Client::builder()
                .timeout(config.routing_timeout())
                .build()
                .expect("Failed to build routing HTTP client");
            ProviderClient::new(http, config.routing_base_url.clone(), key.clone())
        });
        if provider.is_none() {
            tracing::warn!("ROUTING_API_KEY not set, travel times degrade to local approximation");
        }
        Self { provider }
    }

    pub fn unconfigured() -> Self {
        Self { provider: None }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// 只走主接口，失败以 RouteError 返回，供 strict 模式使用
    pub async fn resolve_strict(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> RouteResult {
        let provider = self.provider.as_ref().ok_or(RouteError::NotConfigured)?;
        provider
            .compute_route(origin, destination, mode)
            .await
            .map(|route| route.estimate)
    }

    /// 主接口失败时降级到本地估算，对有限坐标永不失败
    pub async fn resolve(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> RouteEstimate {
        match self.resolve_strict(origin, destination, mode).await {
            Ok(estimate) => estimate,
            Err(e) => {
                tracing::warn!("route {} fallback to approximation: {}", mode, e);
                approx::estimate(origin, destination, mode)
            }
        }
    }

    /// 一对多批量解析，矩阵接口不可用时逐个本地估算
    ///
    /// 返回向量与 destinations 一一对应，条目永远有值（估算层兜底）
    pub async fn resolve_matrix(
        &self,
        origin: Coordinate,
        destinations: &[Coordinate],
        mode: TravelMode,
    ) -> Vec<RouteEstimate> {
        if let Some(provider) = &self.provider {
            if mode.supports_matrix() {
                match provider.compute_matrix(origin, destinations, mode).await {
                    Ok(elements) => {
                        return elements
                            .into_iter()
                            .zip(destinations)
                            .map(|(element, dest)| {
                                element.unwrap_or_else(|| approx::estimate(origin, *dest, mode))
                            })
                            .collect();
                    }
                    Err(e) => {
                        tracing::warn!("matrix {} fallback to approximation: {}", mode, e);
                    }
                }
            }
        }
        destinations
            .iter()
            .map(|dest| approx::estimate(origin, *dest, mode))
            .collect()
    }

    /// 完整导航路线；矩阵接口没有路径数据，这里只会用主接口或本地估算
    pub async fn directions_strict(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> Result<Directions, RouteError> {
        let provider = self.provider.as_ref().ok_or(RouteError::NotConfigured)?;
        let route = provider.compute_route(origin, destination, mode).await?;
        Ok(Directions {
            steps: ensure_bounded_steps(route.steps, &route.estimate),
            estimate: route.estimate,
            polyline: route.polyline,
        })
    }

    pub async fn directions(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> Directions {
        match self.directions_strict(origin, destination, mode).await {
            Ok(directions) => directions,
            Err(e) => {
                tracing::warn!("directions {} fallback to approximation: {}", mode, e);
                let estimate = approx::estimate(origin, destination, mode);
                Directions {
                    steps: ensure_bounded_steps(Vec::new(), &estimate),
                    estimate,
                    polyline: None,
                }
            }
        }
    }
}

/// 补齐首尾的「出发」「到达」步骤，保证下游拿到的步骤列表非空且首尾封闭
fn ensure_bounded_steps(mut steps: Vec<RouteStep>, estimate: &RouteEstimate) -> Vec<RouteStep> {
    let has_depart = steps
        .first()
        .is_some_and(|s| s.instruction.starts_with("出发") || s.instruction.starts_with("Depart"));
    let has_arrive = steps
        .last()
        .is_some_and(|s| s.instruction.starts_with("到达") || s.instruction.starts_with("Arrive"));

    if !has_depart {
        // 合成步骤只做边界标记，里程耗时归入中间步骤；列表为空时由出发步骤承载全程
        let (distance, duration) = if steps.is_empty() {
            (estimate.distance_meters, estimate.duration_seconds)
        } else {
            (0.0, 0)
        };
        steps.insert(
            0,
            RouteStep {
                instruction: "出发".to_string(),
                distance_meters: distance,
                duration_seconds: duration,
            },
        );
    }
    if !has_arrive {
        steps.push(RouteStep {
            instruction: "到达目的地".to_string(),
            distance_meters: 0.0,
            duration_seconds: 0,
        });
    }
    steps
}
