use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;

use crate::geo::Coordinate;

use super::types::{
    PROVIDER_MATRIX_V2, PROVIDER_ROUTES_V2, RouteError, RouteEstimate, RouteStep, TravelMode,
};

const ROUTES_FIELD_MASK: &str =
    "routes.duration,routes.staticDuration,routes.distanceMeters,routes.polyline.encodedPolyline,routes.legs.steps";
const MATRIX_FIELD_MASK: &str = "originIndex,destinationIndex,duration,distanceMeters,condition";

/// 服务商不同接口的耗时字段既有 "123s" 字符串也有纯数字，统一在这里解析
pub fn parse_duration(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::String(s) => s.trim_end_matches('s').parse::<f64>().ok().map(|v| v.round() as i64),
        Value::Number(n) => n.as_f64().map(|v| v.round() as i64),
        _ => None,
    }
}

/// 主路线接口返回的完整结果，matrix 接口只有总览没有路径
#[derive(Debug, Clone)]
pub struct ProviderRoute {
    pub estimate: RouteEstimate,
    pub steps: Vec<RouteStep>,
    pub polyline: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    routes: Option<Vec<RouteDto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteDto {
    duration: Option<Value>,
    static_duration: Option<Value>,
    distance_meters: Option<f64>,
    polyline: Option<PolylineDto>,
    legs: Option<Vec<LegDto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolylineDto {
    encoded_polyline: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegDto {
    steps: Option<Vec<StepDto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepDto {
    navigation_instruction: Option<NavigationDto>,
    distance_meters: Option<f64>,
    static_duration: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NavigationDto {
    instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixElementDto {
    origin_index: Option<usize>,
    destination_index: Option<usize>,
    condition: Option<String>,
    duration: Option<Value>,
    distance_meters: Option<f64>,
}

fn lat_lng_json(c: Coordinate) -> Value {
    serde_json::json!({ "location": { "latLng": { "latitude": c.lat, "longitude": c.lng } } })
}

/// 外部路线服务商的 HTTP 适配器（主接口 + 矩阵接口）
#[derive(Clone)]
pub struct ProviderClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl ProviderClient {
    pub fn new(http: HttpClient, base_url: String, api_key: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    fn map_transport_error(e: reqwest::Error) -> RouteError {
        if e.is_timeout() {
            RouteError::Transport("timeout".to_string())
        } else {
            RouteError::Transport(e.to_string())
        }
    }

    /// 主层：单起点单终点的完整路线
    pub async fn compute_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> Result<ProviderRoute, RouteError> {
        let mut body = serde_json::json!({
            "origin": lat_lng_json(origin),
            "destination": lat_lng_json(destination),
            "travelMode": mode.as_str(),
        });
        if mode.supports_traffic() {
            body["routingPreference"] = Value::String("TRAFFIC_AWARE".to_string());
        }

        let resp = self
            .http
            .post(format!("{}/directions/v2:computeRoutes", self.base_url))
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", ROUTES_FIELD_MASK)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RouteError::ProviderStatus(status.as_u16()));
        }

        let parsed: RoutesResponse = resp
            .json()
            .await
            .map_err(|e| RouteError::MalformedResponse(e.to_string()))?;

        let route = parsed
            .routes
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| RouteError::MalformedResponse("empty routes array".to_string()))?;

        // TRAFFIC_AWARE 下 duration 含路况，staticDuration 才是静态耗时；
        // 两者并列返回，由调用方自行取舍
        let static_duration =
            parse_duration(route.static_duration.as_ref()).or(parse_duration(route.duration.as_ref()));
        let duration_seconds = static_duration
            .ok_or_else(|| RouteError::MalformedResponse("missing duration".to_string()))?;
        let duration_in_traffic_seconds = if mode.supports_traffic() {
            parse_duration(route.duration.as_ref()).filter(|_| route.static_duration.is_some())
        } else {
            None
        };
        let distance_meters = route
            .distance_meters
            .ok_or_else(|| RouteError::MalformedResponse("missing distanceMeters".to_string()))?;

        let steps = route
            .legs
            .unwrap_or_default()
            .into_iter()
            .flat_map(|leg| leg.steps.unwrap_or_default())
            .map(|s| RouteStep {
                instruction: s
                    .navigation_instruction
                    .and_then(|n| n.instructions)
                    .unwrap_or_else(|| "继续前行".to_string()),
                distance_meters: s.distance_meters.unwrap_or(0.0),
                duration_seconds: parse_duration(s.static_duration.as_ref()).unwrap_or(0),
            })
            .collect();

        Ok(ProviderRoute {
            estimate: RouteEstimate {
                duration_seconds,
                distance_meters,
                provider: PROVIDER_ROUTES_V2.to_string(),
                duration_in_traffic_seconds,
            },
            steps,
            polyline: route.polyline.and_then(|p| p.encoded_polyline),
        })
    }

    /// 次层：一对多矩阵查询，牺牲路径细节换批量吞吐
    pub async fn compute_matrix(
        &self,
        origin: Coordinate,
        destinations: &[Coordinate],
        mode: TravelMode,
    ) -> Result<Vec<Option<RouteEstimate>>, RouteError> {
        if !mode.supports_matrix() {
            return Err(RouteError::UnsupportedMode(mode));
        }

        let body = serde_json::json!({
            "origins": [{ "waypoint": lat_lng_json(origin) }],
            "destinations": destinations
                .iter()
                .map(|d| serde_json::json!({ "waypoint": lat_lng_json(*d) }))
                .collect::<Vec<_>>(),
            "travelMode": mode.as_str(),
        });

        let resp = self
            .http
            .post(format!(
                "{}/distanceMatrix/v2:computeRouteMatrix",
                self.base_url
            ))
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", MATRIX_FIELD_MASK)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RouteError::ProviderStatus(status.as_u16()));
        }

        let elements: Vec<MatrixElementDto> = resp
            .json()
            .await
            .map_err(|e| RouteError::MalformedResponse(e.to_string()))?;

        // 按 destinationIndex 回填，缺失或不可达的目的地保持 None
        let mut results: Vec<Option<RouteEstimate>> = vec![None; destinations.len()];
        for element in elements {
            if element.origin_index.unwrap_or(0) != 0 {
                continue;
            }
            let Some(index) = element.destination_index else {
                continue;
            };
            if index >= results.len() {
                continue;
            }
            if element.condition.as_deref() != Some("ROUTE_EXISTS") {
                continue;
            }
            let (Some(duration_seconds), Some(distance_meters)) = (
                parse_duration(element.duration.as_ref()),
                element.distance_meters,
            ) else {
                continue;
            };
            results[index] = Some(RouteEstimate {
                duration_seconds,
                distance_meters,
                provider: PROVIDER_MATRIX_V2.to_string(),
                duration_in_traffic_seconds: None,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_suffixed_strings() {
        assert_eq!(parse_duration(Some(&Value::String("123s".into()))), Some(123));
        assert_eq!(parse_duration(Some(&Value::String("89.6s".into()))), Some(90));
    }

    #[test]
    fn parse_duration_accepts_bare_numbers() {
        assert_eq!(parse_duration(Some(&serde_json::json!(123))), Some(123));
        assert_eq!(parse_duration(Some(&serde_json::json!(89.6))), Some(90));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(None), None);
        assert_eq!(parse_duration(Some(&Value::Null)), None);
        assert_eq!(parse_duration(Some(&Value::String("abc".into()))), None);
        assert_eq!(parse_duration(Some(&serde_json::json!({"seconds": 1}))), None);
    }

    #[tokio::test]
    async fn matrix_rejects_transit_before_any_network_call() {
        let client = ProviderClient::new(
            HttpClient::new(),
            "http://127.0.0.1:9".to_string(),
            "test-key".to_string(),
        );
        let result = client
            .compute_matrix(
                Coordinate::new(51.5074, -0.1278),
                &[Coordinate::new(51.5099, -0.1181)],
                TravelMode::Transit,
            )
            .await;
        assert_eq!(result.unwrap_err(), RouteError::UnsupportedMode(TravelMode::Transit));
    }

    #[test]
    fn matrix_elements_fill_by_destination_index() {
        let raw = serde_json::json!([
            { "originIndex": 0, "destinationIndex": 1, "condition": "ROUTE_EXISTS",
              "duration": "300s", "distanceMeters": 1500.0 },
            { "originIndex": 0, "destinationIndex": 0, "condition": "ROUTE_NOT_FOUND" }
        ]);
        let elements: Vec<MatrixElementDto> = serde_json::from_value(raw).unwrap();

        let mut results: Vec<Option<RouteEstimate>> = vec![None; 2];
        for e in elements {
            if e.condition.as_deref() != Some("ROUTE_EXISTS") {
                continue;
            }
            let idx = e.destination_index.unwrap();
            results[idx] = Some(RouteEstimate {
                duration_seconds: parse_duration(e.duration.as_ref()).unwrap(),
                distance_meters: e.distance_meters.unwrap(),
                provider: PROVIDER_MATRIX_V2.to_string(),
                duration_in_traffic_seconds: None,
            });
        }

        assert!(results[0].is_none());
        let hit = results[1].as_ref().unwrap();
        assert_eq!(hit.duration_seconds, 300);
        assert_eq!(hit.provider, PROVIDER_MATRIX_V2);
    }
}
