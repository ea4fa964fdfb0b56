use axum::{http::StatusCode, response::IntoResponse};

use crate::utils::success_to_api_response;

pub mod eta;
pub mod nearby;
pub mod presence;

pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        success_to_api_response(serde_json::json!({ "status": "ok" })),
    )
}
