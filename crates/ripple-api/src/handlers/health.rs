use axum::Json;
use chrono::Utc;

use ripple_types::api::HealthResponse;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Ripple API is running".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now(),
    })
}
