//! Liveness and readiness endpoints used by the deploy environment's probes.

use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::store::Store;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[get("/health/live")]
pub fn live_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string() })
}

#[get("/health/ready")]
pub async fn ready_health(store: &State<Store>) -> Result<Json<HealthResponse>, ApiError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(store.pool())
        .await
        .map_err(|err| ApiError::InternalError(format!("readiness check failed: {err}")))?;

    Ok(Json(HealthResponse { status: "ok".to_string() }))
}
