//! Aggregate counters for dashboards and on-call tooling: dead letter queue
//! depth by status, quarantined-email reasons, and open incident count.

use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;

use crate::domain::{DlqStatus, QuarantineReason};
use crate::error::ApiError;
use crate::store::Store;

#[derive(Debug, Serialize)]
pub struct PipelineStats {
    pub open_incidents: i64,
    pub dead_letters_by_status: Vec<(DlqStatus, i64)>,
    pub quarantined_by_reason: Vec<(QuarantineReason, i64)>,
}

#[get("/stats")]
pub async fn pipeline_stats(store: &State<Store>) -> Result<Json<PipelineStats>, ApiError> {
    let open_incidents = store.count_open_incidents().await?;
    let dead_letters_by_status = store.count_dlq_by_status().await?;
    let quarantined_by_reason = store.count_quarantine_by_reason().await?;

    Ok(Json(PipelineStats {
        open_incidents,
        dead_letters_by_status,
        quarantined_by_reason,
    }))
}
