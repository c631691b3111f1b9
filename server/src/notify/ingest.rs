//! HTTP entry point for upstream change batches.

use axum::{extract::State, Json};
use serde::Deserialize;

use super::{BatchReport, ChangeRecord};
use crate::state::AppState;

/// Body of POST /api/changes.
#[derive(Debug, Deserialize)]
pub struct ChangeBatch {
    #[serde(default)]
    pub records: Vec<ChangeRecord>,
}

/// POST /api/changes -- notify subscribers of every entity touched by the batch.
/// Always answers 200: per-key failures are reported in the body, not as an error
/// status, so the upstream source does not redeliver the whole batch.
pub async fn ingest_changes(
    State(state): State<AppState>,
    Json(batch): Json<ChangeBatch>,
) -> Json<BatchReport> {
    let report = state.notifier.handle_batch(&batch.records).await;
    tracing::info!(
        records = batch.records.len(),
        events = report.events.len(),
        attempted = report.total_attempted(),
        "Change batch processed"
    );

    let failed = report.failed_keys();
    if !failed.is_empty() {
        tracing::warn!(failed = ?failed, "Change batch finished with failed keys");
    }

    Json(report)
}
