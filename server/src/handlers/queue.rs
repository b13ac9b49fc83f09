use axum::extract::State;
use axum::response::Response;

use crate::routes::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

/// `POST /process-queue`: runs one outbox batch now and reports the counts.
pub async fn process_queue(State(state): State<AppState>) -> AppResult<Response> {
    let summary = state.outbox.process_batch().await?;
    Ok(success(summary, "Notification queue processed"))
}
