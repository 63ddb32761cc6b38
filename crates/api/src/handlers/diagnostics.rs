use axum::extract::State;
use axum::Json;
use meshport_pipeline::diagnostics::{probe_tools, Diagnostics};

use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/diagnostics
///
/// Probe the external conversion tools and report availability and
/// versions. Probe failures land in the report, never in the status
/// code.
pub async fn get_diagnostics(State(state): State<AppState>) -> Json<DataResponse<Diagnostics>> {
    let report = probe_tools(&state.tools).await;
    Json(DataResponse { data: report })
}
