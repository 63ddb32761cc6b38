//! Route tree assembly.
//!
//! `/health` is mounted at the root; everything else lives under `/api`.

use axum::routing::get;
use axum::Router;

use crate::handlers::diagnostics;
use crate::state::AppState;

pub mod health;
pub mod jobs;

/// Routes mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .route("/diagnostics", get(diagnostics::get_diagnostics))
}
