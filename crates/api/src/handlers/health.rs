use axum::Json;

/// GET /health
///
/// Liveness probe; always returns `{"status": "ok"}`.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
