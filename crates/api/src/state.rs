use std::sync::Arc;

use meshport_pipeline::ToolConfig;

use crate::config::ServerConfig;
use crate::engine::Engine;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// The orchestration engine (job store + execution controller).
    pub engine: Arc<Engine>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// External tool configuration, used by the diagnostics endpoint.
    pub tools: Arc<ToolConfig>,
}
