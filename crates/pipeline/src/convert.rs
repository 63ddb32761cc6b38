//! The external-tool conversion pipeline.
//!
//! IFC → GLB via IfcConvert, GLB → USDZ via usdzconvert. Each stage
//! verifies its artifact is non-empty before reporting progress, so a
//! half-written file is never trusted as a result.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::adapter::{
    ConvertContext, Converter, PipelineError, PROGRESS_GLB_TO_USDZ_BEGIN,
    PROGRESS_GLB_TO_USDZ_DONE, PROGRESS_IFC_TO_GLB_BEGIN, PROGRESS_IFC_TO_GLB_DONE,
    STAGE_COMPLETED, STAGE_GLB_TO_USDZ, STAGE_IFC_TO_GLB,
};
use crate::tools::{resolve_tool, run_tool, verify_output};

/// IFC → GLB geometry converter binary.
pub const IFCCONVERT: &str = "IfcConvert";

/// GLB → USDZ packaging binary.
pub const USDZCONVERT: &str = "usdzconvert";

/// Hard wall-clock bound for one tool invocation.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(1800);

/// External tool configuration.
///
/// | Env Var                      | Default                   |
/// |------------------------------|---------------------------|
/// | `MESHPORT_IFCCONVERT_PATH`   | search `PATH`             |
/// | `MESHPORT_USDZCONVERT_PATH`  | search `PATH`             |
/// | `MESHPORT_TOOL_TIMEOUT_SECS` | `1800`                    |
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Explicit IfcConvert location; wins over `PATH` when set.
    pub ifcconvert_path: Option<String>,
    /// Explicit usdzconvert location; wins over `PATH` when set.
    pub usdzconvert_path: Option<String>,
    /// Hard wall-clock bound per tool invocation, independent of
    /// cooperative cancellation.
    pub tool_timeout: Duration,
    /// Worker threads passed to IfcConvert.
    pub threads: usize,
}

impl ToolConfig {
    /// Load tool configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let tool_timeout = std::env::var("MESHPORT_TOOL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT);

        Self {
            ifcconvert_path: std::env::var("MESHPORT_IFCCONVERT_PATH").ok(),
            usdzconvert_path: std::env::var("MESHPORT_USDZCONVERT_PATH").ok(),
            tool_timeout,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }

    /// Resolved IfcConvert binary, if available.
    pub fn resolve_ifcconvert(&self) -> Option<PathBuf> {
        resolve_tool(self.ifcconvert_path.as_deref(), IFCCONVERT)
    }

    /// Resolved usdzconvert binary, if available.
    pub fn resolve_usdzconvert(&self) -> Option<PathBuf> {
        resolve_tool(self.usdzconvert_path.as_deref(), USDZCONVERT)
    }
}

/// [`Converter`] implementation backed by the external tools.
pub struct ToolConverter {
    config: ToolConfig,
}

impl ToolConverter {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Converter for ToolConverter {
    async fn convert(&self, ctx: ConvertContext<'_>) -> Result<serde_json::Value, PipelineError> {
        ctx.check_cancel()?;
        ctx.report(STAGE_IFC_TO_GLB, PROGRESS_IFC_TO_GLB_BEGIN)?;

        let ifcconvert =
            self.config
                .resolve_ifcconvert()
                .ok_or_else(|| PipelineError::ToolUnavailable {
                    tool: IFCCONVERT,
                    hint: "install IfcConvert on PATH or set MESHPORT_IFCCONVERT_PATH".to_string(),
                })?;

        let mut cmd = Command::new(&ifcconvert);
        cmd.arg(ctx.input)
            .arg(ctx.glb)
            .arg("--use-element-guids")
            .arg("--threads")
            .arg(self.config.threads.to_string());
        run_tool(cmd, IFCCONVERT, self.config.tool_timeout, ctx.cancel).await?;
        verify_output(ctx.glb, "GLB")?;
        ctx.report(STAGE_IFC_TO_GLB, PROGRESS_IFC_TO_GLB_DONE)?;

        ctx.report(STAGE_GLB_TO_USDZ, PROGRESS_GLB_TO_USDZ_BEGIN)?;

        let usdzconvert =
            self.config
                .resolve_usdzconvert()
                .ok_or_else(|| PipelineError::ToolUnavailable {
                    tool: USDZCONVERT,
                    hint: "install usdzconvert on PATH or set MESHPORT_USDZCONVERT_PATH"
                        .to_string(),
                })?;

        let mut cmd = Command::new(&usdzconvert);
        cmd.arg(ctx.glb).arg(ctx.output);
        run_tool(cmd, USDZCONVERT, self.config.tool_timeout, ctx.cancel).await?;
        ctx.check_cancel()?;
        verify_output(ctx.output, "USDZ")?;
        ctx.report(STAGE_GLB_TO_USDZ, PROGRESS_GLB_TO_USDZ_DONE)?;

        let stats = serde_json::json!({
            "glb_size_bytes": file_size(ctx.glb),
            "usdz_size_bytes": file_size(ctx.output),
        });
        ctx.report(STAGE_COMPLETED, 100)?;
        Ok(stats)
    }
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}
