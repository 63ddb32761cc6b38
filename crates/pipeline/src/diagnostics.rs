//! External tool availability probing.
//!
//! Reported over the API so an operator can tell a broken install from a
//! broken upload. Probes never fail the endpoint; every outcome lands in
//! the report.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::convert::{ToolConfig, IFCCONVERT, USDZCONVERT};
use crate::tools::run_tool;

/// Wall-clock bound for one `--version` probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// Probe result for one external tool.
#[derive(Debug, Serialize)]
pub struct ToolDiagnostic {
    pub ok: bool,
    pub path: Option<String>,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Full diagnostics report.
#[derive(Debug, Serialize)]
pub struct Diagnostics {
    pub ifcconvert: ToolDiagnostic,
    pub usdzconvert: ToolDiagnostic,
}

/// Probe both pipeline tools.
pub async fn probe_tools(config: &ToolConfig) -> Diagnostics {
    Diagnostics {
        ifcconvert: probe_one(config.resolve_ifcconvert(), IFCCONVERT).await,
        usdzconvert: probe_one(config.resolve_usdzconvert(), USDZCONVERT).await,
    }
}

async fn probe_one(resolved: Option<PathBuf>, tool: &'static str) -> ToolDiagnostic {
    let Some(path) = resolved else {
        return ToolDiagnostic {
            ok: false,
            path: None,
            version: None,
            error: Some(format!("{tool} not found in PATH")),
        };
    };

    let mut cmd = Command::new(&path);
    cmd.arg("--version");
    let cancel = || false;

    match run_tool(cmd, tool, PROBE_TIMEOUT, &cancel).await {
        Ok(output) => {
            let combined = if output.stdout.trim().is_empty() {
                output.stderr
            } else {
                output.stdout
            };
            let version = combined
                .lines()
                .next()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .unwrap_or("unknown")
                .to_string();
            ToolDiagnostic {
                ok: true,
                path: Some(path.display().to_string()),
                version: Some(version),
                error: None,
            }
        }
        Err(e) => ToolDiagnostic {
            ok: false,
            path: Some(path.display().to_string()),
            version: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_reports_missing_tool() {
        let diag = probe_one(None, IFCCONVERT).await;
        assert!(!diag.ok);
        assert_eq!(diag.error.as_deref(), Some("IfcConvert not found in PATH"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_reads_first_version_line() {
        // `sh --version` is not portable; fake a tool that prints one.
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("IfcConvert");
        std::fs::write(&tool, "#!/bin/sh\necho 'IfcOpenShell IfcConvert 0.8.0'\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let diag = probe_one(Some(tool), IFCCONVERT).await;
        assert!(diag.ok);
        assert_eq!(diag.version.as_deref(), Some("IfcOpenShell IfcConvert 0.8.0"));
    }
}
