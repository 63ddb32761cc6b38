//! Converter contract consumed by the execution engine.
//!
//! A converter receives the resolved artifact paths, a progress callback,
//! and a cancellation predicate. It must poll the predicate at every safe
//! resumption point and must never leave a partially written output file
//! that could be mistaken for a complete one.

use std::path::Path;

use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Stage labels and percent schedule
// ---------------------------------------------------------------------------

/// Stage reported by the engine before the converter takes over.
pub const STAGE_STARTING: &str = "starting";
/// IFC → GLB geometry conversion stage.
pub const STAGE_IFC_TO_GLB: &str = "ifc_to_glb";
/// GLB → USDZ packaging stage.
pub const STAGE_GLB_TO_USDZ: &str = "glb_to_usdz";
/// Reported once, at 100%, when the pipeline is finished.
pub const STAGE_COMPLETED: &str = "completed";

/// Progress reported with [`STAGE_STARTING`].
pub const PROGRESS_STARTING: u8 = 5;
/// Progress entering the IFC → GLB stage.
pub const PROGRESS_IFC_TO_GLB_BEGIN: u8 = 15;
/// Progress after the GLB artifact is verified.
pub const PROGRESS_IFC_TO_GLB_DONE: u8 = 55;
/// Progress entering the GLB → USDZ stage.
pub const PROGRESS_GLB_TO_USDZ_BEGIN: u8 = 70;
/// Progress after the USDZ artifact is verified.
pub const PROGRESS_GLB_TO_USDZ_DONE: u8 = 95;

// ---------------------------------------------------------------------------
// Callback types
// ---------------------------------------------------------------------------

/// Progress callback: `(stage, percent)`.
///
/// The engine's implementation evaluates the cancellation predicate
/// before recording anything and returns [`PipelineError::Cancelled`]
/// when it fires, so cancellation is observed at the earliest safe point
/// even mid-callback. Converters propagate that error with `?`.
pub type ProgressFn = dyn Fn(&str, u8) -> Result<(), PipelineError> + Send + Sync;

/// Cancellation predicate. Cheap and safe to call frequently.
pub type CancelFn = dyn Fn() -> bool + Send + Sync;

/// Everything a converter needs for one job.
pub struct ConvertContext<'a> {
    /// Uploaded IFC source file.
    pub input: &'a Path,
    /// Intermediate GLB artifact location.
    pub glb: &'a Path,
    /// Temporary USDZ destination; the engine renames it into its final
    /// location after a successful run.
    pub output: &'a Path,
    pub progress: &'a ProgressFn,
    pub cancel: &'a CancelFn,
}

impl ConvertContext<'_> {
    /// Forward a `(stage, percent)` report through the engine.
    pub fn report(&self, stage: &str, percent: u8) -> Result<(), PipelineError> {
        (self.progress)(stage, percent)
    }

    /// Bail out with the distinguished cancellation error when the
    /// predicate fires.
    pub fn check_cancel(&self) -> Result<(), PipelineError> {
        if (self.cancel)() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A conversion pipeline implementation.
///
/// On success, returns a JSON stats payload (byte sizes, counts, ...);
/// the engine merges the total elapsed time into it before recording.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, ctx: ConvertContext<'_>) -> Result<serde_json::Value, PipelineError>;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The distinguished cancellation signal: maps to terminal
    /// `cancelled`, never `failed`.
    #[error("Cancelled by user")]
    Cancelled,

    /// The external tool exceeded its hard wall-clock bound and was
    /// killed.
    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: &'static str, seconds: u64 },

    /// The external tool exited non-zero or could not be spawned.
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: &'static str, detail: String },

    /// The external tool is not installed or not reachable.
    #[error("{tool} not found: {hint}")]
    ToolUnavailable { tool: &'static str, hint: String },

    /// The tool reported success but its output artifact is missing or
    /// empty.
    #[error("{0}")]
    MissingOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether this error is the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context<'a>(
        paths: &'a (PathBuf, PathBuf, PathBuf),
        progress: &'a ProgressFn,
        cancel: &'a CancelFn,
    ) -> ConvertContext<'a> {
        ConvertContext {
            input: &paths.0,
            glb: &paths.1,
            output: &paths.2,
            progress,
            cancel,
        }
    }

    #[test]
    fn check_cancel_passes_when_predicate_is_false() {
        let paths = (PathBuf::new(), PathBuf::new(), PathBuf::new());
        let progress = |_: &str, _: u8| Ok(());
        let cancel = || false;
        let ctx = context(&paths, &progress, &cancel);
        assert!(ctx.check_cancel().is_ok());
    }

    #[test]
    fn check_cancel_raises_the_distinguished_signal() {
        let paths = (PathBuf::new(), PathBuf::new(), PathBuf::new());
        let progress = |_: &str, _: u8| Ok(());
        let cancel = || true;
        let ctx = context(&paths, &progress, &cancel);
        let err = ctx.check_cancel().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn report_forwards_stage_and_percent() {
        use std::sync::{Arc, Mutex};
        let seen: Arc<Mutex<Vec<(String, u8)>>> = Arc::new(Mutex::new(Vec::new()));
        let progress = {
            let seen = Arc::clone(&seen);
            move |stage: &str, pct: u8| {
                seen.lock().unwrap().push((stage.to_string(), pct));
                Ok(())
            }
        };
        let cancel = || false;
        let paths = (PathBuf::new(), PathBuf::new(), PathBuf::new());
        let ctx = context(&paths, &progress, &cancel);

        ctx.report(STAGE_IFC_TO_GLB, PROGRESS_IFC_TO_GLB_BEGIN).unwrap();
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("ifc_to_glb".to_string(), 15)]
        );
    }

    #[test]
    fn only_cancelled_is_classified_as_cancellation() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(!PipelineError::Timeout { tool: "IfcConvert", seconds: 1 }.is_cancelled());
        assert!(!PipelineError::MissingOutput("x".into()).is_cancelled());
    }
}
