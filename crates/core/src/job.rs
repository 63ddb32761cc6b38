//! The job record, the sole persisted entity of the service.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::JobStatus;

/// Maximum length of a stored error message. Longer pipeline errors are
/// truncated so snapshots stay small; the full text goes to the job log.
pub const MAX_ERROR_LEN: usize = 1200;

/// One conversion request and its full lifecycle state.
///
/// `work_dir` is derived from the job root at load time and never
/// serialized; snapshots must not pin absolute paths, and API responses
/// must not leak them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    /// 0–100, clamped. Monotone within a single run's stage sequence.
    pub progress: u8,
    /// Free-text label of the current pipeline step, for observability.
    pub stage: String,
    /// Human-readable failure/cancellation reason; terminal states only.
    pub error: Option<String>,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    /// Exclusively-owned scratch directory holding the snapshot, the log
    /// file, and all conversion artifacts.
    #[serde(skip)]
    pub work_dir: PathBuf,
    /// Open result payload (conversion statistics) set on success.
    pub metadata: serde_json::Value,
    /// Monotone: once true, never reset.
    pub cancel_requested: bool,
}

impl JobRecord {
    /// A fresh `queued` record with both timestamps set to `now`.
    pub fn new(id: String, now: DateTime<Utc>, work_dir: PathBuf) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            status: JobStatus::Queued,
            progress: 0,
            stage: "queued".to_string(),
            error: None,
            input_name: None,
            output_name: None,
            work_dir,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            cancel_requested: false,
        }
    }
}

/// Partial-field update applied atomically by the store.
///
/// `error` is doubly optional: `None` leaves the field alone,
/// `Some(None)` clears it, `Some(Some(_))` sets it.
#[derive(Debug, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub stage: Option<String>,
    pub error: Option<Option<String>>,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Clamp a reported progress value into the 0–100 range.
pub fn clamp_progress(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Truncate an error message to [`MAX_ERROR_LEN`], respecting char
/// boundaries.
pub fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
