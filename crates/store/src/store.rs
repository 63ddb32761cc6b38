//! Filesystem-backed job store.
//!
//! Layout, per job, under `<base>/jobs/<job-id>/`:
//!
//! ```text
//! job.json          write-through snapshot of the record
//! job.log           append-only, ISO-8601-prefixed lines
//! <id>_<name>.ifc   uploaded input
//! model.glb         intermediate artifact
//! model.usdz        temporary output, renamed to <stem>.usdz on success
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use meshport_core::job::clamp_progress;
use meshport_core::{naming, JobRecord, JobStatus, JobUpdate};
use serde::Deserialize;

use crate::error::StoreError;
use crate::repository::JobRepository;

/// Snapshot filename inside each work directory.
pub const SNAPSHOT_FILE: &str = "job.json";

/// Staging name used to make snapshot writes atomic (write + rename).
const SNAPSHOT_TMP_FILE: &str = "job.json.tmp";

/// Log filename inside each work directory.
pub const LOG_FILE: &str = "job.log";

/// Intermediate GLB artifact name.
pub const GLB_FILE: &str = "model.glb";

/// Temporary USDZ artifact name, renamed on successful completion.
pub const TMP_USDZ_FILE: &str = "model.usdz";

/// Durable, lock-protected repository of job records.
///
/// One mutex guards both the in-memory map and all persistence I/O, so
/// every public operation observes and produces a consistent snapshot.
/// Lock hold time is bounded by one file write.
pub struct JobStore {
    jobs_dir: PathBuf,
    inner: Mutex<HashMap<String, JobRecord>>,
}

/// Read-side snapshot shape. Deliberately lenient: `status` stays a raw
/// string here so an unknown tag degrades to the inference rule instead
/// of failing the whole record.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: i64,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    input_name: Option<String>,
    #[serde(default)]
    output_name: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    cancel_requested: bool,
}

impl JobStore {
    /// Open (or create) a store rooted at `<base_dir>/jobs`.
    ///
    /// Does not load existing snapshots; call [`JobStore::load_existing`]
    /// once at startup.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let jobs_dir = base_dir.as_ref().join("jobs");
        fs::create_dir_all(&jobs_dir)?;
        Ok(Self {
            jobs_dir,
            inner: Mutex::new(HashMap::new()),
        })
    }

    /// The jobs root directory.
    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    /// Scan the jobs root and restore every parseable snapshot.
    ///
    /// A malformed `job.json` is logged and skipped; it never aborts the
    /// load. Returns the number of restored records.
    pub fn load_existing(&self) -> usize {
        let entries = match fs::read_dir(&self.jobs_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "Failed to scan jobs root");
                return 0;
            }
        };

        let mut guard = self.locked();
        let mut restored = 0;

        for entry in entries.flatten() {
            let work_dir = entry.path();
            if !work_dir.is_dir() {
                continue;
            }
            let snapshot_path = work_dir.join(SNAPSHOT_FILE);
            if !snapshot_path.exists() {
                continue;
            }

            match Self::read_snapshot(&snapshot_path, &work_dir) {
                Ok(record) => {
                    guard.insert(record.id.clone(), record);
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %snapshot_path.display(),
                        error = %e,
                        "Skipping corrupt job snapshot",
                    );
                }
            }
        }

        restored
    }

    /// Non-terminal records that should be resubmitted after a restart.
    ///
    /// No workers survive a process restart, so stale `running`/
    /// `cancelling` records with no pending cancellation are reclassified
    /// to `queued` and persisted. Records with `cancel_requested` set are
    /// returned as-is: they are resubmitted so the execution routine
    /// observes the flag immediately and finalizes the cancellation.
    /// Ordered oldest-first by `updated_at`.
    pub fn list_pending_for_resume(&self) -> Vec<JobRecord> {
        let mut guard = self.locked();

        let ids: Vec<String> = guard
            .values()
            .filter(|record| !record.status.is_terminal())
            .map(|record| record.id.clone())
            .collect();

        let mut pending = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(record) = guard.get_mut(&id) else {
                continue;
            };
            if !record.cancel_requested
                && matches!(record.status, JobStatus::Running | JobStatus::Cancelling)
            {
                record.status = JobStatus::Queued;
                record.stage = "queued".to_string();
                record.error = None;
                record.updated_at = Utc::now();
                if let Err(e) = Self::write_snapshot(record) {
                    tracing::warn!(job_id = %id, error = %e, "Failed to persist resume reclassification");
                }
            }
            pending.push(record.clone());
        }

        pending.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        pending
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Allocate a new `queued` job with its own work directory.
    pub fn create_job(&self) -> Result<JobRecord, StoreError> {
        let mut guard = self.locked();

        let id = uuid::Uuid::new_v4().to_string();
        let work_dir = self.jobs_dir.join(&id);
        if let Err(e) = fs::create_dir(&work_dir) {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                return Err(StoreError::DirectoryConflict(id));
            }
            return Err(e.into());
        }

        let record = JobRecord::new(id.clone(), Utc::now(), work_dir);
        Self::write_snapshot(&record)?;
        guard.insert(id, record.clone());
        Ok(record)
    }

    /// Fetch one record by id.
    pub fn get_job(&self, id: &str) -> Result<JobRecord, StoreError> {
        self.locked()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Records ordered by `updated_at` descending, capped at `limit`
    /// (floor 1).
    pub fn list_jobs(&self, limit: usize) -> Vec<JobRecord> {
        let guard = self.locked();
        let mut jobs: Vec<JobRecord> = guard.values().cloned().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(limit.max(1));
        jobs
    }

    /// Apply a partial update atomically, bump `updated_at`, and persist.
    pub fn update_job(&self, id: &str, update: JobUpdate) -> Result<JobRecord, StoreError> {
        let mut guard = self.locked();
        let record = Self::get_mut(&mut guard, id)?;
        Self::apply_update(record, update)?;
        record.updated_at = Utc::now();
        Self::write_snapshot(record)?;
        Ok(record.clone())
    }

    /// Remove a record and its work directory (path-safety checked).
    pub fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.locked();
        let record = guard
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Err(e) = self.remove_job_files(&record) {
            tracing::warn!(job_id = %id, error = %e, "Failed to delete job work directory");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Status transitions
    // -----------------------------------------------------------------------

    /// Record pipeline progress.
    ///
    /// Moves a `queued` record to `running`; a record already `running`
    /// or `cancelling` keeps its status and only the stage/progress
    /// fields move (a pending cancellation must not be undone by a
    /// late progress report).
    pub fn set_running(
        &self,
        id: &str,
        stage: &str,
        progress: u8,
    ) -> Result<JobRecord, StoreError> {
        let mut guard = self.locked();
        let record = Self::get_mut(&mut guard, id)?;

        match record.status {
            JobStatus::Queued => record.status = JobStatus::Running,
            JobStatus::Running | JobStatus::Cancelling => {}
            terminal => {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: terminal,
                    to: JobStatus::Running,
                });
            }
        }

        record.stage = stage.to_string();
        record.progress = clamp_progress(progress as i64);
        record.updated_at = Utc::now();
        Self::write_snapshot(record)?;
        Ok(record.clone())
    }

    /// Terminal success: `progress = 100`, result metadata and the final
    /// artifact name recorded.
    pub fn set_done(
        &self,
        id: &str,
        output_name: &str,
        metadata: serde_json::Value,
    ) -> Result<JobRecord, StoreError> {
        self.update_job(
            id,
            JobUpdate {
                status: Some(JobStatus::Done),
                stage: Some("completed".to_string()),
                progress: Some(100),
                output_name: Some(output_name.to_string()),
                metadata: Some(metadata),
                ..JobUpdate::default()
            },
        )
    }

    /// Terminal failure with a truncated error message.
    pub fn set_failed(&self, id: &str, error: &str) -> Result<JobRecord, StoreError> {
        self.update_job(
            id,
            JobUpdate {
                status: Some(JobStatus::Failed),
                stage: Some("failed".to_string()),
                progress: Some(100),
                error: Some(Some(meshport_core::job::truncate_error(error))),
                ..JobUpdate::default()
            },
        )
    }

    /// Terminal cancellation.
    pub fn set_cancelled(&self, id: &str, reason: &str) -> Result<JobRecord, StoreError> {
        self.update_job(
            id,
            JobUpdate {
                status: Some(JobStatus::Cancelled),
                stage: Some("cancelled".to_string()),
                progress: Some(100),
                error: Some(Some(reason.to_string())),
                ..JobUpdate::default()
            },
        )
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Request cancellation of a job.
    ///
    /// Sets the monotone `cancel_requested` flag and performs the
    /// status-dependent transition: `queued` jobs finalize to `cancelled`
    /// immediately (no pipeline code is running to observe the flag),
    /// `running` jobs move to `cancelling` and keep executing until the
    /// pipeline polls the flag. Calling this on a terminal job is a
    /// no-op returning the record unchanged; repeated calls are
    /// idempotent.
    pub fn request_cancel(&self, id: &str) -> Result<JobRecord, StoreError> {
        let mut guard = self.locked();
        let record = Self::get_mut(&mut guard, id)?;

        if record.status.is_terminal() {
            return Ok(record.clone());
        }

        record.cancel_requested = true;
        match record.status {
            JobStatus::Queued => {
                record.status = JobStatus::Cancelled;
                record.stage = "cancelled".to_string();
                record.progress = 100;
                record.error = Some("Cancelled by user".to_string());
            }
            JobStatus::Running => {
                record.status = JobStatus::Cancelling;
                record.stage = "cancelling".to_string();
                record.error = Some("Cancellation requested".to_string());
            }
            // Already cancelling (or raced past the terminal check above):
            // nothing further to transition.
            _ => {}
        }
        record.updated_at = Utc::now();
        Self::write_snapshot(record)?;
        Ok(record.clone())
    }

    /// Cheap, lock-bounded read of the cancellation flag.
    ///
    /// Polled from inside running pipelines; an unknown id reads `false`.
    pub fn is_cancel_requested(&self, id: &str) -> bool {
        self.locked()
            .get(id)
            .map(|record| record.cancel_requested)
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    /// Append a timestamped line to the job's log file.
    ///
    /// A failed log write is never fatal to the caller.
    pub fn append_log(&self, id: &str, message: &str) {
        let guard = self.locked();
        let Some(record) = guard.get(id) else {
            return;
        };
        let log_path = record.work_dir.join(LOG_FILE);
        let line = format!("[{}] {}\n", Utc::now().to_rfc3339(), message);
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(job_id = %id, error = %e, "Failed to append job log line");
        }
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Delete every terminal record whose `updated_at` is older than
    /// `now - retention`, removing its work directory. Returns the number
    /// of records removed from the registry.
    ///
    /// Per-directory deletion failures are logged and skipped; the sweep
    /// continues with the next candidate.
    pub fn delete_expired(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut guard = self.locked();

        let expired: Vec<String> = guard
            .values()
            .filter(|record| record.status.is_terminal() && record.updated_at < cutoff)
            .map(|record| record.id.clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            if let Some(record) = guard.remove(&id) {
                if let Err(e) = self.remove_job_files(&record) {
                    tracing::warn!(job_id = %id, error = %e, "Retention: failed to delete work directory");
                }
                removed += 1;
            }
        }
        removed
    }

    /// Remove a job's work directory.
    ///
    /// Deletion is refused unless the resolved directory is a strict
    /// descendant of the jobs root; a tampered or corrupt `work_dir`
    /// must never let the sweeper reach outside its own tree.
    fn remove_job_files(&self, record: &JobRecord) -> std::io::Result<()> {
        if !record.work_dir.exists() {
            return Ok(());
        }

        let jobs_root = self.jobs_dir.canonicalize()?;
        let work_dir = record.work_dir.canonicalize()?;

        if work_dir == jobs_root || !work_dir.starts_with(&jobs_root) {
            tracing::warn!(
                job_id = %record.id,
                work_dir = %work_dir.display(),
                "Refusing to delete work directory outside the jobs root",
            );
            return Ok(());
        }

        fs::remove_dir_all(&work_dir)
    }

    // -----------------------------------------------------------------------
    // Path derivation
    // -----------------------------------------------------------------------

    /// On-disk path of the uploaded input file.
    pub fn input_path(&self, record: &JobRecord) -> PathBuf {
        record.work_dir.join(naming::input_file_name(
            &record.id,
            record.input_name.as_deref(),
        ))
    }

    /// Intermediate GLB artifact path.
    pub fn glb_path(&self, record: &JobRecord) -> PathBuf {
        record.work_dir.join(GLB_FILE)
    }

    /// Temporary USDZ output path; renamed into place on success.
    pub fn tmp_output_path(&self, record: &JobRecord) -> PathBuf {
        record.work_dir.join(TMP_USDZ_FILE)
    }

    /// Final artifact path (the recorded `output_name`, or the derived
    /// one when the job has not completed yet).
    pub fn final_output_path(&self, record: &JobRecord) -> PathBuf {
        let name = record
            .output_name
            .clone()
            .unwrap_or_else(|| naming::output_file_name(record.input_name.as_deref()));
        record.work_dir.join(name)
    }

    /// The job's log file path.
    pub fn log_path(&self, record: &JobRecord) -> PathBuf {
        record.work_dir.join(LOG_FILE)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn locked(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        // A panic while holding the lock leaves write-through state that
        // is still internally consistent, so recover instead of poisoning
        // every later request.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get_mut<'a>(
        guard: &'a mut MutexGuard<'_, HashMap<String, JobRecord>>,
        id: &str,
    ) -> Result<&'a mut JobRecord, StoreError> {
        guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Validate and apply a partial update in memory.
    ///
    /// Terminal records reject every mutation; a requested status change
    /// must be an edge of the transition table.
    fn apply_update(record: &mut JobRecord, update: JobUpdate) -> Result<(), StoreError> {
        if record.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: record.id.clone(),
                from: record.status,
                to: update.status.unwrap_or(record.status),
            });
        }

        if let Some(next) = update.status {
            if next != record.status && !record.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    id: record.id.clone(),
                    from: record.status,
                    to: next,
                });
            }
            record.status = next;
        }
        if let Some(progress) = update.progress {
            record.progress = clamp_progress(progress as i64);
        }
        if let Some(stage) = update.stage {
            record.stage = stage;
        }
        if let Some(error) = update.error {
            record.error = error;
        }
        if let Some(input_name) = update.input_name {
            record.input_name = Some(input_name);
        }
        if let Some(output_name) = update.output_name {
            record.output_name = Some(output_name);
        }
        if let Some(metadata) = update.metadata {
            record.metadata = metadata;
        }
        Ok(())
    }

    /// Write the snapshot atomically (temp file + rename) so a crash
    /// mid-write never leaves a truncated `job.json`.
    fn write_snapshot(record: &JobRecord) -> Result<(), StoreError> {
        let tmp = record.work_dir.join(SNAPSHOT_TMP_FILE);
        let path = record.work_dir.join(SNAPSHOT_FILE);
        let bytes = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Parse one snapshot, applying the inferred-status rule for tags
    /// outside the known set: when the expected output artifact exists
    /// the job is treated as `done`, otherwise `queued`.
    fn read_snapshot(path: &Path, work_dir: &Path) -> Result<JobRecord, StoreError> {
        let bytes = fs::read(path)?;
        let raw: RawSnapshot = serde_json::from_slice(&bytes)?;

        let status = JobStatus::parse(&raw.status).unwrap_or_else(|| {
            let output_exists = raw
                .output_name
                .as_deref()
                .map(|name| work_dir.join(name).exists())
                .unwrap_or(false);
            let inferred = if output_exists {
                JobStatus::Done
            } else {
                JobStatus::Queued
            };
            tracing::warn!(
                job_id = %raw.id,
                raw_status = %raw.status,
                inferred = %inferred,
                "Unknown job status in snapshot, inferring from output artifact",
            );
            inferred
        });

        Ok(JobRecord {
            id: raw.id,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            status,
            progress: clamp_progress(raw.progress),
            stage: raw.stage.unwrap_or_else(|| status.as_str().to_string()),
            error: raw.error,
            input_name: raw.input_name,
            output_name: raw.output_name,
            work_dir: work_dir.to_path_buf(),
            metadata: raw
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            cancel_requested: raw.cancel_requested,
        })
    }
}

impl JobRepository for JobStore {
    fn create(&self) -> Result<JobRecord, StoreError> {
        self.create_job()
    }

    fn get(&self, id: &str) -> Result<JobRecord, StoreError> {
        self.get_job(id)
    }

    fn list(&self, limit: usize) -> Vec<JobRecord> {
        self.list_jobs(limit)
    }

    fn update(&self, id: &str, update: JobUpdate) -> Result<JobRecord, StoreError> {
        self.update_job(id, update)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.delete_job(id)
    }
}
