//! The per-job execution routine, run on a worker.
//!
//! Captures every pipeline outcome locally and converts it into a
//! terminal status plus log lines; nothing escapes to crash the worker
//! pool.

use std::sync::Arc;
use std::time::Instant;

use meshport_pipeline::adapter::{PROGRESS_STARTING, STAGE_STARTING};
use meshport_pipeline::{ConvertContext, Converter, PipelineError};
use meshport_store::{JobStore, StoreError};

/// Execute one job end to end.
pub async fn run_job(store: &Arc<JobStore>, converter: &dyn Converter, id: &str) {
    let record = match store.get_job(id) {
        Ok(record) => record,
        Err(_) => {
            tracing::warn!(job_id = %id, "Job vanished before execution");
            return;
        }
    };

    // Raced with an immediate queued-cancel: nothing to run.
    if record.status.is_terminal() {
        return;
    }

    // A pending cancellation (typically a record resubmitted after a
    // restart) is finalized before any work starts. `request_cancel`
    // first, so a snapshot that persisted the flag without the matching
    // status transition still walks legal edges.
    if store.is_cancel_requested(id) {
        store.append_log(id, "Cancellation observed before start");
        match store.request_cancel(id) {
            Ok(current) if !current.status.is_terminal() => finalize_cancelled(store, id),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to finalize pending cancellation");
            }
        }
        return;
    }

    if let Err(e) = store.set_running(id, STAGE_STARTING, PROGRESS_STARTING) {
        tracing::error!(job_id = %id, error = %e, "Failed to mark job running");
        return;
    }
    store.append_log(id, "Starting conversion pipeline");

    let input = store.input_path(&record);
    let glb = store.glb_path(&record);
    let tmp_output = store.tmp_output_path(&record);
    let started = Instant::now();

    // The progress callback checks the cancellation predicate before
    // recording anything, so a cancel is observed at the earliest safe
    // point even mid-callback.
    let progress_store = Arc::clone(store);
    let progress_id = id.to_string();
    let progress = move |stage: &str, percent: u8| -> Result<(), PipelineError> {
        if progress_store.is_cancel_requested(&progress_id) {
            return Err(PipelineError::Cancelled);
        }
        match progress_store.set_running(&progress_id, stage, percent) {
            Ok(_) => {
                progress_store
                    .append_log(&progress_id, &format!("Stage={stage}, progress={percent}%"));
            }
            Err(e) => {
                tracing::error!(job_id = %progress_id, error = %e, "Failed to record progress");
            }
        }
        Ok(())
    };

    let cancel_store = Arc::clone(store);
    let cancel_id = id.to_string();
    let cancel = move || cancel_store.is_cancel_requested(&cancel_id);

    let result = converter
        .convert(ConvertContext {
            input: &input,
            glb: &glb,
            output: &tmp_output,
            progress: &progress,
            cancel: &cancel,
        })
        .await;

    match result {
        Ok(stats) => {
            if store.is_cancel_requested(id) {
                // The pipeline finished without observing a late flag;
                // the cancelling record cannot become done, so record
                // the cancellation and leave the artifact unfinalized.
                store.append_log(id, "Cancellation observed after pipeline completion");
                finalize_cancelled(store, id);
                return;
            }
            finalize_success(store, id, &record, &tmp_output, stats, started);
        }
        Err(e) if e.is_cancelled() => {
            store.append_log(id, "Cancelled by user");
            finalize_cancelled(store, id);
        }
        Err(e) => {
            let message = e.to_string();
            store.append_log(id, &format!("Failed: {message}"));
            if let Err(e) = store.set_failed(id, &message) {
                tracing::error!(job_id = %id, error = %e, "Failed to mark job failed");
            }
        }
    }
}

/// Move the temporary artifact into its final named location, merge the
/// elapsed time into the result metadata, and mark the job done.
fn finalize_success(
    store: &JobStore,
    id: &str,
    record: &meshport_core::JobRecord,
    tmp_output: &std::path::Path,
    stats: serde_json::Value,
    started: Instant,
) {
    let final_path = store.final_output_path(record);

    if final_path != tmp_output {
        // A prior attempt may have left a stale artifact in place.
        if final_path.exists() {
            let _ = std::fs::remove_file(&final_path);
        }
        if let Err(e) = std::fs::rename(tmp_output, &final_path) {
            let message = format!("Failed to finalize output artifact: {e}");
            store.append_log(id, &message);
            if let Err(e) = store.set_failed(id, &message) {
                tracing::error!(job_id = %id, error = %e, "Failed to mark job failed");
            }
            return;
        }
    }

    let total_seconds = (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;

    let mut metadata = match stats {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            if !other.is_null() {
                map.insert("result".to_string(), other);
            }
            map
        }
    };
    metadata.insert("total_seconds".to_string(), serde_json::json!(total_seconds));

    let output_name = final_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model.usdz".to_string());

    store.append_log(
        id,
        &format!("Completed successfully: {output_name}; total_seconds={total_seconds}"),
    );

    match store.set_done(id, &output_name, serde_json::Value::Object(metadata)) {
        Ok(_) => {}
        // A cancel can land between the flag check and this write; the
        // record is then `cancelling` and must finalize as cancelled.
        Err(StoreError::InvalidTransition { .. }) if store.is_cancel_requested(id) => {
            finalize_cancelled(store, id);
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to mark job done");
        }
    }
}

fn finalize_cancelled(store: &JobStore, id: &str) {
    if let Err(e) = store.set_cancelled(id, "Cancelled by user") {
        tracing::error!(job_id = %id, error = %e, "Failed to mark job cancelled");
    }
}
