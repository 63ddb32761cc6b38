//! Shared harness for engine and API integration tests.
//!
//! Provides a scripted in-process converter so orchestration behaviour
//! can be driven deterministically, without the external tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use meshport_api::config::ServerConfig;
use meshport_api::engine::Engine;
use meshport_api::router::build_router;
use meshport_api::state::AppState;
use meshport_core::{JobRecord, JobStatus, JobUpdate};
use meshport_pipeline::{ConvertContext, Converter, PipelineError, ToolConfig};
use meshport_store::JobStore;
use tokio::sync::Semaphore;

/// What the scripted converter does after reporting its stages.
pub enum MockOutcome {
    Succeed,
    Fail(&'static str),
}

/// Scripted [`Converter`]: optionally blocks on a gate (one permit per
/// run), reports the stage schedule through the engine's callback,
/// then succeeds with a stub artifact or fails.
pub struct MockConverter {
    outcome: MockOutcome,
    gate: Option<Arc<Semaphore>>,
    /// Number of times `convert` was entered.
    pub calls: AtomicUsize,
}

impl MockConverter {
    pub fn succeeding() -> Self {
        Self {
            outcome: MockOutcome::Succeed,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(detail: &'static str) -> Self {
        Self {
            outcome: MockOutcome::Fail(detail),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A converter that waits for one gate permit before doing anything.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            outcome: MockOutcome::Succeed,
            gate: Some(gate),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Converter for MockConverter {
    async fn convert(&self, ctx: ConvertContext<'_>) -> Result<serde_json::Value, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| PipelineError::Cancelled)?;
            permit.forget();
        }

        ctx.report("ifc_to_glb", 55)?;
        ctx.report("glb_to_usdz", 95)?;

        match &self.outcome {
            MockOutcome::Succeed => {
                tokio::fs::write(ctx.output, b"stub-usdz").await?;
                ctx.report("completed", 100)?;
                Ok(serde_json::json!({ "mesh_count": 3 }))
            }
            MockOutcome::Fail(detail) => Err(PipelineError::ToolFailed {
                tool: "IfcConvert",
                detail: detail.to_string(),
            }),
        }
    }
}

/// One isolated engine over a temporary job root.
pub struct TestContext {
    pub dir: tempfile::TempDir,
    pub store: Arc<JobStore>,
    pub engine: Arc<Engine>,
    pub converter: Arc<MockConverter>,
}

/// Build an engine with the given worker count and converter.
pub fn test_engine(max_workers: usize, converter: MockConverter) -> TestContext {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JobStore::open(dir.path()).expect("open store"));
    store.load_existing();

    let converter = Arc::new(converter);
    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        Arc::clone(&converter) as Arc<dyn Converter>,
        max_workers,
    ));

    TestContext {
        dir,
        store,
        engine,
        converter,
    }
}

/// Create a job with an uploaded input file, the way the API layer does.
pub fn create_job_with_input(store: &JobStore, name: &str) -> JobRecord {
    let record = store.create_job().expect("create job");
    let record = store
        .update_job(
            &record.id,
            JobUpdate {
                input_name: Some(name.to_string()),
                ..JobUpdate::default()
            },
        )
        .expect("set input name");
    std::fs::write(store.input_path(&record), b"ISO-10303-21;").expect("write input");
    record
}

/// Poll until the predicate holds or five seconds pass.
pub async fn wait_for(
    store: &JobStore,
    id: &str,
    predicate: impl Fn(&JobRecord) -> bool,
) -> JobRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = store.get_job(id).expect("job exists");
        if predicate(&record) {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for job {id}, currently {}",
            record.status,
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the job reaches `status`.
pub async fn wait_for_status(store: &JobStore, id: &str, status: JobStatus) -> JobRecord {
    wait_for(store, id, |record| record.status == status).await
}

/// Test server configuration over the context's job root.
pub fn test_config(ctx: &TestContext, max_upload_mb: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        data_dir: ctx.dir.path().to_path_buf(),
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        retention_days: 7,
        max_workers: 1,
        max_upload_mb,
    }
}

/// Full application router over the context's engine, mirroring the
/// construction in `main.rs`.
pub fn build_test_app(ctx: &TestContext, max_upload_mb: usize) -> Router {
    let config = test_config(ctx, max_upload_mb);
    let state = AppState {
        engine: Arc::clone(&ctx.engine),
        config: Arc::new(config),
        // Overrides pointing nowhere, so diagnostics never probe host
        // tools from the test suite.
        tools: Arc::new(ToolConfig {
            ifcconvert_path: Some("/nonexistent/IfcConvert".to_string()),
            usdzconvert_path: Some("/nonexistent/usdzconvert".to_string()),
            tool_timeout: Duration::from_secs(1),
            threads: 1,
        }),
    };
    build_router(state)
}

/// Build a `multipart/form-data` body with one `file` field.
///
/// Returns `(content_type, body)`.
pub fn multipart_body(filename: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "meshport-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
