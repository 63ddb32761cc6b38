use meshport_core::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unknown job id. A client error on API paths, a bug condition when
    /// raised from inside an internal transition.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The freshly allocated work directory already exists. Practically
    /// unreachable with collision-resistant ids.
    #[error("Work directory already exists for job {0}")]
    DirectoryConflict(String),

    /// An edge outside the status state machine was attempted, including
    /// any mutation of a terminal record. A programming fault, never a
    /// user error.
    #[error("Invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
