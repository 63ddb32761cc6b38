//! Backing-store abstraction for job records.
//!
//! The state machine and the execution engine only need these five
//! operations, so an embedded key-value store or a relational table could
//! replace the filesystem store without touching either.

use meshport_core::{JobRecord, JobUpdate};

use crate::error::StoreError;

/// CRUD contract every job backing store provides.
pub trait JobRepository: Send + Sync {
    /// Allocate an id, timestamps, and a work directory; persist the new
    /// `queued` record and return it.
    fn create(&self) -> Result<JobRecord, StoreError>;

    /// Fetch one record by id.
    fn get(&self, id: &str) -> Result<JobRecord, StoreError>;

    /// Records ordered by `updated_at` descending, capped at `limit`
    /// (floor 1).
    fn list(&self, limit: usize) -> Vec<JobRecord>;

    /// Apply field changes atomically, bump `updated_at`, persist the
    /// full snapshot, and return the updated record.
    fn update(&self, id: &str, update: JobUpdate) -> Result<JobRecord, StoreError>;

    /// Remove a record and its work directory.
    fn delete(&self, id: &str) -> Result<(), StoreError>;
}
