//! Durable job registry backed by per-job work directories.
//!
//! Every job owns one directory under the jobs root holding its
//! `job.json` snapshot, its `job.log`, and all conversion artifacts.
//! A single mutex serializes the in-memory map and all persistence I/O,
//! so the store is internally serializable and the snapshot on disk is
//! identical to the in-memory record after every mutating operation.

pub mod error;
pub mod repository;
pub mod store;

pub use error::StoreError;
pub use repository::JobRepository;
pub use store::JobStore;
