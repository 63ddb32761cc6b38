//! Pure domain logic for the meshport conversion service.
//!
//! This crate has zero internal dependencies and no I/O. It defines the
//! job record, the closed status state machine, filename derivation, and
//! the shared error type. Everything that touches the filesystem lives in
//! `meshport-store`; everything that touches processes lives in
//! `meshport-pipeline`.

pub mod error;
pub mod job;
pub mod naming;
pub mod status;

pub use error::CoreError;
pub use job::{JobRecord, JobUpdate};
pub use status::JobStatus;
