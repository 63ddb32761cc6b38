//! The conversion pipeline boundary.
//!
//! Defines the [`Converter`] contract the execution engine drives
//! (progress callback, cancellation predicate, distinguished
//! cancellation error), the external-tool implementation (IfcConvert
//! for IFC to GLB, usdzconvert for GLB to USDZ), and tool diagnostics
//! probing.

pub mod adapter;
pub mod convert;
pub mod diagnostics;
pub mod tools;

pub use adapter::{ConvertContext, Converter, PipelineError};
pub use convert::{ToolConfig, ToolConverter};
