// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod evidence;
pub mod llm;
pub mod market;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod request;
pub mod signals;

pub use crate::api::router;
pub use crate::error::RunError;
pub use crate::pipeline::Pipeline;
pub use crate::report::Report;
pub use crate::request::{AnalysisRequest, Depth, Perspective};
