// src/analyze/mod.rs
//! Quick / deep analysis over a frozen evidence pool.

pub mod orchestrator;
pub mod prompts;
pub mod schema;
pub mod transcript;

pub use orchestrator::AnalysisOrchestrator;
pub use schema::{AnalysisMetadata, KeyDriver, Verdict, VerdictKind};
pub use transcript::{Stage, Transcript, Turn};
