//! Shared domain types for the Ensemble workflow engine.
//!
//! This crate contains the definition IR consumed by `ensemble-core`:
//! workflow and agent definitions, the `PromptValue` tagged union that
//! threads between steps, and per-run result types.
//!
//! Zero infrastructure dependencies -- only serde.

pub mod agent;
pub mod prompt;
pub mod workflow;
