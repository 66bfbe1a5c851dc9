//! Observability support for the Ensemble engine: tracing subscriber
//! initialization and the canonical structured-field names used when
//! recording agent calls.

pub mod agent_attrs;
pub mod tracing_setup;
