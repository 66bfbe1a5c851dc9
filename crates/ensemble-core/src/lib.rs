//! Workflow engine core for Ensemble.
//!
//! This crate resolves a declarative workflow definition into a traversal
//! state machine and drives it: conditional branches, bounded/unbounded
//! loops, concurrent fan-out/fan-in, multi-source input binding, a
//! streaming variant with identical semantics, and a cron-gated event
//! mode layered on top of ordinary traversal.
//!
//! Concrete agent backends, trace collectors, and interactive input
//! sources are external collaborators behind the traits in [`agent`],
//! [`workflow::trace`], and [`workflow::input`].

pub mod agent;
pub mod workflow;

pub use agent::{Agent, AgentCall, AgentError, AgentReply, BoxAgent};
pub use workflow::engine::{EngineError, Workflow, WorkflowOptions, WorkflowStreamEvent};
