//! Workflow engine: definition loading, expression evaluation, step
//! execution, traversal, event mode, and the external collaborator
//! seams (input, trace).

pub mod definition;
pub mod engine;
pub mod event;
pub mod expression;
pub mod input;
pub mod step;
pub mod trace;

pub use definition::WorkflowError;
pub use engine::{EngineError, Workflow, WorkflowOptions, WorkflowStreamEvent};
pub use expression::{ExpressionError, ExpressionEvaluator};
pub use input::{InputError, InputProvider};
pub use step::{Step, StepError};
pub use trace::{TraceError, TraceSink};
