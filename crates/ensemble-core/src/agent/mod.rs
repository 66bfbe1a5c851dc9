//! Agent abstraction: the trait every step backend implements, plus the
//! type-erased wrapper that lets the engine hold heterogeneous agents.
//!
//! `Agent` uses RPITIT and cannot be a trait object directly. The
//! object-safe `AgentDyn` companion (boxed futures, blanket impl) and
//! `BoxAgent` follow the same pattern used elsewhere in the codebase for
//! dyn-dispatch at a trait seam.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use ensemble_types::prompt::PromptValue;

pub mod factory;
pub mod logging;
pub mod mock;
pub mod registry;

pub use factory::AgentFactory;
pub use logging::{AgentCallRecord, AgentLogger, LoggedAgent, MemoryAgentLogger, TracingAgentLogger};
pub use registry::{AgentRegistry, Restored};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors an agent backend can report.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent call failed: {0}")]
    CallFailed(String),

    #[error("agent backend unavailable: {0}")]
    Unavailable(String),

    #[error("no agent constructor registered for framework '{0}'")]
    UnknownFramework(String),
}

// ---------------------------------------------------------------------------
// Call and reply payloads
// ---------------------------------------------------------------------------

/// One invocation of an agent.
#[derive(Debug, Clone)]
pub struct AgentCall {
    /// Positional inputs; most agents consume the last one, multi-input
    /// agents receive everything the step's input bindings resolved.
    pub args: Vec<PromptValue>,
    /// Optional structured context passed through untouched.
    pub context: Option<Value>,
    /// Position of the calling step in the traversal. `-1` marks the
    /// exception-handler invocation.
    pub step_index: i64,
}

impl AgentCall {
    /// Call with a single prompt argument.
    pub fn new(prompt: impl Into<PromptValue>, step_index: i64) -> Self {
        Self {
            args: vec![prompt.into()],
            context: None,
            step_index,
        }
    }

    /// The last positional argument, or the empty prompt when there are
    /// none. This is what single-input agents act on.
    pub fn primary(&self) -> PromptValue {
        self.args.last().cloned().unwrap_or_default()
    }
}

/// What an agent produced.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    /// The output prompt, handed to the next step.
    pub prompt: PromptValue,
    /// Evaluation metrics, when the agent is a scoring agent.
    pub scoring_metrics: Option<Value>,
    /// Tool invoked during the call, when the backend reports one.
    pub tool_used: Option<String>,
}

impl From<PromptValue> for AgentReply {
    fn from(prompt: PromptValue) -> Self {
        Self {
            prompt,
            ..Self::default()
        }
    }
}

impl From<String> for AgentReply {
    fn from(text: String) -> Self {
        PromptValue::from(text).into()
    }
}

impl From<&str> for AgentReply {
    fn from(text: &str) -> Self {
        PromptValue::from(text).into()
    }
}

// ---------------------------------------------------------------------------
// Agent trait
// ---------------------------------------------------------------------------

/// A step backend: anything that can take a prompt and produce one.
pub trait Agent: Send + Sync {
    /// Name the workflow definition refers to this agent by.
    fn name(&self) -> &str;

    /// Model identifier, for call records and trace metadata.
    fn model(&self) -> &str;

    /// System instructions, exposed so other steps can bind them as input.
    fn instructions(&self) -> &str;

    /// Handle one call.
    fn run(&self, call: AgentCall) -> impl Future<Output = Result<AgentReply, AgentError>> + Send;

    /// Streaming-capable variant. Backends without incremental output
    /// fall through to [`Agent::run`].
    fn run_streaming(
        &self,
        call: AgentCall,
    ) -> impl Future<Output = Result<AgentReply, AgentError>> + Send {
        self.run(call)
    }
}

// ---------------------------------------------------------------------------
// Object-safe companion + BoxAgent
// ---------------------------------------------------------------------------

/// Object-safe version of [`Agent`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation
/// covers every `Agent`.
pub trait AgentDyn: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn instructions(&self) -> &str;

    fn run_boxed(
        &self,
        call: AgentCall,
    ) -> Pin<Box<dyn Future<Output = Result<AgentReply, AgentError>> + Send + '_>>;

    fn run_streaming_boxed(
        &self,
        call: AgentCall,
    ) -> Pin<Box<dyn Future<Output = Result<AgentReply, AgentError>> + Send + '_>>;
}

impl<T: Agent> AgentDyn for T {
    fn name(&self) -> &str {
        Agent::name(self)
    }

    fn model(&self) -> &str {
        Agent::model(self)
    }

    fn instructions(&self) -> &str {
        Agent::instructions(self)
    }

    fn run_boxed(
        &self,
        call: AgentCall,
    ) -> Pin<Box<dyn Future<Output = Result<AgentReply, AgentError>> + Send + '_>> {
        Box::pin(self.run(call))
    }

    fn run_streaming_boxed(
        &self,
        call: AgentCall,
    ) -> Pin<Box<dyn Future<Output = Result<AgentReply, AgentError>> + Send + '_>> {
        Box::pin(self.run_streaming(call))
    }
}

/// Type-erased agent for runtime backend selection.
///
/// Wraps any [`Agent`] behind dynamic dispatch and exposes equivalent
/// async methods that delegate to the inner trait object.
pub struct BoxAgent {
    inner: Box<dyn AgentDyn>,
}

impl BoxAgent {
    /// Wrap a concrete agent in a type-erased box.
    pub fn new<T: Agent + 'static>(agent: T) -> Self {
        Self {
            inner: Box::new(agent),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }

    pub fn instructions(&self) -> &str {
        self.inner.instructions()
    }

    pub async fn run(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        self.inner.run_boxed(call).await
    }

    pub async fn run_streaming(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        self.inner.run_streaming_boxed(call).await
    }
}

impl std::fmt::Debug for BoxAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAgent")
            .field("name", &self.name())
            .field("model", &self.model())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
