//! Structured-field names for agent call records.
//!
//! Every agent invocation made through the engine's logging wrapper is
//! recorded with these field names, so downstream log pipelines can rely
//! on a stable schema regardless of which sink consumes the records.
//!
//! Span naming convention: `"agent {name}"` (e.g. `"agent researcher"`).

/// The workflow run this call belongs to.
pub const WORKFLOW_ID: &str = "workflow.id";

/// Zero-based index of the step that issued the call; `-1` marks the
/// exception-handler invocation.
pub const STEP_INDEX: &str = "workflow.step_index";

/// The invoked agent's name.
pub const AGENT_NAME: &str = "agent.name";

/// The invoked agent's model identifier (`code:<name>` for code agents).
pub const AGENT_MODEL: &str = "agent.model";

/// The primary input (last positional argument), as text.
pub const CALL_INPUT: &str = "agent.input";

/// The reply prompt, as text.
pub const CALL_RESPONSE: &str = "agent.response";

/// Tool invoked during the call, when the backend reports one.
pub const TOOL_USED: &str = "agent.tool_used";

/// Wall-clock call duration in milliseconds.
pub const DURATION_MS: &str = "agent.duration_ms";
