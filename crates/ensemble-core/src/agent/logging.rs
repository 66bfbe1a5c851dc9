//! Call logging around agent invocations.
//!
//! Every agent the engine resolves is wrapped in a [`LoggedAgent`], so
//! each call produces an [`AgentCallRecord`] with timing attached. The
//! sink is a trait: production uses [`TracingAgentLogger`], tests use
//! [`MemoryAgentLogger`]. Failed calls propagate without a record.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::{json, Value};

use ensemble_observe::agent_attrs;

use super::{AgentCall, AgentError, AgentReply, BoxAgent};

// ---------------------------------------------------------------------------
// Call record
// ---------------------------------------------------------------------------

/// One completed agent call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCallRecord {
    pub workflow_id: String,
    pub step_index: i64,
    pub agent_name: String,
    pub model: String,
    pub input: String,
    pub response: String,
    pub tool_used: Option<String>,
    pub duration_ms: u64,
}

impl AgentCallRecord {
    /// Render with the canonical structured-field names, so every sink
    /// emits the same schema.
    pub fn to_json(&self) -> Value {
        json!({
            agent_attrs::WORKFLOW_ID: self.workflow_id,
            agent_attrs::STEP_INDEX: self.step_index,
            agent_attrs::AGENT_NAME: self.agent_name,
            agent_attrs::AGENT_MODEL: self.model,
            agent_attrs::CALL_INPUT: self.input,
            agent_attrs::CALL_RESPONSE: self.response,
            agent_attrs::TOOL_USED: self.tool_used,
            agent_attrs::DURATION_MS: self.duration_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Logger trait and sinks
// ---------------------------------------------------------------------------

/// Receives one record per completed agent call.
pub trait AgentLogger: Send + Sync {
    fn log_agent_response(&self, record: &AgentCallRecord);
}

/// Emits records as structured tracing events.
#[derive(Debug, Default, Clone)]
pub struct TracingAgentLogger;

impl AgentLogger for TracingAgentLogger {
    fn log_agent_response(&self, record: &AgentCallRecord) {
        tracing::info!(
            target: "ensemble::agents",
            record = %record.to_json(),
            "agent call completed"
        );
    }
}

/// Collects records in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct MemoryAgentLogger {
    records: Mutex<Vec<AgentCallRecord>>,
}

impl MemoryAgentLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AgentCallRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AgentLogger for MemoryAgentLogger {
    fn log_agent_response(&self, record: &AgentCallRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// LoggedAgent
// ---------------------------------------------------------------------------

/// An agent bound to a workflow run, recording every call it makes.
pub struct LoggedAgent {
    inner: Arc<BoxAgent>,
    workflow_id: String,
    logger: Arc<dyn AgentLogger>,
}

impl LoggedAgent {
    pub fn new(inner: Arc<BoxAgent>, workflow_id: impl Into<String>, logger: Arc<dyn AgentLogger>) -> Self {
        Self {
            inner,
            workflow_id: workflow_id.into(),
            logger,
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
        let start = Instant::now();
        let input = call.primary().text();
        let step_index = call.step_index;

        let reply = self.inner.run(call).await?;
        self.record(step_index, input, &reply, start);
        Ok(reply)
    }

    pub async fn run_streaming(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        let start = Instant::now();
        let input = call.primary().text();
        let step_index = call.step_index;

        let reply = self.inner.run_streaming(call).await?;
        self.record(step_index, input, &reply, start);
        Ok(reply)
    }

    fn record(&self, step_index: i64, input: String, reply: &AgentReply, start: Instant) {
        let record = AgentCallRecord {
            workflow_id: self.workflow_id.clone(),
            step_index,
            agent_name: self.inner.name().to_string(),
            model: self.inner.model().to_string(),
            input,
            response: reply.prompt.text(),
            tool_used: reply.tool_used.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        self.logger.log_agent_response(&record);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::{FailingAgent, TransformAgent};

    fn logged(agent: BoxAgent, logger: Arc<MemoryAgentLogger>) -> LoggedAgent {
        LoggedAgent::new(Arc::new(agent), "wf-1", logger)
    }

    #[tokio::test]
    async fn test_successful_call_produces_record() {
        let logger = Arc::new(MemoryAgentLogger::new());
        let agent = logged(BoxAgent::new(TransformAgent::uppercase("shout")), logger.clone());

        let reply = agent.run(AgentCall::new("hello", 2)).await.unwrap();
        assert_eq!(reply.prompt.text(), "HELLO");

        let records = logger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].workflow_id, "wf-1");
        assert_eq!(records[0].step_index, 2);
        assert_eq!(records[0].agent_name, "shout");
        assert_eq!(records[0].input, "hello");
        assert_eq!(records[0].response, "HELLO");
    }

    #[tokio::test]
    async fn test_failed_call_produces_no_record() {
        let logger = Arc::new(MemoryAgentLogger::new());
        let agent = logged(BoxAgent::new(FailingAgent::new("bad", "boom")), logger.clone());

        assert!(agent.run(AgentCall::new("hello", 0)).await.is_err());
        assert!(logger.records().is_empty());
    }

    #[test]
    fn test_record_json_uses_canonical_field_names() {
        let record = AgentCallRecord {
            workflow_id: "wf-1".into(),
            step_index: -1,
            agent_name: "handler".into(),
            model: "code:handler".into(),
            input: "error".into(),
            response: "logged".into(),
            tool_used: Some("search".into()),
            duration_ms: 12,
        };
        let value = record.to_json();
        assert_eq!(value[agent_attrs::STEP_INDEX], -1);
        assert_eq!(value[agent_attrs::AGENT_NAME], "handler");
        assert_eq!(value[agent_attrs::TOOL_USED], "search");
    }
}
