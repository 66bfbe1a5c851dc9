//! Deterministic in-process agents.
//!
//! `MockAgent` is the dry-run stand-in the factory produces for every
//! framework when live backends are disabled. The rest are building
//! blocks for engine tests: scripted replies, fixed transforms, timed
//! and failing backends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use ensemble_types::agent::AgentDefinition;
use ensemble_types::prompt::PromptValue;

use super::{Agent, AgentCall, AgentError, AgentReply};

// ---------------------------------------------------------------------------
// MockAgent (factory dry-run stand-in)
// ---------------------------------------------------------------------------

/// Echoes its input back, carrying the name/model/instructions of the
/// definition it stands in for.
#[derive(Debug, Clone)]
pub struct MockAgent {
    name: String,
    model: String,
    instructions: String,
}

impl MockAgent {
    pub fn from_definition(definition: &AgentDefinition) -> Self {
        Self {
            name: definition.metadata.name.clone(),
            model: definition.effective_model(),
            instructions: definition.spec.instructions.clone(),
        }
    }
}

impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    async fn run(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        Ok(call.primary().into())
    }
}

// ---------------------------------------------------------------------------
// EchoAgent
// ---------------------------------------------------------------------------

/// Returns its input unchanged.
#[derive(Debug, Clone)]
pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock:echo"
    }

    fn instructions(&self) -> &str {
        "Return the input unchanged."
    }

    async fn run(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        Ok(call.primary().into())
    }
}

// ---------------------------------------------------------------------------
// TransformAgent
// ---------------------------------------------------------------------------

/// Applies a fixed text transform to the primary input.
pub struct TransformAgent {
    name: String,
    transform: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl TransformAgent {
    pub fn new(
        name: impl Into<String>,
        transform: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            transform: Box::new(transform),
        }
    }

    /// Uppercases the input.
    pub fn uppercase(name: impl Into<String>) -> Self {
        Self::new(name, |s| s.to_uppercase())
    }

    /// Prefixes the input with `"<name>: "`.
    pub fn tagging(name: impl Into<String>) -> Self {
        let name = name.into();
        let tag = name.clone();
        Self::new(name, move |s| format!("{tag}: {s}"))
    }
}

impl Agent for TransformAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock:transform"
    }

    fn instructions(&self) -> &str {
        "Apply a fixed transform to the input."
    }

    async fn run(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        Ok((self.transform)(&call.primary().text()).into())
    }
}

// ---------------------------------------------------------------------------
// ScriptedAgent
// ---------------------------------------------------------------------------

/// Pops a queued reply per call; errors when the script runs out.
///
/// Useful for loop tests where successive calls must produce different
/// output until a termination condition holds.
pub struct ScriptedAgent {
    name: String,
    replies: Mutex<VecDeque<AgentReply>>,
}

impl ScriptedAgent {
    pub fn new<I, R>(name: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<AgentReply>,
    {
        Self {
            name: name.into(),
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock:scripted"
    }

    fn instructions(&self) -> &str {
        "Replay a fixed script of replies."
    }

    async fn run(&self, _call: AgentCall) -> Result<AgentReply, AgentError> {
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| AgentError::Unavailable("script lock poisoned".into()))?;
        replies
            .pop_front()
            .ok_or_else(|| AgentError::CallFailed(format!("agent '{}' ran out of script", self.name)))
    }
}

// ---------------------------------------------------------------------------
// FanOutAgent
// ---------------------------------------------------------------------------

/// Splits the input into a sequence, one item per registered label.
///
/// Produces the multi-item prompts that feed positional parallel steps.
#[derive(Debug, Clone)]
pub struct FanOutAgent {
    name: String,
    labels: Vec<String>,
}

impl FanOutAgent {
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

impl Agent for FanOutAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock:fanout"
    }

    fn instructions(&self) -> &str {
        "Split the input into one item per label."
    }

    async fn run(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        let input = call.primary().text();
        let items = self
            .labels
            .iter()
            .map(|label| format!("{label} {input}"))
            .collect::<Vec<_>>();
        Ok(AgentReply::from(PromptValue::Sequence(items)))
    }
}

// ---------------------------------------------------------------------------
// ScoringAgent
// ---------------------------------------------------------------------------

/// Passes the input through and attaches fixed scoring metrics.
#[derive(Debug, Clone)]
pub struct ScoringAgent {
    name: String,
    metrics: Value,
}

impl ScoringAgent {
    pub fn new(name: impl Into<String>, metrics: Value) -> Self {
        Self {
            name: name.into(),
            metrics,
        }
    }
}

impl Agent for ScoringAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock:scoring"
    }

    fn instructions(&self) -> &str {
        "Score the input and pass it through."
    }

    async fn run(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        Ok(AgentReply {
            prompt: call.primary(),
            scoring_metrics: Some(self.metrics.clone()),
            tool_used: None,
        })
    }
}

// ---------------------------------------------------------------------------
// SlowAgent
// ---------------------------------------------------------------------------

/// Delays before replying. For fan-in ordering tests.
pub struct SlowAgent {
    inner: TransformAgent,
    delay: Duration,
}

impl SlowAgent {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: TransformAgent::tagging(name),
            delay,
        }
    }
}

impl Agent for SlowAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        "mock:slow"
    }

    fn instructions(&self) -> &str {
        self.inner.instructions()
    }

    async fn run(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        tokio::time::sleep(self.delay).await;
        self.inner.run(call).await
    }
}

// ---------------------------------------------------------------------------
// FailingAgent
// ---------------------------------------------------------------------------

/// Always fails with the configured message.
#[derive(Debug, Clone)]
pub struct FailingAgent {
    name: String,
    message: String,
}

impl FailingAgent {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl Agent for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock:failing"
    }

    fn instructions(&self) -> &str {
        "Fail every call."
    }

    async fn run(&self, _call: AgentCall) -> Result<AgentReply, AgentError> {
        Err(AgentError::CallFailed(self.message.clone()))
    }
}

// ---------------------------------------------------------------------------
// RecordingAgent
// ---------------------------------------------------------------------------

/// Echoes its input and remembers every call it received. The log is
/// shared, so a handle obtained before boxing stays readable after the
/// agent moves into the engine.
pub struct RecordingAgent {
    name: String,
    calls: Arc<Mutex<Vec<AgentCall>>>,
}

/// Readable handle to a [`RecordingAgent`]'s call log.
pub type CallLog = Arc<Mutex<Vec<AgentCall>>>;

impl RecordingAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> CallLog {
        self.calls.clone()
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Agent for RecordingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock:recording"
    }

    fn instructions(&self) -> &str {
        "Echo the input and record the call."
    }

    async fn run(&self, call: AgentCall) -> Result<AgentReply, AgentError> {
        let reply = call.primary().into();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        Ok(reply)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_agent_pops_in_order_then_errors() {
        let agent = ScriptedAgent::new("s", ["one", "two"]);
        assert_eq!(
            agent.run(AgentCall::new("x", 0)).await.unwrap().prompt.text(),
            "one"
        );
        assert_eq!(
            agent.run(AgentCall::new("x", 1)).await.unwrap().prompt.text(),
            "two"
        );
        assert!(agent.run(AgentCall::new("x", 2)).await.is_err());
    }

    #[tokio::test]
    async fn test_fan_out_produces_sequence() {
        let agent = FanOutAgent::new("split", vec!["a:".into(), "b:".into()]);
        let reply = agent.run(AgentCall::new("topic", 0)).await.unwrap();
        assert_eq!(
            reply.prompt,
            PromptValue::Sequence(vec!["a: topic".into(), "b: topic".into()])
        );
    }

    #[tokio::test]
    async fn test_scoring_agent_attaches_metrics() {
        let agent = ScoringAgent::new("judge", json!({ "relevance": 0.9 }));
        let reply = agent.run(AgentCall::new("answer", 0)).await.unwrap();
        assert_eq!(reply.prompt.text(), "answer");
        assert_eq!(reply.scoring_metrics, Some(json!({ "relevance": 0.9 })));
    }

    #[tokio::test]
    async fn test_recording_agent_remembers_calls() {
        let agent = RecordingAgent::new("rec");
        agent.run(AgentCall::new("first", 0)).await.unwrap();
        agent.run(AgentCall::new("second", 3)).await.unwrap();

        let calls = agent.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].step_index, 3);
        assert_eq!(calls[1].primary().text(), "second");
    }

    #[tokio::test]
    async fn test_mock_agent_carries_definition_identity() {
        let yaml = r#"
metadata:
  name: researcher
spec:
  framework: code
  instructions: Find sources.
"#;
        let def: AgentDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        let agent = MockAgent::from_definition(&def);
        assert_eq!(agent.name(), "researcher");
        assert_eq!(agent.model(), "code:researcher");
        assert_eq!(agent.instructions(), "Find sources.");
    }
}
