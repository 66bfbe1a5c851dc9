//! Run-scoped trace seam.
//!
//! When a workflow carries a scoring agent, the engine records one trace
//! per completed run: initial input, final output, and a metadata object
//! describing the run. The collector is a trait so embedders can plug in
//! an external evaluation platform; trace failures are logged, never
//! allowed to fail a run that already completed.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from a trace collector.
#[derive(Debug, thiserror::Error)]
#[error("trace collection failed: {0}")]
pub struct TraceError(pub String);

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives one trace per completed workflow run.
pub trait TraceSink: Send + Sync {
    fn open_trace(&self, input: &str, output: &str, metadata: &Value) -> Result<(), TraceError>;
}

/// Default sink: discards traces.
#[derive(Debug, Default, Clone)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn open_trace(&self, _input: &str, _output: &str, _metadata: &Value) -> Result<(), TraceError> {
        Ok(())
    }
}

/// One recorded trace.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTrace {
    pub input: String,
    pub output: String,
    pub metadata: Value,
}

/// Collects traces in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingTraceSink {
    traces: Mutex<Vec<RecordedTrace>>,
}

impl RecordingTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<RecordedTrace> {
        self.traces.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl TraceSink for RecordingTraceSink {
    fn open_trace(&self, input: &str, output: &str, metadata: &Value) -> Result<(), TraceError> {
        self.traces
            .lock()
            .map_err(|_| TraceError("trace lock poisoned".into()))?
            .push(RecordedTrace {
                input: input.to_string(),
                output: output.to_string(),
                metadata: metadata.clone(),
            });
        Ok(())
    }
}

/// A sink that always fails. For exercising the warn-and-continue path.
#[derive(Debug, Default, Clone)]
pub struct FailingTraceSink;

impl TraceSink for FailingTraceSink {
    fn open_trace(&self, _input: &str, _output: &str, _metadata: &Value) -> Result<(), TraceError> {
        Err(TraceError("collector offline".into()))
    }
}

// ---------------------------------------------------------------------------
// Metadata assembly
// ---------------------------------------------------------------------------

/// Build the per-run trace metadata object.
///
/// Scoring metric keys that would collide with workflow-level keys are
/// renamed on the way in: `model` becomes `scoring_model` and
/// `provider` becomes `framework_provider`. The metrics' own `agent`
/// key is dropped; the executed-steps list already names every agent.
pub fn build_trace_metadata(
    workflow_id: &str,
    workflow_name: &str,
    steps_executed: &[String],
    workflow_models: &BTreeMap<String, String>,
    scoring_metrics: Option<&Value>,
) -> Value {
    let mut metadata = Map::new();
    metadata.insert("workflow_id".to_string(), json!(workflow_id));
    metadata.insert("workflow_name".to_string(), json!(workflow_name));
    metadata.insert("steps_executed".to_string(), json!(steps_executed));
    metadata.insert("total_steps".to_string(), json!(steps_executed.len()));

    if !workflow_models.is_empty() {
        metadata.insert("workflow_models".to_string(), json!(workflow_models));
    }

    if let Some(Value::Object(metrics)) = scoring_metrics {
        for (key, value) in metrics {
            let key = match key.as_str() {
                "model" => "scoring_model",
                "provider" => "framework_provider",
                "agent" => continue,
                other => other,
            };
            metadata.insert(key.to_string(), value.clone());
        }
    }

    Value::Object(metadata)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_shape() {
        let mut models = BTreeMap::new();
        models.insert("writer".to_string(), "small-lm".to_string());

        let metadata = build_trace_metadata(
            "wf-1",
            "daily-digest",
            &["gather".to_string(), "write".to_string()],
            &models,
            None,
        );

        assert_eq!(metadata["workflow_name"], "daily-digest");
        assert_eq!(metadata["steps_executed"], json!(["gather", "write"]));
        assert_eq!(metadata["total_steps"], 2);
        assert_eq!(metadata["workflow_models"]["writer"], "small-lm");
    }

    #[test]
    fn test_colliding_scoring_keys_are_renamed() {
        let metrics = json!({
            "relevance": 0.9,
            "model": "judge-lm",
            "provider": "local",
            "agent": "judge"
        });
        let metadata =
            build_trace_metadata("wf-1", "wf", &[], &BTreeMap::new(), Some(&metrics));

        assert_eq!(metadata["relevance"], 0.9);
        assert_eq!(metadata["scoring_model"], "judge-lm");
        assert_eq!(metadata["framework_provider"], "local");
        assert!(metadata.get("model").is_none());
        assert!(metadata.get("provider").is_none());
        assert!(metadata.get("agent").is_none());
    }

    #[test]
    fn test_empty_models_map_is_omitted() {
        let metadata = build_trace_metadata("wf-1", "wf", &[], &BTreeMap::new(), None);
        assert!(metadata.get("workflow_models").is_none());
    }

    #[test]
    fn test_recording_sink_collects() {
        let sink = RecordingTraceSink::new();
        sink.open_trace("in", "out", &json!({ "k": 1 })).unwrap();

        let traces = sink.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].input, "in");
        assert_eq!(traces[0].metadata["k"], 1);
    }
}
