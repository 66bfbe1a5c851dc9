//! Workflow definition IR for Ensemble.
//!
//! The canonical representation of a declarative workflow: a named
//! template holding an initial prompt, an ordered list of step
//! definitions, the agents they reference, and the optional event /
//! exception policies. YAML files and programmatic construction both
//! produce this struct; the engine resolves it into executable steps
//! exactly once when traversal begins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prompt::PromptValue;

// ---------------------------------------------------------------------------
// Workflow Definition (canonical IR)
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
///
/// Immutable during traversal except for prompt seeding at the start of
/// a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    pub name: String,
    /// The traversal template: prompt, steps, and run policies.
    pub template: TemplateSpec,
}

/// The body of a workflow: the initial prompt, the step graph, and the
/// optional event and exception policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Initial prompt seeding the first step (may be overridden per run).
    #[serde(default)]
    pub prompt: String,
    /// Ordered list of step definitions. The first is the entry point;
    /// traversal ends at the last declared step absent an explicit jump.
    pub steps: Vec<StepDefinition>,
    /// Names of agents the steps reference (resolved via the restore
    /// registry or definitions supplied alongside the workflow).
    #[serde(default)]
    pub agents: Vec<String>,
    /// Cron-gated event mode entered after ordinary traversal completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventSpec>,
    /// Exception policy: an agent that consumes unhandled run errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionSpec>,
    /// Named sub-workflow URL table for `workflow:` step references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<SubWorkflowRef>,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in the workflow. Each optional field enables one stage
/// of step execution; stages apply in fixed order (agent, input,
/// condition, parallel, loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name, unique within a workflow.
    pub name: String,
    /// Name of the agent bound to this step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Name of a sub-workflow this step references (resolved against
    /// `TemplateSpec::workflows`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    /// Interactive input template applied after the agent stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputSpec>,
    /// Conditional branch table evaluated against the in-flight prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Vec<ConditionClause>>,
    /// Agent names to fan out to concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<Vec<String>>,
    /// Loop descriptor: repeat an agent until a condition holds.
    #[serde(
        rename = "loop",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub loop_spec: Option<LoopSpec>,
    /// Named input bindings overriding the default prompt threading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<InputBinding>>,
}

/// One clause of a step's condition table.
///
/// If the *first* clause of a table carries `if`, the table is a binary
/// branch (`if`/`then`/`else`). Otherwise it is an ordered switch: the
/// first clause whose `case` evaluates truthy wins and returns its `do`;
/// a clause without `case` is the default fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionClause {
    /// Boolean expression for the binary-branch form.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,
    /// Step selected when `if` is truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<String>,
    /// Step selected when `if` is falsy.
    #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
    pub else_: Option<String>,
    /// Boolean expression for the switch form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    /// Step selected when `case` is truthy (or as the default when the
    /// clause has no `case`).
    #[serde(rename = "do", default, skip_serializing_if = "Option::is_none")]
    pub do_: Option<String>,
}

/// Loop descriptor: run `agent` repeatedly, feeding its own output back,
/// until `until` evaluates truthy on the latest output. A sequence
/// prompt switches the loop to map semantics (once per element).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSpec {
    /// Name of the agent to iterate.
    pub agent: String,
    /// Boolean expression over the most recent output.
    pub until: String,
}

/// Interactive input template. `prompt` is shown to whoever supplies the
/// response; `template` receives `{prompt}` / `{response}` substitution.
/// A `{CONNECTOR}` marker in the template means an external UI supplies
/// the response instead, and the stage passes the prompt through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    /// Message shown when requesting the response.
    pub prompt: String,
    /// Template the response is substituted into.
    pub template: String,
}

/// Marker in an input template meaning "an external connector supplies
/// the response" -- the input stage passes the prompt through unchanged.
pub const CONNECTOR_MARKER: &str = "{CONNECTOR}";

/// One named input binding. `from` is resolved by the engine: the
/// literal `prompt` yields the original initial prompt,
/// `instructions:<step>` yields that step's agent instructions, a
/// recorded step name yields its output, and anything else passes
/// through literally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBinding {
    /// Source selector for this argument.
    pub from: String,
}

// ---------------------------------------------------------------------------
// Run policies
// ---------------------------------------------------------------------------

/// Cron-gated event mode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpec {
    /// Cron expression gating the trigger.
    pub cron: String,
    /// Agent to re-invoke on the terminal prompt when the trigger fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Names of declared steps to replay as an isolated subsequence.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Exit expression evaluated against the accumulated result mapping
    /// after each fire; truthy ends the polling loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<String>,
}

/// Exception policy: the named agent consumes unhandled run errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionSpec {
    /// Name of the handler agent.
    pub agent: String,
}

/// A named sub-workflow reference target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubWorkflowRef {
    /// Name used by `workflow:` step references.
    pub name: String,
    /// Location of the sub-workflow.
    pub url: String,
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// Transient result record produced by one step execution.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    /// The prompt produced by the step's final stage.
    pub prompt: PromptValue,
    /// Explicit jump target selected by the condition stage.
    pub next: Option<String>,
    /// Scoring metadata surfaced by a scoring agent, if any.
    pub scoring_metrics: Option<Value>,
}

/// The accumulated outcome of one workflow run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowResult {
    /// The terminal in-flight prompt.
    pub final_prompt: PromptValue,
    /// Each executed step's recorded output, keyed by step name.
    pub step_results: BTreeMap<String, PromptValue>,
}

impl WorkflowResult {
    /// Build the JSON mapping the event-mode `exit` expression evaluates
    /// against: every step output keyed by name, plus `final_prompt`.
    pub fn to_event_context(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.step_results {
            map.insert(name.clone(), value.to_json());
        }
        map.insert("final_prompt".to_string(), self.final_prompt.to_json());
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Build a definition exercising every step construct.
    fn sample_workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "daily-summary".to_string(),
            template: TemplateSpec {
                prompt: "Summarize today's findings".to_string(),
                steps: vec![
                    StepDefinition {
                        name: "gather".to_string(),
                        agent: Some("researcher".to_string()),
                        workflow: None,
                        input: None,
                        condition: None,
                        parallel: None,
                        loop_spec: None,
                        inputs: None,
                    },
                    StepDefinition {
                        name: "triage".to_string(),
                        agent: Some("classifier".to_string()),
                        workflow: None,
                        input: None,
                        condition: Some(vec![ConditionClause {
                            if_expr: Some("'urgent' in input".to_string()),
                            then: Some("escalate".to_string()),
                            else_: Some("digest".to_string()),
                            ..Default::default()
                        }]),
                        parallel: None,
                        loop_spec: None,
                        inputs: None,
                    },
                    StepDefinition {
                        name: "escalate".to_string(),
                        agent: None,
                        workflow: None,
                        input: Some(InputSpec {
                            prompt: "Approve escalation for: {prompt}".to_string(),
                            template: "{prompt} -- operator says: {response}".to_string(),
                        }),
                        condition: None,
                        parallel: None,
                        loop_spec: None,
                        inputs: None,
                    },
                    StepDefinition {
                        name: "digest".to_string(),
                        agent: None,
                        workflow: None,
                        input: None,
                        condition: None,
                        parallel: Some(vec![
                            "summarizer".to_string(),
                            "critic".to_string(),
                        ]),
                        loop_spec: Some(LoopSpec {
                            agent: "refiner".to_string(),
                            until: "'done' in input".to_string(),
                        }),
                        inputs: Some(vec![
                            InputBinding {
                                from: "prompt".to_string(),
                            },
                            InputBinding {
                                from: "gather".to_string(),
                            },
                        ]),
                    },
                ],
                agents: vec![
                    "researcher".to_string(),
                    "classifier".to_string(),
                    "summarizer".to_string(),
                    "critic".to_string(),
                    "refiner".to_string(),
                ],
                event: Some(EventSpec {
                    cron: "0 9 * * *".to_string(),
                    agent: Some("researcher".to_string()),
                    steps: vec!["digest".to_string()],
                    exit: Some("final_prompt != ''".to_string()),
                }),
                exception: Some(ExceptionSpec {
                    agent: "researcher".to_string(),
                }),
                workflows: vec![SubWorkflowRef {
                    name: "publish".to_string(),
                    url: "https://workflows.example.com/publish".to_string(),
                }],
            },
        }
    }

    // -----------------------------------------------------------------------
    // YAML / JSON roundtrip
    // -----------------------------------------------------------------------

    #[test]
    fn test_workflow_definition_yaml_roundtrip() {
        let original = sample_workflow();
        let yaml = serde_yaml_ng::to_string(&original).expect("serialize to YAML");

        assert!(yaml.contains("daily-summary"));
        assert!(yaml.contains("gather"));
        assert!(yaml.contains("loop:"));

        let parsed: WorkflowDefinition =
            serde_yaml_ng::from_str(&yaml).expect("deserialize from YAML");
        assert_eq!(parsed.name, "daily-summary");
        assert_eq!(parsed.template.steps.len(), 4);
        assert_eq!(parsed.template.agents.len(), 5);
        assert!(parsed.template.event.is_some());
        assert!(parsed.template.exception.is_some());
    }

    #[test]
    fn test_workflow_definition_json_roundtrip() {
        let original = sample_workflow();
        let json_str = serde_json::to_string_pretty(&original).expect("serialize");
        let parsed: WorkflowDefinition =
            serde_json::from_str(&json_str).expect("deserialize");
        assert_eq!(parsed.name, original.name);
        assert_eq!(parsed.template.steps.len(), original.template.steps.len());
    }

    // -----------------------------------------------------------------------
    // YAML from-scratch parse (realistic workflow YAML)
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_realistic_yaml_workflow() {
        let yaml = r#"
name: triage-loop
template:
  prompt: "hi"
  agents: [echo, upper]
  steps:
    - name: s1
      agent: echo
    - name: s2
      agent: upper
      condition:
        - if: "'X' in input"
          then: s1
          else: s3
    - name: s3
      agent: echo
      loop:
        agent: echo
        until: "'done' in input"
"#;
        let wf: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(wf.name, "triage-loop");
        assert_eq!(wf.template.steps.len(), 3);

        let s2 = &wf.template.steps[1];
        let clause = &s2.condition.as_ref().unwrap()[0];
        assert_eq!(clause.if_expr.as_deref(), Some("'X' in input"));
        assert_eq!(clause.then.as_deref(), Some("s1"));
        assert_eq!(clause.else_.as_deref(), Some("s3"));

        let s3 = &wf.template.steps[2];
        let lp = s3.loop_spec.as_ref().unwrap();
        assert_eq!(lp.agent, "echo");
        assert_eq!(lp.until, "'done' in input");
    }

    #[test]
    fn test_parse_switch_condition_yaml() {
        let yaml = r#"
name: switchy
template:
  prompt: ""
  steps:
    - name: route
      condition:
        - case: "input == 'a'"
          do: handle-a
        - do: fallback
        - case: "input == 'b'"
          do: handle-b
    - name: handle-a
    - name: handle-b
    - name: fallback
"#;
        let wf: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        let clauses = wf.template.steps[0].condition.as_ref().unwrap();
        assert_eq!(clauses.len(), 3);
        assert!(clauses[0].if_expr.is_none());
        assert_eq!(clauses[1].case, None);
        assert_eq!(clauses[1].do_.as_deref(), Some("fallback"));
    }

    #[test]
    fn test_parse_event_spec_yaml() {
        let yaml = r#"
cron: "*/5 * * * *"
agent: poller
steps: [fetch, notify]
exit: "'complete' in final_prompt"
"#;
        let ev: EventSpec = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(ev.cron, "*/5 * * * *");
        assert_eq!(ev.agent.as_deref(), Some("poller"));
        assert_eq!(ev.steps, vec!["fetch", "notify"]);
        assert!(ev.exit.is_some());
    }

    #[test]
    fn test_parse_minimal_event_spec() {
        let ev: EventSpec = serde_yaml_ng::from_str("cron: \"* * * * *\"").unwrap();
        assert!(ev.agent.is_none());
        assert!(ev.steps.is_empty());
        assert!(ev.exit.is_none());
    }

    // -----------------------------------------------------------------------
    // WorkflowResult
    // -----------------------------------------------------------------------

    #[test]
    fn test_event_context_shape() {
        let mut result = WorkflowResult {
            final_prompt: PromptValue::from("done"),
            step_results: BTreeMap::new(),
        };
        result
            .step_results
            .insert("gather".to_string(), PromptValue::from("articles"));

        let ctx = result.to_event_context();
        assert_eq!(ctx["final_prompt"], json!("done"));
        assert_eq!(ctx["gather"], json!("articles"));
    }

    #[test]
    fn test_connector_marker() {
        assert!("send via {CONNECTOR} please".contains(CONNECTOR_MARKER));
    }
}
