//! Workflow definition loading and validation.
//!
//! Definitions arrive as YAML (one document per workflow, multi-document
//! for agent files) or constructed in code. Validation is fail-fast and
//! structural: step-name uniqueness, branch completeness, and reference
//! integrity are all checked before anything executes. Agent-name
//! resolution happens later, when a run binds definitions to instances.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use ensemble_types::agent::AgentDefinition;
use ensemble_types::workflow::{StepDefinition, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from loading or validating a workflow definition.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("could not read definition file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse definition YAML: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("workflow '{0}' has no steps")]
    NoSteps(String),

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' branch is missing its '{missing}' target")]
    IncompleteBranch { step: String, missing: &'static str },

    #[error("step '{step}' condition targets unknown step '{target}'")]
    UnknownConditionTarget { step: String, target: String },

    #[error("step '{step}' references unknown sub-workflow '{name}'")]
    UnknownSubWorkflow { step: String, name: String },

    #[error("event replay step '{0}' is not a declared step")]
    UnknownEventStep(String),

    #[error("step '{step}' binds instructions of unknown step '{target}'")]
    UnknownInstructionSource { step: String, target: String },
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse a single workflow definition from YAML and validate it.
pub fn parse_workflow(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let definition: WorkflowDefinition = serde_yaml_ng::from_str(yaml)?;
    validate(&definition)?;
    Ok(definition)
}

/// Load and validate a workflow definition from a YAML file.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowDefinition, WorkflowError> {
    parse_workflow(&std::fs::read_to_string(path)?)
}

/// Parse agent definitions from YAML. Accepts multi-document files (one
/// agent per document).
pub fn parse_agents(yaml: &str) -> Result<Vec<AgentDefinition>, WorkflowError> {
    let mut agents = Vec::new();
    for document in serde_yaml_ng::Deserializer::from_str(yaml) {
        agents.push(AgentDefinition::deserialize(document)?);
    }
    Ok(agents)
}

/// Load agent definitions from a YAML file.
pub fn load_agents(path: impl AsRef<Path>) -> Result<Vec<AgentDefinition>, WorkflowError> {
    parse_agents(&std::fs::read_to_string(path)?)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Structural validation, applied before any run starts.
pub fn validate(definition: &WorkflowDefinition) -> Result<(), WorkflowError> {
    let steps = &definition.template.steps;
    if steps.is_empty() {
        return Err(WorkflowError::NoSteps(definition.name.clone()));
    }

    let mut names = HashSet::new();
    for step in steps {
        if !names.insert(step.name.as_str()) {
            return Err(WorkflowError::DuplicateStep(step.name.clone()));
        }
    }

    for step in steps {
        validate_condition(step, &names)?;
        validate_sub_workflow(definition, step)?;
        validate_bindings(step, &names)?;
    }

    if let Some(event) = &definition.template.event {
        for name in &event.steps {
            if !names.contains(name.as_str()) {
                return Err(WorkflowError::UnknownEventStep(name.clone()));
            }
        }
    }

    Ok(())
}

fn validate_condition(
    step: &StepDefinition,
    names: &HashSet<&str>,
) -> Result<(), WorkflowError> {
    let Some(clauses) = &step.condition else {
        return Ok(());
    };
    let Some(first) = clauses.first() else {
        return Ok(());
    };

    if first.if_expr.is_some() {
        // Binary branch: both arms are required.
        if first.then.is_none() {
            return Err(WorkflowError::IncompleteBranch {
                step: step.name.clone(),
                missing: "then",
            });
        }
        if first.else_.is_none() {
            return Err(WorkflowError::IncompleteBranch {
                step: step.name.clone(),
                missing: "else",
            });
        }
    }

    for clause in clauses {
        for target in [&clause.then, &clause.else_, &clause.do_]
            .into_iter()
            .flatten()
        {
            if !names.contains(target.as_str()) {
                return Err(WorkflowError::UnknownConditionTarget {
                    step: step.name.clone(),
                    target: target.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_sub_workflow(
    definition: &WorkflowDefinition,
    step: &StepDefinition,
) -> Result<(), WorkflowError> {
    let Some(reference) = &step.workflow else {
        return Ok(());
    };
    let known = definition
        .template
        .workflows
        .iter()
        .any(|w| &w.name == reference);
    if !known {
        return Err(WorkflowError::UnknownSubWorkflow {
            step: step.name.clone(),
            name: reference.clone(),
        });
    }
    Ok(())
}

fn validate_bindings(step: &StepDefinition, names: &HashSet<&str>) -> Result<(), WorkflowError> {
    let Some(bindings) = &step.inputs else {
        return Ok(());
    };
    for binding in bindings {
        if let Some(target) = binding.from.strip_prefix("instructions:")
            && !names.contains(target)
        {
            return Err(WorkflowError::UnknownInstructionSource {
                step: step.name.clone(),
                target: target.to_string(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"
name: pipeline
template:
  prompt: "go"
  agents: [a, b]
  steps:
    - name: first
      agent: a
    - name: route
      agent: b
      condition:
        - if: "'x' in input"
          then: first
          else: last
    - name: last
      agent: a
      inputs:
        - from: prompt
        - from: "instructions:first"
  event:
    cron: "*/5 * * * *"
    steps: [last]
"#;

    #[test]
    fn test_valid_workflow_parses() {
        let wf = parse_workflow(VALID).unwrap();
        assert_eq!(wf.name, "pipeline");
        assert_eq!(wf.template.steps.len(), 3);
    }

    #[test]
    fn test_load_workflow_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();
        let wf = load_workflow(file.path()).unwrap();
        assert_eq!(wf.name, "pipeline");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_workflow("/nonexistent/workflow.yaml").unwrap_err();
        assert!(matches!(err, WorkflowError::Io(_)));
    }

    #[test]
    fn test_empty_steps_rejected() {
        let yaml = "name: empty\ntemplate:\n  prompt: ''\n  steps: []\n";
        assert!(matches!(
            parse_workflow(yaml),
            Err(WorkflowError::NoSteps(_))
        ));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let yaml = r#"
name: dupes
template:
  steps:
    - name: one
    - name: one
"#;
        assert!(matches!(
            parse_workflow(yaml),
            Err(WorkflowError::DuplicateStep(name)) if name == "one"
        ));
    }

    #[test]
    fn test_branch_missing_else_rejected() {
        let yaml = r#"
name: incomplete
template:
  steps:
    - name: route
      condition:
        - if: "input == 'x'"
          then: done
    - name: done
"#;
        assert!(matches!(
            parse_workflow(yaml),
            Err(WorkflowError::IncompleteBranch { missing: "else", .. })
        ));
    }

    #[test]
    fn test_condition_target_must_exist() {
        let yaml = r#"
name: dangling
template:
  steps:
    - name: route
      condition:
        - case: "input == 'a'"
          do: nowhere
    - name: done
"#;
        assert!(matches!(
            parse_workflow(yaml),
            Err(WorkflowError::UnknownConditionTarget { target, .. }) if target == "nowhere"
        ));
    }

    #[test]
    fn test_sub_workflow_reference_must_be_declared() {
        let yaml = r#"
name: subs
template:
  steps:
    - name: call
      workflow: publish
"#;
        assert!(matches!(
            parse_workflow(yaml),
            Err(WorkflowError::UnknownSubWorkflow { name, .. }) if name == "publish"
        ));
    }

    #[test]
    fn test_declared_sub_workflow_accepted() {
        let yaml = r#"
name: subs
template:
  steps:
    - name: call
      workflow: publish
  workflows:
    - name: publish
      url: https://example.com/publish
"#;
        assert!(parse_workflow(yaml).is_ok());
    }

    #[test]
    fn test_event_steps_must_be_declared() {
        let yaml = r#"
name: ev
template:
  steps:
    - name: only
  event:
    cron: "* * * * *"
    steps: [ghost]
"#;
        assert!(matches!(
            parse_workflow(yaml),
            Err(WorkflowError::UnknownEventStep(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_instruction_binding_must_reference_declared_step() {
        let yaml = r#"
name: binds
template:
  steps:
    - name: only
      inputs:
        - from: "instructions:ghost"
"#;
        assert!(matches!(
            parse_workflow(yaml),
            Err(WorkflowError::UnknownInstructionSource { target, .. }) if target == "ghost"
        ));
    }

    #[test]
    fn test_parse_agents_multi_document() {
        let yaml = r#"
metadata:
  name: researcher
spec:
  instructions: find things
---
metadata:
  name: writer
spec:
  framework: custom
  model: small-lm
  instructions: write things
"#;
        let agents = parse_agents(yaml).unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].metadata.name, "researcher");
        assert_eq!(agents[1].metadata.name, "writer");
    }
}
