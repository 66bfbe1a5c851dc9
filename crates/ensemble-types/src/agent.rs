//! Agent definition IR.
//!
//! An agent definition names an opaque capability and the framework
//! adapter that constructs it. The engine never owns agent internals; it
//! only resolves definitions through the keyed factory and stamps the
//! resulting instance with name/model metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Agent Definition
// ---------------------------------------------------------------------------

/// A named agent definition: metadata plus the framework-specific spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub metadata: AgentMetadata,
    pub spec: AgentSpec,
}

/// Identifying metadata for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Agent name, unique within the restore registry.
    pub name: String,
    /// Free-form labels. The label `custom_agent: scoring_agent` marks a
    /// scoring agent, which activates run-scoped tracing.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Framework-specific configuration for constructing an agent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Which factory constructor builds this agent.
    #[serde(default)]
    pub framework: AgentFramework,
    /// Optional construction mode hint (e.g. "local", "remote").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Model identifier; absent for code-backed agents, which report
    /// `code:<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// System instructions given to the agent.
    #[serde(default)]
    pub instructions: String,
}

/// Factory key selecting the adapter that constructs an agent.
///
/// Concrete backends are external collaborators; the factory is
/// extensible by key, and only `mock` ships with the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFramework {
    #[default]
    Mock,
    Code,
    Custom,
    Remote,
}

impl std::fmt::Display for AgentFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentFramework::Mock => "mock",
            AgentFramework::Code => "code",
            AgentFramework::Custom => "custom",
            AgentFramework::Remote => "remote",
        };
        f.write_str(s)
    }
}

impl AgentDefinition {
    /// Effective model name: the declared model, or `code:<name>` for
    /// agents without one.
    pub fn effective_model(&self) -> String {
        self.spec
            .model
            .clone()
            .unwrap_or_else(|| format!("code:{}", self.metadata.name))
    }

    /// Whether this definition marks a scoring agent. Scoring agents
    /// activate the run-scoped trace client and are excluded from the
    /// agent-to-model trace map.
    pub fn is_scoring(&self) -> bool {
        if self
            .metadata
            .labels
            .get("custom_agent")
            .is_some_and(|v| v == "scoring_agent")
        {
            return true;
        }
        if self.spec.framework == AgentFramework::Custom {
            let name = self.metadata.name.to_lowercase();
            return name.contains("score") || name.contains("evaluate");
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
