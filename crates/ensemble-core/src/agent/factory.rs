//! Keyed agent factory.
//!
//! Frameworks are factory keys, not compiled-in branches: callers
//! register a constructor per [`AgentFramework`] and the engine resolves
//! definitions through the map. Only the `mock` constructor ships with
//! the engine; real backends are registered by the embedding
//! application. Dry-run mode short-circuits every framework to the mock
//! stand-in so workflows can be exercised without live backends.

use std::sync::Arc;

use dashmap::DashMap;

use ensemble_types::agent::{AgentDefinition, AgentFramework};

use super::mock::MockAgent;
use super::{AgentError, BoxAgent};

/// Builds one agent instance from a definition.
pub type AgentConstructor =
    Arc<dyn Fn(&AgentDefinition) -> Result<BoxAgent, AgentError> + Send + Sync>;

/// Maps frameworks to constructors.
pub struct AgentFactory {
    constructors: DashMap<AgentFramework, AgentConstructor>,
    dry_run: bool,
}

impl AgentFactory {
    /// Factory with only the `mock` constructor registered.
    pub fn new() -> Self {
        let factory = Self {
            constructors: DashMap::new(),
            dry_run: false,
        };
        factory.register(AgentFramework::Mock, |definition| {
            Ok(BoxAgent::new(MockAgent::from_definition(definition)))
        });
        factory
    }

    /// Factory honoring the `ENSEMBLE_DRY_RUN` environment variable.
    pub fn from_env() -> Self {
        Self::new().with_dry_run(dry_run_enabled())
    }

    /// When enabled, every definition resolves to the mock stand-in
    /// regardless of framework.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Register (or replace) the constructor for a framework.
    pub fn register(
        &self,
        framework: AgentFramework,
        constructor: impl Fn(&AgentDefinition) -> Result<BoxAgent, AgentError> + Send + Sync + 'static,
    ) {
        self.constructors.insert(framework, Arc::new(constructor));
    }

    /// Build an agent for the definition's framework.
    pub fn create(&self, definition: &AgentDefinition) -> Result<BoxAgent, AgentError> {
        let framework = if self.dry_run {
            tracing::debug!(
                agent = %definition.metadata.name,
                framework = %definition.spec.framework,
                "dry run, substituting mock agent"
            );
            AgentFramework::Mock
        } else {
            definition.spec.framework
        };

        let constructor = self
            .constructors
            .get(&framework)
            .ok_or_else(|| AgentError::UnknownFramework(framework.to_string()))?;
        constructor(definition)
    }
}

impl Default for AgentFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the `ENSEMBLE_DRY_RUN` environment variable requests dry-run
/// mode (set and not `"0"` or `"false"`).
pub fn dry_run_enabled() -> bool {
    std::env::var("ENSEMBLE_DRY_RUN")
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::TransformAgent;
    use crate::agent::AgentCall;
    use ensemble_types::agent::{AgentMetadata, AgentSpec};
    use std::collections::HashMap;

    fn definition(name: &str, framework: AgentFramework) -> AgentDefinition {
        AgentDefinition {
            metadata: AgentMetadata {
                name: name.to_string(),
                labels: HashMap::new(),
            },
            spec: AgentSpec {
                framework,
                mode: None,
                model: None,
                description: None,
                instructions: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_mock_constructor_registered_by_default() {
        let factory = AgentFactory::new();
        let agent = factory
            .create(&definition("echo", AgentFramework::Mock))
            .unwrap();
        let reply = agent.run(AgentCall::new("hi", 0)).await.unwrap();
        assert_eq!(reply.prompt.text(), "hi");
    }

    #[test]
    fn test_unknown_framework_is_an_error() {
        let factory = AgentFactory::new();
        let err = factory
            .create(&definition("x", AgentFramework::Remote))
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownFramework(_)));
    }

    #[tokio::test]
    async fn test_registered_constructor_is_used() {
        let factory = AgentFactory::new();
        factory.register(AgentFramework::Code, |def| {
            Ok(BoxAgent::new(TransformAgent::uppercase(
                def.metadata.name.clone(),
            )))
        });

        let agent = factory
            .create(&definition("shout", AgentFramework::Code))
            .unwrap();
        let reply = agent.run(AgentCall::new("quiet", 0)).await.unwrap();
        assert_eq!(reply.prompt.text(), "QUIET");
    }

    #[tokio::test]
    async fn test_dry_run_substitutes_mock_for_any_framework() {
        let factory = AgentFactory::new().with_dry_run(true);
        let agent = factory
            .create(&definition("remote-one", AgentFramework::Remote))
            .unwrap();
        assert_eq!(agent.name(), "remote-one");
        let reply = agent.run(AgentCall::new("ping", 0)).await.unwrap();
        assert_eq!(reply.prompt.text(), "ping");
    }
}
