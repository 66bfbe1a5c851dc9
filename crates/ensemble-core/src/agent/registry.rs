//! In-process agent restore registry.
//!
//! Workflow runs share constructed agents by name: a run saves the
//! instances it built, and later runs restore them instead of paying
//! construction again. Live instances win over stored definitions. The
//! registry is injected into the engine, never process-global, so tests
//! and embedders can scope sharing however they like.

use std::sync::Arc;

use dashmap::DashMap;

use ensemble_types::agent::AgentDefinition;

use super::{AgentError, BoxAgent};

/// What `restore` found for a name.
pub enum Restored {
    /// A live instance saved by an earlier run.
    Instance(Arc<BoxAgent>),
    /// Only a stored definition; the caller constructs from it.
    Definition(AgentDefinition),
}

/// Concurrent name-keyed store of live agents and their definitions.
#[derive(Default)]
pub struct AgentRegistry {
    instances: DashMap<String, Arc<BoxAgent>>,
    definitions: DashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save a live instance together with the definition it was built
    /// from, replacing any previous entry for the name.
    pub fn save(&self, instance: Arc<BoxAgent>, definition: AgentDefinition) {
        let name = definition.metadata.name.clone();
        self.definitions.insert(name.clone(), definition);
        self.instances.insert(name, instance);
    }

    /// Store a definition without an instance.
    pub fn save_definition(&self, definition: AgentDefinition) {
        self.definitions
            .insert(definition.metadata.name.clone(), definition);
    }

    /// Look up a name, preferring live instances over definitions.
    pub fn restore(&self, name: &str) -> Option<Restored> {
        if let Some(instance) = self.instances.get(name) {
            return Some(Restored::Instance(instance.clone()));
        }
        self.definitions
            .get(name)
            .map(|d| Restored::Definition(d.clone()))
    }

    /// The stored definition for a name, if any.
    pub fn definition(&self, name: &str) -> Option<AgentDefinition> {
        self.definitions.get(name).map(|d| d.clone())
    }

    /// Restore the live instance for a name, or construct, save, and
    /// return one. Construction and insertion happen under the entry
    /// lock so concurrent callers get the same instance.
    pub fn get_or_create(
        &self,
        name: &str,
        init: impl FnOnce() -> Result<BoxAgent, AgentError>,
    ) -> Result<Arc<BoxAgent>, AgentError> {
        match self.instances.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Ok(entry.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let instance = Arc::new(init()?);
                entry.insert(instance.clone());
                Ok(instance)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::EchoAgent;
    use ensemble_types::agent::{AgentMetadata, AgentSpec};
    use std::collections::HashMap;

    fn definition(name: &str) -> AgentDefinition {
        AgentDefinition {
            metadata: AgentMetadata {
                name: name.to_string(),
                labels: HashMap::new(),
            },
            spec: AgentSpec {
                framework: Default::default(),
                mode: None,
                model: None,
                description: None,
                instructions: String::new(),
            },
        }
    }

    #[test]
    fn test_restore_prefers_live_instance() {
        let registry = AgentRegistry::new();
        registry.save(
            Arc::new(BoxAgent::new(EchoAgent::new("a"))),
            definition("a"),
        );

        match registry.restore("a") {
            Some(Restored::Instance(agent)) => assert_eq!(agent.name(), "a"),
            _ => panic!("expected live instance"),
        }
    }

    #[test]
    fn test_restore_falls_back_to_definition() {
        let registry = AgentRegistry::new();
        registry.save_definition(definition("b"));

        match registry.restore("b") {
            Some(Restored::Definition(def)) => assert_eq!(def.metadata.name, "b"),
            _ => panic!("expected definition"),
        }
    }

    #[test]
    fn test_restore_unknown_name_is_none() {
        let registry = AgentRegistry::new();
        assert!(registry.restore("ghost").is_none());
    }

    #[test]
    fn test_get_or_create_constructs_once() {
        let registry = AgentRegistry::new();
        let first = registry
            .get_or_create("a", || Ok(BoxAgent::new(EchoAgent::new("a"))))
            .unwrap();
        let second = registry
            .get_or_create("a", || panic!("must not construct twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_or_create_single_instance_under_contention() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let registry = Arc::new(AgentRegistry::new());
        let constructions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let constructions = constructions.clone();
                std::thread::spawn(move || {
                    registry
                        .get_or_create("shared", || {
                            constructions.fetch_add(1, Ordering::SeqCst);
                            Ok(BoxAgent::new(EchoAgent::new("shared")))
                        })
                        .unwrap()
                })
            })
            .collect();

        let agents: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        for agent in &agents[1..] {
            assert!(Arc::ptr_eq(&agents[0], agent));
        }
    }

    #[test]
    fn test_get_or_create_propagates_constructor_error() {
        let registry = AgentRegistry::new();
        let err = registry
            .get_or_create("a", || Err(AgentError::Unavailable("down".into())))
            .unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));
        // A failed construction leaves no entry behind.
        assert!(registry.restore("a").is_none());
    }
}
