//! Stage registry - immutable, insertion-ordered snapshot of runtime stages
//!
//! Built completely by `Dispatcher::start` and only then published, so a
//! reader sees either no registry or a whole one.

use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::common::{Error, Result};

use super::runtime_stage::RuntimeStage;

#[derive(Debug, Default)]
pub struct StageRegistry {
    stages: IndexMap<String, Arc<RuntimeStage>>,
}

impl StageRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stages: IndexMap::with_capacity(capacity),
        }
    }

    /// Add a stage. Ids are unique; a duplicate is a configuration error.
    pub fn insert(&mut self, stage: Arc<RuntimeStage>) -> Result<()> {
        match self.stages.entry(stage.id().to_string()) {
            Entry::Occupied(entry) => Err(Error::Config(format!(
                "Duplicate stage id [{}]",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(stage);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<RuntimeStage>> {
        self.stages.get(id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RuntimeStage>> {
        self.stages.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Event, EventHandler, StageDefinition};
    use crate::controller::DirectController;

    struct Noop;

    impl EventHandler for Noop {
        fn handle(&self, _event: &Event) -> Result<()> {
            Ok(())
        }
    }

    fn stage(id: &str) -> Arc<RuntimeStage> {
        let handler: Arc<dyn EventHandler> = Arc::new(Noop);
        let definition = Arc::new(StageDefinition::new(id, handler.clone()));
        Arc::new(RuntimeStage::new(
            definition,
            handler,
            Arc::new(DirectController::new()),
        ))
    }

    #[test]
    fn test_registry_keeps_insertion_order() {
        let mut registry = StageRegistry::with_capacity(3);
        for id in ["c", "a", "b"] {
            registry.insert(stage(id)).unwrap();
        }
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["c", "a", "b"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.get("a").is_some());
        assert!(registry.get("z").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = StageRegistry::default();
        registry.insert(stage("a")).unwrap();
        assert!(matches!(registry.insert(stage("a")), Err(Error::Config(_))));
        assert_eq!(registry.len(), 1);
    }
}
