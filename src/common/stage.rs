//! Stage definitions and handler capabilities
//!
//! A `StageDefinition` is the static description of a stage. The dispatcher
//! wraps each one into a `RuntimeStage` at start.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use super::Event;
use crate::app::Dispatcher;
use crate::error::Result;

/// Default number of worker threads for pooled stages
pub const DEFAULT_POOL_WORKERS: usize = 4;

/// Default queue capacity for pooled stages
pub const DEFAULT_POOL_QUEUE_CAPACITY: usize = 1024;

/// Stage handler logic
///
/// Handlers are shared between controller workers, so `handle` takes `&self`.
/// Capabilities are exposed through the `as_*` queries; the defaults say the
/// handler has none.
pub trait EventHandler: Send + Sync {
    /// Process a single event
    fn handle(&self, event: &Event) -> Result<()>;

    /// Capability query: wants its own stage definition
    fn as_stage_aware(&self) -> Option<&dyn StageAware> {
        None
    }

    /// Capability query: wants a handle to the owning dispatcher
    fn as_dispatcher_aware(&self) -> Option<&dyn DispatcherAware> {
        None
    }
}

/// Handlers that need to know which stage they run in
pub trait StageAware {
    fn set_stage(&self, stage: Arc<StageDefinition>);
}

/// Handlers that submit follow-up events
///
/// The reference is weak: handlers never keep the dispatcher alive.
pub trait DispatcherAware {
    fn set_dispatcher(&self, dispatcher: Weak<Dispatcher>);
}

/// Execution controller selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControllerKind {
    /// Run the handler inline on the caller's thread
    #[default]
    Direct,
    /// Queue events to a fixed set of worker threads
    Pool {
        #[serde(default = "default_pool_workers")]
        workers: usize,
        #[serde(default = "default_pool_queue_capacity")]
        queue_capacity: usize,
    },
}

impl ControllerKind {
    pub fn pool(workers: usize, queue_capacity: usize) -> Self {
        ControllerKind::Pool {
            workers,
            queue_capacity,
        }
    }
}

fn default_pool_workers() -> usize {
    DEFAULT_POOL_WORKERS
}

fn default_pool_queue_capacity() -> usize {
    DEFAULT_POOL_QUEUE_CAPACITY
}

/// Opaque per-stage configuration
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    pub controller: ControllerKind,
    pub properties: HashMap<String, String>,
}

impl StageConfig {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Static description of a stage
#[derive(Clone)]
pub struct StageDefinition {
    id: String,
    handler: Option<Arc<dyn EventHandler>>,
    config: StageConfig,
}

impl StageDefinition {
    pub fn new(id: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            id: id.into(),
            handler: Some(handler),
            config: StageConfig::default(),
        }
    }

    /// A definition without handler. `Dispatcher::start` rejects it.
    pub fn without_handler(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handler: None,
            config: StageConfig::default(),
        }
    }

    /// Builder: set the full stage config
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: set the controller kind
    pub fn with_controller(mut self, controller: ControllerKind) -> Self {
        self.config.controller = controller;
        self
    }

    /// Builder: add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.properties.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handler(&self) -> Option<&Arc<dyn EventHandler>> {
        self.handler.as_ref()
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("id", &self.id)
            .field("handler", &self.handler.is_some())
            .field("config", &self.config)
            .finish()
    }
}
