//! Common types and abstractions
//!
//! This module defines the core types used throughout the crate:
//! - Event / Message: the routed unit of work
//! - StageDefinition: static stage description
//! - EventHandler: stage logic and its optional capabilities
//! - Error: unified error types

mod event;
mod stage;

pub use event::{Event, Message};
pub use stage::{
    ControllerKind, DispatcherAware, EventHandler, StageAware, StageConfig, StageDefinition,
    DEFAULT_POOL_QUEUE_CAPACITY, DEFAULT_POOL_WORKERS,
};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
