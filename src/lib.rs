//! seda-core - routing and lifecycle core of a staged event-driven architecture
//!
//! # Architecture
//!
//! ```text
//! caller → Dispatcher.execute(Event)
//!        → StageRegistry (stage id → RuntimeStage)
//!        → StageController (direct / pool)
//!        → EventHandler
//! ```
//!
//! ## Core Principles
//!
//! - The dispatcher only routes; controllers decide how handlers run
//! - The registry is built once per start and read lock-free
//! - Statistics are published through a pluggable `Monitor`
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Event, Message, StageDefinition, EventHandler
//! ├── controller/      # Execution controllers: direct, pool
//! ├── app/             # Dispatcher, RuntimeStage, Monitor, Runtime, stats API
//! ├── handlers.rs      # Built-in handlers and the handler registry
//! └── config.rs        # JSON configuration
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod controller;
pub mod app;

// Supporting modules
pub mod config;
pub mod handlers;

// Re-exports for convenience
pub use common::{
    ControllerKind, DispatcherAware, Event, EventHandler, Message, StageAware, StageConfig,
    StageDefinition,
};
pub use error::{Error, Result};
pub use config::Config;

// Architecture re-exports
pub use app::{Dispatcher, DispatcherBuilder, Monitor, RuntimeStage, Runtime};
pub use controller::{ControllerFactory, StageController};
