//! Configuration module for seda-core
//!
//! JSON configuration for a dispatcher and its stages:
//!
//! ```json
//! {
//!   "log": { "level": "info" },
//!   "api": { "listen": "127.0.0.1:9090" },
//!   "dispatcher": {
//!     "context": "demo",
//!     "strict_stage_resolution": true,
//!     "stages": [
//!       { "id": "entry", "handler": "forward", "properties": { "next": "print" },
//!         "controller": { "type": "pool", "workers": 2 } },
//!       { "id": "print", "handler": "log" }
//!     ]
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::{ControllerKind, StageConfig, StageDefinition};
use crate::error::{Error, Result};
use crate::handlers::{HandlerRegistry, NEXT_STAGE_PROPERTY};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Stats API configuration
    #[serde(default)]
    pub api: Option<ApiConfig>,

    /// Dispatcher and stages
    pub dispatcher: DispatcherConfig,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address for the stats API (e.g., "127.0.0.1:9090")
    pub listen: String,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Example configuration: a pooled forwarding stage feeding a log stage
    pub fn default_demo() -> Self {
        Config {
            log: LogConfig::default(),
            api: None,
            dispatcher: DispatcherConfig {
                context: "demo".to_string(),
                strict_stage_resolution: true,
                stages: vec![
                    StageEntry {
                        id: "entry".to_string(),
                        handler: "forward".to_string(),
                        controller: ControllerKind::pool(2, 256),
                        properties: HashMap::from([(
                            NEXT_STAGE_PROPERTY.to_string(),
                            "print".to_string(),
                        )]),
                    },
                    StageEntry {
                        id: "print".to_string(),
                        handler: "log".to_string(),
                        controller: ControllerKind::Direct,
                        properties: HashMap::new(),
                    },
                ],
            },
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Logical namespace, used in monitoring names
    pub context: String,

    /// Unknown stage ids raise an error instead of being dropped
    #[serde(default = "default_strict")]
    pub strict_stage_resolution: bool,

    /// Stages in start order
    #[serde(default)]
    pub stages: Vec<StageEntry>,
}

fn default_strict() -> bool {
    true
}

impl DispatcherConfig {
    /// Build stage definitions, instantiating handlers by name
    ///
    /// An unknown handler name yields a definition without handler, which
    /// `Dispatcher::start` reports as a configuration error.
    pub fn stage_definitions(&self, handlers: &HandlerRegistry) -> Vec<StageDefinition> {
        self.stages
            .iter()
            .map(|entry| entry.to_definition(handlers))
            .collect()
    }
}

/// One stage in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEntry {
    /// Unique stage id
    pub id: String,

    /// Handler name, resolved through the handler registry
    pub handler: String,

    /// Execution controller
    #[serde(default)]
    pub controller: ControllerKind,

    /// Free-form handler properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl StageEntry {
    pub fn to_definition(&self, handlers: &HandlerRegistry) -> StageDefinition {
        let config = StageConfig {
            controller: self.controller.clone(),
            properties: self.properties.clone(),
        };
        match handlers.create(&self.handler) {
            Some(handler) => StageDefinition::new(&self.id, handler).with_config(config),
            None => {
                warn!("Unknown handler [{}] for stage [{}]", self.handler, self.id);
                StageDefinition::without_handler(&self.id).with_config(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_demo_config() {
        let config = Config::default_demo();
        assert_eq!(config.dispatcher.context, "demo");
        assert_eq!(config.dispatcher.stages.len(), 2);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_demo();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed.dispatcher.stages.len(), config.dispatcher.stages.len());
        assert_eq!(parsed.dispatcher.stages[0].controller, ControllerKind::pool(2, 256));
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_json(
            r#"{ "dispatcher": { "context": "c", "stages": [ { "id": "a", "handler": "log" } ] } }"#,
        )
        .unwrap();
        assert_eq!(config.log.level, "info");
        assert!(config.api.is_none());
        assert!(config.dispatcher.strict_stage_resolution);
        assert_eq!(config.dispatcher.stages[0].controller, ControllerKind::Direct);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(Config::from_json("{"), Err(Error::Config(_))));
    }

    #[test]
    fn test_stage_definitions() {
        let config = Config::from_json(
            r#"{ "dispatcher": { "context": "c", "stages": [
                { "id": "a", "handler": "log", "properties": { "x": "1" } },
                { "id": "b", "handler": "unknown" }
            ] } }"#,
        )
        .unwrap();

        let defs = config
            .dispatcher
            .stage_definitions(&HandlerRegistry::with_builtins());
        assert_eq!(defs.len(), 2);
        assert!(defs[0].handler().is_some());
        assert_eq!(defs[0].config().property("x"), Some("1"));
        assert!(defs[1].handler().is_none());
    }
}
