//! Configuration for agents and postmen.

use uuid::Uuid;

/// Agent settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifies this agent towards the platform. A fresh uuid by default.
    pub instance_id: String,
    /// Template version used when a registered node does not set `"version"`.
    pub default_version: String,
    /// Replay the platform's outstanding provisions and assignations on start.
    pub catch_up: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            default_version: "main".to_string(),
            catch_up: true,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_default_version(mut self, version: impl Into<String>) -> Self {
        self.default_version = version.into();
        self
    }

    pub fn with_catch_up(mut self, catch_up: bool) -> Self {
        self.catch_up = catch_up;
        self
    }
}

/// Postman settings.
#[derive(Debug, Clone)]
pub struct PostmanConfig {
    /// Waiter identifier the update subscriptions are opened with.
    pub watch_identifier: String,
}

impl Default for PostmanConfig {
    fn default() -> Self {
        Self {
            watch_identifier: "default".to_string(),
        }
    }
}

impl PostmanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watch_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.watch_identifier = identifier.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.default_version, "main");
        assert!(config.catch_up);
        assert_ne!(config.instance_id, AgentConfig::default().instance_id);
        assert_eq!(PostmanConfig::default().watch_identifier, "default");
    }

    #[test]
    fn test_builders() {
        let config = AgentConfig::new()
            .with_instance_id("agent-1")
            .with_catch_up(false);
        assert_eq!(config.instance_id, "agent-1");
        assert!(!config.catch_up);
    }
}
