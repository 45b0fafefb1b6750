use std::path::Path;

use serde::{Deserialize, Serialize};

use koi_net::config::NetConfig;
use koi_types::constants::DEFAULT_SERVER_PORT;
use koi_types::node::{NodeProvides, NodeType};

use crate::error::NodeError;

/// A node's YAML configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name half of this node's RID (the uuid half comes from its key).
    pub node_name: String,
    pub node_type: NodeType,
    /// URL peers use to reach this node. Required for full nodes.
    #[serde(default)]
    pub base_url: Option<String>,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    /// Path to the private key file, created on first run.
    pub private_key_path: String,
    /// Name of an environment variable holding the key file password.
    /// Unset means the key file is stored unencrypted.
    #[serde(default)]
    pub private_key_password_env: Option<String>,
    /// RID types this node offers to the network.
    #[serde(default)]
    pub provides: NodeProvides,
    #[serde(default)]
    pub koi_net: NetConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache backend: "memory" or "sqlite".
    pub backend: String,
    /// Database path for the sqlite backend.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "koi-node".to_string(),
            node_type: NodeType::Full,
            base_url: Some(format!("http://127.0.0.1:{DEFAULT_SERVER_PORT}")),
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: DEFAULT_SERVER_PORT,
            },
            cache: CacheConfig {
                backend: "sqlite".to_string(),
                path: "koi-cache.db".to_string(),
            },
            private_key_path: "koi-node.pem".to_string(),
            private_key_password_env: None,
            provides: NodeProvides::default(),
            koi_net: NetConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl NodeConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: NodeConfig =
            serde_yaml::from_str(&contents).map_err(|e| NodeError::ConfigError {
                reason: format!("failed to parse config file '{}': {}", path, e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config at `path`, generating and writing the default one if
    /// the file does not exist yet.
    pub fn load_or_init(path: &str) -> Result<Self, NodeError> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            let config = NodeConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Write this configuration to a YAML file.
    pub fn save(&self, path: &str) -> Result<(), NodeError> {
        let yaml = serde_yaml::to_string(self).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to serialize config: {}", e),
        })?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Sanity checks that don't require the network.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.node_name.is_empty() {
            return Err(NodeError::ConfigError {
                reason: "node_name must not be empty".to_string(),
            });
        }
        if self.node_type == NodeType::Full && self.base_url.is_none() {
            return Err(NodeError::ConfigError {
                reason: "full nodes require a base_url".to_string(),
            });
        }
        match self.cache.backend.as_str() {
            "memory" | "sqlite" => Ok(()),
            other => Err(NodeError::ConfigError {
                reason: format!("unknown cache backend '{}', expected 'memory' or 'sqlite'", other),
            }),
        }
    }

    /// The key file password, read from the configured environment
    /// variable.
    pub fn key_password(&self) -> Option<String> {
        self.private_key_password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koi_types::rid::RidType;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, DEFAULT_SERVER_PORT);
        assert_eq!(config.cache.backend, "sqlite");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = NodeConfig::default();
        config.provides.event = vec![RidType::Node, RidType::Other("example.doc".to_string())];
        let yaml = serde_yaml::to_string(&config).unwrap();
        let decoded: NodeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(decoded.node_name, config.node_name);
        assert_eq!(decoded.provides.event, config.provides.event);
    }

    #[test]
    fn test_load_or_init_writes_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        let path = path.to_str().unwrap();

        let config = NodeConfig::load_or_init(path).unwrap();
        assert!(Path::new(path).exists());

        let reloaded = NodeConfig::load(path).unwrap();
        assert_eq!(reloaded.node_name, config.node_name);
    }

    #[test]
    fn test_full_node_requires_base_url() {
        let mut config = NodeConfig::default();
        config.base_url = None;
        assert!(config.validate().is_err());

        config.node_type = NodeType::Partial;
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_cache_backend_rejected() {
        let mut config = NodeConfig::default();
        config.cache.backend = "rocksdb".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(NodeConfig::load("/nonexistent/koi.yaml").is_err());
    }
}
