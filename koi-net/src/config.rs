use serde::{Deserialize, Serialize};

use koi_types::constants::{
    DEFAULT_POLLING_INTERVAL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_INTERVAL,
    DEFAULT_RETRY_THRESHOLD, MAX_TIMESTAMP_SKEW,
};
use koi_types::rid::NodeRid;

/// The peer a fresh node reaches out to when it has no neighbors yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstContact {
    pub rid: NodeRid,
    pub url: String,
}

/// Configuration for the network core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Bootstrap peer, if any.
    #[serde(default)]
    pub first_contact: Option<FirstContact>,
    /// Per-request HTTP timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Interval between poll rounds on partial nodes (seconds).
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    /// Consecutive delivery failures to a peer before a fresh handshake.
    #[serde(default = "default_retry_threshold")]
    pub retry_threshold: u32,
    /// Delay before a failed webhook batch is retried (seconds).
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    /// Maximum accepted request timestamp age (seconds).
    #[serde(default = "default_max_timestamp_skew")]
    pub max_timestamp_skew: u64,
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL
}

fn default_retry_threshold() -> u32 {
    DEFAULT_RETRY_THRESHOLD
}

fn default_retry_interval() -> u64 {
    DEFAULT_RETRY_INTERVAL
}

fn default_max_timestamp_skew() -> u64 {
    MAX_TIMESTAMP_SKEW
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            first_contact: None,
            request_timeout: default_request_timeout(),
            polling_interval: default_polling_interval(),
            retry_threshold: default_retry_threshold(),
            retry_interval: default_retry_interval(),
            max_timestamp_skew: default_max_timestamp_skew(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert!(config.first_contact.is_none());
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.max_timestamp_skew, MAX_TIMESTAMP_SKEW);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
first_contact:
  rid: "orn:koi-net.node:seed+abc"
  url: "http://127.0.0.1:8000"
"#;
        let config: NetConfig = serde_yaml::from_str(yaml).unwrap();
        let fc = config.first_contact.unwrap();
        assert_eq!(fc.url, "http://127.0.0.1:8000");
        assert_eq!(fc.rid.name, "seed");
        assert_eq!(config.retry_threshold, DEFAULT_RETRY_THRESHOLD);
    }
}
