//! # Node Configuration
//!
//! Externally owned settings consumed by the core. The core treats a
//! [`NodeConfig`] that passed [`NodeConfig::validate`] as already valid and
//! performs no further range checks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MAX_NEIGHBOR_COUNT;

/// Complete node configuration.
///
/// Deserializable from a JSON file; every field has a sane default so a
/// partial file (or none at all) yields a working local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// UDP bind host.
    pub host: String,
    /// UDP bind port.
    pub port: u16,
    /// Neighbor addresses as `host:port` strings. At most
    /// [`MAX_NEIGHBOR_COUNT`] entries.
    pub neighbors: Vec<String>,
    /// Maximum number of transactions kept in the store, sentinel included.
    pub tangle_capacity: usize,
    /// Absolute per-round transaction limit per neighbor. Traffic from a
    /// neighbor that exceeded this in the previous round is ignored.
    pub anti_spam_abs: u64,
    /// Lower bound of the random forwarding delay, in milliseconds.
    pub min_forward_delay_ms: u64,
    /// Upper bound of the random forwarding delay, in milliseconds.
    pub max_forward_delay_ms: u64,
    /// Duration of one statistics round, in milliseconds.
    pub round_duration_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1337,
            neighbors: Vec::new(),
            tangle_capacity: 10_000,
            anti_spam_abs: 1_000,
            min_forward_delay_ms: 0,
            max_forward_delay_ms: 200,
            round_duration_ms: 60_000,
        }
    }
}

impl NodeConfig {
    /// Check invariants the core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.neighbors.len() > MAX_NEIGHBOR_COUNT {
            return Err(ConfigError::TooManyNeighbors {
                count: self.neighbors.len(),
            });
        }
        if self.min_forward_delay_ms > self.max_forward_delay_ms {
            return Err(ConfigError::InvalidForwardDelay {
                min: self.min_forward_delay_ms,
                max: self.max_forward_delay_ms,
            });
        }
        if self.tangle_capacity < 2 {
            // Room for the sentinel plus at least one real transaction.
            return Err(ConfigError::CapacityTooSmall {
                capacity: self.tangle_capacity,
            });
        }
        if self.round_duration_ms == 0 {
            return Err(ConfigError::ZeroRoundDuration);
        }
        Ok(())
    }

    /// The socket address string this node binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration rejected by [`NodeConfig::validate`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{count} neighbors configured, at most {MAX_NEIGHBOR_COUNT} supported")]
    TooManyNeighbors { count: usize },

    #[error("min_forward_delay_ms ({min}) exceeds max_forward_delay_ms ({max})")]
    InvalidForwardDelay { min: u64, max: u64 },

    #[error("tangle_capacity {capacity} too small, need at least 2")]
    CapacityTooSmall { capacity: usize },

    #[error("round_duration_ms must be positive")]
    ZeroRoundDuration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_too_many_neighbors() {
        let config = NodeConfig {
            neighbors: vec![
                "a:1".into(),
                "b:2".into(),
                "c:3".into(),
                "d:4".into(),
            ],
            ..NodeConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyNeighbors { count: 4 })
        );
    }

    #[test]
    fn rejects_inverted_forward_delays() {
        let config = NodeConfig {
            min_forward_delay_ms: 300,
            max_forward_delay_ms: 200,
            ..NodeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidForwardDelay { min: 300, max: 200 })
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: NodeConfig = serde_json::from_str(r#"{"port": 14265}"#).unwrap();
        assert_eq!(config.port, 14265);
        assert_eq!(config.tangle_capacity, 10_000);
        config.validate().unwrap();
    }
}
