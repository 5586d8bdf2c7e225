// Scenario Configuration
//
// Every section and field has a default, so a scenario file only lists what
// it changes.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        return Ok(());
    }
    Err(ConfigError::OutOfRange {
        field,
        expected: "a finite non-negative number",
        value,
    })
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        return Ok(());
    }
    Err(ConfigError::OutOfRange {
        field,
        expected: "a finite number",
        value,
    })
}

// ============================================================================
// Main Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub run: RunConfig,
    pub network: NetworkConfig,
    pub nodes: NodeConfig,
    pub users: UserConfig,
    pub upload: UploadConfig,
    pub query: QueryConfig,
}

impl ScenarioConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Read, parse and validate a scenario file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml = fs::read_to_string(path)?;
        let config = Self::from_yaml(&yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("run.duration_secs", self.run.duration_secs)?;
        non_negative("run.warmup_secs", self.run.warmup_secs)?;

        let bandwidth = self.network.bandwidth;
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "network.bandwidth",
                expected: "a finite positive number",
                value: bandwidth,
            });
        }

        non_negative("nodes.data_lifetime_secs", self.nodes.data_lifetime_secs)?;
        non_negative("users.startup_mean_secs", self.users.startup_mean_secs)?;
        non_negative("users.online_mean_secs", self.users.online_mean_secs)?;
        non_negative("users.query_timeout_secs", self.users.query_timeout_secs)?;
        non_negative("upload.interval_mean_secs", self.upload.interval_mean_secs)?;
        finite("upload.min_size", self.upload.min_size)?;
        finite("upload.max_size", self.upload.max_size)?;
        finite("upload.min_attraction", self.upload.min_attraction)?;
        finite("upload.max_attraction", self.upload.max_attraction)?;
        non_negative("query.interval_mean_secs", self.query.interval_mean_secs)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioMeta {
    pub name: Option<String>,
    pub description: Option<String>,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Seeds the shared RNG and the id generator
    pub seed: u64,

    /// Simulated time until the run stops
    pub duration_secs: f64,

    /// Samples are discarded until this point
    pub warmup_secs: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            duration_secs: 600.0,
            warmup_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub latency_ms: u64,

    /// Bytes per second
    pub bandwidth: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency_ms: 50,
            bandwidth: 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// One user is bound to each node
    pub count: usize,

    /// Bytes
    pub storage_capacity: u64,

    /// Random links each node opens; links are bidirectional
    pub connections_per_node: usize,

    /// Stored data expires this long after arrival
    pub data_lifetime_secs: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            count: 20,
            storage_capacity: 1 << 20,
            connections_per_node: 3,
            data_lifetime_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub startup_mean_secs: f64,
    pub online_mean_secs: f64,
    pub query_timeout_secs: f64,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            startup_mean_secs: 10.0,
            online_mean_secs: 120.0,
            query_timeout_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub interval_mean_secs: f64,
    pub min_size: f64,
    pub max_size: f64,
    pub max_chunk_size: u64,
    /// Share of the other users attracted to each upload
    pub min_attraction: f64,
    pub max_attraction: f64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            interval_mean_secs: 30.0,
            min_size: 1024.0,
            max_size: 65_536.0,
            max_chunk_size: 65_536,
            min_attraction: 0.1,
            max_attraction: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub interval_mean_secs: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            interval_mean_secs: 5.0,
        }
    }
}
