//! Engine configuration.
//!
//! One explicit struct handed to [`crate::engine::CastEngine`] at
//! construction. Every field has a sensible default; hosts override what
//! they need, or load the whole thing from YAML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use castcache::MemoryTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub discovery: DiscoveryConfig,
    pub registry: RegistryConfig,
    pub control: ControlConfig,
    pub memory_tier: MemoryTierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// SSDP search targets, queried in order each search round.
    pub search_targets: Vec<String>,
    /// Total listen time for one search round, seconds.
    pub search_timeout_secs: u64,
    /// M-SEARCH repeat count per round.
    pub msearch_repeats: u32,
    /// Dedup window for repeated (LOCATION, USN) announcements, milliseconds.
    pub dedup_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum devices kept; least-recently-updated evicted above this.
    pub max_devices: usize,
    /// Notification coalescing window, milliseconds.
    pub notify_window_ms: u64,
    /// Sweep interval for expiry checks, seconds.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Per-action SOAP timeout, seconds.
    pub action_timeout_secs: u64,
    /// Volume/mute read cache lifetime, milliseconds.
    pub volume_cache_ms: u64,
    /// Position read cache lifetime, milliseconds.
    pub position_cache_ms: u64,
    /// Consecutive failures before the per-device circuit opens.
    pub circuit_failure_threshold: u32,
    /// Poll interval while a session is connected, seconds.
    pub poll_interval_secs: u64,
    /// Silence past this moves a connected device to lost, seconds.
    pub lost_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTierConfig {
    Low,
    Medium,
    High,
}

impl From<MemoryTierConfig> for MemoryTier {
    fn from(tier: MemoryTierConfig) -> Self {
        match tier {
            MemoryTierConfig::Low => MemoryTier::Low,
            MemoryTierConfig::Medium => MemoryTier::Medium,
            MemoryTierConfig::High => MemoryTier::High,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            registry: RegistryConfig::default(),
            control: ControlConfig::default(),
            memory_tier: MemoryTierConfig::Medium,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_targets: vec![
                "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
                "ssdp:all".to_string(),
            ],
            search_timeout_secs: 5,
            msearch_repeats: 3,
            dedup_window_ms: 500,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_devices: 64,
            notify_window_ms: 400,
            sweep_interval_secs: 10,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 5,
            volume_cache_ms: 5_000,
            position_cache_ms: 3_000,
            circuit_failure_threshold: 5,
            poll_interval_secs: 1,
            lost_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.control.action_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.discovery.dedup_window_ms)
    }

    pub fn notify_window(&self) -> Duration {
        Duration::from_millis(self.registry.notify_window_ms)
    }

    pub fn volume_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.control.volume_cache_ms)
    }

    pub fn position_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.control.position_cache_ms)
    }

    pub fn lost_timeout(&self) -> Duration {
        Duration::from_secs(self.control.lost_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let config = EngineConfig::default();
        assert_eq!(config.registry.max_devices, 64);
        assert_eq!(config.dedup_window(), Duration::from_millis(500));
        assert_eq!(config.notify_window(), Duration::from_millis(400));
        assert_eq!(config.control.circuit_failure_threshold, 5);
    }

    #[test]
    fn partial_yaml_keeps_defaults_elsewhere() {
        let yaml = r#"
registry:
  max_devices: 8
control:
  volume_cache_ms: 2000
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.registry.max_devices, 8);
        assert_eq!(config.volume_cache_ttl(), Duration::from_millis(2000));
        // Untouched sections fall back to defaults.
        assert_eq!(config.discovery.msearch_repeats, 3);
        assert_eq!(config.control.lost_timeout_secs, 30);
    }
}
