//! Cache capacity presets.
//!
//! The engine is embedded in hosts ranging from phones to desktops; the host
//! reports a coarse memory tier and gets matching cache capacities back.

/// Coarse memory budget reported by the embedding host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryTier {
    Low,
    #[default]
    Medium,
    High,
}

/// Capacities for the engine's caches, in entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizing {
    /// Parsed device descriptions, keyed by description URL.
    pub descriptions: usize,
    /// Raw HTTP payloads (description documents, SCPD files).
    pub payloads: usize,
    /// Known-good control URLs, keyed by (device, service type).
    pub control_urls: usize,
}

impl CacheSizing {
    pub fn from_memory_tier(tier: MemoryTier) -> Self {
        match tier {
            MemoryTier::Low => Self {
                descriptions: 16,
                payloads: 8,
                control_urls: 32,
            },
            MemoryTier::Medium => Self {
                descriptions: 64,
                payloads: 32,
                control_urls: 128,
            },
            MemoryTier::High => Self {
                descriptions: 256,
                payloads: 128,
                control_urls: 512,
            },
        }
    }
}

impl Default for CacheSizing {
    fn default() -> Self {
        Self::from_memory_tier(MemoryTier::Medium)
    }
}
