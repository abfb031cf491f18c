//! # castcontrol - UPnP/DLNA control plane
//!
//! Discovers media renderers over SSDP, keeps them in a deduplicating,
//! expiring registry, and drives playback through SOAP control sessions with
//! retry, single-flight and per-device circuit breaking.
//!
//! The entry point is [`CastEngine`]: construct one with an
//! [`EngineConfig`] and the host capabilities from [`host`], start it, run a
//! search, then [`connect`](CastEngine::connect) to a device and control it
//! through the returned [`ControlSession`].

pub mod avtransport;
pub mod config;
pub mod connection_manager;
pub mod control_point;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod events;
pub mod host;
pub mod model;
pub mod profile;
pub mod registry;
pub mod rendering_control;
pub mod resilience;
pub mod soap_client;
pub mod state;

pub use config::{ControlConfig, DiscoveryConfig, EngineConfig, MemoryTierConfig, RegistryConfig};
pub use control_point::ControlSession;
pub use engine::{CastEngine, EngineDeps};
pub use errors::ControlError;
pub use host::{FileSource, KvStore, MediaRead, NetworkInfo};
pub use model::{
    Device, DeviceId, DeviceLifecycleState, EngineEvent, PlaybackState, PositionInfo,
    TransportInfo,
};
pub use profile::DeviceProfile;
