//! Core domain types: devices, services, states, events.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ControlError;
use crate::profile::DeviceProfile;

pub const AVTRANSPORT_SERVICE: &str = "urn:schemas-upnp-org:service:AVTransport:1";
pub const RENDERING_CONTROL_SERVICE: &str = "urn:schemas-upnp-org:service:RenderingControl:1";
pub const CONNECTION_MANAGER_SERVICE: &str = "urn:schemas-upnp-org:service:ConnectionManager:1";

/// Stable device identity, derived from the description-document URL.
///
/// UDNs rotate on some devices across reboots; the description URL does not.
/// Two announcements pointing at the same description URL are the same
/// device. The URL is normalized (lowercase scheme and host, default port
/// stripped) so cosmetic variations collapse to one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn from_description_url(location: &str) -> Result<Self, ControlError> {
        let url = Url::parse(location.trim())
            .map_err(|e| ControlError::Parsing(format!("bad LOCATION URL '{location}': {e}")))?;
        if !url.has_host() {
            return Err(ControlError::Parsing(format!(
                "LOCATION URL has no host: {location}"
            )));
        }
        // Url normalizes scheme/host case and drops default ports when
        // re-serialized, which is exactly the identity we want.
        Ok(DeviceId(url.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One UPnP service exposed by a device, URLs absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub service_type: String,
    pub service_id: String,
    pub control_url: String,
    pub event_sub_url: String,
}

/// A renderer known to the registry.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub udn: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    /// URL the description document was fetched from.
    pub description_url: String,
    pub services: Vec<Service>,
    pub profile: DeviceProfile,
    pub lifecycle: DeviceLifecycleState,
    pub first_seen: Instant,
    pub last_seen: Instant,
    /// Advertisement validity from CACHE-CONTROL max-age.
    pub max_age: Duration,
}

impl Device {
    pub fn service(&self, service_type: &str) -> Option<&Service> {
        // Match on the URN without the trailing version; devices advertise
        // AVTransport:1 and AVTransport:2 interchangeably.
        let wanted = strip_urn_version(service_type);
        self.services
            .iter()
            .find(|s| strip_urn_version(&s.service_type) == wanted)
    }

    pub fn has_av_transport(&self) -> bool {
        self.service(AVTRANSPORT_SERVICE).is_some()
    }
}

fn strip_urn_version(urn: &str) -> &str {
    urn.rsplit_once(':')
        .filter(|(_, v)| v.chars().all(|c| c.is_ascii_digit()))
        .map(|(head, _)| head)
        .unwrap_or(urn)
}

/// Where a device sits in its lifetime, from first SSDP sighting to removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceLifecycleState {
    Unknown,
    Discovered,
    Validated,
    Connected,
    Lost,
    Error,
    Removed,
}

impl DeviceLifecycleState {
    /// States shown in the active device list.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            DeviceLifecycleState::Lost
                | DeviceLifecycleState::Removed
                | DeviceLifecycleState::Error
        )
    }
}

impl fmt::Display for DeviceLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceLifecycleState::Unknown => "unknown",
            DeviceLifecycleState::Discovered => "discovered",
            DeviceLifecycleState::Validated => "validated",
            DeviceLifecycleState::Connected => "connected",
            DeviceLifecycleState::Lost => "lost",
            DeviceLifecycleState::Error => "error",
            DeviceLifecycleState::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Normalized playback state of a renderer's AVTransport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
    Buffering,
    Transitioning,
    Error,
}

impl PlaybackState {
    /// Map a raw `CurrentTransportState` value to a normalized state.
    ///
    /// Vendors are loose with these strings; unknown values become `Idle`
    /// rather than an error because a poll must never kill a session.
    pub fn from_upnp_state(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PLAYING" => PlaybackState::Playing,
            "PAUSED_PLAYBACK" | "PAUSED_RECORDING" | "PAUSED" => PlaybackState::Paused,
            "STOPPED" => PlaybackState::Stopped,
            "TRANSITIONING" => PlaybackState::Transitioning,
            "BUFFERING" => PlaybackState::Buffering,
            "NO_MEDIA_PRESENT" => PlaybackState::Idle,
            "RECORDING" => PlaybackState::Playing,
            "ERROR_OCCURRED" | "ERROR" => PlaybackState::Error,
            _ => PlaybackState::Idle,
        }
    }
}

/// Playback position snapshot from `GetPositionInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionInfo {
    pub position: Duration,
    pub duration: Duration,
}

/// Transport snapshot from `GetTransportInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    pub state: PlaybackState,
    pub status: String,
    pub speed: String,
}

/// Events fanned out to engine subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Set of known active devices changed.
    DeviceListChanged { ids: Vec<DeviceId> },
    /// One device's metadata or lifecycle state changed.
    DeviceUpdated { id: DeviceId },
    DeviceConnected { id: DeviceId },
    DeviceDisconnected { id: DeviceId },
    PlaybackStateChanged { id: DeviceId, state: PlaybackState },
    PositionChanged { id: DeviceId, info: PositionInfo },
    VolumeChanged { id: DeviceId, volume: u8, muted: bool },
    /// A non-fatal error worth surfacing to the host.
    Error { id: Option<DeviceId>, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_normalizes_cosmetic_url_differences() {
        let a = DeviceId::from_description_url("HTTP://Host.Local:80/desc.xml").unwrap();
        let b = DeviceId::from_description_url("http://host.local/desc.xml").unwrap();
        assert_eq!(a, b);

        let c = DeviceId::from_description_url("http://host.local:49152/desc.xml").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn device_id_rejects_garbage() {
        assert!(DeviceId::from_description_url("not a url").is_err());
        assert!(DeviceId::from_description_url("").is_err());
    }

    #[test]
    fn playback_state_normalizes_vendor_strings() {
        assert_eq!(PlaybackState::from_upnp_state("PLAYING"), PlaybackState::Playing);
        assert_eq!(PlaybackState::from_upnp_state("paused_playback"), PlaybackState::Paused);
        assert_eq!(PlaybackState::from_upnp_state(" STOPPED "), PlaybackState::Stopped);
        assert_eq!(PlaybackState::from_upnp_state("NO_MEDIA_PRESENT"), PlaybackState::Idle);
        assert_eq!(PlaybackState::from_upnp_state("VENDOR_WEIRDNESS"), PlaybackState::Idle);
    }

    #[test]
    fn service_lookup_ignores_urn_version() {
        let device = Device {
            id: DeviceId::from_description_url("http://h/d.xml").unwrap(),
            udn: "uuid:1".into(),
            friendly_name: "TV".into(),
            manufacturer: "Acme".into(),
            model_name: "X".into(),
            description_url: "http://h/d.xml".into(),
            services: vec![Service {
                service_type: "urn:schemas-upnp-org:service:AVTransport:2".into(),
                service_id: "urn:upnp-org:serviceId:AVTransport".into(),
                control_url: "http://h/avt".into(),
                event_sub_url: String::new(),
            }],
            profile: DeviceProfile::default(),
            lifecycle: DeviceLifecycleState::Discovered,
            first_seen: Instant::now(),
            last_seen: Instant::now(),
            max_age: Duration::from_secs(1800),
        };

        assert!(device.has_av_transport());
        assert!(device.service(RENDERING_CONTROL_SERVICE).is_none());
    }
}
