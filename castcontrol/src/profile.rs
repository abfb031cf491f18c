//! Vendor device profiles.
//!
//! Renderers deviate from the UPnP spec in vendor-specific ways: some want
//! richer DIDL-Lite metadata than others, and some serve their real control
//! endpoints on paths their description document does not mention. The
//! profile captures those quirks so the rest of the engine stays generic.

use serde::{Deserialize, Serialize};

use castwire::DidlVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    #[default]
    Generic,
    SamsungTv,
    LgTv,
    SonyBravia,
    Sonos,
    Kodi,
}

impl DeviceProfile {
    /// Resolve a profile from description-document identity fields.
    pub fn detect(manufacturer: &str, model_name: &str) -> Self {
        let manufacturer = manufacturer.to_ascii_lowercase();
        let model = model_name.to_ascii_lowercase();

        if manufacturer.contains("samsung") {
            DeviceProfile::SamsungTv
        } else if manufacturer.contains("lg electronics") || manufacturer.contains("lge") {
            DeviceProfile::LgTv
        } else if manufacturer.contains("sony") && model.contains("bravia") {
            DeviceProfile::SonyBravia
        } else if manufacturer.contains("sonos") {
            DeviceProfile::Sonos
        } else if manufacturer.contains("xbmc") || model.contains("kodi") {
            DeviceProfile::Kodi
        } else {
            DeviceProfile::Generic
        }
    }

    /// How rich a DIDL-Lite document this vendor wants.
    pub fn didl_variant(self) -> DidlVariant {
        match self {
            // Samsung and LG TVs refuse to show titles, and some models
            // refuse to play at all, without the DLNA attributes.
            DeviceProfile::SamsungTv | DeviceProfile::LgTv => DidlVariant::DlnaExtended,
            DeviceProfile::Kodi => DidlVariant::Minimal,
            _ => DidlVariant::Standard,
        }
    }

    /// Well-known control paths tried when the advertised control URL is
    /// wrong or missing, in order. Relative to the device root.
    pub fn control_url_fallbacks(self, service_type: &str) -> &'static [&'static str] {
        let is_avt = service_type.contains("AVTransport");
        match (self, is_avt) {
            (DeviceProfile::SamsungTv, true) => &[
                "/upnp/control/AVTransport1",
                "/smp_4_",
            ],
            (DeviceProfile::SamsungTv, false) => &[
                "/upnp/control/RenderingControl1",
                "/smp_6_",
            ],
            (DeviceProfile::LgTv, true) => &["/upnp/control/AVTransport1"],
            (DeviceProfile::SonyBravia, true) => &["/upnp/control/AVTransport"],
            (DeviceProfile::Sonos, true) => &["/MediaRenderer/AVTransport/Control"],
            (DeviceProfile::Sonos, false) => &["/MediaRenderer/RenderingControl/Control"],
            (DeviceProfile::Kodi, true) => &["/AVTransport/control"],
            _ => &[],
        }
    }
}
