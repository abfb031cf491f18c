//! Typed RenderingControl client.

use std::sync::Arc;

use crate::errors::ControlError;
use crate::model::RENDERING_CONTROL_SERVICE;
use crate::soap_client::SoapTransport;

pub struct RenderingControlClient {
    transport: Arc<dyn SoapTransport>,
}

impl RenderingControlClient {
    pub fn new(transport: Arc<dyn SoapTransport>) -> Self {
        Self { transport }
    }

    pub fn get_volume(&self, control_url: &str) -> Result<u8, ControlError> {
        let fields = self.transport.invoke(
            control_url,
            RENDERING_CONTROL_SERVICE,
            "GetVolume",
            &[("InstanceID", "0"), ("Channel", "Master")],
        )?;

        let raw = fields
            .get("CurrentVolume")
            .ok_or_else(|| ControlError::Parsing("GetVolume response without CurrentVolume".into()))?;
        raw.trim()
            .parse::<u16>()
            .map(|v| v.min(100) as u8)
            .map_err(|_| ControlError::Parsing(format!("non-numeric CurrentVolume: {raw}")))
    }

    /// Volume is validated before any I/O.
    pub fn set_volume(&self, control_url: &str, volume: u8) -> Result<(), ControlError> {
        if volume > 100 {
            return Err(ControlError::InvalidParameter(format!(
                "volume {volume} out of range 0..=100"
            )));
        }
        let value = volume.to_string();
        self.transport
            .invoke(
                control_url,
                RENDERING_CONTROL_SERVICE,
                "SetVolume",
                &[
                    ("InstanceID", "0"),
                    ("Channel", "Master"),
                    ("DesiredVolume", &value),
                ],
            )
            .map(|_| ())
    }

    pub fn get_mute(&self, control_url: &str) -> Result<bool, ControlError> {
        let fields = self.transport.invoke(
            control_url,
            RENDERING_CONTROL_SERVICE,
            "GetMute",
            &[("InstanceID", "0"), ("Channel", "Master")],
        )?;

        let raw = fields.get("CurrentMute").map(String::as_str).unwrap_or("0");
        Ok(matches!(raw.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
    }

    pub fn set_mute(&self, control_url: &str, mute: bool) -> Result<(), ControlError> {
        self.transport
            .invoke(
                control_url,
                RENDERING_CONTROL_SERVICE,
                "SetMute",
                &[
                    ("InstanceID", "0"),
                    ("Channel", "Master"),
                    ("DesiredMute", if mute { "1" } else { "0" }),
                ],
            )
            .map(|_| ())
    }
}
