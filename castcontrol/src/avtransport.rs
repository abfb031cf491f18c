//! Typed AVTransport client.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::errors::ControlError;
use crate::model::{AVTRANSPORT_SERVICE, PlaybackState, PositionInfo, TransportInfo};
use crate::soap_client::SoapTransport;

/// AVTransport actions against one control URL.
///
/// InstanceID is always 0: the engine drives a single transport instance per
/// renderer, which is all consumer devices implement anyway.
pub struct AvTransportClient {
    transport: Arc<dyn SoapTransport>,
}

impl AvTransportClient {
    pub fn new(transport: Arc<dyn SoapTransport>) -> Self {
        Self { transport }
    }

    pub fn set_av_transport_uri(
        &self,
        control_url: &str,
        uri: &str,
        metadata: &str,
    ) -> Result<(), ControlError> {
        self.transport
            .invoke(
                control_url,
                AVTRANSPORT_SERVICE,
                "SetAVTransportURI",
                &[
                    ("InstanceID", "0"),
                    ("CurrentURI", uri),
                    ("CurrentURIMetaData", metadata),
                ],
            )
            .map(|_| ())
    }

    /// Queue the next track for gapless handover. Many renderers return
    /// error 401 here; callers treat that fault as a soft capability miss.
    pub fn set_next_av_transport_uri(
        &self,
        control_url: &str,
        uri: &str,
        metadata: &str,
    ) -> Result<(), ControlError> {
        self.transport
            .invoke(
                control_url,
                AVTRANSPORT_SERVICE,
                "SetNextAVTransportURI",
                &[
                    ("InstanceID", "0"),
                    ("NextURI", uri),
                    ("NextURIMetaData", metadata),
                ],
            )
            .map(|_| ())
    }

    pub fn play(&self, control_url: &str, speed: &str) -> Result<(), ControlError> {
        self.transport
            .invoke(
                control_url,
                AVTRANSPORT_SERVICE,
                "Play",
                &[("InstanceID", "0"), ("Speed", speed)],
            )
            .map(|_| ())
    }

    pub fn pause(&self, control_url: &str) -> Result<(), ControlError> {
        self.transport
            .invoke(
                control_url,
                AVTRANSPORT_SERVICE,
                "Pause",
                &[("InstanceID", "0")],
            )
            .map(|_| ())
    }

    pub fn stop(&self, control_url: &str) -> Result<(), ControlError> {
        self.transport
            .invoke(
                control_url,
                AVTRANSPORT_SERVICE,
                "Stop",
                &[("InstanceID", "0")],
            )
            .map(|_| ())
    }

    pub fn seek(&self, control_url: &str, position: Duration) -> Result<(), ControlError> {
        let target = format_hms(position);
        self.transport
            .invoke(
                control_url,
                AVTRANSPORT_SERVICE,
                "Seek",
                &[
                    ("InstanceID", "0"),
                    ("Unit", "REL_TIME"),
                    ("Target", &target),
                ],
            )
            .map(|_| ())
    }

    pub fn get_transport_info(&self, control_url: &str) -> Result<TransportInfo, ControlError> {
        let fields = self.transport.invoke(
            control_url,
            AVTRANSPORT_SERVICE,
            "GetTransportInfo",
            &[("InstanceID", "0")],
        )?;

        let raw_state = fields
            .get("CurrentTransportState")
            .map(String::as_str)
            .unwrap_or("");

        Ok(TransportInfo {
            state: PlaybackState::from_upnp_state(raw_state),
            status: fields
                .get("CurrentTransportStatus")
                .cloned()
                .unwrap_or_default(),
            speed: fields
                .get("CurrentSpeed")
                .cloned()
                .unwrap_or_else(|| "1".to_string()),
        })
    }

    pub fn get_position_info(&self, control_url: &str) -> Result<PositionInfo, ControlError> {
        let fields = self.transport.invoke(
            control_url,
            AVTRANSPORT_SERVICE,
            "GetPositionInfo",
            &[("InstanceID", "0")],
        )?;

        // RelTime and TrackDuration come back as "NOT_IMPLEMENTED" or empty
        // on plenty of devices; those read as zero rather than erroring.
        Ok(PositionInfo {
            position: parse_hms(fields.get("RelTime").map(String::as_str).unwrap_or("")),
            duration: parse_hms(
                fields
                    .get("TrackDuration")
                    .map(String::as_str)
                    .unwrap_or(""),
            ),
        })
    }
}

/// Format a duration as `H:MM:SS` for REL_TIME seek targets.
pub(crate) fn format_hms(d: Duration) -> String {
    let total = d.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Parse `H:MM:SS` (optionally with a fractional second part) into a
/// duration. Unparseable values, including `NOT_IMPLEMENTED`, read as zero.
pub(crate) fn parse_hms(raw: &str) -> Duration {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("NOT_IMPLEMENTED") {
        return Duration::ZERO;
    }

    let without_frac = raw.split('.').next().unwrap_or(raw);
    let parts: Vec<&str> = without_frac.split(':').collect();
    let parsed: Option<Vec<u64>> = parts.iter().map(|p| p.trim().parse().ok()).collect();

    match parsed.as_deref() {
        Some([h, m, s]) => Duration::from_secs(h * 3600 + m * 60 + s),
        Some([m, s]) => Duration::from_secs(m * 60 + s),
        Some([s]) => Duration::from_secs(*s),
        _ => {
            warn!(value = raw, "unparseable time value, reading as 0");
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap_client::testing::{FakeTransport, fields};

    #[test]
    fn hms_round_trip() {
        assert_eq!(format_hms(Duration::from_secs(3723)), "1:02:03");
        assert_eq!(parse_hms("1:02:03"), Duration::from_secs(3723));
        assert_eq!(parse_hms("0:03:42.500"), Duration::from_secs(222));
        assert_eq!(parse_hms("02:15"), Duration::from_secs(135));
        assert_eq!(parse_hms("NOT_IMPLEMENTED"), Duration::ZERO);
        assert_eq!(parse_hms(""), Duration::ZERO);
        assert_eq!(parse_hms("garbage"), Duration::ZERO);
    }

    #[test]
    fn transport_info_maps_raw_state() {
        let transport = Arc::new(FakeTransport::new(|action, _| {
            assert_eq!(action, "GetTransportInfo");
            Ok(fields(&[
                ("CurrentTransportState", "PAUSED_PLAYBACK"),
                ("CurrentTransportStatus", "OK"),
                ("CurrentSpeed", "1"),
            ]))
        }));

        let client = AvTransportClient::new(transport);
        let info = client.get_transport_info("http://h/avt").unwrap();
        assert_eq!(info.state, PlaybackState::Paused);
        assert_eq!(info.status, "OK");
    }

    #[test]
    fn position_info_tolerates_not_implemented() {
        let transport = Arc::new(FakeTransport::new(|_, _| {
            Ok(fields(&[
                ("RelTime", "0:01:10"),
                ("TrackDuration", "NOT_IMPLEMENTED"),
            ]))
        }));

        let client = AvTransportClient::new(transport);
        let info = client.get_position_info("http://h/avt").unwrap();
        assert_eq!(info.position, Duration::from_secs(70));
        assert_eq!(info.duration, Duration::ZERO);
    }

    #[test]
    fn seek_sends_rel_time_target() {
        let transport = Arc::new(FakeTransport::new(|action, args| {
            assert_eq!(action, "Seek");
            let target = args.iter().find(|(k, _)| *k == "Target").unwrap().1;
            assert_eq!(target, "0:02:05");
            let unit = args.iter().find(|(k, _)| *k == "Unit").unwrap().1;
            assert_eq!(unit, "REL_TIME");
            Ok(fields(&[]))
        }));

        let client = AvTransportClient::new(transport);
        client.seek("http://h/avt", Duration::from_secs(125)).unwrap();
    }
}
