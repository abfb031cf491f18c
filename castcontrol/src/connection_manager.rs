//! Typed ConnectionManager client.
//!
//! Only `GetProtocolInfo` is used: the sink list tells us which MIME types a
//! renderer claims to accept before we hand it a URL.

use std::sync::Arc;

use crate::errors::ControlError;
use crate::model::CONNECTION_MANAGER_SERVICE;
use crate::soap_client::SoapTransport;

/// Protocol support advertised by a renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// protocolInfo entries the device can produce.
    pub source: Vec<String>,
    /// protocolInfo entries the device can consume.
    pub sink: Vec<String>,
}

impl ProtocolInfo {
    /// True when any sink entry covers the MIME type.
    pub fn accepts_mime(&self, mime: &str) -> bool {
        self.sink.iter().any(|entry| {
            let mut parts = entry.split(':');
            let _protocol = parts.next();
            let _network = parts.next();
            match parts.next() {
                Some("*") => true,
                Some(entry_mime) => entry_mime.eq_ignore_ascii_case(mime),
                None => false,
            }
        })
    }
}

pub struct ConnectionManagerClient {
    transport: Arc<dyn SoapTransport>,
}

impl ConnectionManagerClient {
    pub fn new(transport: Arc<dyn SoapTransport>) -> Self {
        Self { transport }
    }

    pub fn get_protocol_info(&self, control_url: &str) -> Result<ProtocolInfo, ControlError> {
        let fields = self.transport.invoke(
            control_url,
            CONNECTION_MANAGER_SERVICE,
            "GetProtocolInfo",
            &[],
        )?;

        Ok(ProtocolInfo {
            source: split_protocol_list(fields.get("Source").map(String::as_str).unwrap_or("")),
            sink: split_protocol_list(fields.get("Sink").map(String::as_str).unwrap_or("")),
        })
    }
}

fn split_protocol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
