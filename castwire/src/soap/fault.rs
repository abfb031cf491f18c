//! UPnP fault extraction.
//!
//! A device rejects an action with an HTTP 500 whose body is a SOAP fault;
//! the UPnP error code sits inside `<detail><UPnPError>`. A fault is the
//! device's deliberate answer, so the caller must not retry it as if it were
//! a transport hiccup.

use xmltree::Element;

use super::SoapEnvelope;
use super::parser::{extract_child_text, find_child_with_suffix};

/// A UPnP fault returned by a device for a control action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpFault {
    /// SOAP fault code, usually `s:Client`.
    pub fault_code: String,
    /// SOAP fault string, usually `UPnPError`.
    pub fault_string: String,
    /// Numeric UPnP error code from the detail block, when present.
    pub error_code: Option<u32>,
    /// Human-readable description from the detail block.
    pub error_description: String,
}

impl UpnpFault {
    /// Short form for log lines, e.g. `"716 (Resource not found)"`.
    pub fn summary(&self) -> String {
        match self.error_code {
            Some(code) if !self.error_description.is_empty() => {
                format!("{code} ({})", self.error_description)
            }
            Some(code) => code.to_string(),
            None if !self.error_description.is_empty() => self.error_description.clone(),
            None => self.fault_string.clone(),
        }
    }
}

/// Well-known UPnP error codes from the AVTransport and RenderingControl
/// service specifications.
pub mod error_codes {
    pub const INVALID_ACTION: u32 = 401;
    pub const INVALID_ARGS: u32 = 402;
    pub const ACTION_FAILED: u32 = 501;
    pub const ARGUMENT_VALUE_INVALID: u32 = 600;
    pub const ARGUMENT_VALUE_OUT_OF_RANGE: u32 = 601;
    pub const TRANSITION_NOT_AVAILABLE: u32 = 701;
    pub const NO_CONTENTS: u32 = 702;
    pub const ILLEGAL_MIME_TYPE: u32 = 714;
    pub const CONTENT_BUSY: u32 = 715;
    pub const RESOURCE_NOT_FOUND: u32 = 716;
    pub const PLAY_SPEED_NOT_SUPPORTED: u32 = 717;
    pub const INVALID_INSTANCE_ID: u32 = 718;
}

/// Extract the UPnP fault from a parsed envelope, if its body is one.
pub fn parse_upnp_fault(envelope: &SoapEnvelope) -> Option<UpnpFault> {
    let fault_elem = envelope
        .body_element()
        .filter(|e| e.name.ends_with("Fault"))?;

    let fault_code = extract_child_text(fault_elem, "faultcode").unwrap_or_default();
    let fault_string = extract_child_text(fault_elem, "faultstring").unwrap_or_default();

    let (error_code, error_description) = match upnp_error_element(fault_elem) {
        Some(upnp_error) => (
            extract_child_text(upnp_error, "errorCode").and_then(|c| c.trim().parse().ok()),
            extract_child_text(upnp_error, "errorDescription").unwrap_or_default(),
        ),
        None => (None, String::new()),
    };

    Some(UpnpFault {
        fault_code,
        fault_string,
        error_code,
        error_description,
    })
}

fn upnp_error_element(fault: &Element) -> Option<&Element> {
    let detail = find_child_with_suffix(fault, "detail")?;
    find_child_with_suffix(detail, "UPnPError")
}
