//! Error taxonomy for control-plane operations.

use castwire::UpnpFault;
use thiserror::Error;

/// Everything a control operation can fail with.
///
/// The taxonomy matters more than the messages: the resilience layer retries
/// only [transient](ControlError::is_transient) kinds, and a
/// [`ProtocolFault`](ControlError::ProtocolFault) is a device's deliberate
/// answer that must never be retried.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    /// Connection refused, reset, unreachable, DNS failure.
    #[error("network error: {0}")]
    Network(String),

    /// The device did not answer within the deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The device answered with bytes we could not make sense of.
    #[error("parse error: {0}")]
    Parsing(String),

    /// Device-side problem that is not a SOAP fault: unknown device, missing
    /// service, circuit open, no session.
    #[error("device error: {0}")]
    Device(String),

    /// A SOAP fault returned by the device for a control action.
    #[error("UPnP fault {code:?}: {description}")]
    ProtocolFault {
        code: Option<u32>,
        description: String,
    },

    /// Caller handed us an out-of-range or malformed argument. Raised before
    /// any I/O happens.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ControlError {
    /// Transient errors are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, ControlError::Network(_) | ControlError::Timeout(_))
    }

    pub(crate) fn from_fault(fault: UpnpFault) -> Self {
        ControlError::ProtocolFault {
            code: fault.error_code,
            description: fault.summary(),
        }
    }
}

impl From<castwire::SoapParseError> for ControlError {
    fn from(err: castwire::SoapParseError) -> Self {
        ControlError::Parsing(err.to_string())
    }
}

impl From<castwire::DescriptionParseError> for ControlError {
    fn from(err: castwire::DescriptionParseError) -> Self {
        ControlError::Parsing(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_and_timeout_are_transient() {
        assert!(ControlError::Network("refused".into()).is_transient());
        assert!(ControlError::Timeout("5s".into()).is_transient());
        assert!(!ControlError::Parsing("bad xml".into()).is_transient());
        assert!(!ControlError::Device("gone".into()).is_transient());
        assert!(!ControlError::InvalidParameter("volume".into()).is_transient());
        assert!(
            !ControlError::ProtocolFault {
                code: Some(716),
                description: "Resource not found".into()
            }
            .is_transient()
        );
    }
}
