//! # castwire - UPnP wire codec
//!
//! Pure, stateless translation between wire bytes and typed structures for
//! the casting engine:
//!
//! - SSDP datagrams (M-SEARCH requests, search responses, NOTIFY messages)
//! - Device description XML (friendlyName, services, control URLs)
//! - SOAP 1.1 envelopes (action requests, responses, UPnP faults)
//! - DIDL-Lite media metadata
//!
//! No sockets, no HTTP, no shared state. Every parser returns a typed error
//! for malformed input instead of panicking, so callers decide whether a bad
//! datagram is fatal or just noise.

pub mod description;
pub mod didl;
mod escape;
pub mod soap;
pub mod ssdp;

pub use description::{
    DescriptionParseError, DeviceDescription, ServiceDescription, build_device_description_xml,
    parse_device_description,
};
pub use didl::{DidlLite, DidlVariant, build_didl_metadata};
pub use escape::escape_xml;
pub use soap::{SoapEnvelope, SoapParseError, UpnpFault, build_soap_request, parse_soap_envelope};
pub use ssdp::{SsdpMessage, SsdpParseError, build_msearch, parse_ssdp_message};
