//! SOAP 1.1 over HTTP, as UPnP control uses it.
//!
//! A control point POSTs an action envelope to a service's control URL with a
//! `SOAPACTION` header, and gets back either an `<u:ActionResponse>` body or
//! an `<s:Fault>` carrying a UPnP error code. This module builds the former
//! and parses both; the HTTP transport lives with the caller.

mod builder;
mod envelope;
mod fault;
mod parser;

pub use builder::{build_soap_request, soap_action_header};
pub use envelope::{SoapBody, SoapEnvelope};
pub use fault::{UpnpFault, error_codes, parse_upnp_fault};
pub use parser::{SoapParseError, parse_soap_envelope};
