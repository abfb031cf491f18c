//! SSDP wire format: M-SEARCH construction and datagram parsing.
//!
//! Only the control-point side lives here. The engine never answers
//! M-SEARCH queries from other control points; it is not a UPnP device.

mod message;

pub use message::{SsdpMessage, SsdpParseError, build_msearch, parse_ssdp_message};

/// SSDP multicast address.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// SSDP port.
pub const SSDP_PORT: u16 = 1900;

/// Default advertisement validity when CACHE-CONTROL is absent or broken
/// (seconds).
pub const DEFAULT_MAX_AGE: u32 = 1800;
