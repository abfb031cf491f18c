//! Small network helpers shared by the casting engine.
//!
//! Nothing in here talks UPnP; these are the host-side utilities needed to
//! pick multicast interfaces and to build URLs a renderer can reach.

mod ip_utils;

pub use ip_utils::{guess_local_ip, local_ipv4_interfaces};
