use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use get_if_addrs::get_if_addrs;
use tracing::warn;

/// Guess the local IP address of the machine.
///
/// Binds a UDP socket and "connects" it to a public address (no datagram is
/// ever sent; UDP connect only asks the kernel which interface would route
/// there), then reads back the socket's local address. Falls back to
/// `127.0.0.1` when the machine has no route at all.
pub fn guess_local_ip() -> IpAddr {
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip();
                }
            }
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        Err(err) => {
            warn!("Failed to bind probe socket: {}", err);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// All non-loopback IPv4 addresses of the machine, one per interface entry.
///
/// Used to join the SSDP multicast group on every usable interface. IPv6
/// addresses are skipped; SSDP discovery here is IPv4 only.
pub fn local_ipv4_interfaces() -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();

    match get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces {
                if let IpAddr::V4(ipv4) = iface.ip() {
                    if !ipv4.is_loopback() {
                        addrs.push(ipv4);
                    }
                }
            }
        }
        Err(err) => {
            warn!("Failed to enumerate network interfaces: {}", err);
        }
    }

    addrs
}
