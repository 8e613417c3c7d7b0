use std::net::{Ipv4Addr, UdpSocket};

/// Best-effort lookup of the machine's outbound IPv4 address.
///
/// Opens a UDP socket towards a public address (no packet is sent) and reads
/// the local address the OS picked for the route. Falls back to loopback when
/// the host has no route.
pub fn local_ipv4() -> Ipv4Addr {
    let resolved = UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("8.8.8.8:80")?;
            sock.local_addr()
        })
        .ok()
        .and_then(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        });
    resolved.unwrap_or(Ipv4Addr::LOCALHOST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ipv4_always_yields_an_address() {
        // On hosts without a route this degrades to 127.0.0.1.
        let ip = local_ipv4();
        assert!(!ip.is_unspecified());
    }
}
