use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Address of the interface that would carry outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick a route.
/// Falls back to loopback on hosts without one.
pub fn local_address() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            log::debug!("no outbound route, using loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Host part of a URL for `ip`.
pub fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    #[test]
    fn test_local_address_is_usable() {
        assert!(!local_address().is_unspecified());
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))), "10.0.0.2");
        assert_eq!(url_host(IpAddr::V6(Ipv6Addr::LOCALHOST)), "[::1]");
    }
}
