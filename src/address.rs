// Fixed-width cluster address.
//
// On the wire an Address is always 18 bytes: a 16-byte IPv6 representation
// (IPv4 addresses are v4-mapped into the v6 shape) followed by a 16-bit
// port, little-endian. In memory we keep the natural `SocketAddr` and only
// deal in the 18-byte shape at the codec boundary.

use crate::error::{Result, SwimError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

pub const ADDRESS_WIRE_LEN: usize = 18;

/// A cluster member's network address: total order, usable as a map key, a
/// distinguished zero value, and a fixed 18-byte wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(SocketAddr);

impl Address {
    /// The distinguished zero value, used to detect uninitialized decode
    /// targets. Not a value a real member can construct (port 0 is
    /// forbidden by `new`).
    pub const ZERO: Address = Address(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0));

    /// Construct an address, rejecting the unspecified IP and port 0.
    pub fn new(addr: SocketAddr) -> Result<Self> {
        if addr.port() == 0 {
            return Err(SwimError::AddressInvalid("port 0 is forbidden".into()));
        }
        if addr.ip().is_unspecified() {
            return Err(SwimError::AddressInvalid("unspecified IP is forbidden".into()));
        }
        Ok(Address(addr))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Address::ZERO
    }

    /// Render the 18-byte wire shape: 16-byte v4-mapped-v6 IP followed by
    /// the port, little-endian.
    pub fn to_wire_bytes(&self) -> [u8; ADDRESS_WIRE_LEN] {
        let mut buf = [0u8; ADDRESS_WIRE_LEN];
        let v6 = match self.0.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        buf[0..16].copy_from_slice(&v6.octets());
        buf[16..18].copy_from_slice(&self.0.port().to_le_bytes());
        buf
    }

    /// Render the big-endian ordering representation: 16-byte v4-mapped-v6
    /// IP followed by the port, big-endian. Distinct from `to_wire_bytes`
    /// (whose port is little-endian) — the total order is defined over this
    /// representation, not the wire encoding.
    fn ordering_bytes(&self) -> [u8; ADDRESS_WIRE_LEN] {
        let mut buf = [0u8; ADDRESS_WIRE_LEN];
        let v6 = match self.0.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        buf[0..16].copy_from_slice(&v6.octets());
        buf[16..18].copy_from_slice(&self.0.port().to_be_bytes());
        buf
    }

    /// Parse the 18-byte wire shape. Does not reject the zero address —
    /// callers that need the "forbidden" invariant should validate with
    /// `new` after converting to a `SocketAddr`.
    pub fn from_wire_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < ADDRESS_WIRE_LEN {
            return Err(SwimError::BufferTooSmall(format!(
                "address requires {} bytes, got {}",
                ADDRESS_WIRE_LEN,
                buf.len()
            )));
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&buf[0..16]);
        let v6 = Ipv6Addr::from(octets);
        let port = u16::from_le_bytes([buf[16], buf[17]]);

        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };

        Ok(Address(SocketAddr::new(ip, port)))
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordering_bytes().cmp(&other.ordering_bytes())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = SwimError;

    fn from_str(s: &str) -> Result<Self> {
        let addr: SocketAddr = s
            .parse()
            .map_err(|e| SwimError::AddressInvalid(format!("{}: {}", s, e)))?;
        Address::new(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_port_zero() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        assert!(Address::new(addr).is_err());
    }

    #[test]
    fn rejects_unspecified_ip() {
        let addr: SocketAddr = "0.0.0.0:7000".parse().unwrap();
        assert!(Address::new(addr).is_err());
    }

    #[test]
    fn wire_round_trip_v4() {
        let addr = Address::new("127.0.0.1:7000".parse().unwrap()).unwrap();
        let bytes = addr.to_wire_bytes();
        assert_eq!(bytes.len(), ADDRESS_WIRE_LEN);
        let decoded = Address::from_wire_bytes(&bytes).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn wire_round_trip_v6() {
        let addr = Address::new("[::1]:7000".parse().unwrap()).unwrap();
        let bytes = addr.to_wire_bytes();
        let decoded = Address::from_wire_bytes(&bytes).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn total_order_is_byte_comparison() {
        let a = Address::new("10.0.0.1:1".parse().unwrap()).unwrap();
        let b = Address::new("10.0.0.2:1".parse().unwrap()).unwrap();
        assert!(a < b);
        assert_eq!(a.ordering_bytes().cmp(&b.ordering_bytes()), a.cmp(&b));
    }

    #[test]
    fn total_order_is_big_endian_not_wire_bytes() {
        // Port 1 must sort before port 256: the total order is over the
        // big-endian representation, not the little-endian wire bytes
        // (where port 1 is [01,00] and port 256 is [00,01], reversed).
        let a = Address::new("10.0.0.1:1".parse().unwrap()).unwrap();
        let b = Address::new("10.0.0.1:256".parse().unwrap()).unwrap();
        assert!(a < b);
    }
}
