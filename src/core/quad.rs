//! Direction-agnostic connection key.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use crate::packet::ProtocolView;

/// The two endpoints of a connection. `(A, B)` and `(B, A)` compare equal
/// and hash the same.
#[derive(Debug, Clone, Copy)]
pub struct Quad {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl Quad {
    pub fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        Self {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }
    }

    /// Build the quad of a decoded TCP or UDP frame.
    pub fn from_view(view: &ProtocolView<'_>) -> Option<Self> {
        let (src_ip, dst_ip) = view.ip_addresses()?;
        let (src_port, dst_port) = view.ports()?;
        Some(Self::new(src_ip, src_port, dst_ip, dst_port))
    }

    /// The same quad seen from the other end.
    pub fn reversed(&self) -> Self {
        Self::new(self.dst_ip, self.dst_port, self.src_ip, self.src_port)
    }
}

impl PartialEq for Quad {
    fn eq(&self, other: &Self) -> bool {
        (self.src_ip == other.src_ip
            && self.src_port == other.src_port
            && self.dst_ip == other.dst_ip
            && self.dst_port == other.dst_port)
            || (self.src_ip == other.dst_ip
                && self.src_port == other.dst_port
                && self.dst_ip == other.src_ip
                && self.dst_port == other.src_port)
    }
}

impl Eq for Quad {}

fn endpoint_hash(ip: &IpAddr, port: u16) -> u64 {
    let mut hasher = DefaultHasher::new();
    ip.hash(&mut hasher);
    port.hash(&mut hasher);
    hasher.finish()
}

/// Sum of the endpoint hashes, so swapping the endpoints leaves it unchanged.
impl Hash for Quad {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let sum = endpoint_hash(&self.src_ip, self.src_port)
            .wrapping_add(endpoint_hash(&self.dst_ip, self.dst_port));
        state.write_u64(sum);
    }
}
