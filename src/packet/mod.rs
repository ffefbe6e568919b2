//! Layered protocol decoding over a captured frame.
//!
//! A [`ProtocolView`] is a flat stack of [`Layer`] entries (protocol, start,
//! span) projected over a [`FrameBuffer`]. It never copies the frame. Field
//! accessors build a typed view (`Arp`, `Tcp`, ...) over the layer's bytes
//! on demand, so an edit made through one accessor is visible to the next.
//!
//! Decoding walks one layer at a time. A frame that is truncated or carries
//! an unknown protocol simply stops at the last layer that fits.

pub mod arp;
pub mod dns;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;

#[cfg(test)]
pub(crate) mod test_frames;

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::core::frame::{Direction, FrameBuffer};
use crate::error::DecodeError;

pub use arp::Arp;
pub use dns::Dns;
pub use ethernet::Ethernet;
pub use icmp::Icmp;
pub use ipv4::Ipv4;
pub use ipv6::Ipv6;
pub use tcp::Tcp;
pub use udp::Udp;

/// Big-endian u16 at `offset`. Callers guarantee `offset + 2 <= buf.len()`.
pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolTag {
    RawEthernet,
    /// Inner Ethernet header carried behind the vendor tag EtherType.
    TaggedEthernet,
    Arp,
    Ipv4,
    Ipv6,
    Icmp,
    Tcp,
    Udp,
    Dns,
}

/// One decoded layer: `start + span` never exceeds the frame length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layer {
    pub protocol: ProtocolTag,
    pub start: u32,
    pub span: u32,
}

impl Layer {
    pub fn end(&self) -> u32 {
        self.start + self.span
    }

    fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end() as usize
    }
}

/// Decoded view of one frame. Borrowing the frame mutably ties the view to
/// the capture cycle that owns the buffer.
pub struct ProtocolView<'a> {
    frame: &'a mut FrameBuffer,
    layers: Vec<Layer>,
}

impl<'a> ProtocolView<'a> {
    /// Build the base Ethernet layer only. Frames shorter than an Ethernet
    /// header get a base layer covering what is there.
    pub fn new(frame: &'a mut FrameBuffer) -> Self {
        let span = frame.len().min(ethernet::HEADER_LEN as u32);
        Self {
            frame,
            layers: vec![Layer {
                protocol: ProtocolTag::RawEthernet,
                start: 0,
                span,
            }],
        }
    }

    /// Build and fully decode.
    pub fn decode(frame: &'a mut FrameBuffer) -> Self {
        let mut view = Self::new(frame);
        view.decode_fully();
        view
    }

    pub fn frame(&self) -> &FrameBuffer {
        self.frame
    }

    pub fn direction(&self) -> Direction {
        self.frame.direction()
    }

    pub fn len(&self) -> u32 {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Raw frame bytes.
    pub fn bytes(&self) -> &[u8] {
        self.frame.as_slice()
    }

    /// Raw frame bytes for in-place edits. The frame length is fixed.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.frame.as_mut_slice()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn top(&self) -> Layer {
        // The base layer is never removed.
        self.layers[self.layers.len() - 1]
    }

    /// Protocol of the outermost decoded layer.
    pub fn highest(&self) -> ProtocolTag {
        self.top().protocol
    }

    pub fn contains(&self, protocol: ProtocolTag) -> bool {
        self.layers.iter().any(|l| l.protocol == protocol)
    }

    /// Innermost layer with the given protocol.
    pub fn layer(&self, protocol: ProtocolTag) -> Option<Layer> {
        self.layers.iter().rev().find(|l| l.protocol == protocol).copied()
    }

    fn layer_bytes(&self, layer: Layer) -> &[u8] {
        &self.frame.as_slice()[layer.range()]
    }

    fn layer_bytes_mut(&mut self, layer: Layer) -> &mut [u8] {
        &mut self.frame.as_mut_slice()[layer.range()]
    }

    fn require(&self, protocol: ProtocolTag) -> Result<Layer, DecodeError> {
        self.layer(protocol).ok_or(DecodeError::ProtocolMismatch {
            expected: protocol,
            found: self.highest(),
        })
    }

    /// Which protocol the top layer says comes next, if any.
    pub fn next_protocol(&self) -> Option<ProtocolTag> {
        let top = self.top();
        let bytes = self.layer_bytes(top);
        match top.protocol {
            ProtocolTag::RawEthernet | ProtocolTag::TaggedEthernet => {
                match Ethernet::new_checked(bytes).ok()?.ether_type() {
                    ethernet::ETHERTYPE_IPV4 => Some(ProtocolTag::Ipv4),
                    ethernet::ETHERTYPE_IPV6 => Some(ProtocolTag::Ipv6),
                    ethernet::ETHERTYPE_ARP => Some(ProtocolTag::Arp),
                    ethernet::ETHERTYPE_TAGGED | ethernet::ETHERTYPE_TAGGED_SWAPPED => {
                        Some(ProtocolTag::TaggedEthernet)
                    }
                    _ => None,
                }
            }
            ProtocolTag::Ipv4 => transport_tag(Ipv4::new_checked(bytes).ok()?.protocol()),
            ProtocolTag::Ipv6 => transport_tag(Ipv6::new_checked(bytes).ok()?.upper_protocol()),
            ProtocolTag::Udp => Udp::new_checked(bytes)
                .ok()?
                .is_dns()
                .then_some(ProtocolTag::Dns),
            ProtocolTag::Arp | ProtocolTag::Icmp | ProtocolTag::Tcp | ProtocolTag::Dns => None,
        }
    }

    /// Push `protocol` on top of the stack.
    ///
    /// Fails with `ProtocolMismatch` when the top layer does not announce
    /// `protocol`, and with `Truncated` when its header does not fit.
    pub fn push_layer(&mut self, protocol: ProtocolTag) -> Result<Layer, DecodeError> {
        if self.next_protocol() != Some(protocol) {
            return Err(DecodeError::ProtocolMismatch {
                expected: protocol,
                found: self.highest(),
            });
        }
        let start = self.top().end();
        let rest = &self.frame.as_slice()[start as usize..];
        let span = match protocol {
            ProtocolTag::RawEthernet | ProtocolTag::TaggedEthernet => {
                Ethernet::new_checked_as(rest, protocol)?;
                ethernet::HEADER_LEN
            }
            ProtocolTag::Arp => {
                Arp::new_checked(rest)?;
                rest.len()
            }
            ProtocolTag::Ipv4 => Ipv4::new_checked(rest)?.header_len(),
            ProtocolTag::Ipv6 => ipv6::header_chain(rest)?.0,
            ProtocolTag::Icmp => {
                Icmp::new_checked(rest)?;
                icmp::HEADER_LEN
            }
            ProtocolTag::Tcp => Tcp::new_checked(rest)?.header_len(),
            ProtocolTag::Udp => {
                Udp::new_checked(rest)?;
                udp::HEADER_LEN
            }
            ProtocolTag::Dns => {
                Dns::new_checked(rest)?;
                rest.len()
            }
        };
        let layer = Layer {
            protocol,
            start,
            span: span as u32,
        };
        self.layers.push(layer);
        Ok(layer)
    }

    /// Decode one more layer. Returns the new protocol, or `None` when the
    /// chain ends here (unknown protocol, truncation, or a terminal layer).
    pub fn extend_one_layer(&mut self) -> Option<ProtocolTag> {
        let next = self.next_protocol()?;
        match self.push_layer(next) {
            Ok(layer) => Some(layer.protocol),
            Err(e) => {
                tracing::trace!("decode stopped at {:?}: {e}", self.highest());
                None
            }
        }
    }

    /// Extend until terminal and return the outermost protocol.
    pub fn decode_fully(&mut self) -> ProtocolTag {
        while self.extend_one_layer().is_some() {}
        self.highest()
    }

    // ---- typed accessors ----

    /// Outer Ethernet header.
    pub fn ethernet(&self) -> Result<Ethernet<&[u8]>, DecodeError> {
        Ethernet::new_checked(self.layer_bytes(self.layers[0]))
    }

    pub fn ethernet_mut(&mut self) -> Result<Ethernet<&mut [u8]>, DecodeError> {
        let base = self.layers[0];
        Ethernet::new_checked(self.layer_bytes_mut(base))
    }

    pub fn arp(&self) -> Result<Arp<&[u8]>, DecodeError> {
        Arp::new_checked(self.layer_bytes(self.require(ProtocolTag::Arp)?))
    }

    pub fn arp_mut(&mut self) -> Result<Arp<&mut [u8]>, DecodeError> {
        let layer = self.require(ProtocolTag::Arp)?;
        Arp::new_checked(self.layer_bytes_mut(layer))
    }

    pub fn ipv4(&self) -> Result<Ipv4<&[u8]>, DecodeError> {
        Ipv4::new_checked(self.layer_bytes(self.require(ProtocolTag::Ipv4)?))
    }

    pub fn ipv6(&self) -> Result<Ipv6<&[u8]>, DecodeError> {
        Ipv6::new_checked(self.layer_bytes(self.require(ProtocolTag::Ipv6)?))
    }

    pub fn icmp(&self) -> Result<Icmp<&[u8]>, DecodeError> {
        Icmp::new_checked(self.layer_bytes(self.require(ProtocolTag::Icmp)?))
    }

    pub fn tcp(&self) -> Result<Tcp<&[u8]>, DecodeError> {
        Tcp::new_checked(self.layer_bytes(self.require(ProtocolTag::Tcp)?))
    }

    pub fn tcp_mut(&mut self) -> Result<Tcp<&mut [u8]>, DecodeError> {
        let layer = self.require(ProtocolTag::Tcp)?;
        Tcp::new_checked(self.layer_bytes_mut(layer))
    }

    pub fn udp(&self) -> Result<Udp<&[u8]>, DecodeError> {
        Udp::new_checked(self.layer_bytes(self.require(ProtocolTag::Udp)?))
    }

    pub fn dns(&self) -> Result<Dns<&[u8]>, DecodeError> {
        Dns::new_checked(self.layer_bytes(self.require(ProtocolTag::Dns)?))
    }

    pub fn dns_mut(&mut self) -> Result<Dns<&mut [u8]>, DecodeError> {
        let layer = self.require(ProtocolTag::Dns)?;
        Dns::new_checked(self.layer_bytes_mut(layer))
    }

    /// Source and destination of the IPv4 or IPv6 layer.
    pub fn ip_addresses(&self) -> Option<(IpAddr, IpAddr)> {
        if let Ok(ip) = self.ipv4() {
            return Some((IpAddr::V4(ip.source()), IpAddr::V4(ip.destination())));
        }
        let ip = self.ipv6().ok()?;
        Some((IpAddr::V6(ip.source()), IpAddr::V6(ip.destination())))
    }

    /// Source and destination port of the TCP or UDP layer.
    pub fn ports(&self) -> Option<(u16, u16)> {
        if let Ok(tcp) = self.tcp() {
            return Some((tcp.source_port(), tcp.destination_port()));
        }
        let udp = self.udp().ok()?;
        Some((udp.source_port(), udp.destination_port()))
    }
}

fn transport_tag(protocol: u8) -> Option<ProtocolTag> {
    match protocol {
        ipv4::PROTOCOL_TCP => Some(ProtocolTag::Tcp),
        ipv4::PROTOCOL_UDP => Some(ProtocolTag::Udp),
        ipv4::PROTOCOL_ICMP | ipv6::NEXT_ICMPV6 => Some(ProtocolTag::Icmp),
        _ => None,
    }
}
