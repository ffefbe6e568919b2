//! Frame builders shared by unit tests across the crate.

use std::net::Ipv4Addr;

use crate::core::frame::{Direction, FrameBuffer};
use crate::packet::{ethernet, ipv4, ipv6, tcp};

pub const LOCAL_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const REMOTE_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

pub fn frame_in(bytes: Vec<u8>) -> FrameBuffer {
    FrameBuffer::from_slice(&bytes, Direction::Inbound).unwrap()
}

pub fn frame_out(bytes: Vec<u8>) -> FrameBuffer {
    FrameBuffer::from_slice(&bytes, Direction::Outbound).unwrap()
}

/// 14-byte Ethernet header from REMOTE_MAC to LOCAL_MAC.
pub fn ethernet_header(ether_type: u16) -> Vec<u8> {
    let mut h = Vec::with_capacity(14);
    h.extend_from_slice(&LOCAL_MAC);
    h.extend_from_slice(&REMOTE_MAC);
    h.extend_from_slice(&ether_type.to_be_bytes());
    h
}

/// 60-byte ARP frame (28-byte body plus 18 bytes of padding).
pub fn arp_frame(request: bool, sender_mac: [u8; 6], sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let mut f = ethernet_header(ethernet::ETHERTYPE_ARP);
    f.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4]);
    let opcode: [u8; 2] = if request { [0x00, 0x01] } else { [0x00, 0x02] };
    f.extend_from_slice(&opcode);
    f.extend_from_slice(&sender_mac);
    f.extend_from_slice(&sender_ip.octets());
    f.extend_from_slice(&[0u8; 6]);
    f.extend_from_slice(&target_ip.octets());
    f.resize(60, 0);
    f
}

/// 20-byte IPv4 header without options.
pub fn ipv4_header(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, payload_len: usize) -> Vec<u8> {
    let mut h = vec![0u8; 20];
    h[0] = 0x45;
    h[2..4].copy_from_slice(&((20 + payload_len) as u16).to_be_bytes());
    h[8] = 64;
    h[9] = protocol;
    h[12..16].copy_from_slice(&src.octets());
    h[16..20].copy_from_slice(&dst.octets());
    h
}

/// 20-byte TCP header without options.
pub fn tcp_header(src_port: u16, dst_port: u16, flags: u8) -> Vec<u8> {
    let mut h = vec![0u8; 20];
    h[0..2].copy_from_slice(&src_port.to_be_bytes());
    h[2..4].copy_from_slice(&dst_port.to_be_bytes());
    h[12] = 5 << 4;
    h[13] = flags;
    h[14..16].copy_from_slice(&64240u16.to_be_bytes());
    h
}

/// Ethernet + IPv4 (20) + TCP (20), no payload.
pub fn tcp_frame(src: Ipv4Addr, src_port: u16, dst: Ipv4Addr, dst_port: u16, flags: u8) -> Vec<u8> {
    let mut f = ethernet_header(ethernet::ETHERTYPE_IPV4);
    f.extend(ipv4_header(ipv4::PROTOCOL_TCP, src, dst, 20));
    f.extend(tcp_header(src_port, dst_port, flags));
    f
}

/// Ethernet + IPv4 + UDP + payload.
pub fn udp_frame(src: Ipv4Addr, src_port: u16, dst: Ipv4Addr, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut f = ethernet_header(ethernet::ETHERTYPE_IPV4);
    f.extend(ipv4_header(ipv4::PROTOCOL_UDP, src, dst, 8 + payload.len()));
    f.extend_from_slice(&src_port.to_be_bytes());
    f.extend_from_slice(&dst_port.to_be_bytes());
    f.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    f.extend_from_slice(&[0, 0]);
    f.extend_from_slice(payload);
    f
}

/// UDP frame from port 53 carrying a 12-byte DNS header and one question.
pub fn dns_frame(response: bool, questions: u16) -> Vec<u8> {
    let mut dns = vec![0u8; 12];
    dns[0] = if response { 0x80 } else { 0x00 };
    dns[2..4].copy_from_slice(&questions.to_be_bytes());
    // example.com A IN
    dns.extend_from_slice(b"\x07example\x03com\x00\x00\x01\x00\x01");
    udp_frame(
        Ipv4Addr::new(10, 0, 0, 53),
        53,
        Ipv4Addr::new(10, 0, 0, 2),
        40000,
        &dns,
    )
}

/// Ethernet + IPv4 + 8-byte ICMP header.
pub fn icmp_frame(msg_type: u8, code: u8) -> Vec<u8> {
    let mut f = ethernet_header(ethernet::ETHERTYPE_IPV4);
    f.extend(ipv4_header(
        ipv4::PROTOCOL_ICMP,
        Ipv4Addr::new(10, 0, 0, 9),
        Ipv4Addr::new(10, 0, 0, 2),
        8,
    ));
    f.extend_from_slice(&[msg_type, code, 0, 0, 0, 1, 0, 1]);
    f
}

/// Ethernet + IPv6 (fe80::1 -> fe80::2) + TCP.
pub fn ipv6_tcp_frame(flags: u8) -> Vec<u8> {
    let mut f = ethernet_header(ethernet::ETHERTYPE_IPV6);
    let mut h = vec![0u8; ipv6::FIXED_HEADER_LEN];
    h[0] = 0x60;
    h[4..6].copy_from_slice(&20u16.to_be_bytes());
    h[6] = ipv4::PROTOCOL_TCP;
    h[7] = 64;
    h[8] = 0xfe;
    h[9] = 0x80;
    h[23] = 1;
    h[24] = 0xfe;
    h[25] = 0x80;
    h[39] = 2;
    f.extend(h);
    f.extend(tcp_header(50000, 443, flags));
    f
}

/// Ethernet + IPv6 (fe80::1 -> fe80::2) + 8-byte ICMPv6 header.
pub fn icmpv6_frame(msg_type: u8, code: u8) -> Vec<u8> {
    let mut f = ipv6_tcp_frame(0);
    f.truncate(ethernet::HEADER_LEN + ipv6::FIXED_HEADER_LEN);
    let ip = ethernet::HEADER_LEN;
    f[ip + 4..ip + 6].copy_from_slice(&8u16.to_be_bytes());
    f[ip + 6] = ipv6::NEXT_ICMPV6;
    f.extend_from_slice(&[msg_type, code, 0, 0, 0, 1, 0, 1]);
    f
}

/// Plain TCP SYN from 10.0.0.1:40000 to 10.0.0.2:80.
pub fn syn_frame() -> Vec<u8> {
    tcp_frame(
        Ipv4Addr::new(10, 0, 0, 1),
        40000,
        Ipv4Addr::new(10, 0, 0, 2),
        80,
        tcp::FLAG_SYN,
    )
}
