//! Windows capture using WinDivert 2.x at the network layer.
//!
//! WinDivert hands out IP packets, so a synthetic 14-byte Ethernet header is
//! prefixed on read and stripped again on send. ARP is not visible at this
//! layer. Each adapter is one local interface reported by `sysinfo`; its
//! handle is a WinDivert filter matching the interface's addresses.
//!
//! SAFETY: the handle is opened in intercept mode. Packets that are not
//! reinjected are gone, so the capture loop must forward every allowed frame,
//! and anything the loop never sees (queue overflow, packets still queued at
//! close) is passed through unfiltered.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use sysinfo::Networks;
use windivert::prelude::*;

use crate::capture::{AdapterChannel, AdapterInfo, AdapterMode, CaptureDriver, ManualResetEvent};
use crate::config::FRAME_CAPACITY;
use crate::core::frame::{Direction, FrameBuffer};
use crate::error::DriverError;
use crate::packet::ethernet::{self, HEADER_LEN};

/// Packets beyond this are reinjected unfiltered by the reader thread.
const MAX_QUEUED: usize = 4096;

/// How long one receive waits before the reader rechecks its shutdown flag.
const RECV_WAIT_MS: u32 = 200;

type Handle = Arc<WinDivert<NetworkLayer>>;
type Queue = Arc<Mutex<VecDeque<(FrameBuffer, WinDivertAddress<NetworkLayer>)>>>;

#[derive(Debug, Default)]
pub struct WinDivertDriver;

impl WinDivertDriver {
    pub fn new() -> Self {
        Self
    }
}

fn address_filter(addrs: &[IpAddr]) -> String {
    addrs
        .iter()
        .map(|addr| match addr {
            IpAddr::V4(a) => format!("(ip.SrcAddr == {a} or ip.DstAddr == {a})"),
            IpAddr::V6(a) => format!("(ipv6.SrcAddr == {a} or ipv6.DstAddr == {a})"),
        })
        .collect::<Vec<_>>()
        .join(" or ")
}

impl CaptureDriver for WinDivertDriver {
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, DriverError> {
        let networks = Networks::new_with_refreshed_list();
        let mut adapters: Vec<AdapterInfo> = networks
            .iter()
            .filter_map(|(name, data)| {
                let addrs: Vec<IpAddr> = data
                    .ip_networks()
                    .iter()
                    .map(|net| net.addr)
                    .filter(|addr| !addr.is_loopback())
                    .collect();
                if addrs.is_empty() {
                    return None;
                }
                Some(AdapterInfo {
                    handle: address_filter(&addrs),
                    name: name.clone(),
                    description: format!("{} ({})", name, data.mac_address()),
                })
            })
            .collect();
        adapters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(adapters)
    }

    fn open(&self, adapter: &AdapterInfo) -> Result<Box<dyn AdapterChannel>, DriverError> {
        let flags = WinDivertFlags::new();
        tracing::info!("Opening WinDivert handle for {} with filter: {}", adapter.name, adapter.handle);
        let wd = WinDivert::network(&adapter.handle, 0, flags).map_err(|e| {
            DriverError::OpenFailure(format!(
                "WinDivert::network() failed for {}: {e:?}. Ensure WinDivert.dll and \
                 WinDivert64.sys are next to the executable and the process runs as administrator",
                adapter.name
            ))
        })?;
        Ok(Box::new(WinDivertChannel {
            name: adapter.name.clone(),
            handle: Arc::new(wd),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: None,
            last_address: None,
            tunnel: false,
        }))
    }
}

struct WinDivertChannel {
    name: String,
    handle: Handle,
    queue: Queue,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    /// Address of the most recently read packet, reused for reinjection.
    last_address: Option<WinDivertAddress<NetworkLayer>>,
    tunnel: bool,
}

/// Prefix a synthetic Ethernet header chosen by the IP version nibble.
fn to_frame(ip: &[u8], direction: Direction) -> Option<FrameBuffer> {
    let ether_type = match ip.first().map(|b| b >> 4) {
        Some(4) => ethernet::ETHERTYPE_IPV4,
        Some(6) => ethernet::ETHERTYPE_IPV6,
        _ => return None,
    };
    if ip.len() + HEADER_LEN > FRAME_CAPACITY {
        return None;
    }
    let mut bytes = Vec::with_capacity(HEADER_LEN + ip.len());
    bytes.extend_from_slice(&[0u8; 12]);
    bytes.extend_from_slice(&ether_type.to_be_bytes());
    bytes.extend_from_slice(ip);
    FrameBuffer::from_slice(&bytes, direction)
}

/// Queue `item` unless the queue is full, in which case it is handed back.
fn enqueue<T>(queue: &Mutex<VecDeque<T>>, item: T) -> Result<(), T> {
    let mut q = queue.lock().unwrap_or_else(|p| p.into_inner());
    if q.len() >= MAX_QUEUED {
        return Err(item);
    }
    q.push_back(item);
    Ok(())
}

/// Strip the synthetic Ethernet header and send the IP packet with `address`.
fn send_ip(
    handle: &WinDivert<NetworkLayer>,
    frame: &FrameBuffer,
    address: WinDivertAddress<NetworkLayer>,
) -> Result<(), DriverError> {
    let bytes = frame.as_slice();
    if bytes.len() <= HEADER_LEN {
        return Err(DriverError::Unsupported("frame has no IP payload".into()));
    }
    let mut packet = WinDivertPacket::<NetworkLayer> {
        address,
        data: Cow::Owned(bytes[HEADER_LEN..].to_vec()),
    };
    packet
        .recalculate_checksums(ChecksumFlags::new())
        .map_err(|e| DriverError::Unsupported(format!("checksum: {e}")))?;
    handle
        .send(&packet)
        .map_err(|e| DriverError::Unsupported(format!("WinDivert send: {e}")))?;
    Ok(())
}

fn run_reader(name: String, handle: Handle, queue: Queue, signal: Arc<ManualResetEvent>, shutdown: Arc<AtomicBool>) {
    let mut buf = vec![0u8; 65535];
    while !shutdown.load(Ordering::Acquire) {
        match handle.recv_wait(Some(&mut buf), RECV_WAIT_MS) {
            Ok(None) => continue,
            Ok(Some(packet)) => {
                let direction = if packet.address.outbound() {
                    Direction::Outbound
                } else {
                    Direction::Inbound
                };
                let Some(frame) = to_frame(&packet.data, direction) else {
                    // Oversized or non-IP: pass it through untouched.
                    if let Err(e) = handle.send(&packet) {
                        tracing::error!("WinDivert reinject error on {name}: {e}");
                    }
                    continue;
                };
                match enqueue(&queue, (frame, packet.address.clone())) {
                    Ok(()) => signal.set(),
                    Err(_) => {
                        tracing::warn!("Capture queue full on {name}, passing packet through unfiltered");
                        if let Err(e) = handle.send(&packet) {
                            tracing::error!("WinDivert reinject error on {name}: {e}");
                        }
                    }
                }
            }
            Err(e) => {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                tracing::error!("WinDivert recv error on {name}: {e}");
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        }
    }
    tracing::debug!("WinDivert reader for {name} stopped");
}

impl WinDivertChannel {
    fn send(&mut self, frame: &FrameBuffer, outbound: bool) -> Result<(), DriverError> {
        let mut address = self
            .last_address
            .clone()
            .ok_or_else(|| DriverError::Unsupported("no packet address to reinject with".into()))?;
        address.set_outbound(outbound);
        send_ip(&self.handle, frame, address)
    }
}

impl AdapterChannel for WinDivertChannel {
    fn set_mode(&mut self, mode: AdapterMode) -> Result<(), DriverError> {
        // A WinDivert handle without the sniff flag always diverts both directions.
        if !mode.contains(AdapterMode::TUNNEL) {
            return Err(DriverError::Unsupported(format!("mode {mode:?}")));
        }
        self.tunnel = true;
        Ok(())
    }

    fn register_readiness_signal(&mut self) -> Result<Arc<ManualResetEvent>, DriverError> {
        if !self.tunnel {
            return Err(DriverError::Unsupported("tunnel mode must be set first".into()));
        }
        let signal = Arc::new(ManualResetEvent::new());
        let (name, handle, queue, shutdown, s) = (
            self.name.clone(),
            Arc::clone(&self.handle),
            Arc::clone(&self.queue),
            Arc::clone(&self.shutdown),
            Arc::clone(&signal),
        );
        let reader = std::thread::Builder::new()
            .name(format!("windivert-recv-{}", self.name))
            .spawn(move || run_reader(name, handle, queue, s, shutdown))?;
        self.reader = Some(reader);
        Ok(signal)
    }

    fn read_frame(&mut self) -> Result<Option<FrameBuffer>, DriverError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        let next = self
            .queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        Ok(next.map(|(frame, address)| {
            self.last_address = Some(address);
            frame
        }))
    }

    fn send_to_network(&mut self, frame: &FrameBuffer) -> Result<(), DriverError> {
        self.send(frame, true)
    }

    fn send_to_local_stack(&mut self, frame: &FrameBuffer) -> Result<(), DriverError> {
        self.send(frame, false)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Err(DriverError::Closed);
        }
        // The reader sees the flag within one receive wait.
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::error!("WinDivert reader for {} panicked", self.name);
            }
        }

        let leftover: Vec<_> = self
            .queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        if !leftover.is_empty() {
            tracing::warn!(
                "Passing {} queued packets on {} through unfiltered",
                leftover.len(),
                self.name
            );
        }
        for (frame, address) in leftover {
            if let Err(e) = send_ip(&self.handle, &frame, address) {
                tracing::error!("WinDivert reinject error on {}: {e}", self.name);
            }
        }

        let handle = Arc::get_mut(&mut self.handle).ok_or_else(|| {
            DriverError::Unsupported(format!("WinDivert handle for {} is still shared", self.name))
        })?;
        handle
            .close(CloseAction::Nothing)
            .map_err(|e| DriverError::Unsupported(format!("WinDivert close: {e}")))?;
        tracing::debug!("WinDivert handle for {} closed", self.name);
        Ok(())
    }
}
