//! Legacy pcap container helpers.
//!
//! The block log and the replay driver's pass-through output use
//! `PcapWriter`. `read_ethernet_records` loads a capture (legacy pcap or
//! pcapng) for replay.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{
    build_ts, build_ts_resolution, Block, LegacyPcapBlock, Linktype, OptionCode, PcapBlockOwned,
    PcapError, ToVec,
};

use crate::error::FirewallError;

/// Reader buffer; must hold the largest single block.
const READER_CAPACITY: usize = 65536;

const MICROS_PER_SEC: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Writer for the legacy pcap format, Ethernet link type.
pub struct PcapWriter<W: Write> {
    w: W,
    records: u64,
}

impl<W: Write> PcapWriter<W> {
    /// Write the global header and return the writer.
    pub fn new(mut w: W, snaplen: u32) -> io::Result<Self> {
        let mut hdr = pcap_parser::PcapHeader::new();
        hdr.snaplen = snaplen;
        hdr.network = Linktype::ETHERNET;
        let s = hdr
            .to_vec()
            .map_err(|_| io::Error::other("pcap header serialization failed"))?;
        w.write_all(&s)?;
        Ok(Self { w, records: 0 })
    }

    /// Append one record stamped with `captured_at`.
    pub fn write_record(&mut self, captured_at: SystemTime, data: &[u8]) -> io::Result<()> {
        let ts = captured_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let record = LegacyPcapBlock {
            ts_sec: ts.as_secs() as u32,
            ts_usec: ts.subsec_micros(),
            caplen: data.len() as u32,
            origlen: data.len() as u32,
            data,
        };
        let s = record
            .to_vec_raw()
            .map_err(|_| io::Error::other("pcap record serialization failed"))?;
        self.w.write_all(&s)?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

/// One Ethernet frame loaded from a capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcapRecord {
    pub captured_at: SystemTime,
    pub data: Vec<u8>,
}

/// Load every Ethernet record of a capture file.
pub fn read_ethernet_records(path: &Path) -> Result<Vec<PcapRecord>, FirewallError> {
    let file = File::open(path)?;
    read_ethernet_records_from(file)
}

/// Link type and clock of one capture interface.
#[derive(Debug, Clone, Copy)]
struct Interface {
    link_type: Linktype,
    /// Timestamp ticks per second.
    ts_unit: u64,
    /// Seconds added to every timestamp.
    ts_offset: u64,
}

impl Interface {
    fn legacy(hdr: &pcap_parser::PcapHeader) -> Self {
        Self {
            link_type: hdr.network,
            ts_unit: if hdr.is_nanosecond_precision() { NANOS_PER_SEC } else { MICROS_PER_SEC },
            ts_offset: 0,
        }
    }

    fn pcapng(idb: &pcap_parser::InterfaceDescriptionBlock<'_>) -> Self {
        let mut ts_unit = MICROS_PER_SEC;
        let mut ts_offset = 0;
        for opt in idb.options.iter() {
            match opt.code {
                OptionCode::IfTsresol => match opt.value().first().copied().map(build_ts_resolution) {
                    Some(Some(unit)) => ts_unit = unit,
                    Some(None) => tracing::warn!("Ignoring unusable if_tsresol option"),
                    None => {}
                },
                OptionCode::IfTsoffset => {
                    if let Some(Ok(bytes)) = opt.value().get(..8).map(<[u8; 8]>::try_from) {
                        ts_offset = u64::from_le_bytes(bytes);
                    }
                }
                _ => {}
            }
        }
        Self {
            link_type: idb.linktype,
            ts_unit,
            ts_offset,
        }
    }

    /// Convert a whole-second count plus `frac` ticks of this interface's
    /// clock.
    fn timestamp(&self, secs: u64, frac: u64) -> SystemTime {
        let nanos = u128::from(frac) * u128::from(NANOS_PER_SEC) / u128::from(self.ts_unit.max(1));
        UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_nanos(nanos as u64)
    }

    fn require_ethernet(this: Option<&Self>) -> Result<&Self, FirewallError> {
        match this {
            Some(i) if i.link_type == Linktype::ETHERNET => Ok(i),
            Some(i) => Err(FirewallError::InvalidInput(format!(
                "unsupported link type {}",
                i.link_type
            ))),
            None => Err(FirewallError::InvalidInput(
                "packet block before interface header".into(),
            )),
        }
    }
}

/// Load every Ethernet record from a reader. Non-Ethernet link types are
/// rejected rather than decoded as garbage. Timestamps honour the file's
/// resolution: nanosecond legacy files and the pcapng `if_tsresol` and
/// `if_tsoffset` interface options.
pub fn read_ethernet_records_from<R: Read + Send>(input: R) -> Result<Vec<PcapRecord>, FirewallError> {
    let mut reader = pcap_parser::create_reader(READER_CAPACITY, input)
        .map_err(|e| FirewallError::InvalidInput(format!("not a capture file: {e:?}")))?;

    let mut records = Vec::new();
    let mut interfaces: Vec<Interface> = Vec::new();
    let mut blocks = 0usize;
    let mut last_incomplete = None;

    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(ref hdr) => {
                        interfaces = vec![Interface::legacy(hdr)];
                    }
                    PcapBlockOwned::Legacy(ref b) => {
                        let iface = Interface::require_ethernet(interfaces.first())?;
                        let caplen = (b.caplen as usize).min(b.data.len());
                        records.push(PcapRecord {
                            captured_at: iface.timestamp(u64::from(b.ts_sec), u64::from(b.ts_usec)),
                            data: b.data[..caplen].to_vec(),
                        });
                    }
                    PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                        interfaces.clear();
                    }
                    PcapBlockOwned::NG(Block::InterfaceDescription(ref idb)) => {
                        interfaces.push(Interface::pcapng(idb));
                    }
                    PcapBlockOwned::NG(Block::EnhancedPacket(ref epb)) => {
                        let iface = Interface::require_ethernet(interfaces.get(epb.if_id as usize))?;
                        let (secs, frac) =
                            build_ts(epb.ts_high, epb.ts_low, iface.ts_offset, iface.ts_unit.max(1));
                        let caplen = (epb.caplen as usize).min(epb.data.len());
                        records.push(PcapRecord {
                            captured_at: iface.timestamp(u64::from(secs), u64::from(frac)),
                            data: epb.data[..caplen].to_vec(),
                        });
                    }
                    _ => {
                        tracing::debug!("Skipping unsupported capture block");
                    }
                }
                blocks += 1;
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete { .. }) => {
                if last_incomplete == Some(blocks) {
                    return Err(FirewallError::InvalidInput(
                        "capture file is truncated".into(),
                    ));
                }
                last_incomplete = Some(blocks);
                reader
                    .refill()
                    .map_err(|e| FirewallError::InvalidInput(format!("capture read failed: {e:?}")))?;
            }
            Err(e) => {
                return Err(FirewallError::InvalidInput(format!(
                    "capture read failed: {e:?}"
                )))
            }
        }
    }
    Ok(records)
}
