//! Append-only pcap file of dropped frames, one per adapter session.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::PCAP_SNAPLEN;
use crate::core::frame::FrameBuffer;
use crate::pcap::PcapWriter;

pub struct BlockLog {
    path: PathBuf,
    writer: PcapWriter<BufWriter<File>>,
}

impl BlockLog {
    /// Create `blocked-<adapter>-<unix secs>.pcap` under `dir`. An existing
    /// file is never reused; a numeric suffix is added instead.
    pub fn create(dir: &Path, adapter: &str, created: SystemTime) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = created
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let base = format!("blocked-{}-{stamp}", file_safe(adapter));

        let mut attempt = 0u32;
        let (path, file) = loop {
            let name = if attempt == 0 {
                format!("{base}.pcap")
            } else {
                format!("{base}-{attempt}.pcap")
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 1000 => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let writer = PcapWriter::new(BufWriter::new(file), PCAP_SNAPLEN)?;
        tracing::debug!("Block log opened at {}", path.display());
        Ok(Self { path, writer })
    }

    pub fn append(&mut self, frame: &FrameBuffer) -> io::Result<()> {
        self.writer.write_record(frame.captured_at(), frame.as_slice())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.writer.records()
    }

    /// Flush and close the file.
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .into_inner()
            .map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

/// Adapter names can carry path separators and braces.
fn file_safe(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "adapter".to_string()
    } else {
        trimmed.to_string()
    }
}
