//! Stable on-disk serialization over an abstract sector device (spec §3.7,
//! §4.7).
//!
//! The volume is laid out as a fixed header (magic, format version, flags,
//! body length, CRC32 checksum) followed by a body holding every other
//! component's state. The header is hand-rolled to a fixed byte layout so
//! it can be validated before the (larger, format-versioned) body is even
//! parsed; the body itself is JSON, which keeps this module's job — "is
//! this a volume this build understands, and is it intact" — decoupled
//! from the shape of what's inside.

use serde::{Deserialize, Serialize};

use crate::branches::BranchRegistry;
use crate::context::AccessContext;
use crate::error::{EngineError, Result};
use crate::policy::PolicyEngine;
use crate::pool::BlobPool;
use crate::quota::QuotaAccountant;
use crate::views::ViewGraph;

/// Fixed sector size assumed by every [`SectorDevice`] implementation.
pub const SECTOR_SIZE: usize = 512;

/// Magic bytes identifying a volume written by this crate.
pub const MAGIC: [u8; 4] = *b"ENGV";

/// On-disk format version. Bumped on any incompatible body layout change.
pub const FORMAT_VERSION: u16 = 1;

/// Fixed-width header occupying the volume's first sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    magic: [u8; 4],
    version: u16,
    flags: u16,
    body_len: u64,
    checksum: u32,
}

impl Header {
    const ENCODED_LEN: usize = 4 + 2 + 2 + 8 + 4;

    fn new(body: &[u8]) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            body_len: body.len() as u64,
            checksum: crc32fast::hash(body),
        }
    }

    fn write(&self, out: &mut [u8; SECTOR_SIZE]) {
        let mut offset = 0;
        out[offset..offset + 4].copy_from_slice(&self.magic);
        offset += 4;
        out[offset..offset + 2].copy_from_slice(&self.version.to_le_bytes());
        offset += 2;
        out[offset..offset + 2].copy_from_slice(&self.flags.to_le_bytes());
        offset += 2;
        out[offset..offset + 8].copy_from_slice(&self.body_len.to_le_bytes());
        offset += 8;
        out[offset..offset + 4].copy_from_slice(&self.checksum.to_le_bytes());
    }

    fn read(sector: &[u8; SECTOR_SIZE]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&sector[0..4]);
        if magic != MAGIC {
            return Err(EngineError::Format("bad magic".to_string()));
        }
        let version = u16::from_le_bytes(sector[4..6].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(EngineError::Format(format!(
                "unsupported format version {version}"
            )));
        }
        let flags = u16::from_le_bytes(sector[6..8].try_into().unwrap());
        let body_len = u64::from_le_bytes(sector[8..16].try_into().unwrap());
        let checksum = u32::from_le_bytes(sector[16..20].try_into().unwrap());
        Ok(Self {
            magic,
            version,
            flags,
            body_len,
            checksum,
        })
    }
}

/// An abstract block device addressed in fixed-size sectors, so the volume
/// format can run equally over a file, a raw block device, or an in-memory
/// buffer for tests.
pub trait SectorDevice {
    /// Total number of sectors available.
    fn sector_count(&self) -> usize;
    /// Reads sector `index` into `buf`.
    fn read_sector(&self, index: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<()>;
    /// Writes `buf` to sector `index`, growing the device if needed.
    fn write_sector(&mut self, index: usize, buf: &[u8; SECTOR_SIZE]) -> Result<()>;
}

/// A `SectorDevice` backed by an in-memory buffer, used in tests and by
/// callers that want to stage a volume before flushing it.
#[derive(Debug, Default)]
pub struct InMemorySectorDevice {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

impl InMemorySectorDevice {
    /// Creates an empty device.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SectorDevice for InMemorySectorDevice {
    fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    fn read_sector(&self, index: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        let sector = self
            .sectors
            .get(index)
            .ok_or_else(|| EngineError::Format(format!("sector {index} out of range")))?;
        buf.copy_from_slice(sector);
        Ok(())
    }

    fn write_sector(&mut self, index: usize, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        if index >= self.sectors.len() {
            self.sectors.resize(index + 1, [0u8; SECTOR_SIZE]);
        }
        self.sectors[index] = *buf;
        Ok(())
    }
}

/// A `SectorDevice` backed by a regular file, growing it as needed.
pub struct FileSectorDevice {
    file: std::fs::File,
}

impl FileSectorDevice {
    /// Opens (creating if absent) the file at `path` as a sector device.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl SectorDevice for FileSectorDevice {
    fn sector_count(&self) -> usize {
        self.file
            .metadata()
            .map(|m| m.len() as usize / SECTOR_SIZE)
            .unwrap_or(0)
    }

    fn read_sector(&self, index: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = &self.file;
        file.seek(SeekFrom::Start((index * SECTOR_SIZE) as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_sector(&mut self, index: usize, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        self.file
            .seek(SeekFrom::Start((index * SECTOR_SIZE) as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }
}

/// Every component's persisted state, the body written after the header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    /// Blob Pool contents.
    pub pool: BlobPool,
    /// View Graph contents.
    pub views: ViewGraph,
    /// Branch Registry contents.
    pub branches: BranchRegistry,
    /// Policy Engine contents (flags, audit ring, counters).
    pub policy: PolicyEngine,
    /// Quota Accountant contents.
    pub quota: QuotaAccountant,
    /// Current process-wide access context snapshot (spec §4.7 item 6).
    pub context: AccessContext,
}

/// Writes `snapshot` to `device` starting at sector 0: a one-sector header
/// followed by as many sectors as the JSON-encoded body needs, zero-padded
/// to a sector boundary.
pub fn write_volume(device: &mut dyn SectorDevice, snapshot: &VolumeSnapshot) -> Result<()> {
    let body = serde_json::to_vec(snapshot).map_err(|e| EngineError::Format(e.to_string()))?;
    let header = Header::new(&body);

    let mut header_sector = [0u8; SECTOR_SIZE];
    header.write(&mut header_sector);
    device.write_sector(0, &header_sector)?;

    for (i, chunk) in body.chunks(SECTOR_SIZE).enumerate() {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..chunk.len()].copy_from_slice(chunk);
        device.write_sector(1 + i, &sector)?;
    }
    Ok(())
}

/// Reads and validates a volume from `device`, failing with
/// [`EngineError::Format`] on magic/version/length/checksum mismatch.
pub fn read_volume(device: &dyn SectorDevice) -> Result<VolumeSnapshot> {
    let mut header_sector = [0u8; SECTOR_SIZE];
    device.read_sector(0, &mut header_sector)?;
    let header = Header::read(&header_sector)?;

    let body_sectors = header.body_len.div_ceil(SECTOR_SIZE as u64) as usize;
    let mut body = Vec::with_capacity(body_sectors * SECTOR_SIZE);
    for i in 0..body_sectors {
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sector(1 + i, &mut sector)?;
        body.extend_from_slice(&sector);
    }
    body.truncate(header.body_len as usize);

    let checksum = crc32fast::hash(&body);
    if checksum != header.checksum {
        return Err(EngineError::Format("checksum mismatch".to_string()));
    }

    serde_json::from_slice(&body).map_err(|e| EngineError::Format(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> VolumeSnapshot {
        VolumeSnapshot {
            pool: BlobPool::new(),
            views: ViewGraph::new(0),
            branches: BranchRegistry::new(0, 0),
            policy: PolicyEngine::new(crate::policy::PolicyFlags::default(), 128),
            quota: QuotaAccountant::new(),
            context: AccessContext::default(),
        }
    }

    #[test]
    fn round_trips_through_in_memory_device() {
        let mut device = InMemorySectorDevice::new();
        let snapshot = sample_snapshot();
        write_volume(&mut device, &snapshot).unwrap();
        let loaded = read_volume(&device).unwrap();
        assert_eq!(loaded.pool.blob_count(), snapshot.pool.blob_count());
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let mut device = InMemorySectorDevice::new();
        write_volume(&mut device, &sample_snapshot()).unwrap();
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sector(1, &mut sector).unwrap();
        sector[20] ^= 0xFF;
        device.write_sector(1, &sector).unwrap();
        assert!(matches!(read_volume(&device), Err(EngineError::Format(_))));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut device = InMemorySectorDevice::new();
        write_volume(&mut device, &sample_snapshot()).unwrap();
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sector(0, &mut sector).unwrap();
        sector[0] = b'X';
        device.write_sector(0, &sector).unwrap();
        assert!(matches!(read_volume(&device), Err(EngineError::Format(_))));
    }
}
