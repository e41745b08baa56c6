//! Device resolution and fixed-size block I/O against the shared disk.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{nodeid_offset, DiskHeader, QuorumDisk, StatusBlock};
use crate::error::{Error, Result};

// BLKSSZGET = _IO(0x12, 104): read the logical sector size of a block device.
const BLKSSZGET: libc::c_ulong = 0x1268;

const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Resolve a cman-style disk label to a device path by scanning block
/// devices under `/dev` for a matching header. Falls back to treating
/// the label itself as a path if no match is found, mirroring how the
/// original tooling degrades when label scanning is unavailable.
pub fn resolve_label(label: &str) -> Result<PathBuf> {
    let by_label_dir = Path::new("/dev/disk/by-label");
    let candidate = by_label_dir.join(label);
    if candidate.exists() {
        return Ok(candidate);
    }

    warn!(label, "no /dev/disk/by-label entry, treating label as a raw path");
    Ok(PathBuf::from(label))
}

/// Query the device's logical sector size via BLKSSZGET, falling back to
/// `DEFAULT_BLOCK_SIZE` for regular files (used in tests) or devices that
/// don't support the ioctl.
pub fn device_sector_size(file: &File) -> u32 {
    let mut size: libc::c_int = 0;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKSSZGET as _, &mut size as *mut _) };
    if ret == 0 && size > 0 {
        size as u32
    } else {
        DEFAULT_BLOCK_SIZE
    }
}

/// A real shared block device (or a regular file standing in for one).
pub struct BlockDevice {
    file: File,
    block_size: u32,
}

impl BlockDevice {
    pub fn open(path: &Path, block_size_override: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Disk(format!("opening {}: {e}", path.display())))?;

        let block_size = if block_size_override > 0 {
            block_size_override
        } else {
            device_sector_size(&file)
        };

        Ok(Self { file, block_size })
    }

    fn read_raw(&mut self, offset: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_raw(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl QuorumDisk for BlockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn read_header(&mut self) -> Result<DiskHeader> {
        let buf = self.read_raw(0)?;
        DiskHeader::from_bytes(&buf)
    }

    fn read_block(&mut self, node_id: u32) -> Result<StatusBlock> {
        let offset = nodeid_offset(node_id, self.block_size);
        let buf = self.read_raw(offset)?;
        StatusBlock::from_bytes(&buf, node_id)
    }

    fn write_block(&mut self, block: &StatusBlock) -> Result<()> {
        let offset = nodeid_offset(block.node_id, self.block_size);
        let bytes = block.to_bytes(self.block_size);
        self.write_raw(offset, &bytes)
    }
}

/// In-memory disk for scenario tests: any number of nodes sharing a
/// byte buffer, with no filesystem or ioctl involved.
pub struct FakeDisk {
    block_size: u32,
    header: Option<DiskHeader>,
    blocks: HashMap<u32, StatusBlock>,
}

impl FakeDisk {
    pub fn new(block_size: u32, max_nodes: u32) -> Self {
        Self {
            block_size,
            header: Some(DiskHeader::new(block_size, max_nodes)),
            blocks: HashMap::new(),
        }
    }

    /// A disk with no header written yet, simulating an unformatted device.
    pub fn unformatted(block_size: u32) -> Self {
        Self {
            block_size,
            header: None,
            blocks: HashMap::new(),
        }
    }

    /// Inject corruption by dropping a node's block entirely, simulating
    /// a torn write becoming unreadable.
    pub fn corrupt(&mut self, node_id: u32) {
        self.blocks.remove(&node_id);
    }
}

impl QuorumDisk for FakeDisk {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn read_header(&mut self) -> Result<DiskHeader> {
        self.header
            .clone()
            .ok_or_else(|| Error::HeaderInvalid("disk not formatted".into()))
    }

    fn read_block(&mut self, node_id: u32) -> Result<StatusBlock> {
        Ok(self
            .blocks
            .get(&node_id)
            .cloned()
            .unwrap_or_else(|| StatusBlock::blank(node_id)))
    }

    fn write_block(&mut self, block: &StatusBlock) -> Result<()> {
        self.blocks.insert(block.node_id, block.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NodeState;
    use std::io::Write as _;

    #[test]
    fn block_device_roundtrips_header_and_blocks_on_a_real_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // Pre-size the file: header block + 4 node slots.
        file.write_all(&vec![0u8; 512 * 5]).unwrap();
        file.flush().unwrap();

        let header = DiskHeader::new(512, 4);
        {
            let mut f = file.reopen().unwrap();
            f.write_all(&header.to_bytes(512)).unwrap();
        }

        let mut disk = BlockDevice::open(file.path(), 512).unwrap();
        assert_eq!(disk.read_header().unwrap(), header);

        let mut block = StatusBlock::blank(3);
        block.state = NodeState::Run;
        block.incarnation = 42;
        disk.write_block(&block).unwrap();

        let back = disk.read_block(3).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn fake_disk_roundtrips_block() {
        let mut disk = FakeDisk::new(512, 16);
        let mut b = StatusBlock::blank(2);
        b.state = NodeState::Run;
        disk.write_block(&b).unwrap();
        let back = disk.read_block(2).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn fake_disk_blank_block_for_unwritten_node() {
        let mut disk = FakeDisk::new(512, 16);
        let b = disk.read_block(9).unwrap();
        assert_eq!(b.state, NodeState::None);
    }

    #[test]
    fn unformatted_disk_has_no_header() {
        let mut disk = FakeDisk::unformatted(512);
        assert!(disk.read_header().is_err());
    }
}
