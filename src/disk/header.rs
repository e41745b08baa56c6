//! Disk header block: the first block on the shared device, identifying
//! it as a qdiskd quorum disk and fixing the layout of the slots that
//! follow.

use crc32fast::Hasher;

use crate::error::{Error, Result};

/// Magic bytes at the start of block 0.
const HEADER_MAGIC: &[u8; 8] = b"QDISKH2\0";

/// On-disk header format version.
const HEADER_VERSION: u32 = 1;

/// Bytes of header actually used; the rest of the block is zero padding.
const HEADER_USED: usize = 24;

/// Header block occupying slot 0 of the shared disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskHeader {
    pub version: u32,
    pub block_size: u32,
    pub max_nodes: u32,
}

impl DiskHeader {
    pub fn new(block_size: u32, max_nodes: u32) -> Self {
        Self {
            version: HEADER_VERSION,
            block_size,
            max_nodes,
        }
    }

    /// Serialize into a full block-sized buffer, zero padded past the
    /// bytes actually used.
    pub fn to_bytes(&self, block_size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; block_size as usize];
        buf[0..8].copy_from_slice(HEADER_MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.max_nodes.to_le_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&buf[0..20]);
        let crc = hasher.finalize();
        buf[20..24].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_USED {
            return Err(Error::HeaderInvalid("block shorter than header".into()));
        }

        if &buf[0..8] != HEADER_MAGIC {
            return Err(Error::HeaderInvalid(
                "bad magic — device is not a qdiskd quorum disk".into(),
            ));
        }

        let mut hasher = Hasher::new();
        hasher.update(&buf[0..20]);
        let expected = hasher.finalize();
        let actual = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        if expected != actual {
            return Err(Error::HeaderInvalid("header crc mismatch".into()));
        }

        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != HEADER_VERSION {
            return Err(Error::HeaderInvalid(format!(
                "unsupported header version {version}"
            )));
        }

        Ok(Self {
            version,
            block_size: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            max_nodes: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = DiskHeader::new(512, 16);
        let bytes = h.to_bytes(512);
        assert_eq!(bytes.len(), 512);
        let back = DiskHeader::from_bytes(&bytes).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 512];
        assert!(DiskHeader::from_bytes(&buf).is_err());
    }

    #[test]
    fn rejects_corrupt_crc() {
        let h = DiskHeader::new(512, 16);
        let mut bytes = h.to_bytes(512);
        bytes[12] ^= 0xff;
        assert!(DiskHeader::from_bytes(&bytes).is_err());
    }
}
