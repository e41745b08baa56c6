//! Block-level codec for the shared quorum disk.
//!
//! This is the "external collaborator" layer named in the spec: header
//! validation, label -> device resolution, and fixed-size block
//! read/write. It is deliberately kept small and separate from the
//! protocol logic in `state::` — nothing here knows about node liveness,
//! elections, or messages.

mod block;
mod device;
mod header;

pub use block::StatusBlock;
pub use device::{device_sector_size, resolve_label, BlockDevice, FakeDisk};
pub use header::DiskHeader;

use crate::error::Result;

/// Anything that can serve fixed-size StatusBlock reads/writes at a
/// per-node offset. Implemented by `BlockDevice` (a real file/block
/// device) and `FakeDisk` (in-memory, for tests).
pub trait QuorumDisk {
    /// Size of one addressable block, in bytes (the device sector size).
    fn block_size(&self) -> u32;

    /// Read the disk header.
    fn read_header(&mut self) -> Result<DiskHeader>;

    /// Read the StatusBlock for `node_id` (1-based).
    fn read_block(&mut self, node_id: u32) -> Result<StatusBlock>;

    /// Write the StatusBlock for `node_id` (1-based). Single-block writes
    /// are atomic at the block level — no partial observable state.
    fn write_block(&mut self, block: &StatusBlock) -> Result<()>;
}

/// Compute the byte offset of `node_id`'s slot, one block past the header.
pub fn nodeid_offset(node_id: u32, block_size: u32) -> u64 {
    (node_id as u64) * (block_size as u64)
}
