//! StatusBlock: one node's slot in the shared quorum disk.
//!
//! Layout (little-endian, all integer fields fixed width):
//!
//! ```text
//! offset  size  field
//! 0       4     node_id
//! 4       1     state
//! 5       1     msg
//! 6       2     master_mask (bitmap of nodes this slot is bidding/acking against)
//! 8       4     flags
//! 12      8     incarnation
//! 20      8     seq
//! 28      8     timestamp
//! 36      4     updatenode
//! 40      4     score
//! 44      4     score_req
//! 48      4     score_max
//! 52      4     arg
//! 56      4     crc32 (over bytes 0..56)
//! ```
//!
//! 60 bytes used; the rest of the device's block is zero padding. The
//! layout is hand-rolled rather than serde-encoded: this is the wire
//! format peers on other nodes (and other cluster software reading the
//! raw disk) must agree on byte-for-byte, so no serializer's internal
//! format is allowed to leak into it.

use crc32fast::Hasher;

use crate::error::{Error, Result};
use crate::state::{Message, NodeState, MASK_BYTES};

/// Bytes of a StatusBlock actually used, independent of device sector size.
pub const BLOCK_USED: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBlock {
    pub node_id: u32,
    pub state: NodeState,
    pub msg: Message,
    pub master_mask: [u8; MASK_BYTES],
    pub flags: u32,
    pub incarnation: u64,
    pub seq: u64,
    pub timestamp: u64,
    pub updatenode: u32,
    pub score: u32,
    pub score_req: u32,
    pub score_max: u32,
    pub arg: u32,
}

impl StatusBlock {
    /// An all-zero block for a node that has never written a slot.
    pub fn blank(node_id: u32) -> Self {
        Self {
            node_id,
            state: NodeState::None,
            msg: Message::None,
            master_mask: [0u8; MASK_BYTES],
            flags: 0,
            incarnation: 0,
            seq: 0,
            timestamp: 0,
            updatenode: 0,
            score: 0,
            score_req: 0,
            score_max: 0,
            arg: 0,
        }
    }

    pub fn to_bytes(&self, block_size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; block_size as usize];
        buf[0..4].copy_from_slice(&self.node_id.to_le_bytes());
        buf[4] = self.state as u8;
        buf[5] = self.msg as u8;
        buf[6..8].copy_from_slice(&self.master_mask);
        buf[8..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..20].copy_from_slice(&self.incarnation.to_le_bytes());
        buf[20..28].copy_from_slice(&self.seq.to_le_bytes());
        buf[28..36].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[36..40].copy_from_slice(&self.updatenode.to_le_bytes());
        buf[40..44].copy_from_slice(&self.score.to_le_bytes());
        buf[44..48].copy_from_slice(&self.score_req.to_le_bytes());
        buf[48..52].copy_from_slice(&self.score_max.to_le_bytes());
        buf[52..56].copy_from_slice(&self.arg.to_le_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&buf[0..56]);
        let crc = hasher.finalize();
        buf[56..60].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8], expected_node_id: u32) -> Result<Self> {
        if buf.len() < BLOCK_USED {
            return Err(Error::BlockCorrupt {
                node_id: expected_node_id,
                reason: "block shorter than status payload".into(),
            });
        }

        let mut hasher = Hasher::new();
        hasher.update(&buf[0..56]);
        let expected_crc = hasher.finalize();
        let actual_crc = u32::from_le_bytes(buf[56..60].try_into().unwrap());
        if expected_crc != actual_crc {
            return Err(Error::BlockCorrupt {
                node_id: expected_node_id,
                reason: "crc mismatch".into(),
            });
        }

        let node_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let state = NodeState::try_from(buf[4]).map_err(|_| Error::BlockCorrupt {
            node_id: expected_node_id,
            reason: format!("unknown state byte {}", buf[4]),
        })?;
        let msg = Message::try_from(buf[5]).map_err(|_| Error::BlockCorrupt {
            node_id: expected_node_id,
            reason: format!("unknown msg byte {}", buf[5]),
        })?;
        let mut master_mask = [0u8; MASK_BYTES];
        master_mask.copy_from_slice(&buf[6..8]);

        Ok(Self {
            node_id,
            state,
            msg,
            master_mask,
            flags: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            incarnation: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            seq: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
            timestamp: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
            updatenode: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            score: u32::from_le_bytes(buf[40..44].try_into().unwrap()),
            score_req: u32::from_le_bytes(buf[44..48].try_into().unwrap()),
            score_max: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            arg: u32::from_le_bytes(buf[52..56].try_into().unwrap()),
        })
    }

    /// True if a bid/ack mask bit is set for `node_id` (1-based).
    pub fn mask_bit(&self, node_id: u32) -> bool {
        let idx = (node_id - 1) as usize;
        let byte = idx / 8;
        let bit = idx % 8;
        byte < self.master_mask.len() && (self.master_mask[byte] & (1 << bit)) != 0
    }

    pub fn set_mask_bit(&mut self, node_id: u32, value: bool) {
        let idx = (node_id - 1) as usize;
        let byte = idx / 8;
        let bit = idx % 8;
        if byte >= self.master_mask.len() {
            return;
        }
        if value {
            self.master_mask[byte] |= 1 << bit;
        } else {
            self.master_mask[byte] &= !(1 << bit);
        }
    }
}
