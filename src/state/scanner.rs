//! Scanner: reads every peer's StatusBlock once per tick and updates
//! liveness bookkeeping ahead of the Transitioner.

use tracing::{debug, warn};

use crate::disk::{QuorumDisk, StatusBlock};
use crate::error::Result;
use crate::state::{NodeState, NodeTable};

/// Result of one scan pass.
pub struct ScanOutcome {
    /// Our own slot's contents, for the caller to run self-check (§4.7)
    /// against — the Scanner itself has no reboot authority.
    pub own_block: Option<StatusBlock>,
}

pub struct Scanner;

impl Scanner {
    /// Scan slots `1..=table.len()`, skipping `my_id`'s own slot into
    /// `own_block` instead of peer bookkeeping.
    pub fn scan(disk: &mut dyn QuorumDisk, table: &mut NodeTable, my_id: u32) -> Result<ScanOutcome> {
        let mut own_block = None;

        for node_id in 1..=(table.len() as u32) {
            let block = match disk.read_block(node_id) {
                Ok(b) => b,
                Err(e) => {
                    warn!(node_id, error = %e, "scanner: i/o failure reading peer slot, skipping");
                    continue;
                }
            };

            if node_id == my_id {
                own_block = Some(block);
                continue;
            }

            let Some(record) = table.get_mut(node_id) else {
                continue;
            };

            record.last_msg = record.status.msg;
            record.status = block.clone();

            // Gate on the peer's own self-reported state, not our belief
            // about it: our belief starts at `None` for every peer and
            // only Rule 4 (seen > tko_up) can move it past `Init`, so
            // gating on our own belief here would mean a peer none of
            // our liveness counters ever run and it could never come
            // online in the first place.
            if block.state < NodeState::Init {
                continue;
            }

            if block.timestamp == record.last_seen {
                record.misses += 1;
                if record.misses > 1 {
                    debug!(node_id, misses = record.misses, "scanner: peer timestamp unchanged");
                }
            } else {
                record.misses = 0;
                record.seen += 1;
                record.last_seen = block.timestamp;
            }
        }

        Ok(ScanOutcome { own_block })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FakeDisk;
    use crate::state::Message;

    #[test]
    fn repeated_timestamp_counts_as_one_miss() {
        let mut disk = FakeDisk::new(512, 4);
        let mut table = NodeTable::new(4, 0);
        table.get_mut(2).unwrap().state = NodeState::Run;

        let mut peer = StatusBlock::blank(2);
        peer.state = NodeState::Run;
        peer.timestamp = 100;
        disk.write_block(&peer).unwrap();

        Scanner::scan(&mut disk, &mut table, 1).unwrap();
        Scanner::scan(&mut disk, &mut table, 1).unwrap();

        let record = table.get(2).unwrap();
        assert_eq!(record.misses, 1);
        assert_eq!(record.seen, 1);
    }

    #[test]
    fn fresh_timestamp_resets_misses_and_bumps_seen() {
        let mut disk = FakeDisk::new(512, 4);
        let mut table = NodeTable::new(4, 0);
        table.get_mut(2).unwrap().state = NodeState::Run;

        for ts in [100, 101, 102] {
            let mut peer = StatusBlock::blank(2);
            peer.state = NodeState::Run;
            peer.timestamp = ts;
            disk.write_block(&peer).unwrap();
            Scanner::scan(&mut disk, &mut table, 1).unwrap();
        }

        let record = table.get(2).unwrap();
        assert_eq!(record.misses, 0);
        assert_eq!(record.seen, 3);
    }

    #[test]
    fn not_yet_running_peer_does_not_update_liveness() {
        let mut disk = FakeDisk::new(512, 4);
        let mut table = NodeTable::new(4, 0);

        let mut peer = StatusBlock::blank(2);
        peer.timestamp = 5;
        disk.write_block(&peer).unwrap();

        Scanner::scan(&mut disk, &mut table, 1).unwrap();
        let record = table.get(2).unwrap();
        assert_eq!(record.seen, 0);
        assert_eq!(record.misses, 0);
    }

    #[test]
    fn own_slot_is_returned_separately() {
        let mut disk = FakeDisk::new(512, 4);
        let mut table = NodeTable::new(4, 0);

        let mut own = StatusBlock::blank(1);
        own.msg = Message::Bid;
        disk.write_block(&own).unwrap();

        let outcome = Scanner::scan(&mut disk, &mut table, 1).unwrap();
        assert_eq!(outcome.own_block.unwrap().msg, Message::Bid);
    }
}
