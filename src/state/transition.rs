//! Transitioner: applies the first matching lifecycle rule to every peer
//! record, given what the Scanner just observed.

use tracing::{error, warn};

use crate::disk::QuorumDisk;
use crate::error::Result;
use crate::membership::MembershipSink;
use crate::state::election::LocalContext;
use crate::state::{set_mask_bit, Bitmap, NodeRecord, NodeState, NodeTable};

pub struct Transitioner;

impl Transitioner {
    /// Walk `table` and apply rules 1-6 to every peer other than `my_id`.
    /// `mask` is `None` during initialization (§4.6), in which case only
    /// table state is touched. `am_master` gates the eviction-write and
    /// kill side effects of rule 2/3.
    pub fn transition(
        table: &mut NodeTable,
        disk: &mut dyn QuorumDisk,
        mut mask: Option<&mut Bitmap>,
        membership: &mut dyn MembershipSink,
        ctx: &LocalContext,
        am_master: bool,
    ) -> Result<()> {
        for node_id in 1..=(table.len() as u32) {
            if node_id == ctx.my_id {
                continue;
            }
            let Some(record) = table.get_mut(node_id) else {
                continue;
            };

            Self::apply_rules(
                record,
                disk,
                mask.as_deref_mut(),
                membership,
                ctx,
                am_master,
            )?;
        }
        Ok(())
    }

    fn apply_rules(
        record: &mut NodeRecord,
        disk: &mut dyn QuorumDisk,
        mask: Option<&mut Bitmap>,
        membership: &mut dyn MembershipSink,
        ctx: &LocalContext,
        am_master: bool,
    ) -> Result<()> {
        let node_id = record.node_id;
        let peer_reported = record.status.state;
        let peer_incarnation = record.status.incarnation;

        // Rule 1: online -> offline (observed eviction or clean restart).
        let observed_eviction = record.state >= NodeState::Init && peer_reported == NodeState::Evict;
        let clean_restart = record.incarnation != 0 && peer_incarnation != record.incarnation;
        if observed_eviction || clean_restart {
            record.reset_liveness();
            if let Some(m) = mask {
                set_mask_bit(m, node_id, false);
            }
            if clean_restart {
                record.evil_incarnation = None;
            }
            return Ok(());
        }

        // Rule 2: online -> evicted (heartbeat timeout).
        if record.misses > ctx.tko && peer_reported < NodeState::Evict && peer_reported >= NodeState::Init {
            if am_master {
                let mut evict = record.status.clone();
                evict.node_id = node_id;
                evict.state = NodeState::Evict;
                evict.updatenode = ctx.my_id;
                disk.write_block(&evict)?;
                if ctx.flags.allow_kill {
                    membership.kill_node(node_id)?;
                }
            }
            record.state = NodeState::Evict;
            record.status.state = NodeState::Evict;
            record.evil_incarnation = Some(record.status.incarnation);
            if let Some(m) = mask {
                set_mask_bit(m, node_id, false);
            }
            return Ok(());
        }

        // Rule 3: undead detection.
        if let Some(evil) = record.evil_incarnation {
            if evil == peer_incarnation {
                error!(node_id, incarnation = peer_incarnation, "evicted peer is writing again");
                if am_master {
                    let mut evict = record.status.clone();
                    evict.node_id = node_id;
                    evict.state = NodeState::Evict;
                    evict.updatenode = ctx.my_id;
                    disk.write_block(&evict)?;
                    if ctx.flags.allow_kill {
                        membership.kill_node(node_id)?;
                    }
                }
                return Ok(());
            }
        }

        // Rule 4: offline -> online.
        if record.seen > ctx.tko_up && record.state < NodeState::Init {
            record.state = NodeState::Run;
            record.incarnation = peer_incarnation;
            if let Some(m) = mask {
                set_mask_bit(m, node_id, true);
            }
            return Ok(());
        }

        // Rule 5: run -> master.
        if record.state == NodeState::Run && peer_reported == NodeState::Master {
            record.state = NodeState::Master;
            if let Some(m) = mask {
                set_mask_bit(m, node_id, true);
            }
            return Ok(());
        }

        // Rule 6: fallthrough — accept the peer's self-reported state.
        if record.state >= NodeState::Init {
            warn_on_downgrade(record, peer_reported);
            record.state = peer_reported;
            if let Some(m) = mask {
                set_mask_bit(m, node_id, true);
            }
        }

        Ok(())
    }
}

fn warn_on_downgrade(record: &NodeRecord, peer_reported: NodeState) {
    if peer_reported < record.state {
        warn!(
            node_id = record.node_id,
            believed = %record.state,
            reported = %peer_reported,
            "transitioner: peer self-reported a lower state than believed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{FakeDisk, StatusBlock};
    use crate::membership::LoggingMembership;

    fn ctx() -> LocalContext {
        LocalContext::new(1, Default::default())
    }

    #[test]
    fn rule4_offline_to_online_after_enough_fresh_ticks() {
        let mut disk = FakeDisk::new(512, 4);
        let mut table = NodeTable::new(4, 0);
        let mut membership = LoggingMembership::default();
        let c = ctx();

        let record = table.get_mut(2).unwrap();
        record.seen = c.tko_up + 1;
        record.status.incarnation = 77;

        Transitioner::transition(&mut table, &mut disk, None, &mut membership, &c, false).unwrap();
        let record = table.get(2).unwrap();
        assert_eq!(record.state, NodeState::Run);
        assert_eq!(record.incarnation, 77);
    }

    #[test]
    fn rule2_evicts_after_too_many_misses() {
        let mut disk = FakeDisk::new(512, 4);
        let mut table = NodeTable::new(4, 0);
        let mut membership = LoggingMembership::default();
        let c = ctx();

        {
            let record = table.get_mut(2).unwrap();
            record.state = NodeState::Run;
            record.misses = c.tko + 1;
            record.status.state = NodeState::Run;
            record.status.incarnation = 5;
        }
        disk.write_block(&StatusBlock::blank(2)).unwrap();

        Transitioner::transition(&mut table, &mut disk, None, &mut membership, &c, true).unwrap();
        let record = table.get(2).unwrap();
        assert_eq!(record.state, NodeState::Evict);
        assert_eq!(record.evil_incarnation, Some(5));
    }

    #[test]
    fn rule3_detects_undead_peer() {
        let mut disk = FakeDisk::new(512, 4);
        let mut table = NodeTable::new(4, 0);
        let mut membership = LoggingMembership::default();
        let c = ctx();

        {
            let record = table.get_mut(2).unwrap();
            record.evil_incarnation = Some(9);
            record.status.incarnation = 9;
            record.status.state = NodeState::Run;
        }
        disk.write_block(&StatusBlock::blank(2)).unwrap();

        Transitioner::transition(&mut table, &mut disk, None, &mut membership, &c, false).unwrap();
        // rule 3 does not clear evil_incarnation — only rule 1's clean-restart branch does
        assert_eq!(table.get(2).unwrap().evil_incarnation, Some(9));
    }

    #[test]
    fn rule1_clean_restart_clears_evil_incarnation() {
        let mut disk = FakeDisk::new(512, 4);
        let mut table = NodeTable::new(4, 0);
        let mut membership = LoggingMembership::default();
        let c = ctx();

        {
            let record = table.get_mut(2).unwrap();
            record.incarnation = 5;
            record.evil_incarnation = Some(5);
            record.status.incarnation = 6;
            record.status.state = NodeState::Init;
        }
        disk.write_block(&StatusBlock::blank(2)).unwrap();

        Transitioner::transition(&mut table, &mut disk, None, &mut membership, &c, false).unwrap();
        let record = table.get(2).unwrap();
        assert_eq!(record.evil_incarnation, None);
        assert_eq!(record.state, NodeState::None);
    }
}
