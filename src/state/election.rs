//! Elector: the per-tick bidding/acking state machine that decides who
//! is master, plus `LocalContext`, this node's own configuration and
//! running election state.

use tracing::{info, warn};

use crate::config::FlagsConfig;
use crate::error::Result;
use crate::membership::MembershipSink;
use crate::rt::RebootAgent;
use crate::score::ScoreSource;
use crate::state::{mask_intersect, set_mask_bit, Bitmap, Message, NodeState, NodeTable, MASK_BYTES};

/// Tuning knobs carried over from `QdiskConfig`, grouped so tests can
/// build a `LocalContext` without a full config file.
#[derive(Debug, Clone)]
pub struct ElectionTuning {
    pub interval: u64,
    pub tko: u32,
    pub tko_up: u32,
    pub upgrade_wait: u32,
    pub master_wait: u32,
    pub score_min: u32,
    pub votes: u32,
    pub flags: FlagsConfig,
}

impl Default for ElectionTuning {
    fn default() -> Self {
        Self {
            interval: 1,
            tko: 10,
            tko_up: 3,
            upgrade_wait: 2,
            master_wait: 5,
            score_min: 0,
            votes: 0,
            flags: FlagsConfig::default(),
        }
    }
}

/// This node's configuration and running election state.
pub struct LocalContext {
    pub my_id: u32,
    pub interval: u64,
    pub tko: u32,
    pub tko_up: u32,
    pub upgrade_wait: u32,
    pub master_wait: u32,
    pub score_min: u32,
    pub votes: u32,
    pub flags: FlagsConfig,

    /// This node's own belief about its state.
    pub status: NodeState,
    /// Elected master's node id, 0 if none.
    pub master: u32,
    /// Outbound message for our own StatusBlock.
    pub msg: Message,
    /// Message argument (target node id).
    pub arg: u32,
    /// Our own tick-local sequence number.
    pub seq: u64,
    /// Our visibility mask (who we believe is online).
    pub mask: Bitmap,
    /// Mask intersected with the membership service's live list, valid
    /// only while `status == Master`.
    pub master_mask: Bitmap,

    pub bid_pending: bool,
    pub bid_age: u32,
    pub upgrade_cooldown: u32,
}

impl LocalContext {
    pub fn new(my_id: u32, tuning: ElectionTuning) -> Self {
        Self {
            my_id,
            interval: tuning.interval,
            tko: tuning.tko,
            tko_up: tuning.tko_up,
            upgrade_wait: tuning.upgrade_wait,
            master_wait: tuning.master_wait,
            score_min: tuning.score_min,
            votes: tuning.votes,
            flags: tuning.flags,
            status: NodeState::None,
            master: 0,
            msg: Message::None,
            arg: 0,
            seq: 0,
            mask: [0u8; MASK_BYTES],
            master_mask: [0u8; MASK_BYTES],
            bid_pending: false,
            bid_age: 0,
            upgrade_cooldown: 0,
        }
    }
}

/// Outcome of `check_votes` (§4.3 step 6, bullet "bid in flight").
enum VoteOutcome {
    /// All running peers acked.
    Unanimous,
    /// A peer nacked our bid.
    Nacked,
    /// A lower-id bidder exists; defer to them.
    LowerBidderExists,
    /// Inconclusive, wait another tick.
    Pending,
}

pub struct Elector;

impl Elector {
    /// Run one tick of the election state machine.
    #[allow(clippy::too_many_arguments)]
    pub fn elect(
        ctx: &mut LocalContext,
        table: &NodeTable,
        score: &mut dyn ScoreSource,
        membership: &mut dyn MembershipSink,
        reboot: &dyn RebootAgent,
    ) -> Result<()> {
        Self::refresh_score(ctx, score, membership, reboot)?;

        if ctx.upgrade_cooldown > 0 {
            ctx.upgrade_cooldown -= 1;
        }

        let (master, low_id, master_count) = Self::find_master(table, ctx);
        ctx.master = master.unwrap_or(0);

        // Master conflict: someone else claims master while we believe
        // we are master ourselves.
        if ctx.status == NodeState::Master && master != Some(ctx.my_id) && master_count >= 1 {
            warn!(my_id = ctx.my_id, claimed_by = ?master, "abdicating: conflicting master claim observed");
            ctx.status = NodeState::Run;
            ctx.upgrade_cooldown = ctx.upgrade_wait;
            ctx.bid_pending = false;
            ctx.msg = Message::None;
        }

        if master.is_none() {
            Self::run_bidding(ctx, table);
        } else if master == Some(ctx.my_id) {
            let live_mask = Self::live_mask(membership);
            ctx.master_mask = mask_intersect(&ctx.mask, &live_mask);
            membership.poll_quorum_device(true)?;
        } else if let Some(master_id) = master {
            if let Some(record) = table.get(master_id) {
                if record.status.mask_bit(ctx.my_id) {
                    membership.poll_quorum_device(true)?;
                }
            }
        }

        let _ = low_id;
        Ok(())
    }

    fn refresh_score(
        ctx: &mut LocalContext,
        score: &mut dyn ScoreSource,
        membership: &mut dyn MembershipSink,
        reboot: &dyn RebootAgent,
    ) -> Result<()> {
        let current = score.current_score()?;
        let max = score.max_score();
        let score_req = if ctx.score_min > 0 {
            ctx.score_min
        } else {
            max / 2 + 1
        };

        if current < score_req {
            set_mask_bit(&mut ctx.mask, ctx.my_id, false);
            if ctx.status > NodeState::None {
                ctx.status = NodeState::None;
                ctx.msg = Message::None;
                ctx.seq += 1;
                ctx.bid_pending = false;
                ctx.bid_age = 0;
            }
            membership.poll_quorum_device(false)?;
            if ctx.flags.reboot {
                warn!(my_id = ctx.my_id, current, score_req, "score below threshold, rebooting");
                reboot.reboot()?;
            }
        } else {
            set_mask_bit(&mut ctx.mask, ctx.my_id, true);
            if ctx.status < NodeState::Run {
                ctx.status = NodeState::Run;
                ctx.upgrade_cooldown = ctx.upgrade_wait;
                ctx.bid_pending = false;
                ctx.msg = Message::None;
            }
        }

        Ok(())
    }

    /// §4.3 "Master discovery". `master` tracks a peer's claim before our
    /// own: a node that already believes itself master still needs to see
    /// a differing peer claim as a conflict, not as "found myself first".
    fn find_master(table: &NodeTable, ctx: &LocalContext) -> (Option<u32>, u32, u32) {
        let mut low_id = ctx.my_id;
        let mut master = None;
        let mut master_count = 0u32;

        for record in table.iter() {
            if record.node_id == ctx.my_id {
                continue;
            }
            if record.state.is_running() {
                low_id = low_id.min(record.node_id);
                if record.status.state == NodeState::Master {
                    if master.is_none() {
                        master = Some(record.node_id);
                    }
                    master_count += 1;
                }
            }
        }

        if master.is_none() && ctx.status == NodeState::Master {
            master = Some(ctx.my_id);
            master_count += 1;
        }

        (master, low_id, master_count)
    }

    fn run_bidding(ctx: &mut LocalContext, table: &NodeTable) {
        if ctx.status != NodeState::Run {
            return;
        }

        if !ctx.bid_pending {
            let (master, low_id, _) = Self::find_master(table, ctx);
            debug_assert!(master.is_none());

            if low_id == ctx.my_id && ctx.upgrade_cooldown == 0 {
                ctx.msg = Message::Bid;
                ctx.seq += 1;
                ctx.bid_pending = true;
                ctx.bid_age = 1;
                info!(my_id = ctx.my_id, "bidding for master");
                return;
            }

            Self::do_vote(ctx, table);
            return;
        }

        ctx.bid_age += 1;
        match Self::check_votes(ctx, table) {
            VoteOutcome::Unanimous => {
                if ctx.bid_age >= ctx.master_wait {
                    info!(my_id = ctx.my_id, "promoted to master");
                    ctx.status = NodeState::Master;
                    ctx.msg = Message::None;
                    ctx.bid_pending = false;
                }
            }
            VoteOutcome::Nacked => {
                ctx.msg = Message::None;
                ctx.bid_pending = false;
            }
            VoteOutcome::LowerBidderExists => {
                Self::do_vote(ctx, table);
                ctx.bid_pending = false;
            }
            VoteOutcome::Pending => {}
        }
    }

    /// Vote for the lowest-id bidder below us, if any.
    fn do_vote(ctx: &mut LocalContext, table: &NodeTable) {
        let candidate = table
            .iter()
            .filter(|r| r.node_id < ctx.my_id && r.status.msg == Message::Bid)
            .min_by_key(|r| r.node_id);

        if let Some(record) = candidate {
            ctx.msg = Message::Ack;
            ctx.arg = record.node_id;
            ctx.seq = record.status.seq;
        }
    }

    fn check_votes(ctx: &LocalContext, table: &NodeTable) -> VoteOutcome {
        let mut acks = 0u32;
        let mut running_peers = 0u32;
        let mut lower_bidder = false;

        for record in table.iter() {
            if record.node_id == ctx.my_id {
                continue;
            }
            if !record.state.is_running() {
                continue;
            }
            running_peers += 1;

            if record.node_id < ctx.my_id && record.status.msg == Message::Bid {
                lower_bidder = true;
            }
            if record.status.msg == Message::Nack && record.status.arg == ctx.my_id {
                return VoteOutcome::Nacked;
            }
            if record.status.msg == Message::Ack && record.status.arg == ctx.my_id {
                acks += 1;
            }
        }

        if lower_bidder {
            return VoteOutcome::LowerBidderExists;
        }
        if acks == running_peers {
            return VoteOutcome::Unanimous;
        }
        VoteOutcome::Pending
    }

    fn live_mask(membership: &dyn MembershipSink) -> Bitmap {
        let mut mask = [0u8; MASK_BYTES];
        for (node_id, up) in membership.node_list() {
            if up {
                set_mask_bit(&mut mask, node_id, true);
            }
        }
        mask
    }
}
