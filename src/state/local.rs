//! LocalState: this node's own StatusBlock writer, self-check (§4.7),
//! and the human-readable status dump.

use tracing::error;

use crate::disk::StatusBlock;
use crate::error::{Error, Result};
use crate::rt::RebootAgent;
use crate::state::election::LocalContext;
use crate::state::{NodeState, NodeTable};

pub struct LocalState;

impl LocalState {
    /// Build this tick's own StatusBlock from `ctx`. `updatenode` is
    /// always our own id: we are the only writer of our own slot under
    /// normal operation.
    pub fn build_block(ctx: &LocalContext, incarnation: u64, timestamp: u64) -> StatusBlock {
        let mask = if ctx.status == NodeState::Master {
            ctx.master_mask
        } else {
            ctx.mask
        };

        StatusBlock {
            node_id: ctx.my_id,
            state: ctx.status,
            msg: ctx.msg,
            master_mask: mask,
            flags: 0,
            incarnation,
            seq: ctx.seq,
            timestamp,
            updatenode: ctx.my_id,
            score: 0,
            score_req: 0,
            score_max: 0,
            arg: ctx.arg,
        }
    }

    /// §4.7 self-check: inspect the block the Scanner just read back for
    /// our own slot. Returns `Err` when the daemon must stop entirely.
    pub fn self_check(own: &StatusBlock, my_id: u32, reboot: &dyn RebootAgent) -> Result<()> {
        if own.updatenode == 0 || own.updatenode == my_id {
            return Ok(());
        }

        if own.state == NodeState::Evict {
            error!(my_id, writer = own.updatenode, "fenced by another node, rebooting");
            reboot.reboot()?;
            return Ok(());
        }

        error!(
            my_id,
            writer = own.updatenode,
            state = %own.state,
            "unexpected foreign write to our own slot"
        );
        Err(Error::Internal(format!(
            "node {my_id}: foreign write to own slot by node {} (state {})",
            own.updatenode, own.state
        )))
    }

    /// Human-readable status dump (§ambient persisted state): overwritten
    /// every tick at the configured status-file path.
    pub fn format_status(
        ctx: &LocalContext,
        table: &NodeTable,
        timestamp: u64,
        score: u32,
        score_max: u32,
        debug: bool,
    ) -> String {
        let mut initializing = Vec::new();
        let mut visible = Vec::new();
        let mut quorate = Vec::new();

        for record in table.iter() {
            if record.node_id == ctx.my_id {
                continue;
            }
            if record.state == NodeState::Init {
                initializing.push(record.node_id);
            }
            if record.state.is_running() {
                visible.push(record.node_id);
            }
            if record.state.is_running() && record.status.mask_bit(ctx.my_id) {
                quorate.push(record.node_id);
            }
        }

        let mut out = String::new();
        out.push_str(&format!("timestamp: {timestamp}"));
        match chrono::DateTime::from_timestamp(timestamp as i64, 0) {
            Some(dt) => out.push_str(&format!(" ({})\n", dt.format("%Y-%m-%d %H:%M:%S UTC"))),
            None => out.push('\n'),
        }
        out.push_str(&format!("node id: {}\n", ctx.my_id));
        out.push_str(&format!("score: {score}/{score_max}\n"));
        out.push_str(&format!("state: {}\n", ctx.status));
        out.push_str(&format!("initializing: {initializing:?}\n"));
        out.push_str(&format!("visible: {visible:?}\n"));
        out.push_str(&format!("master: {}\n", ctx.master));
        out.push_str(&format!("quorate: {quorate:?}\n"));

        if debug {
            out.push_str("--- per-node records ---\n");
            for record in table.iter() {
                out.push_str(&format!(
                    "  node {}: belief={} reported={} msg={} misses={} seen={} incarnation={}\n",
                    record.node_id,
                    record.state,
                    record.status.state,
                    record.status.msg,
                    record.misses,
                    record.seen,
                    record.incarnation
                ));
            }
        }

        out
    }
}
