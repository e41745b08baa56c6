//! Paceloop: the per-tick driver — Scanner, Transitioner, Elector, own
//! write, status dump, sleep — plus initialization (§4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::config::QdiskConfig;
use crate::disk::QuorumDisk;
use crate::error::Result;
use crate::membership::MembershipSink;
use crate::rt::RebootAgent;
use crate::score::ScoreSource;
use crate::state::election::{ElectionTuning, LocalContext};
use crate::state::{Elector, LocalState, NodeState, NodeTable, Scanner, Transitioner};

/// Everything one running instance of the daemon needs to drive ticks.
pub struct Paceloop {
    config: QdiskConfig,
    disk: Box<dyn QuorumDisk>,
    membership: Box<dyn MembershipSink>,
    score: Box<dyn ScoreSource>,
    reboot: Box<dyn RebootAgent>,
    table: NodeTable,
    ctx: LocalContext,
    incarnation: u64,
    shutdown: Arc<AtomicBool>,
}

impl Paceloop {
    pub fn new(
        config: QdiskConfig,
        disk: Box<dyn QuorumDisk>,
        membership: Box<dyn MembershipSink>,
        score: Box<dyn ScoreSource>,
        reboot: Box<dyn RebootAgent>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let my_id = config.node.id;
        let tuning = ElectionTuning {
            interval: config.timing.interval,
            tko: config.timing.tko,
            tko_up: config.timing.tko_up,
            upgrade_wait: config.timing.upgrade_wait,
            master_wait: config.timing.master_wait,
            score_min: config.quorum.min_score,
            votes: config.quorum.votes,
            flags: config.flags.clone(),
        };
        let ctx = LocalContext::new(my_id, tuning);
        let table = NodeTable::new(crate::state::MAX_NODES, 0);

        Self {
            config,
            disk,
            membership,
            score,
            reboot,
            table,
            ctx,
            incarnation: Self::now(false),
            shutdown,
        }
    }

    fn now(use_uptime: bool) -> u64 {
        if use_uptime {
            if let Ok(contents) = std::fs::read_to_string("/proc/uptime") {
                if let Some(first) = contents.split_whitespace().next() {
                    if let Ok(secs) = first.parse::<f64>() {
                        return secs as u64;
                    }
                }
            }
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// §4.6: validate the disk, reset the table, and let already-running
    /// peers become visible before joining the bidding.
    pub fn quorum_init(&mut self) -> Result<()> {
        let header = self.disk.read_header()?;
        info!(block_size = header.block_size, max_nodes = header.max_nodes, "quorum disk header validated");

        let now = Self::now(self.config.flags.use_uptime);
        self.table = NodeTable::new(header.max_nodes as usize, now);
        self.ctx.status = NodeState::Init;

        let own = LocalState::build_block(&self.ctx, self.incarnation, now);
        self.disk.write_block(&own)?;

        for _ in 0..self.config.timing.tko {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }
            Scanner::scan(self.disk.as_mut(), &mut self.table, self.ctx.my_id)?;
            Transitioner::transition(
                &mut self.table,
                self.disk.as_mut(),
                None,
                self.membership.as_mut(),
                &self.ctx,
                false,
            )?;

            let now = Self::now(self.config.flags.use_uptime);
            let own = LocalState::build_block(&self.ctx, self.incarnation, now);
            self.disk.write_block(&own)?;
            self.score.current_score()?;

            std::thread::sleep(self.config.interval());
        }

        Ok(())
    }

    /// Run ticks until the shutdown flag is set.
    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.tick()?;
        }

        self.ctx.status = NodeState::None;
        let now = Self::now(self.config.flags.use_uptime);
        let own = LocalState::build_block(&self.ctx, self.incarnation, now);
        self.disk.write_block(&own)?;
        self.membership.unregister()?;
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        let started = Instant::now();

        let am_master = self.ctx.status == NodeState::Master;
        let outcome = Scanner::scan(self.disk.as_mut(), &mut self.table, self.ctx.my_id)?;

        if let Some(own_block) = outcome.own_block {
            LocalState::self_check(&own_block, self.ctx.my_id, self.reboot.as_ref())?;
        }

        let mut mask = self.ctx.mask;
        Transitioner::transition(
            &mut self.table,
            self.disk.as_mut(),
            Some(&mut mask),
            self.membership.as_mut(),
            &self.ctx,
            am_master,
        )?;
        self.ctx.mask = mask;

        Elector::elect(
            &mut self.ctx,
            &self.table,
            self.score.as_mut(),
            self.membership.as_mut(),
            self.reboot.as_ref(),
        )?;

        let now = Self::now(self.config.flags.use_uptime);
        self.ctx.seq += 1;
        let own = LocalState::build_block(&self.ctx, self.incarnation, now);
        self.disk.write_block(&own)?;

        let score_current = self.score.current_score().unwrap_or(0);
        let dump = LocalState::format_status(
            &self.ctx,
            &self.table,
            now,
            score_current,
            self.score.max_score(),
            self.config.flags.debug,
        );
        self.write_status_file(&dump);

        self.membership.dispatch_nonblocking()?;

        let elapsed = started.elapsed();
        if elapsed > self.config.interval() {
            warn!(elapsed_ms = elapsed.as_millis(), "tick overran configured interval");
        }

        if elapsed > self.config.paranoid_deadline() && self.config.flags.paranoid && !self.config.flags.debug {
            warn!("tick exceeded paranoid deadline, rebooting");
            self.reboot.reboot()?;
            return Ok(());
        }

        let remaining = self.config.interval().saturating_sub(elapsed);
        if remaining > Duration::ZERO && !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(remaining);
        }

        Ok(())
    }

    fn write_status_file(&self, dump: &str) {
        let path = &self.config.status_file.path;
        if path == "-" {
            println!("{dump}");
            return;
        }
        if let Err(e) = std::fs::write(path, dump) {
            warn!(path, error = %e, "failed to write status file");
        }
    }
}
