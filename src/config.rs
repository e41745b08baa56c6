//! qdiskd Configuration
//!
//! TOML configuration for the quorum disk daemon. Mirrors the daemon's
//! tunables one-to-one: disk location, per-node identity, tick timing,
//! voting/score thresholds, behavioral flags, and the real-time scheduler.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level qdiskd configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdiskConfig {
    /// Shared block device configuration
    pub disk: DiskConfig,

    /// This node's identity
    pub node: NodeConfig,

    /// Tick pacing and liveness thresholds
    #[serde(default)]
    pub timing: TimingConfig,

    /// Voting / scoring configuration
    #[serde(default)]
    pub quorum: QuorumConfig,

    /// Behavioral flags
    #[serde(default)]
    pub flags: FlagsConfig,

    /// Real-time scheduling configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Human-readable status file
    #[serde(default)]
    pub status_file: StatusFileConfig,
}

/// Shared block device configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiskConfig {
    /// Direct device path (mutually exclusive with `label`)
    #[serde(default)]
    pub device: Option<PathBuf>,

    /// Disk label to resolve to a device (external label->device resolver)
    #[serde(default)]
    pub label: Option<String>,

    /// Override the detected device sector size (0 = auto-detect)
    #[serde(default)]
    pub block_size_override: u32,
}

/// This node's identity within the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// 1-based node id, must be <= MAX_NODES
    pub id: u32,
}

/// Tick pacing and liveness thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Seconds between ticks
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Consecutive unchanged timestamps before a peer is declared offline
    #[serde(default = "default_tko")]
    pub tko: u32,

    /// Consecutive fresh timestamps required to declare an offline peer online
    #[serde(default)]
    pub tko_up: u32,

    /// Ticks a freshly-upgraded node must wait before it may bid
    #[serde(default = "default_upgrade_wait")]
    pub upgrade_wait: u32,

    /// Ticks a bid must survive (with unanimous ACKs) before promotion
    #[serde(default)]
    pub master_wait: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            tko: default_tko(),
            tko_up: 0,
            upgrade_wait: default_upgrade_wait(),
            master_wait: 0,
        }
    }
}

/// Voting / scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuorumConfig {
    /// Votes this node contributes to cman when quorate
    #[serde(default)]
    pub votes: u32,

    /// Minimum score required to be eligible to vote/bid (0 = derive from max/2+1)
    #[serde(default)]
    pub min_score: u32,
}

/// Behavioral flags.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlagsConfig {
    /// Reboot when our own score collapses below the required threshold
    #[serde(default)]
    pub reboot: bool,

    /// Allow the elected master to instruct cman to kill evicted nodes
    #[serde(default)]
    pub allow_kill: bool,

    /// Use monotonic uptime instead of wall-clock time for StatusBlock timestamps
    #[serde(default)]
    pub use_uptime: bool,

    /// Reboot immediately if a tick overruns `interval * tko`
    #[serde(default)]
    pub paranoid: bool,

    /// Ask cman to shut down the cluster on fatal init failure
    #[serde(default)]
    pub stop_cman: bool,

    /// Disk label is a cman-managed quorum device label
    #[serde(default)]
    pub cman_label: bool,

    /// Suppress fatal actions (reboot, shutdown, SIGSTOP) for diagnosis
    #[serde(default)]
    pub debug: bool,
}

/// Scheduling policy for the real-time discipline in SS4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    Other,
    Rr,
    Fifo,
}

impl Default for SchedPolicy {
    fn default() -> Self {
        SchedPolicy::Other
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub policy: SchedPolicy,

    #[serde(default)]
    pub priority: i32,
}

/// Human-readable status file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFileConfig {
    /// Path to write the status dump to, or "-" for stdout
    #[serde(default = "default_status_path")]
    pub path: String,
}

impl Default for StatusFileConfig {
    fn default() -> Self {
        Self {
            path: default_status_path(),
        }
    }
}

fn default_interval() -> u64 {
    1
}

fn default_tko() -> u32 {
    10
}

fn default_upgrade_wait() -> u32 {
    2
}

fn default_status_path() -> String {
    "/var/run/qdiskd/status".to_string()
}

impl QdiskConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let mut config: QdiskConfig = toml::from_str(content)?;
        config.apply_derived_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fill in defaults that are computed from other fields
    /// (`tko_up` defaults to `tko/3`, `master_wait` to `tko/2`).
    fn apply_derived_defaults(&mut self) {
        if self.timing.tko_up == 0 {
            self.timing.tko_up = (self.timing.tko / 3).max(2);
        }
        if self.timing.master_wait == 0 {
            self.timing.master_wait = (self.timing.tko / 2).max(self.timing.tko_up + 1);
        }
    }

    /// Validate the configuration against the constraints named in the spec.
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id == 0 || self.node.id > crate::state::MAX_NODES as u32 {
            return Err(crate::Error::Config(format!(
                "node.id must be in 1..={}",
                crate::state::MAX_NODES
            )));
        }

        if self.disk.device.is_none() && self.disk.label.is_none() {
            return Err(crate::Error::Config(
                "disk.device or disk.label must be set".into(),
            ));
        }

        if self.timing.interval < 1 {
            return Err(crate::Error::Config("timing.interval must be >= 1".into()));
        }

        if self.timing.tko < 3 {
            return Err(crate::Error::Config("timing.tko must be >= 3".into()));
        }

        if self.timing.tko_up < 2 {
            return Err(crate::Error::Config("timing.tko_up must be >= 2".into()));
        }

        if self.timing.upgrade_wait < 1 {
            return Err(crate::Error::Config(
                "timing.upgrade_wait must be >= 1".into(),
            ));
        }

        if self.timing.master_wait <= self.timing.tko_up {
            return Err(crate::Error::Config(
                "timing.master_wait must be > timing.tko_up".into(),
            ));
        }

        Ok(())
    }

    /// Interval between ticks as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.timing.interval)
    }

    /// The deadline a single tick may not exceed before paranoid self-reboot.
    pub fn paranoid_deadline(&self) -> Duration {
        Duration::from_secs(self.timing.interval * self.timing.tko as u64)
    }
}
