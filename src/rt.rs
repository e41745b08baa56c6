//! Real-time discipline and the reboot escape hatch.
//!
//! Memory pinning and scheduling priority are soft: a failure here is
//! logged and the daemon carries on unprivileged. Reboot is the opposite
//! — when the protocol decides a reboot is warranted, it must happen,
//! so it's the one piece of this module tests cannot exercise for real.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::warn;

use crate::config::{SchedPolicy, SchedulerConfig};
use crate::error::Result;

/// Pin the process's memory so paging never delays a heartbeat write.
/// A failure (commonly: not running as root) is logged and ignored.
pub fn lock_memory() {
    let ret = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if ret != 0 {
        warn!(
            error = %std::io::Error::last_os_error(),
            "mlockall failed, continuing without memory pinning"
        );
    }
}

/// Apply the configured real-time scheduling policy to this process.
/// Soft failure, same as `lock_memory`.
pub fn apply_scheduler(config: &SchedulerConfig) {
    if config.policy == SchedPolicy::Other && config.priority == 0 {
        return;
    }

    let policy = match config.policy {
        SchedPolicy::Other => libc::SCHED_OTHER,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Fifo => libc::SCHED_FIFO,
    };

    let param = libc::sched_param {
        sched_priority: config.priority,
    };

    let ret = unsafe { libc::sched_setscheduler(0, policy, &param as *const _) };
    if ret != 0 {
        warn!(
            error = %std::io::Error::last_os_error(),
            ?config.policy,
            priority = config.priority,
            "sched_setscheduler failed, continuing at default priority"
        );
    }
}

/// Performs a real reboot. Behind a trait so tests substitute a
/// recording fake instead of rebooting the test host.
pub trait RebootAgent: Send + Sync {
    /// Never returns on the real implementation: `reboot(2)` either
    /// succeeds (the kernel stops scheduling this process) or the
    /// call itself fails and we surface that as an error.
    fn reboot(&self) -> Result<()>;
}

/// The real `reboot(2)` syscall, gated by `libc::RB_AUTOBOOT`.
pub struct SystemReboot;

impl RebootAgent for SystemReboot {
    fn reboot(&self) -> Result<()> {
        unsafe {
            libc::sync();
            libc::reboot(libc::RB_AUTOBOOT);
        }
        // Only reached if the syscall itself failed to take effect.
        Err(crate::Error::Internal(format!(
            "reboot(2) returned unexpectedly: {}",
            std::io::Error::last_os_error()
        )))
    }
}

/// Records reboot requests instead of performing them.
pub struct FakeReboot {
    count: AtomicUsize,
    log: Mutex<Vec<&'static str>>,
}

impl Default for FakeReboot {
    fn default() -> Self {
        Self {
            count: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }
}

impl FakeReboot {
    pub fn times_called(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl RebootAgent for FakeReboot {
    fn reboot(&self) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("reboot");
        Ok(())
    }
}
