//! Cluster membership service: the daemon's only outbound collaborator
//! with whatever cluster manager is running alongside it.
//!
//! Kept behind a trait so the pace loop never depends on a concrete
//! cluster stack — standalone and test runs get `LoggingMembership`,
//! which reports every configured node online and logs every call.

use std::collections::HashMap;

use tracing::info;

use crate::error::Result;

/// Everything the daemon asks of the surrounding cluster manager.
pub trait MembershipSink: Send {
    /// This node's id as the membership service understands it.
    fn self_id(&self) -> u32;

    /// All nodes the membership service currently knows about, with
    /// whether each is reachable.
    fn node_list(&self) -> Vec<(u32, bool)>;

    /// Tell the membership service whether this node currently
    /// contributes to quorum.
    fn poll_quorum_device(&mut self, ok: bool) -> Result<()>;

    /// Ask the membership service to fence a peer.
    fn kill_node(&mut self, node_id: u32) -> Result<()>;

    /// Register this quorum device with the membership service.
    fn register(&mut self, label: &str, votes: u32) -> Result<()>;

    /// Withdraw this quorum device's registration.
    fn unregister(&mut self) -> Result<()>;

    /// Ask the membership service to shut the whole cluster down
    /// (used on a fatal init failure when `stop_cman` is set).
    fn shutdown_cluster(&mut self) -> Result<()>;

    /// Give the membership service a chance to process any queued
    /// non-blocking work without stalling the pace loop.
    fn dispatch_nonblocking(&mut self) -> Result<()>;
}

/// Default membership sink for standalone runs and tests: logs every
/// call and reports all configured nodes online.
pub struct LoggingMembership {
    my_id: u32,
    nodes: HashMap<u32, bool>,
}

impl LoggingMembership {
    pub fn new(my_id: u32, node_ids: &[u32]) -> Self {
        let nodes = node_ids.iter().map(|&id| (id, true)).collect();
        Self { my_id, nodes }
    }
}

impl Default for LoggingMembership {
    fn default() -> Self {
        Self {
            my_id: 1,
            nodes: HashMap::from([(1, true)]),
        }
    }
}

impl MembershipSink for LoggingMembership {
    fn self_id(&self) -> u32 {
        self.my_id
    }

    fn node_list(&self) -> Vec<(u32, bool)> {
        let mut list: Vec<(u32, bool)> = self.nodes.iter().map(|(&id, &up)| (id, up)).collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }

    fn poll_quorum_device(&mut self, ok: bool) -> Result<()> {
        info!(ok, "membership: poll_quorum_device");
        Ok(())
    }

    fn kill_node(&mut self, node_id: u32) -> Result<()> {
        info!(node_id, "membership: kill_node");
        self.nodes.insert(node_id, false);
        Ok(())
    }

    fn register(&mut self, label: &str, votes: u32) -> Result<()> {
        info!(label, votes, "membership: register");
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        info!("membership: unregister");
        Ok(())
    }

    fn shutdown_cluster(&mut self) -> Result<()> {
        info!("membership: shutdown_cluster requested");
        Ok(())
    }

    fn dispatch_nonblocking(&mut self) -> Result<()> {
        Ok(())
    }
}
