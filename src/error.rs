//! qdiskd Error Types

use thiserror::Error;

/// Result type alias for qdiskd operations
pub type Result<T> = std::result::Result<T, Error>;

/// qdiskd error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Disk / block codec errors
    #[error("Disk error: {0}")]
    Disk(String),

    #[error("Disk header invalid: {0}")]
    HeaderInvalid(String),

    #[error("Block corrupted at node {node_id}: {reason}")]
    BlockCorrupt { node_id: u32, reason: String },

    #[error("Node id {0} out of range")]
    NodeIdOutOfRange(u32),

    // Membership / scoring (external collaborators)
    #[error("Membership service error: {0}")]
    Membership(String),

    #[error("Score source error: {0}")]
    Score(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Real-time discipline
    #[error("Scheduler setup failed: {0}")]
    Scheduler(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is transient — safe to log and skip a single
    /// slot/tick rather than aborting the daemon.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Disk(_) | Error::BlockCorrupt { .. }
        )
    }

    /// Check if this error should abort startup before the pace loop runs.
    pub fn is_fatal_at_init(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ConfigParse(_) | Error::HeaderInvalid(_)
        )
    }
}
