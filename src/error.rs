//! Router error taxonomy.
//!
//! Stale routing metadata is a control-plane outcome, not an exception: the
//! staleness controller retries it internally, and only `findAndModify`
//! surfaces it for the outer command layer to re-drive.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Routing metadata was stale and the handler delegates the re-drive to
    /// the outer command layer.
    #[error("stale routing metadata for {ns} during {action}")]
    StaleConfig { ns: String, action: &'static str },

    /// Client input failed validation; the message is the stable
    /// client-facing diagnostic.
    #[error("{0}")]
    Invalid(String),

    /// A shard reported a hard failure, or transport to it failed. Per-shard
    /// detail, when useful, is already embedded in the reply document.
    #[error("{errmsg}")]
    ShardFailure { errmsg: String },

    /// The staleness retry loop ran out of attempts.
    #[error("Tried {attempts} times without success to {action} for {ns} from all shards")]
    RetriesExhausted {
        attempts: u32,
        action: &'static str,
        ns: String,
    },

    /// Catalog invariant violation (e.g. a sharded collection without a
    /// chunk manager).
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        RouterError::Invalid(msg.into())
    }

    pub fn shard_failure(errmsg: impl Into<String>) -> Self {
        RouterError::ShardFailure {
            errmsg: errmsg.into(),
        }
    }
}
