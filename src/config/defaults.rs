//! Default constants for the router.
//!
//! Operational defaults and protocol-fixed values are centralized here.

/// Maximum attempts of a versioned fan-out before giving up on stale
/// routing metadata.
pub const DEFAULT_STALE_RETRY_ATTEMPTS: u32 = 5;

/// Default result cap for `geoNear` when the client omits `num`.
pub const DEFAULT_GEO_NEAR_LIMIT: usize = 100;

/// Error code a shard raises when the router's routing version is older
/// than the authoritative one. `findAndModify` surfaces this to the outer
/// command layer for a full re-drive.
pub const STALE_ROUTING_CODE: i32 = 9996;

/// Error code embedded in a command reply when the shard detected a stale
/// routing version mid-command. Treated as a retry signal.
pub const STALE_ROUTING_IN_CONTEXT_CODE: i32 = 13388;

/// Prefix for the temporary collections the sharded map-reduce phase
/// writes into.
pub const MR_TMP_PREFIX: &str = "tmp.mrs";

/// Default GridFS root collection for `filemd5`.
pub const GRIDFS_DEFAULT_ROOT: &str = "fs";
