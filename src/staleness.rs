//! Staleness controller: versioned fan-out with bounded retry.
//!
//! Reconciles the router's cached routing metadata against the shards'
//! authoritative view. Every attempt handshakes the current chunk-manager
//! version on each connection; a stale handshake, or a stale-routing code
//! embedded in a reply, restarts the whole fan-out after a forced
//! chunk-manager refresh. Partial results from a stale attempt are
//! discarded wholesale. At most `max_attempts` attempts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::dispatch::{dispatch, ShardConnector, ShardOutcome};
use crate::document::Document;
use crate::metrics::RouterMetrics;
use crate::topology::{ChunkManager, DatabaseConfig, Namespace, Shard};

/// How to pick target shards from the chunk manager. Re-evaluated against
/// the refreshed manager on every attempt.
pub enum ShardSelector {
    Query(Document),
    Range { min: Document, max: Document },
    All,
}

impl ShardSelector {
    fn select(&self, manager: &Arc<dyn ChunkManager>) -> BTreeSet<Shard> {
        match self {
            ShardSelector::Query(filter) => manager.shards_for_query(filter),
            ShardSelector::Range { min, max } => manager.shards_for_range(min, max),
            ShardSelector::All => manager.all_shards(),
        }
    }
}

/// A fully successful fan-out: one reply per contacted shard, plus the
/// chunk manager the winning attempt actually used.
pub struct FanoutSuccess {
    pub results: BTreeMap<Shard, Document>,
    pub manager: Arc<dyn ChunkManager>,
}

#[derive(Debug)]
pub enum FanoutError {
    /// A shard reported a hard (non-stale) failure; no retry.
    Shard {
        shard: Shard,
        reply: Document,
        errmsg: String,
    },
    /// Every attempt came back stale.
    Exhausted { attempts: u32 },
    /// The forced refresh found no chunk manager: the collection is no
    /// longer sharded.
    NoLongerSharded,
}

/// Run `cmd` on the shards selected by `selector`, with the set-version
/// handshake on every connection, retrying on staleness up to
/// `max_attempts` times.
pub async fn versioned_fanout(
    connector: &dyn ShardConnector,
    metrics: &RouterMetrics,
    conf: &Arc<dyn DatabaseConfig>,
    ns: &Namespace,
    cmd: &Document,
    selector: &ShardSelector,
    initial: Arc<dyn ChunkManager>,
    max_attempts: u32,
) -> Result<FanoutSuccess, FanoutError> {
    let mut manager = initial;

    for attempt in 1..=max_attempts {
        let shards = selector.select(&manager);
        debug_assert!(!shards.is_empty(), "chunk manager returned no shards");
        metrics.record_shard_requests(shards.len() as u64);

        let outcomes = dispatch(
            connector,
            &shards,
            ns.db(),
            cmd,
            Some((ns, manager.version())),
        )
        .await;

        if outcomes.values().any(ShardOutcome::is_stale) {
            debug!(ns = %ns, attempt, "stale routing metadata, refreshing and restarting fan-out");
            metrics.record_stale_retry();
            manager = match conf.chunk_manager(ns, true).await {
                Some(manager) => manager,
                None => return Err(FanoutError::NoLongerSharded),
            };
            continue;
        }

        let mut results = BTreeMap::new();
        for (shard, outcome) in outcomes {
            match outcome {
                ShardOutcome::Success(reply) => {
                    results.insert(shard, reply);
                }
                ShardOutcome::Failure { reply, errmsg, .. } => {
                    return Err(FanoutError::Shard {
                        shard,
                        reply,
                        errmsg,
                    });
                }
                ShardOutcome::Stale => unreachable!("stale outcomes restart the attempt"),
            }
        }
        return Ok(FanoutSuccess { results, manager });
    }

    Err(FanoutError::Exhausted {
        attempts: max_attempts,
    })
}
