//! Routing resolver: classify a command's target shards.
//!
//! Precedence: command-scope overrides (database/collection broadcast),
//! then the unsharded fallback to the primary, then shard-key, filter, and
//! range narrowing on the chunk manager, and finally explicit rejection for
//! commands that cannot run against a sharded collection.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::document::Document;
use crate::error::RouterError;
use crate::topology::{ChunkManager, DatabaseConfig, Namespace, Shard};

/// Where a command must run.
#[derive(Debug, Clone)]
pub enum RoutingDecision {
    PassthroughPrimary(Shard),
    PassthroughAdmin(Shard),
    SingleShard(Shard),
    ShardSubset(BTreeSet<Shard>),
    AllShardsOfCollection(BTreeSet<Shard>),
    AllShardsOfDatabase(BTreeSet<Shard>),
    Rejected(String),
}

/// What the command wants from the resolver.
pub enum RoutingIntent {
    /// Unconditionally every shard of the database.
    BroadcastDatabase,
    /// Every shard of the collection (its primary when unsharded).
    BroadcastCollection,
    /// The single chunk owning this shard key; `missing` is the diagnostic
    /// when the document lacks the full key.
    ByShardKey {
        key: Document,
        missing: &'static str,
    },
    /// Shards whose ranges could match the filter.
    ByFilter(Document),
    /// Shards covering a shard-key range.
    ByRange { min: Document, max: Document },
    /// Refuse to run against a sharded collection.
    RejectSharded { command: &'static str },
}

/// A routing decision plus the chunk manager it was derived from, when the
/// collection is sharded.
pub struct Resolution {
    pub decision: RoutingDecision,
    pub manager: Option<Arc<dyn ChunkManager>>,
}

/// Coarse classification used by handlers that only need to pick between
/// the passthrough path and the sharded path.
pub enum CollectionRouting {
    /// No config, sharding disabled on the database, or namespace unsharded.
    Unsharded,
    Sharded(Arc<dyn ChunkManager>),
}

/// Classify a namespace, enforcing the catalog invariant that a sharded
/// collection always has a chunk manager.
pub async fn classify(
    conf: Option<&Arc<dyn DatabaseConfig>>,
    ns: &Namespace,
) -> Result<CollectionRouting, RouterError> {
    let conf = match conf {
        Some(conf) => conf,
        None => return Ok(CollectionRouting::Unsharded),
    };
    if !conf.sharding_enabled() || !conf.is_sharded(ns) {
        return Ok(CollectionRouting::Unsharded);
    }
    match conf.chunk_manager(ns, false).await {
        Some(manager) => Ok(CollectionRouting::Sharded(manager)),
        None => Err(RouterError::Internal(format!(
            "chunk manager missing for sharded collection {ns}"
        ))),
    }
}

/// Resolve an intent into a routing decision.
pub async fn resolve(
    conf: Option<&Arc<dyn DatabaseConfig>>,
    ns: &Namespace,
    intent: RoutingIntent,
) -> Result<Resolution, RouterError> {
    if let RoutingIntent::BroadcastDatabase = intent {
        let decision = match conf {
            Some(conf) => RoutingDecision::AllShardsOfDatabase(conf.all_shards()),
            None => RoutingDecision::Rejected(format!("database {} not found", ns.db())),
        };
        return Ok(Resolution {
            decision,
            manager: None,
        });
    }

    let manager = match classify(conf, ns).await? {
        CollectionRouting::Sharded(manager) => manager,
        CollectionRouting::Unsharded => {
            let conf = match conf {
                Some(conf) => conf,
                None => {
                    return Ok(Resolution {
                        decision: RoutingDecision::Rejected(format!(
                            "database {} not found",
                            ns.db()
                        )),
                        manager: None,
                    })
                }
            };
            let decision = match intent {
                // a collection broadcast on an unsharded collection is just
                // its owning shard
                RoutingIntent::BroadcastCollection => {
                    let mut shards = BTreeSet::new();
                    shards.insert(conf.shard_for(ns));
                    RoutingDecision::AllShardsOfCollection(shards)
                }
                _ => RoutingDecision::PassthroughPrimary(conf.primary_shard()),
            };
            return Ok(Resolution {
                decision,
                manager: None,
            });
        }
    };

    let decision = match intent {
        RoutingIntent::BroadcastDatabase => unreachable!("handled above"),
        RoutingIntent::BroadcastCollection => {
            RoutingDecision::AllShardsOfCollection(manager.all_shards())
        }
        RoutingIntent::ByShardKey { key, missing } => {
            if !manager.has_shard_key(&key) {
                return Err(RouterError::invalid(missing));
            }
            RoutingDecision::SingleShard(manager.find_chunk(&key).shard().clone())
        }
        RoutingIntent::ByFilter(filter) => {
            if filter.is_empty() {
                RoutingDecision::AllShardsOfCollection(manager.all_shards())
            } else if manager.has_shard_key(&filter) {
                RoutingDecision::SingleShard(manager.find_chunk(&filter).shard().clone())
            } else {
                RoutingDecision::ShardSubset(manager.shards_for_query(&filter))
            }
        }
        RoutingIntent::ByRange { min, max } => {
            RoutingDecision::ShardSubset(manager.shards_for_range(&min, &max))
        }
        RoutingIntent::RejectSharded { command } => RoutingDecision::Rejected(format!(
            "can't do command: {command} on sharded collection"
        )),
    };

    Ok(Resolution {
        decision,
        manager: Some(manager),
    })
}
