//! Public command handlers.
//!
//! One handler per client-visible command, each composing the routing
//! resolver, the shard dispatcher, the staleness controller, and the
//! aggregators. Shared fan-out and passthrough plumbing lives here; the
//! per-command logic is in the submodules.

mod admin;
mod broadcast;
mod mapreduce;
mod query;
mod restricted;
mod stats;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::aggregate;
use crate::dispatch::{dispatch, ShardConnection, ShardConnector, ShardOutcome};
use crate::document::Document;
use crate::error::RouterError;
use crate::registry::CommandRegistry;
use crate::router::RouterContext;
use crate::routing::{self, CollectionRouting};
use crate::staleness::FanoutError;
use crate::topology::{Catalog, ChunkManager, DatabaseConfig, Namespace, Shard};

/// Build the full public command set. Called once at router startup; the
/// registry is immutable afterwards.
pub fn build_registry() -> CommandRegistry {
    CommandRegistry::new(vec![
        Arc::new(admin::DropCollection),
        Arc::new(admin::DropDatabase),
        Arc::new(admin::RenameCollection),
        Arc::new(admin::CopyDatabase),
        Arc::new(stats::DbStats),
        Arc::new(stats::CollStats),
        Arc::new(stats::DataSize),
        Arc::new(query::Count),
        Arc::new(query::Distinct),
        Arc::new(query::FindAndModify),
        Arc::new(query::GeoNear),
        Arc::new(query::FileMd5),
        Arc::new(broadcast::DropIndexes),
        Arc::new(broadcast::ReIndex),
        Arc::new(broadcast::Validate),
        Arc::new(broadcast::RepairDatabase),
        Arc::new(restricted::ConvertToCapped),
        Arc::new(restricted::Group),
        Arc::new(restricted::ApplyOps),
        Arc::new(mapreduce::MapReduce),
    ])
}

/// The collection-scoped namespace named by the command's first field.
pub(crate) fn collection_namespace(db: &str, cmd: &Document) -> Result<Namespace, RouterError> {
    let collection = cmd
        .first()
        .and_then(|(_, value)| value.as_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| RouterError::invalid("no collection name given"))?;
    Ok(Namespace::new(db, collection))
}

/// The command's `query` filter; anything but a document reads as empty.
pub(crate) fn command_query(cmd: &Document) -> Document {
    cmd.get_document("query").cloned().unwrap_or_default()
}

pub(crate) enum Target {
    Unsharded(Arc<dyn DatabaseConfig>),
    Sharded(Arc<dyn DatabaseConfig>, Arc<dyn ChunkManager>),
}

/// Resolve the database config and classify the namespace.
pub(crate) async fn target_for(
    ctx: &RouterContext,
    db: &str,
    ns: &Namespace,
) -> Result<Target, RouterError> {
    let conf = ctx
        .catalog()
        .database(db, false)
        .await
        .ok_or_else(|| RouterError::invalid(format!("database {db} not found")))?;
    match routing::classify(Some(&conf), ns).await? {
        CollectionRouting::Unsharded => Ok(Target::Unsharded(conf)),
        CollectionRouting::Sharded(manager) => Ok(Target::Sharded(conf, manager)),
    }
}

pub(crate) fn reply_ok(res: &Document) -> bool {
    res.get_f64("ok") != 0.0
}

pub(crate) fn reply_errmsg(res: &Document) -> String {
    res.get_str("errmsg")
        .filter(|msg| !msg.is_empty())
        .unwrap_or("command failed on shard")
        .to_string()
}

/// Copy a shard reply's fields into the outgoing reply, minus the envelope
/// fields the router appends itself.
pub(crate) fn append_reply(reply: &mut Document, res: &Document) {
    for (name, value) in res.iter() {
        if name != "ok" && name != "errmsg" {
            reply.push(name, value.clone());
        }
    }
}

/// Run a command on a single shard and return the raw reply. Transport
/// failures surface as shard failures; the connection is released by drop.
pub(crate) async fn run_single(
    ctx: &RouterContext,
    shard: &Shard,
    db: &str,
    cmd: &Document,
) -> Result<Document, RouterError> {
    ctx.metrics().record_shard_requests(1);
    let mut conn = ctx
        .connector()
        .connect(shard)
        .await
        .map_err(|err| RouterError::shard_failure(err.to_string()))?;
    conn.run_command(db, cmd)
        .await
        .map_err(|err| RouterError::shard_failure(err.to_string()))
}

/// Forward the command unchanged to the database's primary shard and copy
/// the reply through.
pub(crate) async fn passthrough(
    ctx: &RouterContext,
    conf: &Arc<dyn DatabaseConfig>,
    cmd: &Document,
    reply: &mut Document,
) -> Result<(), RouterError> {
    scoped_passthrough(ctx, conf, conf.name(), cmd, reply).await
}

/// Passthrough on the admin scope (cross-database commands).
pub(crate) async fn admin_passthrough(
    ctx: &RouterContext,
    conf: &Arc<dyn DatabaseConfig>,
    cmd: &Document,
    reply: &mut Document,
) -> Result<(), RouterError> {
    scoped_passthrough(ctx, conf, "admin", cmd, reply).await
}

async fn scoped_passthrough(
    ctx: &RouterContext,
    conf: &Arc<dyn DatabaseConfig>,
    db_scope: &str,
    cmd: &Document,
    reply: &mut Document,
) -> Result<(), RouterError> {
    let res = run_single(ctx, &conf.primary_shard(), db_scope, cmd).await?;
    let ok = reply_ok(&res);
    let errmsg = reply_errmsg(&res);
    append_reply(reply, &res);
    if ok {
        Ok(())
    } else {
        Err(RouterError::shard_failure(errmsg))
    }
}

/// The run-on-all-shards pattern: concurrent unversioned fan-out, every
/// reply embedded under `raw.<shard>`, per-shard errmsgs collected into the
/// top-level failure, and an optional aggregation over the successes.
pub(crate) async fn broadcast_raw(
    ctx: &RouterContext,
    db: &str,
    shards: &BTreeSet<Shard>,
    cmd: &Document,
    reply: &mut Document,
    aggregate_results: impl FnOnce(&BTreeMap<Shard, Document>, &mut Document),
) -> Result<(), RouterError> {
    ctx.metrics().record_shard_requests(shards.len() as u64);
    let outcomes = dispatch(ctx.connector(), shards, db, cmd, None).await;

    let raw_status = aggregate::embed_raw(&outcomes, reply);

    let mut results = BTreeMap::new();
    for (shard, outcome) in outcomes {
        if let ShardOutcome::Success(res) = outcome {
            results.insert(shard, res);
        }
    }

    match raw_status {
        Ok(()) => {
            aggregate_results(&results, reply);
            Ok(())
        }
        Err(errmsg) => Err(RouterError::shard_failure(errmsg)),
    }
}

/// Exhausted-retry error for a versioned fan-out.
pub(crate) fn stale_exhausted(attempts: u32, action: &'static str, ns: &Namespace) -> RouterError {
    RouterError::RetriesExhausted {
        attempts,
        action,
        ns: ns.full(),
    }
}

/// A forced refresh found no chunk manager mid-retry.
pub(crate) fn no_longer_sharded(ns: &Namespace) -> RouterError {
    RouterError::invalid(format!("collection {ns} is no longer sharded"))
}

/// Map the common fan-out failure shapes; the hard shard failure is left to
/// the caller since each command embeds it differently.
pub(crate) fn map_fanout_control(
    err: FanoutError,
    attempts: u32,
    action: &'static str,
    ns: &Namespace,
) -> Result<(Shard, Document, String), RouterError> {
    match err {
        FanoutError::Shard {
            shard,
            reply,
            errmsg,
        } => Ok((shard, reply, errmsg)),
        FanoutError::Exhausted { attempts: tried } => {
            debug_assert_eq!(tried, attempts);
            Err(stale_exhausted(tried, action, ns))
        }
        FanoutError::NoLongerSharded => Err(no_longer_sharded(ns)),
    }
}
