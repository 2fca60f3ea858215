//! Read-path commands: count, distinct, findAndModify, geoNear, filemd5.

use std::sync::Arc;

use async_trait::async_trait;

use crate::aggregate;
use crate::config::{GRIDFS_DEFAULT_ROOT, STALE_ROUTING_CODE, STALE_ROUTING_IN_CONTEXT_CODE};
use crate::doc;
use crate::document::{Document, Value};
use crate::error::RouterError;
use crate::registry::CommandHandler;
use crate::router::RouterContext;
use crate::routing::{self, RoutingDecision, RoutingIntent};
use crate::staleness::{versioned_fanout, FanoutError, ShardSelector};
use crate::topology::{Catalog, ChunkManager, DatabaseConfig, Namespace};

use super::{
    append_reply, collection_namespace, command_query, passthrough, reply_errmsg, reply_ok,
    run_single, stale_exhausted, target_for, Target,
};

/// `count`: passthrough when unsharded, with a fall-through to the sharded
/// path when the shard reports the collection just became sharded; the
/// sharded path is the canonical bounded staleness-retry loop.
pub struct Count;

enum UnshardedCount {
    Done,
    BecameSharded(Arc<dyn ChunkManager>),
}

impl Count {
    async fn run_unsharded(
        &self,
        ctx: &RouterContext,
        conf: &Arc<dyn DatabaseConfig>,
        ns: &Namespace,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<UnshardedCount, RouterError> {
        let res = run_single(ctx, &conf.primary_shard(), db, cmd).await?;
        if reply_ok(&res) {
            reply.push("n", res.get("n").cloned().unwrap_or(Value::Int64(0)));
            return Ok(UnshardedCount::Done);
        }

        if res.get_i32("code") != STALE_ROUTING_IN_CONTEXT_CODE {
            let errmsg = reply_errmsg(&res);
            append_reply(reply, &res);
            return Err(RouterError::shard_failure(errmsg));
        }

        // the collection got sharded under us
        match conf.chunk_manager(ns, true).await {
            Some(manager) => Ok(UnshardedCount::BecameSharded(manager)),
            None => {
                reply.push("root", res);
                Err(RouterError::shard_failure("should be sharded now"))
            }
        }
    }

    async fn run_sharded(
        &self,
        ctx: &RouterContext,
        conf: &Arc<dyn DatabaseConfig>,
        ns: &Namespace,
        manager: Arc<dyn ChunkManager>,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let filter = command_query(cmd);
        // skip/limit are applied at the router, not forwarded
        let shard_cmd = doc! { "count" => ns.collection(), "query" => filter.clone() };

        let attempts = ctx.config().stale_retry_attempts;
        let fanout = versioned_fanout(
            ctx.connector(),
            ctx.metrics(),
            conf,
            ns,
            &shard_cmd,
            &ShardSelector::Query(filter),
            manager,
            attempts,
        )
        .await;

        let results = match fanout {
            Ok(success) => success.results,
            Err(FanoutError::Shard { shard, reply: res, .. }) => {
                reply.push("cause", res);
                return Err(RouterError::shard_failure(format!(
                    "failed on : {}",
                    shard.name()
                )));
            }
            Err(FanoutError::Exhausted { attempts }) => {
                return Err(stale_exhausted(attempts, "get count", ns));
            }
            // reverted to unsharded mid-retry; a plain passthrough answers
            Err(FanoutError::NoLongerSharded) => {
                let res = run_single(ctx, &conf.primary_shard(), ns.db(), cmd).await?;
                if reply_ok(&res) {
                    reply.push("n", res.get("n").cloned().unwrap_or(Value::Int64(0)));
                    return Ok(());
                }
                let errmsg = reply_errmsg(&res);
                append_reply(reply, &res);
                return Err(RouterError::shard_failure(errmsg));
            }
        };

        let (total, per_shard) = aggregate::sum_counts(&results);
        let total = aggregate::apply_skip_limit(total, cmd);
        reply.push("n", total);

        let mut shard_counts = Document::new();
        for (name, count) in per_shard {
            shard_counts.push(name, count);
        }
        reply.push("shards", shard_counts);
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for Count {
    fn name(&self) -> &'static str {
        "count"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let ns = collection_namespace(db, cmd)?;

        let (conf, manager) = match target_for(ctx, db, &ns).await? {
            Target::Unsharded(conf) => {
                match self.run_unsharded(ctx, &conf, &ns, db, cmd, reply).await? {
                    UnshardedCount::Done => return Ok(()),
                    UnshardedCount::BecameSharded(manager) => (conf, manager),
                }
            }
            Target::Sharded(conf, manager) => (conf, manager),
        };

        self.run_sharded(ctx, &conf, &ns, manager, cmd, reply).await
    }
}

/// `distinct`: fan out and union the per-shard value arrays under set
/// semantics.
pub struct Distinct;

#[async_trait]
impl CommandHandler for Distinct {
    fn name(&self) -> &'static str {
        "distinct"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let ns = collection_namespace(db, cmd)?;

        match target_for(ctx, db, &ns).await? {
            Target::Unsharded(conf) => passthrough(ctx, &conf, cmd, reply).await,
            Target::Sharded(conf, manager) => {
                let filter = command_query(cmd);
                let attempts = ctx.config().stale_retry_attempts;
                let fanout = versioned_fanout(
                    ctx.connector(),
                    ctx.metrics(),
                    &conf,
                    &ns,
                    cmd,
                    &ShardSelector::Query(filter),
                    manager,
                    attempts,
                )
                .await;

                let results = match fanout {
                    Ok(success) => success.results,
                    Err(FanoutError::Shard { reply: res, errmsg, .. }) => {
                        append_reply(reply, &res);
                        return Err(RouterError::shard_failure(errmsg));
                    }
                    Err(FanoutError::Exhausted { attempts }) => {
                        return Err(stale_exhausted(attempts, "get distinct values", &ns));
                    }
                    Err(FanoutError::NoLongerSharded) => {
                        return Err(super::no_longer_sharded(&ns));
                    }
                };

                let values = aggregate::union_distinct(results.values());
                reply.push("values", Value::Array(values));
                Ok(())
            }
        }
    }
}

/// `findAndModify`: the filter must pin the full shard key; runs on exactly
/// the owning chunk's shard. A stale-routing reply is surfaced for the
/// outer command layer to re-drive the whole command.
pub struct FindAndModify;

#[async_trait]
impl CommandHandler for FindAndModify {
    fn name(&self) -> &'static str {
        "findAndModify"
    }

    fn alias(&self) -> Option<&'static str> {
        Some("findandmodify")
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let ns = collection_namespace(db, cmd)?;
        let conf = ctx
            .catalog()
            .database(db, false)
            .await
            .ok_or_else(|| RouterError::invalid(format!("database {db} not found")))?;

        let query = cmd.get_document("query").cloned().unwrap_or_default();
        let resolution = routing::resolve(
            Some(&conf),
            &ns,
            RoutingIntent::ByShardKey {
                key: query,
                missing: "query for sharded findAndModify must have shardkey",
            },
        )
        .await?;

        let shard = match resolution.decision {
            RoutingDecision::PassthroughPrimary(_) => {
                return passthrough(ctx, &conf, cmd, reply).await;
            }
            RoutingDecision::SingleShard(shard) => shard,
            other => {
                return Err(RouterError::Internal(format!(
                    "unexpected routing decision {other:?} for findAndModify"
                )))
            }
        };

        let res = run_single(ctx, &shard, conf.name(), cmd).await?;
        if !reply_ok(&res) && res.get_i32("code") == STALE_ROUTING_CODE {
            return Err(RouterError::StaleConfig {
                ns: ns.full(),
                action: "findAndModify",
            });
        }

        let ok = reply_ok(&res);
        let errmsg = reply_errmsg(&res);
        append_reply(reply, &res);
        if ok {
            Ok(())
        } else {
            Err(RouterError::shard_failure(errmsg))
        }
    }
}

/// `geoNear`: parallel fan-out, merge-sort by distance, top-`num`.
pub struct GeoNear;

#[async_trait]
impl CommandHandler for GeoNear {
    fn name(&self) -> &'static str {
        "geoNear"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let ns = collection_namespace(db, cmd)?;

        match target_for(ctx, db, &ns).await? {
            Target::Unsharded(conf) => passthrough(ctx, &conf, cmd, reply).await,
            Target::Sharded(conf, manager) => {
                let filter = command_query(cmd);
                let limit = match cmd.get("num") {
                    Some(num) if num.is_number() => num.as_i64().max(0) as usize,
                    _ => ctx.config().geo_near_default_limit,
                };

                let attempts = ctx.config().stale_retry_attempts;
                let fanout = versioned_fanout(
                    ctx.connector(),
                    ctx.metrics(),
                    &conf,
                    &ns,
                    cmd,
                    &ShardSelector::Query(filter),
                    manager,
                    attempts,
                )
                .await;

                let results = match fanout {
                    Ok(success) => success.results,
                    Err(FanoutError::Shard { reply: res, .. }) => {
                        return Err(RouterError::shard_failure(reply_errmsg(&res)));
                    }
                    Err(FanoutError::Exhausted { attempts }) => {
                        return Err(stale_exhausted(attempts, "run geoNear", &ns));
                    }
                    Err(FanoutError::NoLongerSharded) => {
                        return Err(super::no_longer_sharded(&ns));
                    }
                };

                let merged = aggregate::merge_geo_near(&results, limit);

                reply.push("ns", ns.full());
                reply.push("near", merged.near);
                reply.push(
                    "results",
                    Value::Array(merged.results.into_iter().map(Value::Document).collect()),
                );

                let mut stats = Document::new();
                stats.push("time", merged.time);
                stats.push("btreelocs", merged.btreelocs);
                stats.push("nscanned", merged.nscanned);
                stats.push("objectsLoaded", merged.objects_loaded);
                stats.push("avgDistance", merged.avg_distance);
                stats.push("maxDistance", merged.max_distance);
                stats.push(
                    "shards",
                    Value::Array(merged.shard_names.into_iter().map(Value::String).collect()),
                );
                reply.push("stats", stats);
                Ok(())
            }
        }
    }
}

/// `filemd5`: the namespace is the GridFS chunks collection; when sharded it
/// must be keyed on `files_id`, and the command runs on the single chunk
/// owning the requested file.
pub struct FileMd5;

#[async_trait]
impl CommandHandler for FileMd5 {
    fn name(&self) -> &'static str {
        "filemd5"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let root = cmd
            .get_str("root")
            .filter(|root| !root.is_empty())
            .unwrap_or(GRIDFS_DEFAULT_ROOT);
        let ns = Namespace::new(db, format!("{root}.chunks"));

        match target_for(ctx, db, &ns).await? {
            Target::Unsharded(conf) => passthrough(ctx, &conf, cmd, reply).await,
            Target::Sharded(conf, manager) => {
                if manager.shard_key().as_document() != doc! { "files_id" => 1 } {
                    return Err(RouterError::invalid(
                        "GridFS chunks collection can only be sharded on files_id",
                    ));
                }

                let files_id = cmd
                    .first()
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Value::Null);
                let mut key = Document::new();
                key.push("files_id", files_id);

                let chunk = manager.find_chunk(&key);
                let res = run_single(ctx, chunk.shard(), conf.name(), cmd).await?;

                let ok = reply_ok(&res);
                let errmsg = reply_errmsg(&res);
                append_reply(reply, &res);
                if ok {
                    Ok(())
                } else {
                    Err(RouterError::shard_failure(errmsg))
                }
            }
        }
    }
}
