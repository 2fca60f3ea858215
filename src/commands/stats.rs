//! Storage statistics commands.

use async_trait::async_trait;

use crate::aggregate;
use crate::document::{Document, Value};
use crate::error::RouterError;
use crate::registry::CommandHandler;
use crate::router::RouterContext;
use crate::staleness::{versioned_fanout, ShardSelector};
use crate::topology::{Catalog, ChunkManager, DatabaseConfig, Namespace};

use super::{
    append_reply, broadcast_raw, collection_namespace, map_fanout_control, passthrough, target_for,
    Target,
};

/// `dbStats`: fan out to every shard of the database and sum the storage
/// counters.
pub struct DbStats;

#[async_trait]
impl CommandHandler for DbStats {
    fn name(&self) -> &'static str {
        "dbStats"
    }

    fn alias(&self) -> Option<&'static str> {
        Some("dbstats")
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let conf = ctx
            .catalog()
            .database(db, false)
            .await
            .ok_or_else(|| RouterError::invalid(format!("database {db} not found")))?;
        let shards = conf.all_shards();
        broadcast_raw(ctx, db, &shards, cmd, reply, |results, out| {
            aggregate::sum_database_stats(results, out)
        })
        .await
    }
}

/// `collStats`: merge per-shard collection stats, flagging index-count
/// divergence.
pub struct CollStats;

#[async_trait]
impl CommandHandler for CollStats {
    fn name(&self) -> &'static str {
        "collStats"
    }

    fn alias(&self) -> Option<&'static str> {
        Some("collstats")
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
            Target::Unsharded(conf) => {
                reply.push("ns", ns.full());
                reply.push("sharded", false);
                reply.push("primary", conf.primary_shard().name());
                passthrough(ctx, &conf, cmd, reply).await
            }
            Target::Sharded(conf, manager) => {
                reply.push("sharded", true);
                let attempts = ctx.config().stale_retry_attempts;
                let fanout = versioned_fanout(
                    ctx.connector(),
                    ctx.metrics(),
                    &conf,
                    &ns,
                    cmd,
                    &ShardSelector::All,
                    manager,
                    attempts,
                )
                .await;

                match fanout {
                    Ok(success) => {
                        aggregate::merge_collection_stats(
                            &ns,
                            &success.results,
                            success.manager.num_chunks(),
                            reply,
                        );
                        Ok(())
                    }
                    Err(err) => {
                        let (_, failed_reply, _) =
                            map_fanout_control(err, attempts, "get collection stats", &ns)?;
                        Err(RouterError::shard_failure(format!(
                            "failed on shard: {failed_reply}"
                        )))
                    }
                }
            }
        }
    }
}

/// `dataSize`: sum object count and byte size over the shards covering a
/// shard-key range.
pub struct DataSize;

#[async_trait]
impl CommandHandler for DataSize {
    fn name(&self) -> &'static str {
        "dataSize"
    }

    fn alias(&self) -> Option<&'static str> {
        Some("datasize")
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        // the first field names the full namespace, not a bare collection
        let ns = cmd
            .first()
            .and_then(|(_, value)| value.as_str())
            .and_then(Namespace::from_full)
            .ok_or_else(|| RouterError::invalid("invalid namespace"))?;

        match target_for(ctx, db, &ns).await? {
            Target::Unsharded(conf) => passthrough(ctx, &conf, cmd, reply).await,
            Target::Sharded(conf, manager) => {
                let key_pattern = cmd.get_document("keyPattern").cloned().unwrap_or_default();
                if manager.shard_key().as_document() != key_pattern {
                    return Err(RouterError::invalid("keyPattern must equal shard key"));
                }

                let min = cmd.get_document("min").cloned().unwrap_or_default();
                let max = cmd.get_document("max").cloned().unwrap_or_default();

                let attempts = ctx.config().stale_retry_attempts;
                let fanout = versioned_fanout(
                    ctx.connector(),
                    ctx.metrics(),
                    &conf,
                    &ns,
                    cmd,
                    &ShardSelector::Range { min, max },
                    manager,
                    attempts,
                )
                .await;

                let results = match fanout {
                    Ok(success) => success.results,
                    Err(err) => {
                        let (_, failed_reply, errmsg) =
                            map_fanout_control(err, attempts, "compute data size", &ns)?;
                        append_reply(reply, &failed_reply);
                        return Err(RouterError::shard_failure(errmsg));
                    }
                };

                let mut size = 0.0;
                let mut num_objects = 0.0;
                let mut millis: i64 = 0;
                for res in results.values() {
                    size += res.get_f64("size");
                    num_objects += res.get_f64("numObjects");
                    millis += res.get_i64("millis");
                }

                reply.push("size", Value::Double(size));
                reply.push("numObjects", Value::Double(num_objects));
                reply.push("millis", millis);
                Ok(())
            }
        }
    }
}
