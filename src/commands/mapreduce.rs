//! Two-phase sharded map-reduce.
//!
//! Phase one runs a whitelisted copy of the client command on every shard
//! holding input, writing into a temporary collection. Phase two sends a
//! sharded-finish command, carrying every shard's reply, to the output
//! database's primary for the final reduce. Shard connections are acquired
//! by the caller, handed to the per-shard tasks, and closed only after all
//! tasks have joined, so shard-side cursor ownership stays stable for the
//! whole phase.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error};

use crate::config::MR_TMP_PREFIX;
use crate::dispatch::{ShardConnection, ShardConnector};
use crate::document::Document;
use crate::error::RouterError;
use crate::registry::CommandHandler;
use crate::router::RouterContext;
use crate::topology::{Catalog, ChunkManager, DatabaseConfig};

use super::{
    append_reply, collection_namespace, command_query, passthrough, reply_ok, run_single,
    target_for, Target,
};

/// Fields forwarded verbatim to the shard phase. Anything else (except
/// `out` and `finalize`, which belong to the final phase) is refused.
const SHARD_PHASE_FIELDS: &[&str] = &[
    "map",
    "mapreduce",
    "mapparams",
    "reduce",
    "query",
    "sort",
    "scope",
    "verbose",
];

struct ShardPhaseRewrite {
    cmd: Document,
    custom_out: Option<Document>,
    bad_field: Option<String>,
}

/// Filter the client command down to the shard-phase whitelist and point
/// its output at the temporary collection.
fn rewrite_for_shards(cmd: &Document, output: &str) -> ShardPhaseRewrite {
    let mut rewritten = Document::new();
    let mut custom_out = None;

    for (name, value) in cmd.iter() {
        if SHARD_PHASE_FIELDS.contains(&name) {
            rewritten.push(name, value.clone());
        } else if name == "out" || name == "finalize" {
            if name == "out" {
                if let Some(out) = value.as_document() {
                    if out.contains_key("db") {
                        custom_out = Some(out.clone());
                    }
                }
            }
        } else {
            return ShardPhaseRewrite {
                cmd: Document::new(),
                custom_out,
                bad_field: Some(name.to_string()),
            };
        }
    }

    rewritten.push("out", output);
    ShardPhaseRewrite {
        cmd: rewritten,
        custom_out,
        bad_field: None,
    }
}

pub struct MapReduce;

impl MapReduce {
    fn tmp_collection_name(&self, ctx: &RouterContext, collection: &str) -> String {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!(
            "{MR_TMP_PREFIX}.{collection}_{secs}_{}",
            ctx.next_mr_suffix()
        )
    }
}

#[async_trait]
impl CommandHandler for MapReduce {
    fn name(&self) -> &'static str {
        "mapreduce"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let started = Instant::now();
        let ns = collection_namespace(db, cmd)?;
        let tmp_collection = self.tmp_collection_name(ctx, ns.collection());

        let rewrite = rewrite_for_shards(cmd, &tmp_collection);
        let custom_out_db = rewrite
            .custom_out
            .as_ref()
            .and_then(|out| out.get_str("db"))
            .map(str::to_string);

        let (conf, manager) = match target_for(ctx, db, &ns).await? {
            Target::Unsharded(conf) => {
                if custom_out_db.is_some() {
                    return Err(RouterError::invalid(
                        "can't use out 'db' with non-sharded db",
                    ));
                }
                return passthrough(ctx, &conf, cmd, reply).await;
            }
            Target::Sharded(conf, manager) => (conf, manager),
        };

        if let Some(bad_field) = rewrite.bad_field {
            return Err(RouterError::invalid(format!(
                "unknown m/r field for sharding: {bad_field}"
            )));
        }

        let filter = command_query(cmd);
        let shards = manager.shards_for_query(&filter);
        ctx.metrics().record_shard_requests(shards.len() as u64);

        // acquire every connection up front, hand each to its task, and
        // close them only after all joins
        let mut conns = Vec::with_capacity(shards.len());
        for shard in &shards {
            let conn = ctx.connector().connect(shard).await.map_err(|err| {
                RouterError::shard_failure(format!("couldn't connect to shard {shard}: {err}"))
            })?;
            conns.push(conn);
        }

        let shard_cmd = rewrite.cmd;
        let tasks: Vec<_> = shards
            .iter()
            .cloned()
            .zip(conns)
            .map(|(shard, mut conn)| {
                let shard_cmd = shard_cmd.clone();
                let db = db.to_string();
                async move {
                    let res = conn.run_command(&db, &shard_cmd).await;
                    (shard, conn, res)
                }
            })
            .collect();

        let joined = join_all(tasks).await;

        let mut held_conns = Vec::with_capacity(joined.len());
        let mut shard_results = Document::new();
        let mut failure: Option<String> = None;
        for (shard, conn, res) in joined {
            held_conns.push(conn);
            match res {
                Ok(res) if reply_ok(&res) => {
                    shard_results.push(shard.name(), res);
                }
                Ok(res) => {
                    error!(shard = %shard, reply = %res, "shard-side map/reduce failed");
                    reply.push("cause", res.clone());
                    failure = Some(format!("shard-side map/reduce failed: {res}"));
                }
                Err(err) => {
                    error!(shard = %shard, error = %err, "shard-side map/reduce failed");
                    failure = Some(format!("shard-side map/reduce failed: {err}"));
                }
            }
        }
        drop(held_conns);

        if let Some(errmsg) = failure {
            return Err(RouterError::shard_failure(errmsg));
        }

        let mut timing = Document::new();
        timing.push("shards", started.elapsed().as_millis() as i64);

        let mut final_cmd = Document::new();
        final_cmd.push("mapreduce.shardedfinish", cmd.clone());
        final_cmd.push("shardedOutputCollection", tmp_collection.clone());
        final_cmd.push("shards", shard_results);

        // by default the final reduce lands on the input database's primary
        let final_started = Instant::now();
        let out_server = match &custom_out_db {
            Some(outdb) => ctx
                .catalog()
                .database(outdb, true)
                .await
                .ok_or_else(|| RouterError::invalid(format!("database {outdb} not found")))?
                .primary_shard(),
            None => conf.primary_shard(),
        };
        debug!(out_server = %out_server, tmp = %tmp_collection, "running final reduce");

        let final_result = run_single(ctx, &out_server, db, &final_cmd).await?;
        if !reply_ok(&final_result) {
            return Err(RouterError::shard_failure(format!(
                "final reduce failed: {final_result}"
            )));
        }
        timing.push("final", final_started.elapsed().as_millis() as i64);

        append_reply(reply, &final_result);
        reply.push("timeMillis", started.elapsed().as_millis() as i64);
        reply.push("timing", timing);
        Ok(())
    }
}
