//! Maintenance commands that broadcast to every shard of a collection or
//! database, embedding each reply under `raw.<shard>`.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::document::Document;
use crate::error::RouterError;
use crate::registry::CommandHandler;
use crate::router::RouterContext;
use crate::routing::{self, RoutingDecision, RoutingIntent};
use crate::topology::{Catalog, DatabaseConfig, Namespace, Shard};

use super::{broadcast_raw, collection_namespace};

async fn collection_shards(
    ctx: &RouterContext,
    db: &str,
    ns: &Namespace,
) -> Result<BTreeSet<Shard>, RouterError> {
    let conf = ctx.catalog().database(db, false).await;
    let resolution =
        routing::resolve(conf.as_ref(), ns, RoutingIntent::BroadcastCollection).await?;
    match resolution.decision {
        RoutingDecision::AllShardsOfCollection(shards) => Ok(shards),
        RoutingDecision::Rejected(msg) => Err(RouterError::invalid(msg)),
        other => Err(RouterError::Internal(format!(
            "unexpected routing decision {other:?} for collection broadcast"
        ))),
    }
}

async fn run_collection_broadcast(
    ctx: &RouterContext,
    db: &str,
    cmd: &Document,
    reply: &mut Document,
) -> Result<(), RouterError> {
    let ns = collection_namespace(db, cmd)?;
    let shards = collection_shards(ctx, db, &ns).await?;
    broadcast_raw(ctx, db, &shards, cmd, reply, |_, _| {}).await
}

/// `dropIndexes` (alias `deleteIndexes`): every shard of the collection.
pub struct DropIndexes;

#[async_trait]
impl CommandHandler for DropIndexes {
    fn name(&self) -> &'static str {
        "dropIndexes"
    }

    fn alias(&self) -> Option<&'static str> {
        Some("deleteIndexes")
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        run_collection_broadcast(ctx, db, cmd, reply).await
    }
}

/// `reIndex`: every shard of the collection.
pub struct ReIndex;

#[async_trait]
impl CommandHandler for ReIndex {
    fn name(&self) -> &'static str {
        "reIndex"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        run_collection_broadcast(ctx, db, cmd, reply).await
    }
}

/// `validate`: every shard of the collection.
pub struct Validate;

#[async_trait]
impl CommandHandler for Validate {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        run_collection_broadcast(ctx, db, cmd, reply).await
    }
}

/// `repairDatabase`: every shard of the database.
pub struct RepairDatabase;

#[async_trait]
impl CommandHandler for RepairDatabase {
    fn name(&self) -> &'static str {
        "repairDatabase"
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
        broadcast_raw(ctx, db, &shards, cmd, reply, |_, _| {}).await
    }
}
