//! Collection and database lifecycle commands.

use async_trait::async_trait;
use tracing::info;

use crate::document::Document;
use crate::error::RouterError;
use crate::registry::CommandHandler;
use crate::router::RouterContext;
use crate::topology::{Catalog, ChunkManager, DatabaseConfig, Namespace};

use super::{
    admin_passthrough, collection_namespace, passthrough, target_for, Target,
};

/// `drop`: passthrough for unsharded collections; for sharded ones, drop
/// every chunk and forget the sharding state.
pub struct DropCollection;

#[async_trait]
impl CommandHandler for DropCollection {
    fn name(&self) -> &'static str {
        "drop"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let ns = collection_namespace(db, cmd)?;
        info!(ns = %ns, "dropping collection");

        match target_for(ctx, db, &ns).await? {
            Target::Unsharded(conf) => passthrough(ctx, &conf, cmd, reply).await,
            Target::Sharded(conf, manager) => {
                manager
                    .drop_chunks()
                    .await
                    .map_err(RouterError::shard_failure)?;
                if !conf.remove_sharding(&ns) {
                    return Err(RouterError::invalid(
                        "drop collection attempted on non-sharded collection",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// `dropDatabase`: the first field's value must be the numeric sentinel 1.
pub struct DropDatabase;

#[async_trait]
impl CommandHandler for DropDatabase {
    fn name(&self) -> &'static str {
        "dropDatabase"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let sentinel = cmd.first().map(|(_, value)| value);
        let valid = sentinel.map(|v| v.is_number() && v.as_f64() == 1.0);
        if valid != Some(true) {
            return Err(RouterError::invalid("invalid params"));
        }

        info!(db, "dropping database");

        match ctx.catalog().database(db, false).await {
            None => {
                reply.push("info", "database didn't exist");
                Ok(())
            }
            Some(conf) => {
                conf.drop_database()
                    .await
                    .map_err(RouterError::shard_failure)?;
                reply.push("dropped", db);
                Ok(())
            }
        }
    }
}

/// `renameCollection`: refused when either side is sharded, or when source
/// and destination live on different shards.
pub struct RenameCollection;

#[async_trait]
impl CommandHandler for RenameCollection {
    fn name(&self) -> &'static str {
        "renameCollection"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        _db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let from = cmd
            .first()
            .and_then(|(_, value)| value.as_str())
            .and_then(Namespace::from_full)
            .ok_or_else(|| RouterError::invalid("invalid source namespace"))?;
        let to = cmd
            .get_str("to")
            .and_then(Namespace::from_full)
            .ok_or_else(|| RouterError::invalid("invalid target namespace"))?;

        let conf_from = ctx.catalog().database(from.db(), false).await;
        let conf_to = ctx.catalog().database(to.db(), false).await;
        let (conf_from, conf_to) = match (conf_from, conf_to) {
            (Some(from), Some(to)) => (from, to),
            _ => return Err(RouterError::invalid("Don't recognize source or target DB")),
        };

        if conf_from.is_sharded(&from) {
            return Err(RouterError::invalid("You can't rename a sharded collection"));
        }
        if conf_to.is_sharded(&to) {
            return Err(RouterError::invalid(
                "You can't rename to a sharded collection",
            ));
        }

        if conf_from.shard_for(&from) != conf_to.shard_for(&to) {
            return Err(RouterError::invalid(
                "Source and destination collections must be on same shard",
            ));
        }

        admin_passthrough(ctx, &conf_from, cmd, reply).await
    }
}

/// `copydb`: refused into a sharded destination. Without an explicit
/// `fromhost`, the source database's primary is resolved and spliced into
/// the forwarded command.
pub struct CopyDatabase;

#[async_trait]
impl CommandHandler for CopyDatabase {
    fn name(&self) -> &'static str {
        "copydb"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        _db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let todb = cmd
            .get_str("todb")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RouterError::invalid("need a todb argument"))?;

        let conf_to = ctx
            .catalog()
            .database(todb, true)
            .await
            .ok_or_else(|| RouterError::invalid(format!("database {todb} not found")))?;
        if conf_to.sharding_enabled() {
            return Err(RouterError::invalid("cant copy to sharded DB"));
        }

        let fromhost = cmd.get_str("fromhost").filter(|host| !host.is_empty());
        if fromhost.is_some() {
            return admin_passthrough(ctx, &conf_to, cmd, reply).await;
        }

        let fromdb = cmd
            .get_str("fromdb")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RouterError::invalid("need a fromdb argument"))?;
        let conf_from = ctx
            .catalog()
            .database(fromdb, false)
            .await
            .ok_or_else(|| RouterError::invalid("don't know where source DB is"))?;
        if conf_from.sharding_enabled() {
            return Err(RouterError::invalid("cant copy from sharded DB"));
        }

        // rewrite the command with the resolved source primary, preserving
        // field order and dropping any stale fromhost
        let mut fixed = Document::new();
        for (name, value) in cmd.iter() {
            if name != "fromhost" {
                fixed.push(name, value.clone());
            }
        }
        fixed.push("fromhost", conf_from.primary_shard().conn_string());

        admin_passthrough(ctx, &conf_to, &fixed, reply).await
    }
}
