//! Commands refused on sharded collections, and commands refused outright.

use async_trait::async_trait;

use crate::document::Document;
use crate::error::RouterError;
use crate::registry::CommandHandler;
use crate::router::RouterContext;
use crate::routing::{self, RoutingDecision, RoutingIntent};
use crate::topology::{Catalog, Namespace};

use super::{collection_namespace, passthrough};

async fn not_allowed_on_sharded(
    ctx: &RouterContext,
    command: &'static str,
    db: &str,
    ns: &Namespace,
    cmd: &Document,
    reply: &mut Document,
) -> Result<(), RouterError> {
    let conf = ctx.catalog().database(db, false).await;
    let resolution =
        routing::resolve(conf.as_ref(), ns, RoutingIntent::RejectSharded { command }).await?;
    match (resolution.decision, conf) {
        (RoutingDecision::PassthroughPrimary(_), Some(conf)) => {
            passthrough(ctx, &conf, cmd, reply).await
        }
        (RoutingDecision::Rejected(msg), _) => Err(RouterError::invalid(msg)),
        (other, _) => Err(RouterError::Internal(format!(
            "unexpected routing decision {other:?} for {command}"
        ))),
    }
}

/// `convertToCapped`: passthrough only while the collection is unsharded.
pub struct ConvertToCapped;

#[async_trait]
impl CommandHandler for ConvertToCapped {
    fn name(&self) -> &'static str {
        "convertToCapped"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let ns = collection_namespace(db, cmd)?;
        not_allowed_on_sharded(ctx, self.name(), db, &ns, cmd, reply).await
    }
}

/// `group`: the target collection is nested under the group spec's `ns`.
pub struct Group;

#[async_trait]
impl CommandHandler for Group {
    fn name(&self) -> &'static str {
        "group"
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError> {
        let collection = cmd
            .first()
            .and_then(|(_, value)| value.as_document())
            .and_then(|spec| spec.get_str("ns"))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RouterError::invalid("group command requires ns"))?;
        let ns = Namespace::new(db, collection);
        not_allowed_on_sharded(ctx, self.name(), db, &ns, cmd, reply).await
    }
}

/// `applyOps` is never routable: it replays oplog entries against a single
/// server's state.
pub struct ApplyOps;

#[async_trait]
impl CommandHandler for ApplyOps {
    fn name(&self) -> &'static str {
        "applyOps"
    }

    async fn run(
        &self,
        _ctx: &RouterContext,
        _db: &str,
        _cmd: &Document,
        _reply: &mut Document,
    ) -> Result<(), RouterError> {
        Err(RouterError::invalid("applyOps not allowed through mongos"))
    }
}
