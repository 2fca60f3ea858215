//! Concurrent per-shard command dispatch.
//!
//! One logical task per target shard, all joined before returning. Each task
//! checks out a connection, optionally runs the set-version handshake, runs
//! the command, and releases the connection by dropping it on every exit
//! path. The dispatcher never retries; recovering from stale routing
//! metadata is the staleness controller's job.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use futures::future::join_all;

use crate::config::STALE_ROUTING_IN_CONTEXT_CODE;
use crate::document::Document;
use crate::topology::{Namespace, Shard, ShardVersion};

/// Result of the per-connection set-version handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The shard accepted the router's routing version.
    Current,
    /// The shard's authoritative version is newer; refresh and retry.
    Stale,
}

/// An exclusively-owned connection to one shard. Dropping the connection
/// returns it to the pool.
#[async_trait]
pub trait ShardConnection: Send {
    fn shard(&self) -> &Shard;

    /// Send the router's cached routing version for `ns` to the shard.
    async fn set_version(&mut self, ns: &Namespace, version: ShardVersion)
        -> anyhow::Result<Handshake>;

    /// Run a command against a database on this shard and return the raw
    /// reply document.
    async fn run_command(&mut self, db: &str, cmd: &Document) -> anyhow::Result<Document>;
}

/// Hands out authenticated connections to named shards. Shared and
/// thread-safe; checked-out connections are exclusively owned.
#[async_trait]
pub trait ShardConnector: Send + Sync {
    async fn connect(&self, shard: &Shard) -> anyhow::Result<Box<dyn ShardConnection>>;
}

/// Outcome of one shard's attempt.
#[derive(Debug, Clone)]
pub enum ShardOutcome {
    Success(Document),
    Failure {
        reply: Document,
        errmsg: String,
        code: Option<i32>,
    },
    /// The set-version handshake reported the router's metadata stale; the
    /// command was not run on this shard.
    Stale,
}

impl ShardOutcome {
    /// Classify a raw shard reply by its `ok` flag.
    pub fn from_reply(reply: Document) -> Self {
        if reply.get_f64("ok") != 0.0 {
            return ShardOutcome::Success(reply);
        }
        let errmsg = reply
            .get_str("errmsg")
            .unwrap_or("command failed")
            .to_string();
        let code = reply.get("code").map(|v| v.as_i32());
        ShardOutcome::Failure {
            reply,
            errmsg,
            code,
        }
    }

    /// Whether this outcome is a stale-routing retry signal: either the
    /// handshake said so, or the reply embedded the in-context stale code.
    pub fn is_stale(&self) -> bool {
        match self {
            ShardOutcome::Stale => true,
            ShardOutcome::Failure { code, .. } => *code == Some(STALE_ROUTING_IN_CONTEXT_CODE),
            ShardOutcome::Success(_) => false,
        }
    }
}

/// Run `cmd` on every shard in `shards` concurrently. With `versioned` set,
/// each connection performs the set-version handshake for that namespace
/// before the command. Results are keyed by shard for deterministic
/// name-order iteration downstream; completion order is not observable.
pub async fn dispatch(
    connector: &dyn ShardConnector,
    shards: &BTreeSet<Shard>,
    db: &str,
    cmd: &Document,
    versioned: Option<(&Namespace, ShardVersion)>,
) -> BTreeMap<Shard, ShardOutcome> {
    let tasks: Vec<_> = shards
        .iter()
        .cloned()
        .map(|shard| {
            let cmd = cmd.clone();
            async move {
                let outcome = run_one(connector, &shard, db, &cmd, versioned).await;
                (shard, outcome)
            }
        })
        .collect();

    join_all(tasks).await.into_iter().collect()
}

async fn run_one(
    connector: &dyn ShardConnector,
    shard: &Shard,
    db: &str,
    cmd: &Document,
    versioned: Option<(&Namespace, ShardVersion)>,
) -> ShardOutcome {
    let mut conn = match connector.connect(shard).await {
        Ok(conn) => conn,
        Err(err) => return transport_failure(err),
    };

    if let Some((ns, version)) = versioned {
        match conn.set_version(ns, version).await {
            Ok(Handshake::Current) => {}
            Ok(Handshake::Stale) => return ShardOutcome::Stale,
            Err(err) => return transport_failure(err),
        }
    }

    match conn.run_command(db, cmd).await {
        Ok(reply) => ShardOutcome::from_reply(reply),
        Err(err) => transport_failure(err),
    }
}

// Transport failures fold into shard command failures at this boundary; the
// connection is released by drop.
fn transport_failure(err: anyhow::Error) -> ShardOutcome {
    ShardOutcome::Failure {
        reply: Document::new(),
        errmsg: err.to_string(),
        code: None,
    }
}
