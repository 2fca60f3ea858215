//! Shard topology and the read-only catalog seam.
//!
//! The router never maintains routing metadata itself. It consumes a
//! [`Catalog`] of per-database configs and per-collection [`ChunkManager`]s
//! as oracles; refreshing them is the catalog's problem and is safe to race.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Document, Value};

/// A storage node owning a subset of the data. Identity is the stable name;
/// the connection string is carried along for the connector. Shards are
/// totally ordered by name so shard sets iterate deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    name: String,
    conn_string: String,
}

impl Shard {
    pub fn new(name: impl Into<String>, conn_string: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conn_string: conn_string.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn conn_string(&self) -> &str {
        &self.conn_string
    }
}

impl PartialEq for Shard {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Shard {}

impl PartialOrd for Shard {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Shard {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Shard {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// `"<database>.<collection>"`; the first `.` separates the two, so
/// collection names may themselves contain dots (`fs.chunks`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    db: String,
    collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }

    /// Split a full namespace string on the first dot.
    pub fn from_full(full: &str) -> Option<Self> {
        let (db, collection) = full.split_once('.')?;
        if db.is_empty() || collection.is_empty() {
            return None;
        }
        Some(Self::new(db, collection))
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn full(&self) -> String {
        format!("{}.{}", self.db, self.collection)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

/// Chunk-manager version forwarded to shards in the set-version handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardVersion(pub u64);

/// Ordered list of field paths partitioning a sharded collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPattern {
    fields: Vec<String>,
}

impl KeyPattern {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn single(field: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The pattern as the client-visible document form, `{field: 1, ...}`.
    pub fn as_document(&self) -> Document {
        let mut d = Document::new();
        for field in &self.fields {
            d.push(field.clone(), Value::Int32(1));
        }
        d
    }
}

/// A contiguous shard-key range owned by one shard.
#[derive(Debug, Clone)]
pub struct Chunk {
    shard: Shard,
    min: Document,
    max: Document,
}

impl Chunk {
    pub fn new(shard: Shard, min: Document, max: Document) -> Self {
        Self { shard, min, max }
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    pub fn min(&self) -> &Document {
        &self.min
    }

    pub fn max(&self) -> &Document {
        &self.max
    }
}

/// Process-wide catalog: database name to config.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up the config for a database. With `create` set, an unknown
    /// database is materialized on its future primary (used by cross-database
    /// commands targeting a destination that may not exist yet).
    async fn database(&self, name: &str, create: bool) -> Option<Arc<dyn DatabaseConfig>>;
}

/// Per-database routing metadata, read-only from the router's viewpoint.
#[async_trait]
pub trait DatabaseConfig: Send + Sync {
    fn name(&self) -> &str;

    /// The shard owning every unsharded collection of this database.
    fn primary_shard(&self) -> Shard;

    fn sharding_enabled(&self) -> bool;

    fn is_sharded(&self, ns: &Namespace) -> bool;

    /// Owning shard for an unsharded collection.
    fn shard_for(&self, ns: &Namespace) -> Shard;

    /// Chunk manager for a sharded collection. May suspend on a catalog
    /// refresh when `force_refresh` is set. Non-null whenever
    /// `is_sharded(ns)` holds; a null here on a sharded collection is a
    /// catalog invariant violation.
    async fn chunk_manager(
        &self,
        ns: &Namespace,
        force_refresh: bool,
    ) -> Option<Arc<dyn ChunkManager>>;

    /// Every shard owning any piece of this database.
    fn all_shards(&self) -> BTreeSet<Shard>;

    /// Forget sharding state for a namespace (after dropping a sharded
    /// collection). Returns false if the namespace was not sharded.
    fn remove_sharding(&self, ns: &Namespace) -> bool;

    async fn drop_database(&self) -> Result<(), String>;
}

/// Per-collection shard-ownership oracle.
#[async_trait]
pub trait ChunkManager: Send + Sync {
    fn shard_key(&self) -> KeyPattern;

    /// Whether `doc` contains an equality on every shard-key component.
    fn has_shard_key(&self, doc: &Document) -> bool;

    /// Chunk containing the shard key of `doc`. Callers must have checked
    /// `has_shard_key` first.
    fn find_chunk(&self, doc: &Document) -> Chunk;

    /// Over-approximation of shards whose ranges could match `filter`.
    /// Never empty while the collection has chunks.
    fn shards_for_query(&self, filter: &Document) -> BTreeSet<Shard>;

    fn shards_for_range(&self, min: &Document, max: &Document) -> BTreeSet<Shard>;

    fn all_shards(&self) -> BTreeSet<Shard>;

    fn num_chunks(&self) -> usize;

    fn version(&self) -> ShardVersion;

    /// Drop every chunk of the collection (the `drop` command path).
    async fn drop_chunks(&self) -> Result<(), String>;
}
