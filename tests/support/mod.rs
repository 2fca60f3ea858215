//! Shared mock topology and connector for router integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docgrid::document::Value;
use docgrid::{
    doc, Catalog, Chunk, ChunkManager, DatabaseConfig, Document, Handshake, KeyPattern, Namespace,
    Router, RouterConfig, Shard, ShardConnection, ShardConnector, ShardVersion,
};

#[allow(dead_code)]
pub fn shard(name: &str) -> Shard {
    Shard::new(name, format!("{name}-host:27018"))
}

/// Scripted chunk manager: single-field shard key with explicit
/// value-to-shard assignments.
pub struct MockChunkManager {
    pub key: KeyPattern,
    pub shards: BTreeSet<Shard>,
    pub version: AtomicU64,
    pub chunk_assignments: Mutex<Vec<(Value, Shard)>>,
    pub num_chunks: usize,
    pub dropped: AtomicBool,
}

#[allow(dead_code)]
impl MockChunkManager {
    pub fn new(key: KeyPattern, shards: impl IntoIterator<Item = Shard>) -> Arc<Self> {
        let shards: BTreeSet<Shard> = shards.into_iter().collect();
        let num_chunks = shards.len().max(1) * 2;
        Arc::new(Self {
            key,
            shards,
            version: AtomicU64::new(1),
            chunk_assignments: Mutex::new(Vec::new()),
            num_chunks,
            dropped: AtomicBool::new(false),
        })
    }

    pub fn assign_chunk(&self, key_value: Value, shard: Shard) {
        self.chunk_assignments
            .lock()
            .unwrap()
            .push((key_value, shard));
    }

    fn first_shard(&self) -> Shard {
        self.shards.iter().next().expect("mock manager has shards").clone()
    }
}

#[async_trait]
impl ChunkManager for MockChunkManager {
    fn shard_key(&self) -> KeyPattern {
        self.key.clone()
    }

    fn has_shard_key(&self, doc: &Document) -> bool {
        self.key.fields().iter().all(|field| doc.contains_key(field))
    }

    fn find_chunk(&self, doc: &Document) -> Chunk {
        let field = &self.key.fields()[0];
        let value = doc.get(field).cloned();
        let assignments = self.chunk_assignments.lock().unwrap();
        let owner = value
            .and_then(|value| {
                assignments
                    .iter()
                    .find(|(key, _)| *key == value)
                    .map(|(_, shard)| shard.clone())
            })
            .unwrap_or_else(|| self.first_shard());
        Chunk::new(owner, Document::new(), Document::new())
    }

    fn shards_for_query(&self, filter: &Document) -> BTreeSet<Shard> {
        if self.has_shard_key(filter) {
            let mut set = BTreeSet::new();
            set.insert(self.find_chunk(filter).shard().clone());
            set
        } else {
            self.shards.clone()
        }
    }

    fn shards_for_range(&self, _min: &Document, _max: &Document) -> BTreeSet<Shard> {
        self.shards.clone()
    }

    fn all_shards(&self) -> BTreeSet<Shard> {
        self.shards.clone()
    }

    fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    fn version(&self) -> ShardVersion {
        ShardVersion(self.version.load(Ordering::Relaxed))
    }

    async fn drop_chunks(&self) -> Result<(), String> {
        self.dropped.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Scripted per-database config.
pub struct MockDbConfig {
    pub name: String,
    pub primary: Shard,
    pub sharding_enabled: bool,
    pub all_shards: BTreeSet<Shard>,
    pub sharded: Mutex<HashMap<String, Arc<MockChunkManager>>>,
    /// Unsharded collections living off the primary.
    pub collection_shards: Mutex<HashMap<String, Shard>>,
    /// Chunk managers that appear only on a forced refresh, emulating a
    /// collection that became sharded under the router.
    pub staged: Mutex<HashMap<String, Arc<MockChunkManager>>>,
    pub refreshes: AtomicU64,
    pub dropped: AtomicBool,
}

#[allow(dead_code)]
impl MockDbConfig {
    pub fn unsharded(name: &str, primary: &Shard) -> Arc<Self> {
        let mut all = BTreeSet::new();
        all.insert(primary.clone());
        Arc::new(Self {
            name: name.to_string(),
            primary: primary.clone(),
            sharding_enabled: false,
            all_shards: all,
            sharded: Mutex::new(HashMap::new()),
            collection_shards: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
            refreshes: AtomicU64::new(0),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn sharding(name: &str, primary: &Shard, all: impl IntoIterator<Item = Shard>) -> Arc<Self> {
        let mut all_shards: BTreeSet<Shard> = all.into_iter().collect();
        all_shards.insert(primary.clone());
        Arc::new(Self {
            name: name.to_string(),
            primary: primary.clone(),
            sharding_enabled: true,
            all_shards,
            sharded: Mutex::new(HashMap::new()),
            collection_shards: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
            refreshes: AtomicU64::new(0),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn shard_collection(&self, ns: &Namespace, manager: Arc<MockChunkManager>) {
        self.sharded.lock().unwrap().insert(ns.full(), manager);
    }

    /// Place an unsharded collection on a shard other than the primary.
    pub fn place_collection(&self, ns: &Namespace, shard: Shard) {
        self.collection_shards.lock().unwrap().insert(ns.full(), shard);
    }

    /// The manager becomes visible on the next forced refresh.
    pub fn stage_sharding(&self, ns: &Namespace, manager: Arc<MockChunkManager>) {
        self.staged.lock().unwrap().insert(ns.full(), manager);
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DatabaseConfig for MockDbConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn primary_shard(&self) -> Shard {
        self.primary.clone()
    }

    fn sharding_enabled(&self) -> bool {
        self.sharding_enabled
    }

    fn is_sharded(&self, ns: &Namespace) -> bool {
        self.sharding_enabled && self.sharded.lock().unwrap().contains_key(&ns.full())
    }

    fn shard_for(&self, ns: &Namespace) -> Shard {
        self.collection_shards
            .lock()
            .unwrap()
            .get(&ns.full())
            .cloned()
            .unwrap_or_else(|| self.primary.clone())
    }

    async fn chunk_manager(
        &self,
        ns: &Namespace,
        force_refresh: bool,
    ) -> Option<Arc<dyn ChunkManager>> {
        if force_refresh {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
            if let Some(manager) = self.staged.lock().unwrap().remove(&ns.full()) {
                self.sharded.lock().unwrap().insert(ns.full(), manager);
            }
            if let Some(manager) = self.sharded.lock().unwrap().get(&ns.full()) {
                manager.version.fetch_add(1, Ordering::Relaxed);
            }
        }
        let manager = self.sharded.lock().unwrap().get(&ns.full()).cloned()?;
        Some(manager as Arc<dyn ChunkManager>)
    }

    fn all_shards(&self) -> BTreeSet<Shard> {
        self.all_shards.clone()
    }

    fn remove_sharding(&self, ns: &Namespace) -> bool {
        self.sharded.lock().unwrap().remove(&ns.full()).is_some()
    }

    async fn drop_database(&self) -> Result<(), String> {
        self.dropped.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockCatalog {
    pub dbs: Mutex<HashMap<String, Arc<MockDbConfig>>>,
}

#[allow(dead_code)]
impl MockCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, conf: Arc<MockDbConfig>) {
        self.dbs.lock().unwrap().insert(conf.name.clone(), conf);
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn database(&self, name: &str, _create: bool) -> Option<Arc<dyn DatabaseConfig>> {
        let conf = self.dbs.lock().unwrap().get(name).cloned()?;
        Some(conf as Arc<dyn DatabaseConfig>)
    }
}

/// Per-shard scripted wire behavior.
#[derive(Default)]
pub struct ShardScript {
    pub replies: Mutex<VecDeque<Document>>,
    pub default_reply: Mutex<Option<Document>>,
    pub handshakes: Mutex<VecDeque<Handshake>>,
    pub fail_connect: AtomicBool,
    pub commands: Mutex<Vec<(String, Document)>>,
    pub versions_seen: Mutex<Vec<(String, u64)>>,
}

/// Connector handing out mock connections; tracks the number of live
/// (checked-out) connections so tests can assert connection hygiene.
#[derive(Default)]
pub struct MockConnector {
    scripts: Mutex<HashMap<String, Arc<ShardScript>>>,
    live: Arc<AtomicI64>,
    total_connects: AtomicU64,
}

#[allow(dead_code)]
impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, shard_name: &str) -> Arc<ShardScript> {
        self.scripts
            .lock()
            .unwrap()
            .entry(shard_name.to_string())
            .or_default()
            .clone()
    }

    pub fn push_reply(&self, shard_name: &str, reply: Document) {
        self.script(shard_name)
            .replies
            .lock()
            .unwrap()
            .push_back(reply);
    }

    pub fn set_default_reply(&self, shard_name: &str, reply: Document) {
        *self.script(shard_name).default_reply.lock().unwrap() = Some(reply);
    }

    pub fn push_handshake(&self, shard_name: &str, handshake: Handshake) {
        self.script(shard_name)
            .handshakes
            .lock()
            .unwrap()
            .push_back(handshake);
    }

    pub fn fail_connect(&self, shard_name: &str) {
        self.script(shard_name)
            .fail_connect
            .store(true, Ordering::Relaxed);
    }

    pub fn commands_for(&self, shard_name: &str) -> Vec<(String, Document)> {
        self.script(shard_name).commands.lock().unwrap().clone()
    }

    pub fn versions_seen(&self, shard_name: &str) -> Vec<(String, u64)> {
        self.script(shard_name).versions_seen.lock().unwrap().clone()
    }

    pub fn live_connections(&self) -> i64 {
        self.live.load(Ordering::Relaxed)
    }

    pub fn total_connects(&self) -> u64 {
        self.total_connects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ShardConnector for MockConnector {
    async fn connect(&self, shard: &Shard) -> anyhow::Result<Box<dyn ShardConnection>> {
        let script = self.script(shard.name());
        if script.fail_connect.load(Ordering::Relaxed) {
            anyhow::bail!("connection refused to {shard}");
        }
        self.total_connects.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockConnection {
            shard: shard.clone(),
            script,
            live: self.live.clone(),
        }))
    }
}

pub struct MockConnection {
    shard: Shard,
    script: Arc<ShardScript>,
    live: Arc<AtomicI64>,
}

#[async_trait]
impl ShardConnection for MockConnection {
    fn shard(&self) -> &Shard {
        &self.shard
    }

    async fn set_version(
        &mut self,
        ns: &Namespace,
        version: ShardVersion,
    ) -> anyhow::Result<Handshake> {
        self.script
            .versions_seen
            .lock()
            .unwrap()
            .push((ns.full(), version.0));
        let handshake = self
            .script
            .handshakes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Handshake::Current);
        Ok(handshake)
    }

    async fn run_command(&mut self, db: &str, cmd: &Document) -> anyhow::Result<Document> {
        self.script
            .commands
            .lock()
            .unwrap()
            .push((db.to_string(), cmd.clone()));
        if let Some(reply) = self.script.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        if let Some(reply) = self.script.default_reply.lock().unwrap().clone() {
            return Ok(reply);
        }
        Ok(doc! { "ok" => 1.0 })
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

#[allow(dead_code)]
pub fn build_router(catalog: Arc<MockCatalog>, connector: Arc<MockConnector>) -> Router {
    Router::new(catalog, connector, RouterConfig::default())
}
