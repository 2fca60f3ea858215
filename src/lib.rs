//! # docgrid
//!
//! Public command router for a sharded document-database proxy.
//!
//! Client commands arrive as ordered documents. The router resolves each
//! one to a handler, classifies it as primary-only or fan-out against the
//! catalog's routing metadata, dispatches concurrently to the owning
//! shards, recovers from stale routing metadata with a bounded retry loop,
//! and merges the per-shard replies into a single client response with the
//! same semantics a single server would have produced.
//!
//! The catalog, chunk managers, and shard connection pool are external
//! collaborators consumed through the traits in [`topology`] and
//! [`dispatch`]; the router stores nothing and holds no locks.

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod routing;
pub mod staleness;
pub mod topology;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigOverrides, RouterConfig};
pub use dispatch::{Handshake, ShardConnection, ShardConnector, ShardOutcome};
pub use document::{canonical_cmp, Document, OrderedValue, Value};
pub use error::RouterError;
pub use metrics::{MetricsSnapshot, RouterMetrics};
pub use registry::{CommandHandler, CommandRegistry, LockType};
pub use router::{Router, RouterContext};
pub use routing::{CollectionRouting, Resolution, RoutingDecision, RoutingIntent};
pub use topology::{
    Catalog, Chunk, ChunkManager, DatabaseConfig, KeyPattern, Namespace, Shard, ShardVersion,
};
