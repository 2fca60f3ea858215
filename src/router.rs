//! Router entry point and command envelope.
//!
//! `Router` owns the immutable command registry and the shared context
//! (catalog, connector, config, metrics). `run_command` resolves the
//! handler from the command document's first field, drives it, and folds
//! the outcome into the `ok`/`errmsg` reply contract. A surfaced
//! stale-config outcome re-drives the whole handler after a forced
//! chunk-manager refresh, bounded by the configured attempt cap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::commands;
use crate::config::RouterConfig;
use crate::dispatch::ShardConnector;
use crate::document::Document;
use crate::error::RouterError;
use crate::metrics::RouterMetrics;
use crate::registry::CommandRegistry;
use crate::topology::{Catalog, DatabaseConfig, Namespace};

/// Shared state injected into every handler invocation. Created and torn
/// down with the router's lifecycle; nothing here is a global.
pub struct RouterContext {
    catalog: Arc<dyn Catalog>,
    connector: Arc<dyn ShardConnector>,
    config: RouterConfig,
    metrics: Arc<RouterMetrics>,
    mr_suffix: AtomicU64,
}

impl RouterContext {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        connector: Arc<dyn ShardConnector>,
        config: RouterConfig,
    ) -> Self {
        Self {
            catalog,
            connector,
            config,
            metrics: Arc::new(RouterMetrics::new()),
            mr_suffix: AtomicU64::new(1),
        }
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn connector(&self) -> &dyn ShardConnector {
        self.connector.as_ref()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Monotonic suffix for map-reduce temporary collection names.
    pub fn next_mr_suffix(&self) -> u64 {
        self.mr_suffix.fetch_add(1, Ordering::Relaxed)
    }
}

/// The public command router.
pub struct Router {
    registry: CommandRegistry,
    ctx: RouterContext,
}

impl Router {
    /// Build a router over the full public command set.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        connector: Arc<dyn ShardConnector>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry: commands::build_registry(),
            ctx: RouterContext::new(catalog, connector, config),
        }
    }

    pub fn context(&self) -> &RouterContext {
        &self.ctx
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Run one client command and produce the final reply document. Always
    /// returns a document carrying `ok`; on failure `errmsg` precedes it.
    pub async fn run_command(&self, db: &str, cmd: &Document) -> Document {
        self.ctx.metrics().record_command();

        let name = match cmd.first() {
            Some((name, _)) => name,
            None => return fail_reply(Document::new(), "no command found"),
        };
        let handler = match self.registry.resolve(name) {
            Some(handler) => handler,
            None => return fail_reply(Document::new(), &format!("no such cmd: {name}")),
        };

        let attempts = self.ctx.config().stale_retry_attempts.max(1);
        let mut last_stale: Option<(String, &'static str)> = None;

        for attempt in 1..=attempts {
            let mut reply = Document::new();
            match handler.run(&self.ctx, db, cmd, &mut reply).await {
                Ok(()) => {
                    reply.push("ok", 1.0);
                    return reply;
                }
                // the handler delegated the re-drive to us: refresh the
                // routing metadata and run the whole command again, dropping
                // any partial reply state
                Err(RouterError::StaleConfig { ns, action }) => {
                    warn!(ns = %ns, action, attempt, "stale routing metadata, re-driving command");
                    self.ctx.metrics().record_stale_retry();
                    self.refresh_routing(&ns).await;
                    last_stale = Some((ns, action));
                }
                Err(err) => {
                    debug!(command = name, error = %err, "command failed");
                    self.ctx.metrics().record_failure();
                    return fail_reply(reply, &err.to_string());
                }
            }
        }

        self.ctx.metrics().record_failure();
        let (ns, action) = last_stale.unwrap_or_default();
        let err = RouterError::RetriesExhausted {
            attempts,
            action,
            ns,
        };
        fail_reply(Document::new(), &err.to_string())
    }

    async fn refresh_routing(&self, ns: &str) {
        let Some(ns) = Namespace::from_full(ns) else {
            return;
        };
        if let Some(conf) = self.ctx.catalog().database(ns.db(), false).await {
            let _ = conf.chunk_manager(&ns, true).await;
        }
    }
}

fn fail_reply(mut reply: Document, errmsg: &str) -> Document {
    reply.push("errmsg", errmsg);
    reply.push("ok", 0.0);
    reply
}
