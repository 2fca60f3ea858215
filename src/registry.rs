//! Command registry: name to handler lookup.
//!
//! Built once at startup and immutable afterwards. Resolution is
//! case-sensitive, with at most one alias per command.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::document::Document;
use crate::error::RouterError;
use crate::router::RouterContext;

/// Locking disposition a handler advertises. Every router command is
/// lock-free; the variant exists so the metadata surface is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    None,
}

/// A client-visible command. Handlers populate `reply` with their
/// command-specific fields; the router envelope appends `ok`/`errmsg`.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn alias(&self) -> Option<&'static str> {
        None
    }

    fn admin_only(&self) -> bool {
        false
    }

    fn slave_ok(&self) -> bool {
        true
    }

    fn lock_type(&self) -> LockType {
        LockType::None
    }

    async fn run(
        &self,
        ctx: &RouterContext,
        db: &str,
        cmd: &Document,
        reply: &mut Document,
    ) -> Result<(), RouterError>;
}

/// Immutable name/alias lookup table.
pub struct CommandRegistry {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new(handlers: Vec<Arc<dyn CommandHandler>>) -> Self {
        let mut table: HashMap<&'static str, Arc<dyn CommandHandler>> = HashMap::new();
        for handler in handlers {
            let previous = table.insert(handler.name(), handler.clone());
            debug_assert!(previous.is_none(), "duplicate command {}", handler.name());
            if let Some(alias) = handler.alias() {
                let previous = table.insert(alias, handler.clone());
                debug_assert!(previous.is_none(), "duplicate alias {alias}");
            }
        }
        Self { handlers: table }
    }

    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.get(name)
    }

    /// Registered names and aliases, unordered.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
