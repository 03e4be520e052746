//! Process context shared by every model of a shelf: default cache, broadcaster,
//! default formatter stage, library-wide fixer, default columns and build hooks.
//! Created once at startup and passed down; nothing here is global.

use crate::broadcast::{Broadcaster, NoopBroadcaster};
use crate::cache::{Cache, NoopCache};
use crate::config::{ColumnDef, TableSpec};
use crate::error::ShelfError;
use crate::format::{Fixer, Formatters};
use crate::schema::Schema;
use crate::shelf::Shelf;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Runs around `ShelfBuilder::build`.
#[async_trait]
pub trait BuildHook: Send + Sync {
    /// May rewrite schema groups (group name -> schemas) before anything is provisioned.
    async fn before_build(&self, _groups: &mut BTreeMap<String, Vec<Schema>>) -> Result<(), ShelfError> {
        Ok(())
    }

    async fn after_build(&self, _shelf: &Shelf) -> Result<(), ShelfError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Context {
    pub cache: Arc<dyn Cache>,
    pub broadcaster: Arc<dyn Broadcaster>,
    /// First formatter stage of every operation.
    pub formatters: Formatters,
    /// First fixer of every read.
    pub fixer: Option<Arc<dyn Fixer>>,
    /// Appended to every table the provisioner creates.
    pub columns: Vec<ColumnDef>,
    pub hooks: Vec<Arc<dyn BuildHook>>,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            cache: Arc::new(NoopCache),
            broadcaster: Arc::new(NoopBroadcaster),
            formatters: Formatters::default(),
            fixer: None,
            columns: Vec::new(),
            hooks: Vec::new(),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_formatters(mut self, formatters: Formatters) -> Self {
        self.formatters = formatters;
        self
    }

    pub fn with_fixer<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, &TableSpec) -> Result<Option<Value>, ShelfError> + Send + Sync + 'static,
    {
        self.fixer = Some(Arc::new(f));
        self
    }

    pub fn fix_with(mut self, f: Arc<dyn Fixer>) -> Self {
        self.fixer = Some(f);
        self
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn BuildHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}
