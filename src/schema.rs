//! Schema descriptor: a table spec plus its behavior hooks.

use crate::cache::Cache;
use crate::config::TableSpec;
use crate::error::ShelfError;
use crate::format::{Fixer, Formatters};
use crate::model::CustomOperation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Browse,
    Obtain,
    Create,
    Update,
    Delete,
    Scrimp,
}

impl OpKind {
    pub const ALL: [OpKind; 6] = [
        OpKind::Browse,
        OpKind::Obtain,
        OpKind::Create,
        OpKind::Update,
        OpKind::Delete,
        OpKind::Scrimp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Browse => "browse",
            OpKind::Obtain => "obtain",
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
            OpKind::Scrimp => "scrimp",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpKind::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ShelfError::BadRequest(format!("unknown operation: {}", s)))
    }
}

/// Cache selection for a schema: per-operation entry, else `default`, else the context cache.
#[derive(Clone, Default)]
pub struct CacheOverrides {
    pub default: Option<Arc<dyn Cache>>,
    pub per_op: HashMap<OpKind, Arc<dyn Cache>>,
}

impl CacheOverrides {
    pub fn get(&self, op: OpKind) -> Option<&Arc<dyn Cache>> {
        self.per_op.get(&op).or(self.default.as_ref())
    }

    /// Entries set in `other` replace ours.
    pub fn overlay(&self, other: &CacheOverrides) -> CacheOverrides {
        let mut per_op = self.per_op.clone();
        per_op.extend(other.per_op.iter().map(|(k, v)| (*k, v.clone())));
        CacheOverrides {
            default: other.default.clone().or_else(|| self.default.clone()),
            per_op,
        }
    }
}

/// Immutable once bound into a model.
#[derive(Clone)]
pub struct Schema {
    pub spec: TableSpec,
    pub formatters: Formatters,
    pub fixer: Option<Arc<dyn Fixer>>,
    pub caches: CacheOverrides,
    /// Schema-specific operations callable by name next to the canonical six.
    pub operations: Vec<(String, Arc<dyn CustomOperation>)>,
}

impl Schema {
    pub fn new(spec: TableSpec) -> Self {
        Schema {
            spec,
            formatters: Formatters::default(),
            fixer: None,
            caches: CacheOverrides::default(),
            operations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
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

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.caches.default = Some(cache);
        self
    }

    pub fn with_op_cache(mut self, op: OpKind, cache: Arc<dyn Cache>) -> Self {
        self.caches.per_op.insert(op, cache);
        self
    }

    pub fn with_operation(mut self, name: impl Into<String>, op: Arc<dyn CustomOperation>) -> Self {
        self.operations.push((name.into(), op));
        self
    }
}

impl From<TableSpec> for Schema {
    fn from(spec: TableSpec) -> Self {
        Schema::new(spec)
    }
}
