//! Storage collaborator: introspection, DDL, filtered reads and keyed writes.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{connect_all, ensure_database_exists, PgStore};

use crate::config::{ColumnDef, ConstraintDef, Relation};
use crate::error::ShelfError;
use crate::format::{CustomQuery, Row, SortOrder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column as reported by the live table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub has_default: bool,
}

/// Table to create: optional `id` identity column, then `columns` in order.
#[derive(Clone, Debug, PartialEq)]
pub struct TablePlan {
    pub table: String,
    pub identity: bool,
    pub columns: Vec<ColumnDef>,
}

/// Read over one table: equality filter, custom modifier, ordering, window, eager-loaded relations.
#[derive(Clone, Debug)]
pub struct Select<'a> {
    pub table: &'a str,
    pub filter: &'a Row,
    pub custom: Option<&'a CustomQuery>,
    pub order: Option<(&'a str, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub relations: &'a [Relation],
}

impl<'a> Select<'a> {
    pub fn new(table: &'a str, filter: &'a Row) -> Self {
        Select {
            table,
            filter,
            custom: None,
            order: None,
            limit: None,
            offset: None,
            relations: &[],
        }
    }

    pub fn with_custom(mut self, custom: &'a CustomQuery) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn with_order(mut self, column: &'a str, order: SortOrder) -> Self {
        self.order = Some((column, order));
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_relations(mut self, relations: &'a [Relation]) -> Self {
        self.relations = relations;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    pub row_count: u64,
    pub page_count: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<Value>,
    pub pagination: Pagination,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn has_table(&self, table: &str) -> Result<bool, ShelfError>;

    async fn column_info(&self, table: &str) -> Result<Vec<ColumnInfo>, ShelfError>;

    async fn create_table(&self, plan: &TablePlan) -> Result<(), ShelfError>;

    /// Adds a unique auto-increment `id` to a table created without one.
    async fn add_surrogate_id(&self, table: &str) -> Result<(), ShelfError>;

    async fn add_constraints(&self, table: &str, constraints: &[ConstraintDef]) -> Result<(), ShelfError>;

    async fn raw(&self, sql: &str) -> Result<(), ShelfError>;

    async fn drop_table_if_exists(&self, table: &str) -> Result<(), ShelfError>;

    async fn fetch_all(&self, select: &Select<'_>) -> Result<Vec<Value>, ShelfError>;

    async fn count(&self, select: &Select<'_>) -> Result<u64, ShelfError>;

    /// `page` is 1-based; both arguments must be non-zero.
    async fn fetch_page(&self, select: &Select<'_>, page: u64, page_size: u64) -> Result<Page, ShelfError> {
        let row_count = self.count(select).await?;
        // An offset past u64 is past the end of any table.
        let rows = match page.saturating_sub(1).checked_mul(page_size) {
            Some(offset) if row_count > offset => {
                let window = select.clone().with_limit(page_size).with_offset(offset);
                self.fetch_all(&window).await?
            }
            _ => Vec::new(),
        };
        Ok(Page {
            rows,
            pagination: Pagination {
                page,
                page_size,
                row_count,
                page_count: row_count.div_ceil(page_size),
            },
        })
    }

    /// Inserts one row and returns it as persisted. `touch` names a timestamp column set to now.
    async fn insert(&self, table: &str, payload: &Row, touch: Option<&str>) -> Result<Value, ShelfError>;

    /// Applies `payload` to every row matching `filter`; returns the updated rows.
    async fn patch(&self, table: &str, filter: &Row, payload: &Row, touch: Option<&str>) -> Result<Vec<Value>, ShelfError>;

    /// Removes every row matching `filter`; returns the removed rows.
    async fn destroy(&self, table: &str, filter: &Row) -> Result<Vec<Value>, ShelfError>;
}
