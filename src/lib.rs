//! Crud Shelf: schema-driven CRUD operation layer over relational tables.
//!
//! A [`TableSpec`] describes a table; the provisioner creates it, a [`Model`] binds it to a
//! [`Store`] and exposes browse/obtain/create/update/delete/scrimp, and a [`Shelf`] wires groups
//! of models into a named method registry.

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod methods;
pub mod model;
pub mod provision;
pub mod schema;
pub mod shelf;
pub mod sql;
pub mod store;

pub use broadcast::{Broadcaster, Change, ChangeEvent, ChannelBroadcaster, NoopBroadcaster};
pub use cache::{Cache, CacheKey, MemoryCache, NoopCache};
pub use config::{
    load_specs_from_path, parse_specs, ColumnDef, ConstraintDef, Connections, Relation, Settings, TableSpec,
};
pub use context::{BuildHook, Context};
pub use error::{ConfigError, ShelfError};
pub use format::{BrowseQuery, CustomQuery, Fixer, Formatter, Formatters, Options, Row, SortOrder, UpdateArgs};
pub use methods::{method_name, CallArgs, FnMethod, Method};
pub use model::{Browse, CustomOperation, Model, Operations};
pub use provision::{create_table, ProvisionOptions, Stage};
pub use schema::{CacheOverrides, OpKind, Schema};
pub use shelf::{MethodProvider, SchemaOptions, Shelf, ShelfBuilder};
pub use store::{ensure_database_exists, MemoryStore, Page, Pagination, PgStore, Select, Store};
