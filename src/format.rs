//! Operation arguments, formatter stages (pre-execution) and fixers (per-row post-processing).

use crate::cache::Cache;
use crate::config::TableSpec;
use crate::error::ShelfError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A partial row or an equality filter: column name -> value.
pub type Row = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Caller-controlled query modifier for browse.
/// `raw_where` uses `?` placeholders bound from `bindings` in order; `raw_order` is placed ahead of the sort column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomQuery {
    pub filters: Row,
    pub raw_where: Option<String>,
    pub bindings: Vec<Value>,
    pub raw_order: Option<String>,
}

impl CustomQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }

    pub fn where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.raw_where = Some(sql.into());
        self.bindings = bindings;
        self
    }

    pub fn order_raw(mut self, sql: impl Into<String>) -> Self {
        self.raw_order = Some(sql.into());
        self
    }
}

/// Browse input. Pagination applies only when both `page` and `per_page` are non-zero and `all` is unset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowseQuery {
    pub sort: Option<String>,
    pub order: Option<SortOrder>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub all: bool,
    pub no_sort: bool,
    pub custom: Option<CustomQuery>,
}

impl BrowseQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u64, per_page: u64) -> Self {
        self.page = Some(page);
        self.per_page = Some(per_page);
        self
    }

    pub fn sort(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(column.into());
        self.order = Some(order);
        self
    }

    pub fn custom(mut self, custom: CustomQuery) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn all(mut self) -> Self {
        self.all = true;
        self
    }

    pub fn no_sort(mut self) -> Self {
        self.no_sort = true;
        self
    }
}

/// Update input: which rows (`params`) and the partial row to apply (`payload`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateArgs {
    pub params: Row,
    pub payload: Row,
}

/// Pre-execution transform of an operation's arguments.
#[async_trait]
pub trait Formatter<A: Send + 'static>: Send + Sync {
    async fn format(&self, args: A, spec: &TableSpec) -> Result<A, ShelfError>;
}

#[async_trait]
impl<A, F> Formatter<A> for F
where
    A: Send + 'static,
    F: Fn(A, &TableSpec) -> Result<A, ShelfError> + Send + Sync,
{
    async fn format(&self, args: A, spec: &TableSpec) -> Result<A, ShelfError> {
        (self)(args, spec)
    }
}

/// Post-execution transform of one result row. `None` drops the row.
#[async_trait]
pub trait Fixer: Send + Sync {
    async fn fix(&self, row: Value, spec: &TableSpec) -> Result<Option<Value>, ShelfError>;
}

#[async_trait]
impl<F> Fixer for F
where
    F: Fn(Value, &TableSpec) -> Result<Option<Value>, ShelfError> + Send + Sync,
{
    async fn fix(&self, row: Value, spec: &TableSpec) -> Result<Option<Value>, ShelfError> {
        (self)(row, spec)
    }
}

/// One optional formatter per operation kind; `None` is identity.
#[derive(Clone, Default)]
pub struct Formatters {
    pub browse: Option<Arc<dyn Formatter<BrowseQuery>>>,
    pub obtain: Option<Arc<dyn Formatter<Row>>>,
    pub create: Option<Arc<dyn Formatter<Row>>>,
    pub update: Option<Arc<dyn Formatter<UpdateArgs>>>,
    pub delete: Option<Arc<dyn Formatter<Row>>>,
    pub scrimp: Option<Arc<dyn Formatter<Row>>>,
}

impl Formatters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn browse<F>(mut self, f: F) -> Self
    where
        F: Fn(BrowseQuery, &TableSpec) -> Result<BrowseQuery, ShelfError> + Send + Sync + 'static,
    {
        self.browse = Some(Arc::new(f));
        self
    }

    pub fn obtain<F>(mut self, f: F) -> Self
    where
        F: Fn(Row, &TableSpec) -> Result<Row, ShelfError> + Send + Sync + 'static,
    {
        self.obtain = Some(Arc::new(f));
        self
    }

    pub fn create<F>(mut self, f: F) -> Self
    where
        F: Fn(Row, &TableSpec) -> Result<Row, ShelfError> + Send + Sync + 'static,
    {
        self.create = Some(Arc::new(f));
        self
    }

    pub fn update<F>(mut self, f: F) -> Self
    where
        F: Fn(UpdateArgs, &TableSpec) -> Result<UpdateArgs, ShelfError> + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(f));
        self
    }

    pub fn delete<F>(mut self, f: F) -> Self
    where
        F: Fn(Row, &TableSpec) -> Result<Row, ShelfError> + Send + Sync + 'static,
    {
        self.delete = Some(Arc::new(f));
        self
    }

    pub fn scrimp<F>(mut self, f: F) -> Self
    where
        F: Fn(Row, &TableSpec) -> Result<Row, ShelfError> + Send + Sync + 'static,
    {
        self.scrimp = Some(Arc::new(f));
        self
    }

    /// Field-wise overlay: entries set in `other` replace ours.
    pub fn overlay(&self, other: &Formatters) -> Formatters {
        Formatters {
            browse: other.browse.clone().or_else(|| self.browse.clone()),
            obtain: other.obtain.clone().or_else(|| self.obtain.clone()),
            create: other.create.clone().or_else(|| self.create.clone()),
            update: other.update.clone().or_else(|| self.update.clone()),
            delete: other.delete.clone().or_else(|| self.delete.clone()),
            scrimp: other.scrimp.clone().or_else(|| self.scrimp.clone()),
        }
    }
}

/// Runs the process-wide stage, then the schema/call stage.
pub(crate) async fn run_stages<A: Send + 'static>(
    args: A,
    spec: &TableSpec,
    default: Option<&Arc<dyn Formatter<A>>>,
    own: Option<&Arc<dyn Formatter<A>>>,
) -> Result<A, ShelfError> {
    let args = match default {
        Some(f) => f.format(args, spec).await?,
        None => args,
    };
    match own {
        Some(f) => f.format(args, spec).await,
        None => Ok(args),
    }
}

/// Applies each fixer in order; stops at the first that drops the row.
pub(crate) async fn run_fixers(
    row: Value,
    spec: &TableSpec,
    chain: &[Option<&Arc<dyn Fixer>>],
) -> Result<Option<Value>, ShelfError> {
    let mut current = row;
    for fixer in chain.iter().flatten() {
        match fixer.fix(current, spec).await? {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Per-call option bag. `formatter` replaces the schema's own formatter for this call only.
pub struct Options<A: Send + 'static> {
    pub cache: Option<Arc<dyn Cache>>,
    pub formatter: Option<Arc<dyn Formatter<A>>>,
    pub fixer: Option<Arc<dyn Fixer>>,
    /// Allow update/delete to touch every row matching a filter without an identifier.
    pub multiple: bool,
    /// Fail with `EmptyResponse` instead of returning nothing.
    pub require: bool,
}

impl<A: Send + 'static> Default for Options<A> {
    fn default() -> Self {
        Options {
            cache: None,
            formatter: None,
            fixer: None,
            multiple: false,
            require: false,
        }
    }
}

impl<A: Send + 'static> Clone for Options<A> {
    fn clone(&self) -> Self {
        Options {
            cache: self.cache.clone(),
            formatter: self.formatter.clone(),
            fixer: self.fixer.clone(),
            multiple: self.multiple,
            require: self.require,
        }
    }
}

impl<A: Send + 'static> Options<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn require(mut self) -> Self {
        self.require = true;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn formatter<F>(mut self, f: F) -> Self
    where
        F: Fn(A, &TableSpec) -> Result<A, ShelfError> + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(f));
        self
    }

    pub fn format_with(mut self, f: Arc<dyn Formatter<A>>) -> Self {
        self.formatter = Some(f);
        self
    }

    pub fn fixer<F>(mut self, f: F) -> Self
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

    /// Same options for another operation kind; the formatter does not carry over.
    pub fn carry<B: Send + 'static>(&self) -> Options<B> {
        Options {
            cache: self.cache.clone(),
            formatter: None,
            fixer: self.fixer.clone(),
            multiple: self.multiple,
            require: self.require,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stages_run_in_order() {
        let spec = TableSpec::new("t", "t");
        let default: Arc<dyn Formatter<Row>> = Arc::new(|mut r: Row, _: &TableSpec| -> Result<Row, ShelfError> {
            r.insert("stage".into(), json!("default"));
            r.insert("seen_default".into(), json!(true));
            Ok(r)
        });
        let own: Arc<dyn Formatter<Row>> = Arc::new(|mut r: Row, _: &TableSpec| -> Result<Row, ShelfError> {
            r.insert("stage".into(), json!("own"));
            Ok(r)
        });
        let out = run_stages(Row::new(), &spec, Some(&default), Some(&own)).await.unwrap();
        assert_eq!(out["stage"], json!("own"));
        assert_eq!(out["seen_default"], json!(true));
    }

    #[tokio::test]
    async fn fixer_chain_short_circuits() {
        let spec = TableSpec::new("t", "t");
        let drop_all: Arc<dyn Fixer> = Arc::new(|_: Value, _: &TableSpec| -> Result<Option<Value>, ShelfError> { Ok(None) });
        let tag: Arc<dyn Fixer> = Arc::new(|mut v: Value, _: &TableSpec| -> Result<Option<Value>, ShelfError> {
            v["tagged"] = json!(true);
            Ok(Some(v))
        });
        let kept = run_fixers(json!({"id": 1}), &spec, &[Some(&tag), None]).await.unwrap();
        assert_eq!(kept, Some(json!({"id": 1, "tagged": true})));
        let dropped = run_fixers(json!({"id": 1}), &spec, &[Some(&drop_all), Some(&tag)]).await.unwrap();
        assert_eq!(dropped, None);
    }

    #[test]
    fn browse_query_from_camel_case() {
        let q: BrowseQuery = serde_json::from_value(json!({
            "perPage": 10,
            "page": 2,
            "order": "desc",
            "noSort": false,
            "custom": { "filters": { "label": "x" }, "rawOrder": "id DESC" }
        }))
        .unwrap();
        assert_eq!(q.per_page, Some(10));
        assert_eq!(q.order, Some(SortOrder::Desc));
        assert_eq!(q.custom.unwrap().raw_order.as_deref(), Some("id DESC"));
    }

    #[test]
    fn overlay_prefers_other() {
        let base = Formatters::new().create(|r, _| Ok(r)).delete(|r, _| Ok(r));
        let over = Formatters::new().create(|mut r, _| {
            r.insert("x".into(), json!(1));
            Ok(r)
        });
        let merged = base.overlay(&over);
        assert!(Arc::ptr_eq(merged.create.as_ref().unwrap(), over.create.as_ref().unwrap()));
        assert!(merged.delete.is_some());
        assert!(merged.browse.is_none());
    }
}
