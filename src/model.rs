//! Query operation layer: the six canonical operations of one bound schema.

use crate::broadcast::Change;
use crate::cache::{Cache, CacheKey};
use crate::config::{is_identifier, Relation, TableSpec};
use crate::context::Context;
use crate::error::ShelfError;
use crate::format::{run_fixers, run_stages, BrowseQuery, Fixer, Options, Row, UpdateArgs};
use crate::schema::{OpKind, Schema};
use crate::store::{ColumnInfo, Pagination, Select, Store};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Browse result. `pagination` is all zeros unless a page was requested.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Browse {
    pub payload: Vec<Value>,
    pub pagination: Pagination,
}

#[async_trait]
pub trait Operations: Send + Sync {
    async fn browse(&self, query: BrowseQuery, opts: Options<BrowseQuery>) -> Result<Browse, ShelfError>;

    /// `None` params short-circuit to `None` without touching cache or storage.
    async fn obtain(&self, params: Option<Row>, opts: Options<Row>) -> Result<Option<Value>, ShelfError>;

    async fn create(&self, payload: Row, opts: Options<Row>) -> Result<Value, ShelfError>;

    /// Single row unless `opts.multiple` and `params` filter without an id; then the array of updated rows.
    /// Either way, nothing matched is `NoRowsUpdated`.
    async fn update(&self, params: Row, payload: Row, opts: Options<UpdateArgs>) -> Result<Value, ShelfError>;

    /// Same resolution as `update`; returns the removed row (or rows, in bulk mode).
    async fn delete(&self, params: Row, opts: Options<Row>) -> Result<Value, ShelfError>;

    /// Update by id when the payload carries one, create otherwise.
    async fn scrimp(&self, payload: Row, opts: Options<Row>) -> Result<Value, ShelfError>;
}

/// Schema-specific operation registered next to the canonical six.
#[async_trait]
pub trait CustomOperation: Send + Sync {
    async fn call(&self, model: &Model, args: Value) -> Result<Value, ShelfError>;
}

fn has_id(params: &Row) -> bool {
    params.get("id").map_or(false, |v| !v.is_null())
}

fn id_row(id: Value) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), id);
    row
}

/// A schema bound to its store and context.
pub struct Model {
    schema: Schema,
    store: Arc<dyn Store>,
    ctx: Context,
    browse_relations: Vec<Relation>,
    obtain_relations: Vec<Relation>,
    custom: BTreeMap<String, Arc<dyn CustomOperation>>,
}

impl Model {
    pub fn bind(schema: Schema, store: Arc<dyn Store>, ctx: Context) -> Result<Self, ShelfError> {
        if !is_identifier(&schema.spec.table) {
            return Err(ShelfError::Binding(format!(
                "invalid table handle for {}: {}",
                schema.spec.name, schema.spec.table
            )));
        }
        let mut custom = BTreeMap::new();
        for (name, op) in &schema.operations {
            if name.parse::<OpKind>().is_ok() || custom.insert(name.clone(), op.clone()).is_some() {
                return Err(ShelfError::DuplicateMethod(name.clone()));
            }
        }
        Ok(Model {
            browse_relations: schema.spec.browse_relations(),
            obtain_relations: schema.spec.obtain_relations(),
            schema,
            store,
            ctx,
            custom,
        })
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn spec(&self) -> &TableSpec {
        &self.schema.spec
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn column_info(&self) -> Result<Vec<ColumnInfo>, ShelfError> {
        self.store.column_info(&self.schema.spec.table).await
    }

    pub fn custom_names(&self) -> impl Iterator<Item = &str> {
        self.custom.keys().map(String::as_str)
    }

    pub async fn call(&self, name: &str, args: Value) -> Result<Value, ShelfError> {
        let op = self
            .custom
            .get(name)
            .ok_or_else(|| ShelfError::UnknownMethod(format!("{}.{}", self.name(), name)))?;
        op.call(self, args).await
    }

    fn table(&self) -> &str {
        &self.schema.spec.table
    }

    fn touch(&self) -> Option<&'static str> {
        self.schema.spec.timestamps.then_some("updated_at")
    }

    /// Call override, then schema override for `op`, then the context cache.
    fn cache_for(&self, op: OpKind, call: Option<&Arc<dyn Cache>>) -> Arc<dyn Cache> {
        call.or_else(|| self.schema.caches.get(op))
            .unwrap_or(&self.ctx.cache)
            .clone()
    }

    fn obtain_key(&self, params: &Row) -> String {
        CacheKey::new(OpKind::Obtain, self.name(), Value::Object(params.clone())).encode()
    }

    fn fixers<'a>(&'a self, call: Option<&'a Arc<dyn Fixer>>) -> [Option<&'a Arc<dyn Fixer>>; 3] {
        [self.ctx.fixer.as_ref(), self.schema.fixer.as_ref(), call]
    }

    async fn broadcast(&self, change: Change) {
        if let Err(e) = self.ctx.broadcaster.broadcast(self.name(), &change).await {
            tracing::warn!(schema = %self.name(), method = change.method(), error = %e, "broadcast failed");
        }
    }

    /// Deletes the obtain entry keyed by the mutation's own params.
    async fn invalidate(&self, params: &Row, call: Option<&Arc<dyn Cache>>) -> Result<(), ShelfError> {
        let key = self.obtain_key(params);
        tracing::trace!(key = %key, "cache invalidate");
        self.cache_for(OpKind::Obtain, call).delete(&key).await
    }

    /// Narrows `params` to one row: kept as-is with an id, else `{id}` of the single match, else `{id: 0}`.
    async fn resolve_target(&self, params: Row, ambiguous: fn() -> ShelfError) -> Result<Row, ShelfError> {
        if has_id(&params) {
            return Ok(params);
        }
        if params.is_empty() {
            return Ok(id_row(json!(0)));
        }
        let rows = self
            .store
            .fetch_all(&Select::new(self.table(), &params).with_limit(2))
            .await?;
        if rows.len() > 1 {
            return Err(ambiguous());
        }
        let id = rows
            .first()
            .and_then(|r| r.get("id"))
            .cloned()
            .unwrap_or(json!(0));
        Ok(id_row(id))
    }
}

#[async_trait]
impl Operations for Model {
    async fn browse(&self, query: BrowseQuery, opts: Options<BrowseQuery>) -> Result<Browse, ShelfError> {
        let spec = &self.schema.spec;
        let own = opts.formatter.as_ref().or(self.schema.formatters.browse.as_ref());
        let query = run_stages(query, spec, self.ctx.formatters.browse.as_ref(), own).await?;
        let sort = query.sort.clone().unwrap_or_else(|| "id".to_string());
        if !is_identifier(&sort) {
            return Err(ShelfError::BadRequest(format!("invalid sort column: {}", sort)));
        }

        let cache = self.cache_for(OpKind::Browse, opts.cache.as_ref());
        let key = CacheKey::new(
            OpKind::Browse,
            self.name(),
            json!({ "perPage": query.per_page, "page": query.page, "custom": query.custom }),
        )
        .encode();
        if let Some(hit) = cache.get(&key).await? {
            tracing::trace!(key = %key, "cache hit");
            let result: Browse = serde_json::from_value(hit)?;
            if opts.require && result.payload.is_empty() {
                return Err(ShelfError::EmptyResponse);
            }
            return Ok(result);
        }
        tracing::trace!(key = %key, "cache miss");

        let filter = Row::new();
        let mut select = Select::new(self.table(), &filter).with_relations(&self.browse_relations);
        if let Some(custom) = query.custom.as_ref() {
            select = select.with_custom(custom);
        }
        if !query.no_sort {
            select = select.with_order(&sort, query.order.unwrap_or_default());
        }
        let (rows, pagination) = match (query.page, query.per_page) {
            (Some(page), Some(per_page)) if page > 0 && per_page > 0 && !query.all => {
                let page = self.store.fetch_page(&select, page, per_page).await?;
                (page.rows, page.pagination)
            }
            _ => (self.store.fetch_all(&select).await?, Pagination::default()),
        };

        let chain = self.fixers(opts.fixer.as_ref());
        let mut payload = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(fixed) = run_fixers(row, spec, &chain).await? {
                payload.push(fixed);
            }
        }
        if opts.require && payload.is_empty() {
            return Err(ShelfError::EmptyResponse);
        }
        let result = Browse { payload, pagination };
        cache.set(&key, &serde_json::to_value(&result)?).await?;
        Ok(result)
    }

    async fn obtain(&self, params: Option<Row>, opts: Options<Row>) -> Result<Option<Value>, ShelfError> {
        let Some(params) = params else {
            return Ok(None);
        };
        let spec = &self.schema.spec;
        let own = opts.formatter.as_ref().or(self.schema.formatters.obtain.as_ref());
        let params = run_stages(params, spec, self.ctx.formatters.obtain.as_ref(), own).await?;

        let cache = self.cache_for(OpKind::Obtain, opts.cache.as_ref());
        let key = self.obtain_key(&params);
        let row = match cache.get(&key).await? {
            Some(hit) => {
                tracing::trace!(key = %key, "cache hit");
                Some(hit).filter(|v| !v.is_null())
            }
            None => {
                tracing::trace!(key = %key, "cache miss");
                let rows = self
                    .store
                    .fetch_all(
                        &Select::new(self.table(), &params)
                            .with_limit(2)
                            .with_relations(&self.obtain_relations),
                    )
                    .await?;
                if rows.len() > 1 {
                    return Err(ShelfError::ambiguous_obtain());
                }
                let row = match rows.into_iter().next() {
                    Some(r) => run_fixers(r, spec, &self.fixers(opts.fixer.as_ref())).await?,
                    None => None,
                };
                cache.set(&key, row.as_ref().unwrap_or(&Value::Null)).await?;
                row
            }
        };
        if opts.require && row.is_none() {
            return Err(ShelfError::EmptyResponse);
        }
        Ok(row)
    }

    async fn create(&self, payload: Row, opts: Options<Row>) -> Result<Value, ShelfError> {
        let spec = &self.schema.spec;
        let own = opts.formatter.as_ref().or(self.schema.formatters.create.as_ref());
        let payload = run_stages(payload, spec, self.ctx.formatters.create.as_ref(), own).await?;
        let row = self.store.insert(self.table(), &payload, self.touch()).await?;
        self.broadcast(Change::Create { payload: row.clone() }).await;
        Ok(row)
    }

    async fn update(&self, params: Row, payload: Row, opts: Options<UpdateArgs>) -> Result<Value, ShelfError> {
        let spec = &self.schema.spec;
        let own = opts.formatter.as_ref().or(self.schema.formatters.update.as_ref());
        let UpdateArgs { params, payload } =
            run_stages(UpdateArgs { params, payload }, spec, self.ctx.formatters.update.as_ref(), own).await?;
        self.invalidate(&params, opts.cache.as_ref()).await?;

        if opts.multiple && !has_id(&params) && !params.is_empty() {
            let rows = self.store.patch(self.table(), &params, &payload, self.touch()).await?;
            if rows.is_empty() {
                return Err(ShelfError::NoRowsUpdated);
            }
            let result = Value::Array(rows);
            self.broadcast(Change::Update { payload: result.clone() }).await;
            return Ok(result);
        }

        let target = self.resolve_target(params, ShelfError::ambiguous_update).await?;
        let row = self
            .store
            .patch(self.table(), &target, &payload, self.touch())
            .await?
            .into_iter()
            .next()
            .ok_or(ShelfError::NoRowsUpdated)?;
        self.broadcast(Change::Update { payload: row.clone() }).await;
        Ok(row)
    }

    async fn delete(&self, params: Row, opts: Options<Row>) -> Result<Value, ShelfError> {
        let spec = &self.schema.spec;
        let own = opts.formatter.as_ref().or(self.schema.formatters.delete.as_ref());
        let params = run_stages(params, spec, self.ctx.formatters.delete.as_ref(), own).await?;
        self.invalidate(&params, opts.cache.as_ref()).await?;

        if opts.multiple && !has_id(&params) && !params.is_empty() {
            let rows = self.store.destroy(self.table(), &params).await?;
            if rows.is_empty() {
                return Err(ShelfError::NoRowsDeleted);
            }
            let ids: Vec<Value> = rows.iter().map(|r| r.get("id").cloned().unwrap_or(Value::Null)).collect();
            self.broadcast(Change::Delete { id: Value::Array(ids) }).await;
            return Ok(Value::Array(rows));
        }

        let target = self.resolve_target(params, ShelfError::ambiguous_delete).await?;
        let row = self
            .store
            .destroy(self.table(), &target)
            .await?
            .into_iter()
            .next()
            .ok_or(ShelfError::NoRowsDeleted)?;
        let id = row.get("id").cloned().unwrap_or(Value::Null);
        self.broadcast(Change::Delete { id }).await;
        Ok(row)
    }

    async fn scrimp(&self, payload: Row, opts: Options<Row>) -> Result<Value, ShelfError> {
        let spec = &self.schema.spec;
        let own = opts.formatter.as_ref().or(self.schema.formatters.scrimp.as_ref());
        let mut payload = run_stages(payload, spec, self.ctx.formatters.scrimp.as_ref(), own).await?;
        match payload.get("id").filter(|v| !v.is_null()).cloned() {
            Some(id) => self.update(id_row(id), payload, opts.carry()).await,
            None => {
                payload.remove("id");
                self.create(payload, opts.carry()).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct Echo;

    #[async_trait]
    impl CustomOperation for Echo {
        async fn call(&self, model: &Model, args: Value) -> Result<Value, ShelfError> {
            Ok(json!({ "schema": model.name(), "args": args }))
        }
    }

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn bind_rejects_bad_table_handle() {
        let schema = Schema::new(TableSpec::new("bad", "no such table"));
        let err = Model::bind(schema, store(), Context::new()).err().unwrap();
        assert!(matches!(err, ShelfError::Binding(_)));
    }

    #[test]
    fn custom_operation_cannot_shadow_canonical() {
        let schema = Schema::new(TableSpec::new("t", "t")).with_operation("browse", Arc::new(Echo));
        let err = Model::bind(schema, store(), Context::new()).err().unwrap();
        assert_eq!(err.to_string(), "Duplicate method name browse.");
    }

    #[tokio::test]
    async fn custom_operation_is_callable() {
        let schema = Schema::new(TableSpec::new("t", "t")).with_operation("echo", Arc::new(Echo));
        let model = Model::bind(schema, store(), Context::new()).unwrap();
        assert_eq!(model.custom_names().collect::<Vec<_>>(), ["echo"]);
        let out = model.call("echo", json!(1)).await.unwrap();
        assert_eq!(out, json!({"schema": "t", "args": 1}));
        assert!(matches!(model.call("nope", json!(null)).await, Err(ShelfError::UnknownMethod(_))));
    }

    #[tokio::test]
    async fn obtain_without_params_is_none() {
        let model = Model::bind(Schema::new(TableSpec::new("t", "t")), store(), Context::new()).unwrap();
        assert_eq!(model.obtain(None, Options::new()).await.unwrap(), None);
    }
}
