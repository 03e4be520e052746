//! Shelf: binds schema groups to their stores, provisions tables in two passes and registers
//! every model operation as a named method.

use crate::cache::Cache;
use crate::config::{validate_names, Connections};
use crate::context::Context;
use crate::error::ShelfError;
use crate::format::Formatters;
use crate::methods::{method_name, ColumnInfoMethod, CustomMethod, Method, OperationMethod, SchemaMethod};
use crate::model::Model;
use crate::provision::{self, ProvisionOptions, Stage};
use crate::schema::{CacheOverrides, OpKind, Schema};
use crate::store::{connect_all, Store};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Registration-time overrides for one schema, applied on top of what the schema declares.
#[derive(Clone, Default)]
pub struct SchemaOptions {
    pub caches: CacheOverrides,
    pub formatters: Formatters,
    pub provision: ProvisionOptions,
}

impl SchemaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.caches.default = Some(cache);
        self
    }

    pub fn op_cache(mut self, op: OpKind, cache: Arc<dyn Cache>) -> Self {
        self.caches.per_op.insert(op, cache);
        self
    }

    pub fn formatters(mut self, formatters: Formatters) -> Self {
        self.formatters = formatters;
        self
    }

    pub fn provision(mut self, provision: ProvisionOptions) -> Self {
        self.provision = provision;
        self
    }
}

/// Contributes extra named methods once every model is bound.
pub trait MethodProvider: Send + Sync {
    fn methods(&self, shelf: &Shelf) -> Vec<(String, Arc<dyn Method>)>;
}

impl<F> MethodProvider for F
where
    F: Fn(&Shelf) -> Vec<(String, Arc<dyn Method>)> + Send + Sync,
{
    fn methods(&self, shelf: &Shelf) -> Vec<(String, Arc<dyn Method>)> {
        self(shelf)
    }
}

fn register(
    methods: &mut BTreeMap<String, Arc<dyn Method>>,
    name: String,
    method: Arc<dyn Method>,
) -> Result<(), ShelfError> {
    if methods.contains_key(&name) {
        return Err(ShelfError::DuplicateMethod(name));
    }
    methods.insert(name, method);
    Ok(())
}

pub struct ShelfBuilder {
    ctx: Context,
    stores: BTreeMap<String, Arc<dyn Store>>,
    groups: BTreeMap<String, Vec<Schema>>,
    options: HashMap<String, SchemaOptions>,
    providers: Vec<Arc<dyn MethodProvider>>,
}

impl ShelfBuilder {
    pub fn new(ctx: Context) -> Self {
        ShelfBuilder {
            ctx,
            stores: BTreeMap::new(),
            groups: BTreeMap::new(),
            options: HashMap::new(),
            providers: Vec::new(),
        }
    }

    pub fn store(mut self, group: impl Into<String>, store: Arc<dyn Store>) -> Self {
        self.stores.insert(group.into(), store);
        self
    }

    /// Opens one PostgreSQL pool per connection group.
    pub async fn connect(mut self, connections: &Connections, max_connections: u32) -> Result<Self, ShelfError> {
        for (group, store) in connect_all(connections, max_connections).await? {
            self.stores.insert(group, store as Arc<dyn Store>);
        }
        Ok(self)
    }

    pub fn schemas<S: Into<Schema>>(mut self, group: impl Into<String>, schemas: impl IntoIterator<Item = S>) -> Self {
        self.groups
            .entry(group.into())
            .or_default()
            .extend(schemas.into_iter().map(Into::into));
        self
    }

    /// Overrides keyed by schema name.
    pub fn schema_options(mut self, name: impl Into<String>, options: SchemaOptions) -> Self {
        self.options.insert(name.into(), options);
        self
    }

    pub fn methods(mut self, provider: impl MethodProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub async fn build(self) -> Result<Shelf, ShelfError> {
        let ShelfBuilder {
            ctx,
            stores,
            mut groups,
            options,
            providers,
        } = self;
        for hook in &ctx.hooks {
            hook.before_build(&mut groups).await?;
        }
        validate_names(groups.values().flatten().map(|s| &s.spec))?;

        let mut models = BTreeMap::new();
        for (group, schemas) in groups {
            let store = stores
                .get(&group)
                .cloned()
                .ok_or_else(|| ShelfError::Binding(format!("No store defined for: {}", group)))?;
            let provision_opts = |schema: &Schema, stage: Stage| ProvisionOptions {
                stage,
                ..options.get(schema.name()).map(|o| o.provision.clone()).unwrap_or_default()
            };

            let mut created = Vec::new();
            for schema in &schemas {
                let opts = provision_opts(schema, Stage::Columns);
                if provision::create_table(&schema.spec, store.as_ref(), &ctx, &opts).await? {
                    created.push(schema.name().to_string());
                }
            }
            for schema in schemas.iter().filter(|s| created.iter().any(|c| c == s.name())) {
                let opts = provision_opts(schema, Stage::Constraints);
                provision::create_table(&schema.spec, store.as_ref(), &ctx, &opts).await?;
            }

            for mut schema in schemas {
                if let Some(o) = options.get(schema.name()) {
                    schema.formatters = schema.formatters.overlay(&o.formatters);
                    schema.caches = schema.caches.overlay(&o.caches);
                }
                let model = Model::bind(schema, store.clone(), ctx.clone())?;
                tracing::debug!(schema = %model.name(), group = %group, "model bound");
                models.insert(model.name().to_string(), Arc::new(model));
            }
        }

        let mut methods: BTreeMap<String, Arc<dyn Method>> = BTreeMap::new();
        for (name, model) in &models {
            for op in OpKind::ALL {
                let m = OperationMethod {
                    model: model.clone(),
                    op,
                };
                register(&mut methods, method_name(name, op.as_str()), Arc::new(m))?;
            }
            for custom in model.custom_names() {
                let m = CustomMethod {
                    model: model.clone(),
                    name: custom.to_string(),
                };
                register(&mut methods, method_name(name, custom), Arc::new(m))?;
            }
            register(&mut methods, format!("models.{}.schema", name), Arc::new(SchemaMethod(model.clone())))?;
            register(
                &mut methods,
                format!("models.{}.columnInfo", name),
                Arc::new(ColumnInfoMethod(model.clone())),
            )?;
        }

        let mut shelf = Shelf {
            stores,
            models,
            methods,
        };
        for provider in &providers {
            for (name, m) in provider.methods(&shelf) {
                register(&mut shelf.methods, name, m)?;
            }
        }
        for hook in &ctx.hooks {
            hook.after_build(&shelf).await?;
        }
        tracing::info!(models = shelf.models.len(), methods = shelf.methods.len(), "shelf built");
        Ok(shelf)
    }
}

/// Bound models, their stores and the method registry.
pub struct Shelf {
    stores: BTreeMap<String, Arc<dyn Store>>,
    models: BTreeMap<String, Arc<Model>>,
    methods: BTreeMap<String, Arc<dyn Method>>,
}

impl Shelf {
    pub fn builder(ctx: Context) -> ShelfBuilder {
        ShelfBuilder::new(ctx)
    }

    pub fn model(&self, name: &str) -> Option<&Arc<Model>> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    /// Raw storage handle of a connection group.
    pub fn store(&self, group: &str) -> Option<&Arc<dyn Store>> {
        self.stores.get(group)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn method(&self, name: &str) -> Option<&Arc<dyn Method>> {
        self.methods.get(name)
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ShelfError> {
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| ShelfError::UnknownMethod(name.to_string()))?;
        method.call(args).await
    }
}
