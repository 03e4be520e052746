//! PostgreSQL store over a sqlx pool. Column types are introspected once per table and used for
//! placeholder casts; every statement returns rows as JSON objects.

use super::{ColumnInfo, Select, Store, TablePlan};
use crate::config::{ConstraintDef, Connections};
use crate::error::ShelfError;
use crate::format::Row;
use crate::sql::{self, ddl, ColumnTypes, QueryBuf, ROW_COLUMN};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{ConnectOptions, PgPool};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

pub struct PgStore {
    pool: PgPool,
    types: RwLock<HashMap<String, Arc<ColumnTypes>>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore {
            pool,
            types: RwLock::new(HashMap::new()),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, ShelfError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn column_types(&self, table: &str) -> Result<Arc<ColumnTypes>, ShelfError> {
        if let Some(t) = self.types.read().ok().and_then(|m| m.get(table).cloned()) {
            return Ok(t);
        }
        let types: ColumnTypes = self
            .column_info(table)
            .await?
            .into_iter()
            .map(|c| (c.name, c.data_type))
            .collect();
        let types = Arc::new(types);
        // An empty map means the table does not exist yet; don't pin that.
        if !types.is_empty() {
            if let Ok(mut m) = self.types.write() {
                m.insert(table.to_string(), types.clone());
            }
        }
        Ok(types)
    }

    fn forget(&self, table: &str) {
        if let Ok(mut m) = self.types.write() {
            m.remove(table);
        }
    }

    async fn execute(&self, sql: &str) -> Result<(), ShelfError> {
        tracing::debug!(sql = %sql, "ddl");
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn rows(&self, q: QueryBuf) -> Result<Vec<Value>, ShelfError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = sql::bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_json).collect()
    }
}

fn row_to_json(row: &PgRow) -> Result<Value, ShelfError> {
    use sqlx::Row;
    Ok(row.try_get::<Option<Value>, _>(ROW_COLUMN)?.unwrap_or(Value::Null))
}

#[async_trait]
impl Store for PgStore {
    async fn has_table(&self, table: &str) -> Result<bool, ShelfError> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists.0)
    }

    async fn column_info(&self, table: &str) -> Result<Vec<ColumnInfo>, ShelfError> {
        let rows: Vec<(String, String, bool, bool)> = sqlx::query_as(
            "SELECT column_name::text, udt_name::text, is_nullable = 'YES', column_default IS NOT NULL \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, has_default)| ColumnInfo {
                name,
                data_type,
                nullable,
                has_default,
            })
            .collect())
    }

    async fn create_table(&self, plan: &TablePlan) -> Result<(), ShelfError> {
        self.execute(&ddl::create_table(plan)).await?;
        self.forget(&plan.table);
        Ok(())
    }

    async fn add_surrogate_id(&self, table: &str) -> Result<(), ShelfError> {
        self.execute(&ddl::add_surrogate_id(table)).await?;
        self.forget(table);
        Ok(())
    }

    async fn add_constraints(&self, table: &str, constraints: &[ConstraintDef]) -> Result<(), ShelfError> {
        let statements = constraints
            .iter()
            .map(|c| ddl::constraint(table, c))
            .collect::<Result<Vec<_>, _>>()?;
        let mut tx = self.pool.begin().await?;
        for s in &statements {
            tracing::debug!(sql = %s, "ddl (tx)");
            sqlx::query(s).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn raw(&self, sql: &str) -> Result<(), ShelfError> {
        tracing::debug!(sql = %sql, "raw");
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        if let Ok(mut m) = self.types.write() {
            m.clear();
        }
        Ok(())
    }

    async fn drop_table_if_exists(&self, table: &str) -> Result<(), ShelfError> {
        self.execute(&ddl::drop_table_if_exists(table)).await?;
        self.forget(table);
        Ok(())
    }

    async fn fetch_all(&self, select: &Select<'_>) -> Result<Vec<Value>, ShelfError> {
        let types = self.column_types(select.table).await?;
        self.rows(sql::select(select, &types)?).await
    }

    async fn count(&self, select: &Select<'_>) -> Result<u64, ShelfError> {
        let types = self.column_types(select.table).await?;
        let q = sql::count(select, &types)?;
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = sql::bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = sqlx::Row::try_get(&row, "count")?;
        Ok(n.max(0) as u64)
    }

    async fn insert(&self, table: &str, payload: &Row, touch: Option<&str>) -> Result<Value, ShelfError> {
        let types = self.column_types(table).await?;
        let q = sql::insert(table, &types, payload, touch);
        self.rows(q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ShelfError::Storage(format!("insert into {} returned no row", table)))
    }

    async fn patch(&self, table: &str, filter: &Row, payload: &Row, touch: Option<&str>) -> Result<Vec<Value>, ShelfError> {
        let types = self.column_types(table).await?;
        self.rows(sql::update(table, &types, filter, payload, touch)?).await
    }

    async fn destroy(&self, table: &str, filter: &Row) -> Result<Vec<Value>, ShelfError> {
        let types = self.column_types(table).await?;
        self.rows(sql::delete(table, &types, filter)?).await
    }
}

/// One pool per connection group.
pub async fn connect_all(
    connections: &Connections,
    max_connections: u32,
) -> Result<BTreeMap<String, Arc<PgStore>>, ShelfError> {
    let mut stores = BTreeMap::new();
    for (group, url) in connections.groups()? {
        tracing::info!(group = %group, "connecting store");
        stores.insert(group, Arc::new(PgStore::connect(&url, max_connections).await?));
    }
    Ok(stores)
}

/// Creates the database named in `database_url` when missing, connecting through the `postgres` database.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), ShelfError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = PgConnectOptions::from_str(&admin_url)
        .map_err(|e| ShelfError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), ShelfError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| ShelfError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let (db_name, query) = match path_and_query.split_once('?') {
        Some((name, query)) => (name, format!("?{}", query)),
        None => (path_and_query, String::new()),
    };
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres{}", base, query), db_name.trim().to_string()))
}
