//! In-memory store for tests and embedding. Enforces NOT NULL, UNIQUE and FOREIGN KEY like the
//! database does; raw SQL is recorded, not executed.

use super::{ColumnInfo, Select, Store, TablePlan};
use crate::config::{ColumnDef, ColumnDefault, ConstraintDef, RelationKind};
use crate::error::ShelfError;
use crate::format::{Row, SortOrder};
use crate::sql::ddl;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::RwLock;

#[derive(Clone, Debug)]
struct Column {
    name: String,
    data_type: String,
    nullable: bool,
    default: Option<ColumnDefault>,
    serial: bool,
}

impl From<&ColumnDef> for Column {
    fn from(c: &ColumnDef) -> Self {
        Column {
            name: c.name.clone(),
            data_type: c.type_.sql(),
            nullable: c.nullable,
            default: c.default.clone(),
            serial: false,
        }
    }
}

impl Column {
    fn serial_id() -> Self {
        Column {
            name: "id".into(),
            data_type: "int8".into(),
            nullable: false,
            default: None,
            serial: true,
        }
    }
}

#[derive(Clone, Debug)]
struct ForeignKey {
    name: String,
    column: String,
    references_table: String,
    references_column: String,
    on_delete: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct Table {
    columns: Vec<Column>,
    rows: Vec<Row>,
    next_id: u64,
    uniques: Vec<(String, Vec<String>)>,
    foreign_keys: Vec<ForeignKey>,
}

impl Table {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn add_unique(&mut self, name: String, columns: Vec<String>) {
        if !self.uniques.iter().any(|(n, _)| *n == name) {
            self.uniques.push((name, columns));
        }
    }

    fn next_serial(&mut self) -> Value {
        self.next_id += 1;
        Value::from(self.next_id)
    }
}

type Tables = BTreeMap<String, Table>;

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    statements: RwLock<Vec<String>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

fn poisoned() -> ShelfError {
    ShelfError::Storage("memory store lock poisoned".into())
}

fn missing_relation(table: &str) -> ShelfError {
    ShelfError::Storage(format!("relation \"{}\" does not exist", table))
}

fn missing_column(table: &str, column: &str) -> ShelfError {
    ShelfError::Storage(format!("column \"{}\" of relation \"{}\" does not exist", column, table))
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

/// Equality with the loose numeric and text coercion the database applies to parameters.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Nulls sort last ascending, first descending.
fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.filter(|v| !v.is_null()), b.filter(|v| !v.is_null())) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare(x, y),
    }
}

fn default_value(table: &str, column: &Column) -> Result<Value, ShelfError> {
    match &column.default {
        None => Ok(Value::Null),
        Some(ColumnDefault::Literal(v)) => Ok(v.clone()),
        Some(ColumnDefault::Expression { expression }) => {
            let e = expression.trim().to_lowercase();
            let e = e.split("::").next().unwrap_or("").trim();
            if e == "now()" || e == "current_timestamp" || e == "current_date" {
                return Ok(now());
            }
            if e == "gen_random_uuid()" || e == "uuid_generate_v4()" {
                return Ok(Value::String(uuid::Uuid::new_v4().to_string()));
            }
            if e == "true" || e == "false" {
                return Ok(Value::Bool(e == "true"));
            }
            if e == "null" {
                return Ok(Value::Null);
            }
            if let Ok(n) = e.parse::<i64>() {
                return Ok(Value::from(n));
            }
            if let Some(s) = e.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
                return Ok(Value::String(s.replace("''", "'")));
            }
            Err(ShelfError::Unsupported(format!(
                "default expression {} on {}.{}",
                expression, table, column.name
            )))
        }
    }
}

fn matches(table_name: &str, table: &Table, row: &Row, filters: &[&Row]) -> Result<bool, ShelfError> {
    for filter in filters {
        for (k, v) in filter.iter() {
            if !table.has_column(k) {
                return Err(missing_column(table_name, k));
            }
            let cell = row.get(k).unwrap_or(&Value::Null);
            let hit = if v.is_null() { cell.is_null() } else { value_eq(cell, v) };
            if !hit {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn matching_indices(table_name: &str, table: &Table, filters: &[&Row]) -> Result<Vec<usize>, ShelfError> {
    let mut out = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        if matches(table_name, table, row, filters)? {
            out.push(i);
        }
    }
    Ok(out)
}

/// NOT NULL, UNIQUE and FOREIGN KEY checks for `candidate` replacing row `skip` (None for inserts).
fn check_row(tables: &Tables, table_name: &str, candidate: &Row, skip: Option<usize>) -> Result<(), ShelfError> {
    let table = tables.get(table_name).ok_or_else(|| missing_relation(table_name))?;
    for c in &table.columns {
        if !c.nullable && candidate.get(&c.name).map_or(true, Value::is_null) {
            return Err(ShelfError::Storage(format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                c.name, table_name
            )));
        }
    }
    for (name, cols) in &table.uniques {
        let key: Vec<&Value> = cols.iter().filter_map(|c| candidate.get(c)).filter(|v| !v.is_null()).collect();
        if key.len() != cols.len() {
            continue;
        }
        let clash = table.rows.iter().enumerate().any(|(i, other)| {
            Some(i) != skip
                && cols
                    .iter()
                    .zip(&key)
                    .all(|(c, v)| other.get(c).map_or(false, |o| value_eq(o, v)))
        });
        if clash {
            return Err(ShelfError::Storage(format!(
                "duplicate key value violates unique constraint \"{}\"",
                name
            )));
        }
    }
    for fk in &table.foreign_keys {
        let Some(v) = candidate.get(&fk.column).filter(|v| !v.is_null()) else {
            continue;
        };
        let target = tables
            .get(&fk.references_table)
            .ok_or_else(|| missing_relation(&fk.references_table))?;
        let found = target
            .rows
            .iter()
            .any(|r| r.get(&fk.references_column).map_or(false, |o| value_eq(o, v)));
        if !found {
            return Err(ShelfError::Storage(format!(
                "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
                table_name, fk.name
            )));
        }
    }
    Ok(())
}

fn is_pending(pending: &[(String, Row)], table: &str, row: &Row) -> bool {
    pending.iter().any(|(t, r)| t == table && r == row)
}

/// Removes rows `indices` of `table_name`, applying referencing tables' ON DELETE actions.
/// `pending` holds every row already scheduled for removal, so cascade cycles terminate.
fn delete_rows(
    tables: &mut Tables,
    table_name: &str,
    indices: &[usize],
    pending: &mut Vec<(String, Row)>,
) -> Result<Vec<Row>, ShelfError> {
    let removed: Vec<Row> = {
        let table = tables.get(table_name).ok_or_else(|| missing_relation(table_name))?;
        indices
            .iter()
            .map(|&i| table.rows[i].clone())
            .filter(|r| !is_pending(pending.as_slice(), table_name, r))
            .collect()
    };
    if removed.is_empty() {
        return Ok(removed);
    }
    pending.extend(removed.iter().map(|r| (table_name.to_string(), r.clone())));
    let dependents: Vec<(String, ForeignKey)> = tables
        .iter()
        .flat_map(|(name, t)| {
            t.foreign_keys
                .iter()
                .filter(|fk| fk.references_table == table_name)
                .map(move |fk| (name.clone(), fk.clone()))
        })
        .collect();
    for (dep_name, fk) in dependents {
        let keys: Vec<Value> = removed
            .iter()
            .filter_map(|r| r.get(&fk.references_column).cloned())
            .filter(|v| !v.is_null())
            .collect();
        let hits: Vec<usize> = match tables.get(&dep_name) {
            Some(dep) => dep
                .rows
                .iter()
                .enumerate()
                .filter(|(_, r)| !is_pending(pending.as_slice(), &dep_name, r))
                .filter(|(_, r)| r.get(&fk.column).map_or(false, |v| keys.iter().any(|k| value_eq(v, k))))
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        };
        if hits.is_empty() {
            continue;
        }
        match fk.on_delete.as_deref().map(str::to_uppercase).as_deref() {
            Some("CASCADE") => {
                delete_rows(tables, &dep_name, &hits, pending)?;
            }
            Some("SET NULL") => {
                if let Some(dep) = tables.get_mut(&dep_name) {
                    for i in hits {
                        dep.rows[i].insert(fk.column.clone(), Value::Null);
                    }
                }
            }
            _ => {
                return Err(ShelfError::Storage(format!(
                    "update or delete on table \"{}\" violates foreign key constraint \"{}\" on table \"{}\"",
                    table_name, fk.name, dep_name
                )))
            }
        }
    }
    // Cascades may have shifted positions in a self-referencing table, so match by value.
    let table = tables.get_mut(table_name).ok_or_else(|| missing_relation(table_name))?;
    table.rows.retain(|r| !removed.contains(r));
    Ok(removed)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetch and count calls served.
    pub fn reads(&self) -> u64 {
        self.reads.load(AtomicOrdering::Relaxed)
    }

    /// Number of insert, patch and destroy calls served.
    pub fn writes(&self) -> u64 {
        self.writes.load(AtomicOrdering::Relaxed)
    }

    /// DDL and raw statements in the order they were applied.
    pub fn statements(&self) -> Vec<String> {
        self.statements.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.get(table).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    fn record(&self, statement: String) {
        tracing::trace!(sql = %statement, "memory ddl");
        if let Ok(mut s) = self.statements.write() {
            s.push(statement);
        }
    }

    fn attach_relations(tables: &Tables, select: &Select<'_>, row: &mut Row) -> Result<(), ShelfError> {
        for rel in select.relations {
            let target = tables.get(&rel.table).ok_or_else(|| missing_relation(&rel.table))?;
            let key = row.get(&rel.local_column).cloned().unwrap_or(Value::Null);
            let related = target
                .rows
                .iter()
                .filter(|r| !key.is_null() && r.get(&rel.foreign_column).map_or(false, |v| value_eq(v, &key)))
                .map(|r| match &rel.columns {
                    Some(cols) if !cols.is_empty() => Value::Object(
                        cols.iter()
                            .map(|c| (c.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                            .collect(),
                    ),
                    _ => Value::Object(r.clone()),
                });
            let value = match rel.kind {
                RelationKind::ToOne => related.into_iter().next().unwrap_or(Value::Null),
                RelationKind::ToMany => Value::Array(related.collect()),
            };
            row.insert(rel.name.clone(), value);
        }
        Ok(())
    }

    fn filtered(tables: &Tables, select: &Select<'_>) -> Result<Vec<Row>, ShelfError> {
        let table = tables.get(select.table).ok_or_else(|| missing_relation(select.table))?;
        let mut filters = vec![select.filter];
        if let Some(custom) = select.custom {
            if custom.raw_where.is_some() || custom.raw_order.is_some() {
                return Err(ShelfError::Unsupported(
                    "raw where and order clauses need a SQL store".into(),
                ));
            }
            filters.push(&custom.filters);
        }
        Ok(matching_indices(select.table, table, &filters)?
            .into_iter()
            .map(|i| table.rows[i].clone())
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn has_table(&self, table: &str) -> Result<bool, ShelfError> {
        Ok(self.tables.read().map_err(|_| poisoned())?.contains_key(table))
    }

    async fn column_info(&self, table: &str) -> Result<Vec<ColumnInfo>, ShelfError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .get(table)
            .map(|t| {
                t.columns
                    .iter()
                    .map(|c| ColumnInfo {
                        name: c.name.clone(),
                        data_type: c.data_type.clone(),
                        nullable: c.nullable,
                        has_default: c.serial || c.default.is_some(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_table(&self, plan: &TablePlan) -> Result<(), ShelfError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        if tables.contains_key(&plan.table) {
            return Err(ShelfError::Storage(format!("relation \"{}\" already exists", plan.table)));
        }
        let mut table = Table::default();
        if plan.identity {
            table.columns.push(Column::serial_id());
            table.add_unique(format!("{}_pkey", plan.table), vec!["id".into()]);
        }
        for c in &plan.columns {
            if table.has_column(&c.name) {
                return Err(ShelfError::Storage(format!(
                    "column \"{}\" specified more than once",
                    c.name
                )));
            }
            table.columns.push(Column::from(c));
            if c.unique {
                table.add_unique(format!("{}_{}_key", plan.table, c.name), vec![c.name.clone()]);
            }
        }
        tables.insert(plan.table.clone(), table);
        drop(tables);
        self.record(ddl::create_table(plan));
        Ok(())
    }

    async fn add_surrogate_id(&self, table: &str) -> Result<(), ShelfError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let t = tables.get_mut(table).ok_or_else(|| missing_relation(table))?;
        if t.has_column("id") {
            return Err(ShelfError::Storage(format!(
                "column \"id\" of relation \"{}\" already exists",
                table
            )));
        }
        t.columns.push(Column::serial_id());
        for i in 0..t.rows.len() {
            let id = t.next_serial();
            t.rows[i].insert("id".into(), id);
        }
        t.add_unique(format!("{}_id_key", table), vec!["id".into()]);
        drop(tables);
        self.record(ddl::add_surrogate_id(table));
        Ok(())
    }

    async fn add_constraints(&self, table: &str, constraints: &[ConstraintDef]) -> Result<(), ShelfError> {
        let statements = constraints
            .iter()
            .map(|c| ddl::constraint(table, c))
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let t = tables.get(table).ok_or_else(|| missing_relation(table))?;
        for c in constraints {
            for col in c.columns() {
                if !t.has_column(col) {
                    return Err(missing_column(table, col));
                }
            }
            match c {
                ConstraintDef::ForeignKey {
                    references_table,
                    references_column,
                    ..
                } => {
                    let target = tables
                        .get(references_table)
                        .ok_or_else(|| missing_relation(references_table))?;
                    if !target.has_column(references_column) {
                        return Err(missing_column(references_table, references_column));
                    }
                }
                ConstraintDef::Check { name, .. } => {
                    return Err(ShelfError::Unsupported(format!(
                        "check constraint {} needs a SQL store",
                        name
                    )))
                }
                _ => {}
            }
        }
        // All validated; apply as one unit.
        let t = tables.get_mut(table).ok_or_else(|| missing_relation(table))?;
        for c in constraints {
            let name = ddl::constraint_name(table, c);
            match c {
                ConstraintDef::Unique { columns, .. } | ConstraintDef::PrimaryKey { columns } => {
                    t.add_unique(name, columns.clone());
                }
                ConstraintDef::ForeignKey {
                    column,
                    references_table,
                    references_column,
                    on_delete,
                    ..
                } => t.foreign_keys.push(ForeignKey {
                    name,
                    column: column.clone(),
                    references_table: references_table.clone(),
                    references_column: references_column.clone(),
                    on_delete: on_delete.clone(),
                }),
                ConstraintDef::Check { .. } | ConstraintDef::Index { .. } => {}
            }
        }
        drop(tables);
        for s in statements {
            self.record(s);
        }
        Ok(())
    }

    async fn raw(&self, sql: &str) -> Result<(), ShelfError> {
        self.record(sql.to_string());
        Ok(())
    }

    async fn drop_table_if_exists(&self, table: &str) -> Result<(), ShelfError> {
        self.tables.write().map_err(|_| poisoned())?.remove(table);
        self.record(ddl::drop_table_if_exists(table));
        Ok(())
    }

    async fn fetch_all(&self, select: &Select<'_>) -> Result<Vec<Value>, ShelfError> {
        self.reads.fetch_add(1, AtomicOrdering::Relaxed);
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut rows = Self::filtered(&tables, select)?;
        if let Some((col, order)) = select.order {
            let table = tables.get(select.table).ok_or_else(|| missing_relation(select.table))?;
            if !table.has_column(col) {
                return Err(missing_column(select.table, col));
            }
            rows.sort_by(|a, b| {
                let o = compare_nullable(a.get(col), b.get(col));
                match order {
                    SortOrder::Asc => o,
                    SortOrder::Desc => o.reverse(),
                }
            });
        }
        let offset = select.offset.unwrap_or(0) as usize;
        let limit = select.limit.map_or(usize::MAX, |l| l as usize);
        let mut out = Vec::new();
        for mut row in rows.into_iter().skip(offset).take(limit) {
            Self::attach_relations(&tables, select, &mut row)?;
            out.push(Value::Object(row));
        }
        Ok(out)
    }

    async fn count(&self, select: &Select<'_>) -> Result<u64, ShelfError> {
        self.reads.fetch_add(1, AtomicOrdering::Relaxed);
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(Self::filtered(&tables, select)?.len() as u64)
    }

    async fn insert(&self, table: &str, payload: &Row, touch: Option<&str>) -> Result<Value, ShelfError> {
        self.writes.fetch_add(1, AtomicOrdering::Relaxed);
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let t = tables.get_mut(table).ok_or_else(|| missing_relation(table))?;
        if let Some(k) = payload.keys().find(|k| !t.has_column(k)) {
            return Err(missing_column(table, k));
        }
        let mut row = Row::new();
        for c in t.columns.clone() {
            let v = match payload.get(&c.name) {
                Some(v) => v.clone(),
                None if c.serial => t.next_serial(),
                None if touch == Some(c.name.as_str()) => now(),
                None => default_value(table, &c)?,
            };
            row.insert(c.name, v);
        }
        check_row(&tables, table, &row, None)?;
        let t = tables.get_mut(table).ok_or_else(|| missing_relation(table))?;
        t.rows.push(row.clone());
        Ok(Value::Object(row))
    }

    async fn patch(&self, table: &str, filter: &Row, payload: &Row, touch: Option<&str>) -> Result<Vec<Value>, ShelfError> {
        self.writes.fetch_add(1, AtomicOrdering::Relaxed);
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let t = tables.get(table).ok_or_else(|| missing_relation(table))?;
        if let Some(k) = payload.keys().find(|k| !t.has_column(k)) {
            return Err(missing_column(table, k));
        }
        let hits = matching_indices(table, t, &[filter])?;
        let sets: Row = payload
            .iter()
            .filter(|(k, _)| k.as_str() != "id")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if sets.is_empty() {
            return Ok(hits.iter().map(|&i| Value::Object(t.rows[i].clone())).collect());
        }
        let touch = touch.filter(|c| !sets.contains_key(*c) && t.has_column(c));
        let mut staged = Vec::with_capacity(hits.len());
        for &i in &hits {
            let mut row = t.rows[i].clone();
            for (k, v) in &sets {
                row.insert(k.clone(), v.clone());
            }
            if let Some(c) = touch {
                row.insert(c.to_string(), now());
            }
            check_row(&tables, table, &row, Some(i))?;
            staged.push((i, row));
        }
        let t = tables.get_mut(table).ok_or_else(|| missing_relation(table))?;
        let mut out = Vec::with_capacity(staged.len());
        for (i, row) in staged {
            t.rows[i] = row.clone();
            out.push(Value::Object(row));
        }
        Ok(out)
    }

    async fn destroy(&self, table: &str, filter: &Row) -> Result<Vec<Value>, ShelfError> {
        self.writes.fetch_add(1, AtomicOrdering::Relaxed);
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let t = tables.get(table).ok_or_else(|| missing_relation(table))?;
        let hits = matching_indices(table, t, &[filter])?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        // Work on a copy so a failed cascade leaves nothing half-deleted.
        let mut scratch = tables.clone();
        let removed = delete_rows(&mut scratch, table, &hits, &mut Vec::new())?;
        *tables = scratch;
        Ok(removed.into_iter().map(Value::Object).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    async fn solo(store: &MemoryStore) {
        let plan = TablePlan {
            table: "solo_table".into(),
            identity: true,
            columns: vec![
                ColumnDef::new("created_at", "timestamptz").not_null().default_expr("now()"),
                ColumnDef::new("label", "varchar(255)").not_null(),
                ColumnDef::new("rank", "integer"),
            ],
        };
        store.create_table(&plan).await.unwrap();
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_defaults() {
        let store = MemoryStore::new();
        solo(&store).await;
        let a = store.insert("solo_table", &row(json!({"label": "a"})), None).await.unwrap();
        let b = store.insert("solo_table", &row(json!({"label": "b"})), None).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert!(a["created_at"].is_string());
        assert_eq!(a["rank"], Value::Null);
    }

    #[tokio::test]
    async fn not_null_and_unknown_columns_fail() {
        let store = MemoryStore::new();
        solo(&store).await;
        let err = store.insert("solo_table", &Row::new(), None).await.unwrap_err();
        assert!(err.to_string().contains("violates not-null constraint"));
        let err = store
            .insert("solo_table", &row(json!({"label": "a", "nope": 1})), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "column \"nope\" of relation \"solo_table\" does not exist");
    }

    #[tokio::test]
    async fn ordering_puts_nulls_last_ascending() {
        let store = MemoryStore::new();
        solo(&store).await;
        for (label, rank) in [("a", json!(2)), ("b", Value::Null), ("c", json!(1))] {
            store
                .insert("solo_table", &row(json!({"label": label, "rank": rank})), None)
                .await
                .unwrap();
        }
        let filter = Row::new();
        let asc = store
            .fetch_all(&Select::new("solo_table", &filter).with_order("rank", SortOrder::Asc))
            .await
            .unwrap();
        let labels: Vec<&str> = asc.iter().map(|r| r["label"].as_str().unwrap()).collect();
        assert_eq!(labels, ["c", "a", "b"]);
        let desc = store
            .fetch_all(&Select::new("solo_table", &filter).with_order("rank", SortOrder::Desc))
            .await
            .unwrap();
        assert_eq!(desc[0]["label"], json!("b"));
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let store = MemoryStore::new();
        solo(&store).await;
        let plan = TablePlan {
            table: "child".into(),
            identity: true,
            columns: vec![ColumnDef::new("solo_id", "bigint")],
        };
        store.create_table(&plan).await.unwrap();
        store
            .add_constraints("child", &[ConstraintDef::foreign_key("solo_id", "solo_table")])
            .await
            .unwrap();
        let err = store.insert("child", &row(json!({"solo_id": 9})), None).await.unwrap_err();
        assert!(err.to_string().contains("child_solo_id_foreign"));

        store.insert("solo_table", &row(json!({"label": "a"})), None).await.unwrap();
        store.insert("child", &row(json!({"solo_id": 1})), None).await.unwrap();
        assert!(store.destroy("solo_table", &row(json!({"id": 1}))).await.is_err());
        assert_eq!(store.rows("solo_table").len(), 1);
    }

    async fn nodes(store: &MemoryStore, on_delete: Option<&str>) {
        let plan = TablePlan {
            table: "node".into(),
            identity: true,
            columns: vec![ColumnDef::new("parent_id", "bigint")],
        };
        store.create_table(&plan).await.unwrap();
        let fk = ConstraintDef::ForeignKey {
            column: "parent_id".into(),
            references_table: "node".into(),
            references_column: "id".into(),
            on_delete: on_delete.map(String::from),
            on_update: None,
        };
        store.add_constraints("node", &[fk]).await.unwrap();
    }

    #[tokio::test]
    async fn cascade_through_a_cycle_terminates() {
        let store = MemoryStore::new();
        nodes(&store, Some("CASCADE")).await;
        store.insert("node", &Row::new(), None).await.unwrap();
        store.insert("node", &row(json!({"parent_id": 1})), None).await.unwrap();
        store.insert("node", &row(json!({"parent_id": 2})), None).await.unwrap();
        store.insert("node", &Row::new(), None).await.unwrap();
        store
            .patch("node", &row(json!({"id": 1})), &row(json!({"parent_id": 3})), None)
            .await
            .unwrap();

        let removed = store.destroy("node", &row(json!({"id": 1}))).await.unwrap();
        assert_eq!(removed.len(), 1);
        let left: Vec<Value> = store.rows("node").iter().map(|r| r["id"].clone()).collect();
        assert_eq!(left, [json!(4)]);
    }

    #[tokio::test]
    async fn self_reference_does_not_block_its_own_delete() {
        let store = MemoryStore::new();
        nodes(&store, None).await;
        store.insert("node", &Row::new(), None).await.unwrap();
        store
            .patch("node", &row(json!({"id": 1})), &row(json!({"parent_id": 1})), None)
            .await
            .unwrap();
        store.destroy("node", &row(json!({"id": 1}))).await.unwrap();
        assert!(store.rows("node").is_empty());
    }

    #[tokio::test]
    async fn patch_without_sets_returns_matches() {
        let store = MemoryStore::new();
        solo(&store).await;
        store.insert("solo_table", &row(json!({"label": "a"})), None).await.unwrap();
        let rows = store
            .patch("solo_table", &row(json!({"id": 1})), &row(json!({"id": 5})), None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn raw_statements_are_recorded() {
        let store = MemoryStore::new();
        store.raw("CREATE EXTENSION IF NOT EXISTS citext").await.unwrap();
        assert_eq!(store.statements(), vec!["CREATE EXTENSION IF NOT EXISTS citext".to_string()]);
    }
}
