//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE for one table.

use crate::config::{Relation, RelationKind};
use crate::error::ShelfError;
use crate::format::{CustomQuery, Row};
use crate::store::Select;
use serde_json::Value;
use std::collections::HashMap;

/// Column name to PostgreSQL type name (`udt_name`), used for placeholder casts.
pub type ColumnTypes = HashMap<String, String>;

const MAIN_ALIAS: &str = "main";
/// Every statement yields one JSON object per row in this column.
pub const ROW_COLUMN: &str = "row";

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        Self::default()
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// `$n` for the pushed value, cast to the column's type when it is known.
    fn placeholder(&mut self, types: &ColumnTypes, column: &str, v: Value) -> String {
        let n = self.push_param(v);
        match types.get(column) {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

fn column_ref(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(a) => format!("{}.{}", a, quoted(column)),
        None => quoted(column),
    }
}

/// Replaces each `?` with the next positional parameter.
fn expand_raw(q: &mut QueryBuf, sql: &str, bindings: &[Value]) -> Result<String, ShelfError> {
    let expected = sql.matches('?').count();
    if expected != bindings.len() {
        return Err(ShelfError::BadRequest(format!(
            "raw where expects {} bindings, got {}",
            expected,
            bindings.len()
        )));
    }
    let mut out = String::with_capacity(sql.len() + 8);
    let mut values = bindings.iter();
    for ch in sql.chars() {
        if ch == '?' {
            let v = values.next().cloned().unwrap_or(Value::Null);
            let n = q.push_param(v);
            out.push_str(&format!("${}", n));
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

fn where_clause(
    q: &mut QueryBuf,
    types: &ColumnTypes,
    alias: Option<&str>,
    filter: &Row,
    custom: Option<&CustomQuery>,
) -> Result<String, ShelfError> {
    let mut parts = Vec::new();
    let custom_filters = custom.map(|c| c.filters.iter()).into_iter().flatten();
    for (col, val) in filter.iter().chain(custom_filters) {
        let lhs = column_ref(alias, col);
        if val.is_null() {
            parts.push(format!("{} IS NULL", lhs));
        } else {
            let ph = q.placeholder(types, col, val.clone());
            parts.push(format!("{} = {}", lhs, ph));
        }
    }
    if let Some(c) = custom {
        if let Some(raw) = c.raw_where.as_deref() {
            parts.push(format!("({})", expand_raw(q, raw, &c.bindings)?));
        }
    }
    Ok(if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    })
}

fn relation_subquery(rel: &Relation) -> String {
    let cols = match &rel.columns {
        Some(cols) if !cols.is_empty() => cols.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", "),
        _ => "*".to_string(),
    };
    let from = format!(
        "{} WHERE {}.{} = {}.{}",
        quoted(&rel.table),
        quoted(&rel.table),
        quoted(&rel.foreign_column),
        MAIN_ALIAS,
        quoted(&rel.local_column)
    );
    match rel.kind {
        RelationKind::ToOne => format!(
            "(SELECT row_to_json(sub) FROM (SELECT {} FROM {} LIMIT 1) sub)",
            cols, from
        ),
        RelationKind::ToMany => format!(
            "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {}) sub)",
            cols, from
        ),
    }
}

fn json_literal_key(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// SELECT over the main table aliased as "main", one JSON object per row; each relation is merged in
/// as a scalar subquery under its name.
pub fn select(select: &Select<'_>, types: &ColumnTypes) -> Result<QueryBuf, ShelfError> {
    let mut q = QueryBuf::new();
    let mut row_expr = format!("to_jsonb({})", MAIN_ALIAS);
    if !select.relations.is_empty() {
        let pairs: Vec<String> = select
            .relations
            .iter()
            .map(|rel| format!("{}, {}", json_literal_key(&rel.name), relation_subquery(rel)))
            .collect();
        row_expr = format!("{} || jsonb_build_object({})", row_expr, pairs.join(", "));
    }
    let where_sql = where_clause(&mut q, types, Some(MAIN_ALIAS), select.filter, select.custom)?;

    let mut order_parts = Vec::new();
    if let Some(raw) = select.custom.and_then(|c| c.raw_order.as_deref()) {
        order_parts.push(raw.to_string());
    }
    if let Some((col, order)) = select.order {
        order_parts.push(format!("{} {}", column_ref(Some(MAIN_ALIAS), col), order.sql()));
    }
    let order_sql = if order_parts.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order_parts.join(", "))
    };
    let limit_sql = select.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_sql = select.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();

    q.sql = format!(
        "SELECT {} AS {} FROM {} {}{}{}{}{}",
        row_expr,
        quoted(ROW_COLUMN),
        quoted(select.table),
        MAIN_ALIAS,
        where_sql,
        order_sql,
        limit_sql,
        offset_sql
    );
    Ok(q)
}

/// Row count for the same filters as [`select`], ignoring order and window.
pub fn count(select: &Select<'_>, types: &ColumnTypes) -> Result<QueryBuf, ShelfError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, types, Some(MAIN_ALIAS), select.filter, select.custom)?;
    q.sql = format!(
        "SELECT COUNT(*) AS \"count\" FROM {} {}{}",
        quoted(select.table),
        MAIN_ALIAS,
        where_sql
    );
    Ok(q)
}

fn returning(table: &str) -> String {
    format!(" RETURNING to_jsonb({}) AS {}", quoted(table), quoted(ROW_COLUMN))
}

/// INSERT of the payload's columns; columns it omits take their database default.
pub fn insert(table: &str, types: &ColumnTypes, payload: &Row, touch: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for (k, v) in payload {
        cols.push(quoted(k));
        values.push(q.placeholder(types, k, v.clone()));
    }
    if let Some(t) = touch.filter(|t| !payload.contains_key(*t)) {
        cols.push(quoted(t));
        values.push("NOW()".to_string());
    }
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES{}", quoted(table), returning(table))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}){}",
            quoted(table),
            cols.join(", "),
            values.join(", "),
            returning(table)
        )
    };
    q
}

/// UPDATE matching rows. `id` is never assigned. With nothing to set, selects the matching rows instead.
pub fn update(table: &str, types: &ColumnTypes, filter: &Row, payload: &Row, touch: Option<&str>) -> Result<QueryBuf, ShelfError> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (k, v) in payload {
        if k == "id" {
            continue;
        }
        let ph = q.placeholder(types, k, v.clone());
        sets.push(format!("{} = {}", quoted(k), ph));
    }
    if let Some(t) = touch.filter(|t| !payload.contains_key(*t)) {
        if !sets.is_empty() {
            sets.push(format!("{} = NOW()", quoted(t)));
        }
    }
    let where_sql = where_clause(&mut q, types, None, filter, None)?;
    q.sql = if sets.is_empty() {
        format!(
            "SELECT to_jsonb({}) AS {} FROM {}{}",
            quoted(table),
            quoted(ROW_COLUMN),
            quoted(table),
            where_sql
        )
    } else {
        format!(
            "UPDATE {} SET {}{}{}",
            quoted(table),
            sets.join(", "),
            where_sql,
            returning(table)
        )
    };
    Ok(q)
}

/// DELETE matching rows, returning them.
pub fn delete(table: &str, types: &ColumnTypes, filter: &Row) -> Result<QueryBuf, ShelfError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, types, None, filter, None)?;
    q.sql = format!("DELETE FROM {}{}{}", quoted(table), where_sql, returning(table));
    Ok(q)
}
