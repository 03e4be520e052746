//! DDL for provisioning: CREATE TABLE, surrogate id, constraints and indexes.

use super::builder::quoted;
use crate::config::{ColumnDef, ColumnDefault, ConstraintDef};
use crate::error::{ConfigError, ShelfError};
use crate::store::TablePlan;
use serde_json::Value;

const REFERENTIAL_ACTIONS: &[&str] = &["NO ACTION", "RESTRICT", "CASCADE", "SET NULL", "SET DEFAULT"];

fn literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn column_sql(c: &ColumnDef) -> String {
    let mut def = format!("{} {}", quoted(&c.name), c.type_.sql());
    if !c.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(d) = &c.default {
        def.push_str(" DEFAULT ");
        match d {
            ColumnDefault::Literal(v) => def.push_str(&literal(v)),
            ColumnDefault::Expression { expression } => def.push_str(expression),
        }
    }
    if c.unique {
        def.push_str(" UNIQUE");
    }
    def
}

pub fn create_table(plan: &TablePlan) -> String {
    let mut col_defs = Vec::new();
    if plan.identity {
        col_defs.push(format!("{} BIGSERIAL PRIMARY KEY", quoted("id")));
    }
    col_defs.extend(plan.columns.iter().map(column_sql));
    format!(
        "CREATE TABLE {} (\n  {}\n)",
        quoted(&plan.table),
        col_defs.join(",\n  ")
    )
}

pub fn add_surrogate_id(table: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} BIGSERIAL UNIQUE",
        quoted(table),
        quoted("id")
    )
}

pub fn drop_table_if_exists(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quoted(table))
}

/// Generated name for a constraint, `<table>_<columns>_<suffix>`.
pub fn constraint_name(table: &str, c: &ConstraintDef) -> String {
    match c {
        ConstraintDef::Unique { name: Some(n), .. }
        | ConstraintDef::Index { name: Some(n), .. }
        | ConstraintDef::Check { name: n, .. } => n.clone(),
        ConstraintDef::Unique { columns, name: None } => format!("{}_{}_unique", table, columns.join("_")),
        ConstraintDef::Index { columns, name: None } => format!("{}_{}_index", table, columns.join("_")),
        ConstraintDef::PrimaryKey { .. } => format!("{}_pkey", table),
        ConstraintDef::ForeignKey { column, .. } => format!("{}_{}_foreign", table, column),
    }
}

fn action(kind: &str, v: Option<&str>) -> Result<String, ShelfError> {
    match v {
        None => Ok(String::new()),
        Some(a) => {
            let upper = a.trim().to_uppercase();
            if REFERENTIAL_ACTIONS.contains(&upper.as_str()) {
                Ok(format!(" ON {} {}", kind, upper))
            } else {
                Err(ConfigError::Validation(format!("invalid ON {} action: {}", kind, a)).into())
            }
        }
    }
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ")
}

pub fn constraint(table: &str, c: &ConstraintDef) -> Result<String, ShelfError> {
    let name = quoted(&constraint_name(table, c));
    let t = quoted(table);
    Ok(match c {
        ConstraintDef::Unique { columns, .. } => {
            format!("ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})", t, name, column_list(columns))
        }
        ConstraintDef::PrimaryKey { columns } => {
            format!("ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})", t, name, column_list(columns))
        }
        ConstraintDef::ForeignKey {
            column,
            references_table,
            references_column,
            on_delete,
            on_update,
        } => format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}){}{}",
            t,
            name,
            quoted(column),
            quoted(references_table),
            quoted(references_column),
            action("DELETE", on_delete.as_deref())?,
            action("UPDATE", on_update.as_deref())?
        ),
        ConstraintDef::Check { expression, .. } => {
            format!("ALTER TABLE {} ADD CONSTRAINT {} CHECK ({})", t, name, expression)
        }
        ConstraintDef::Index { columns, .. } => {
            format!("CREATE INDEX IF NOT EXISTS {} ON {} ({})", name, t, column_list(columns))
        }
    })
}
