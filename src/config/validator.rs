//! Table spec validation: identifiers, constraint columns, relation references.

use crate::config::{ColumnDef, TableSpec};
use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern compiles"));

/// Columns the provisioner manages itself; specs must not redeclare them.
pub const RESERVED_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

pub fn is_identifier(s: &str) -> bool {
    IDENTIFIER_RE.is_match(s)
}

/// Validate one spec. `extra_columns` are columns added at provisioning time (context defaults, per-call options).
pub fn validate_spec(spec: &TableSpec, extra_columns: &[ColumnDef]) -> Result<(), ConfigError> {
    let re = &*IDENTIFIER_RE;
    if spec.name.trim().is_empty() {
        return Err(ConfigError::Validation(format!("table '{}' has an empty schema name", spec.table)));
    }
    if !re.is_match(&spec.table) {
        return Err(ConfigError::InvalidIdentifier(spec.table.clone()));
    }

    let mut known: HashSet<&str> = RESERVED_COLUMNS.iter().copied().collect();
    for c in spec.columns.iter().chain(extra_columns) {
        if !re.is_match(&c.name) {
            return Err(ConfigError::InvalidIdentifier(format!("{}.{}", spec.table, c.name)));
        }
        if RESERVED_COLUMNS.contains(&c.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "{}.{} is managed by the provisioner",
                spec.table, c.name
            )));
        }
        if !known.insert(c.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate column {}.{}", spec.table, c.name)));
        }
    }

    for constraint in &spec.constraints {
        for col in constraint.columns() {
            if !known.contains(col) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", spec.table, col),
                });
            }
        }
    }

    let mut relation_names = HashSet::new();
    for r in &spec.relations {
        if !relation_names.insert(r.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate relation {}.{}", spec.name, r.name)));
        }
        for ident in [&r.table, &r.local_column, &r.foreign_column] {
            if !re.is_match(ident) {
                return Err(ConfigError::InvalidIdentifier(format!("relation {}: {}", r.name, ident)));
            }
        }
        for col in r.columns.iter().flatten() {
            if !re.is_match(col) {
                return Err(ConfigError::InvalidIdentifier(format!("relation {}: {}", r.name, col)));
            }
        }
    }

    for names in [&spec.references.browse, &spec.references.obtain].into_iter().flatten() {
        for n in names {
            if !relation_names.contains(n.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "relation",
                    id: format!("{}.{}", spec.name, n),
                });
            }
        }
    }
    Ok(())
}

/// Schema names must be unique across everything bound into one shelf.
pub fn validate_names<'a>(specs: impl IntoIterator<Item = &'a TableSpec>) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(ConfigError::DuplicateSchema(spec.name.clone()));
        }
    }
    Ok(())
}
