//! Connection settings from the environment (`.env` honored).

use crate::error::{ConfigError, ShelfError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Group name used when a single connection string is given.
pub const DEFAULT_GROUP: &str = "default";

/// One connection URL, or named connection groups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Connections {
    Single(String),
    Named(BTreeMap<String, String>),
}

impl Connections {
    /// Group name -> URL. Empty input is an invalid binding.
    pub fn groups(&self) -> Result<BTreeMap<String, String>, ShelfError> {
        let groups = match self {
            Connections::Single(url) => BTreeMap::from([(DEFAULT_GROUP.to_string(), url.clone())]),
            Connections::Named(m) => m.clone(),
        };
        if groups.is_empty() || groups.values().any(|u| u.trim().is_empty()) {
            return Err(ShelfError::Binding("unable to instantiate stores, invalid connections".into()));
        }
        Ok(groups)
    }
}

impl From<&str> for Connections {
    fn from(s: &str) -> Self {
        Connections::Single(s.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub connections: Connections,
    pub max_connections: u32,
}

impl Settings {
    /// `SHELF_CONNECTIONS` (JSON string or object) wins over `DATABASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let connections = match std::env::var("SHELF_CONNECTIONS") {
            Ok(raw) => parse_connections(&raw)?,
            Err(_) => Connections::Single(
                std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/shelf".into()),
            ),
        };
        let max_connections = match std::env::var("SHELF_MAX_CONNECTIONS") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Load(format!("SHELF_MAX_CONNECTIONS: invalid number '{}'", v)))?,
            Err(_) => 5,
        };
        Ok(Settings { connections, max_connections })
    }
}

fn parse_connections(raw: &str) -> Result<Connections, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('"') {
        serde_json::from_str(trimmed).map_err(|e| ConfigError::Load(format!("SHELF_CONNECTIONS: {}", e)))
    } else {
        Ok(Connections::Single(trimmed.to_string()))
    }
}
