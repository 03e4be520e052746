//! Load table specs from JSON files.

use crate::config::{validate_names, TableSpec};
use crate::error::ConfigError;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Parse one JSON document holding a single spec or an array of specs.
pub fn parse_specs(text: &str) -> Result<Vec<TableSpec>, ConfigError> {
    let v: Value = serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
    let specs = match v {
        Value::Array(_) => serde_json::from_value::<Vec<TableSpec>>(v),
        other => serde_json::from_value::<TableSpec>(other).map(|s| vec![s]),
    };
    specs.map_err(|e| ConfigError::Load(e.to_string()))
}

/// Load specs from a `.json` file, or from every `.json` file of a directory in file-name order.
pub async fn load_specs_from_path(path: impl AsRef<Path>) -> Result<Vec<TableSpec>, ConfigError> {
    let path = path.as_ref();
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;

    let files: Vec<PathBuf> = if meta.is_dir() {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConfigError::Load(e.to_string()))?
        {
            let p = entry.path();
            if p.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(p);
            }
        }
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut specs = Vec::new();
    for file in files {
        let text = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", file.display(), e)))?;
        let mut parsed = parse_specs(&text).map_err(|e| ConfigError::Load(format!("{}: {}", file.display(), e)))?;
        tracing::debug!(file = %file.display(), count = parsed.len(), "loaded table specs");
        specs.append(&mut parsed);
    }
    validate_names(&specs)?;
    Ok(specs)
}
