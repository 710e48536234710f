//! Load field-group definitions from a directory.
//!
//! One group per `*.yaml`, `*.yml`, or `*.json` file. Files are read in name
//! order so later files win when two declare the same id.

use std::path::Path;

use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::ConfigParser;
use crate::error::{FieldsError, Result};
use crate::registry::FieldRegistry;

/// Parse a single definition file into a raw config value.
pub async fn read_definition(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).await?;
    let value = match extension(path) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml_ng::from_str(&content)?,
    };
    Ok(value)
}

/// Register every valid definition in `dir`. Returns how many were installed.
///
/// Unreadable or invalid files are logged and skipped.
pub async fn load_dir(dir: &Path, parser: &ConfigParser, registry: &mut FieldRegistry) -> Result<usize> {
    if !fs::try_exists(dir).await? {
        return Err(FieldsError::NotInitialized {
            path: dir.to_path_buf(),
        });
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if matches!(extension(&path), Some("yaml" | "yml" | "json")) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut loaded = 0;
    for path in paths {
        let raw = match read_definition(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(?path, %e, "skipping unreadable field group definition");
                continue;
            }
        };
        let Some(id) = group_id(&raw, &path) else {
            warn!(?path, "skipping field group definition without an id");
            continue;
        };
        match registry.register_raw(&id, &raw, parser) {
            Ok(_) => loaded += 1,
            Err(e) => warn!(?path, %e, "skipping invalid field group definition"),
        }
    }

    debug!(dir = ?dir, groups = loaded, "field group definitions loaded");
    Ok(loaded)
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

/// The `id` key, else the file stem.
fn group_id(raw: &Value, path: &Path) -> Option<String> {
    raw.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| path.file_stem()?.to_str().map(str::to_string))
}
