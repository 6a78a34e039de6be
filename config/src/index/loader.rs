use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::index::{FieldsMode, IndexConfig, IndexConfigs};

const SETTINGS_FILE: &str = "settings.json";
const MAPPING_FILE: &str = "mapping.json";
const SQL_DIR: &str = "sql";
const INIT_SQL_FILE: &str = "init.sql";
const SYNC_SQL_FILE: &str = "sync.sql";
const EXTENSION_SQL_FILE: &str = "extension.sql";
const DELETE_SQL_FILE: &str = "delete.sql";
const PROPERTIES_FILE: &str = "sql.properties";

const ID_COLUMNS_KEY: &str = "id_columns";
const EXTENSION_COLUMN_KEY: &str = "extension_column";
const FIELDS_MODE_KEY: &str = "fields_mode";

/// Errors raised while reading the index configuration directories.
#[derive(Debug, Error)]
pub enum IndexConfigError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid json in `{path}`: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("index `{index}` is missing required file `{path}`")]
    MissingFile { index: String, path: PathBuf },

    #[error("index `{index}` is invalid: {reason}")]
    Invalid { index: String, reason: String },
}

/// Loads every index directory found directly under `root`.
///
/// Directory names become index names. `default_mode` applies to indices whose
/// `sql.properties` does not set `fields_mode`.
pub fn load_index_configs(
    root: &Path,
    default_mode: FieldsMode,
) -> Result<IndexConfigs, IndexConfigError> {
    let entries = fs::read_dir(root).map_err(|source| IndexConfigError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut configs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| IndexConfigError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            warn!(path = %path.display(), "skipping index directory with a non utf-8 name");
            continue;
        };

        let config = load_index_config(name, &path, default_mode)?;
        info!(index = %config.name, fields_mode = %config.fields_mode, "loaded index configuration");
        configs.push(config);
    }

    Ok(IndexConfigs::new(configs))
}

fn load_index_config(
    name: &str,
    dir: &Path,
    default_mode: FieldsMode,
) -> Result<IndexConfig, IndexConfigError> {
    let settings = read_json(name, &dir.join(SETTINGS_FILE))?;
    let mapping = read_json(name, &dir.join(MAPPING_FILE))?;

    let sql_dir = dir.join(SQL_DIR);
    let init_sql = read_required(name, &sql_dir.join(INIT_SQL_FILE))?;
    let sync_sql = read_required(name, &sql_dir.join(SYNC_SQL_FILE))?;
    let extension_sql = read_optional(&sql_dir.join(EXTENSION_SQL_FILE))?;

    if sql_dir.join(DELETE_SQL_FILE).is_file() {
        warn!(index = name, "ignoring {DELETE_SQL_FILE}, deletes are not propagated");
    }

    let properties = parse_properties(&read_required(name, &sql_dir.join(PROPERTIES_FILE))?);

    let id_columns: Vec<String> = properties
        .get(ID_COLUMNS_KEY)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|column| !column.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if id_columns.is_empty() {
        return Err(IndexConfigError::Invalid {
            index: name.to_string(),
            reason: format!("`{ID_COLUMNS_KEY}` must list at least one column"),
        });
    }

    let extension_column = properties
        .get(EXTENSION_COLUMN_KEY)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let fields_mode = match properties.get(FIELDS_MODE_KEY) {
        Some(value) => value.parse::<FieldsMode>().map_err(|reason| IndexConfigError::Invalid {
            index: name.to_string(),
            reason,
        })?,
        None => default_mode,
    };

    if fields_mode != FieldsMode::None {
        if extension_column.is_none() {
            return Err(IndexConfigError::Invalid {
                index: name.to_string(),
                reason: format!("fields mode `{fields_mode}` requires `{EXTENSION_COLUMN_KEY}`"),
            });
        }
        if extension_sql.is_none() {
            return Err(IndexConfigError::Invalid {
                index: name.to_string(),
                reason: format!("fields mode `{fields_mode}` requires `{SQL_DIR}/{EXTENSION_SQL_FILE}`"),
            });
        }
    }

    Ok(IndexConfig {
        name: name.to_string(),
        settings,
        mapping,
        init_sql,
        sync_sql,
        extension_sql,
        extension_column,
        id_columns,
        fields_mode,
    })
}

fn read_json(index: &str, path: &Path) -> Result<serde_json::Value, IndexConfigError> {
    let content = read_required(index, path)?;
    serde_json::from_str(&content).map_err(|source| IndexConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn read_required(index: &str, path: &Path) -> Result<String, IndexConfigError> {
    read_optional(path)?.ok_or_else(|| IndexConfigError::MissingFile {
        index: index.to_string(),
        path: path.to_path_buf(),
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, IndexConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(IndexConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parses `key=value` (or `key: value`) lines. `#` and `!` start comment lines.
fn parse_properties(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split_at = line.find(['=', ':'])?;
            let (key, value) = line.split_at(split_at);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}
