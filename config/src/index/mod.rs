//! Immutable per-index configuration.
//!
//! Each index lives in its own directory under the indices root and carries the index
//! settings, the mapping and the SQL templates used to read its rows.

mod loader;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use loader::{IndexConfigError, load_index_configs};

/// How the extension query rows are merged into a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldsMode {
    /// The extension query is never run.
    #[default]
    None,
    /// Every extension row becomes a top level field.
    Flatten,
    /// Every extension row is appended to a single `custom_fields` text field.
    ConcatOne,
}

impl FieldsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldsMode::None => "none",
            FieldsMode::Flatten => "flatten",
            FieldsMode::ConcatOne => "concat_one",
        }
    }
}

impl fmt::Display for FieldsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(FieldsMode::None),
            "flatten" => Ok(FieldsMode::Flatten),
            "concat_one" | "custom_in_one" => Ok(FieldsMode::ConcatOne),
            other => Err(format!(
                "unsupported fields mode `{other}`, expected `none`, `flatten` or `concat_one`"
            )),
        }
    }
}

/// Everything needed to build and feed one search index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    /// Index name, taken from the directory name.
    pub name: String,
    /// Contents of `settings.json`.
    pub settings: serde_json::Value,
    /// Contents of `mapping.json`.
    pub mapping: serde_json::Value,
    /// Full load query.
    pub init_sql: String,
    /// Incremental query filtering on one or more `(start, end)` time windows.
    pub sync_sql: String,
    /// Query reading extra fields for a set of parent rows.
    pub extension_sql: Option<String>,
    /// Column of the main row holding the value bound into the extension query.
    pub extension_column: Option<String>,
    /// Columns whose values make up the document id, in order.
    pub id_columns: Vec<String>,
    pub fields_mode: FieldsMode,
}

impl IndexConfig {
    /// Returns the extension query and column when the index uses an extension mode.
    pub fn extension(&self) -> Option<(&str, &str)> {
        if self.fields_mode == FieldsMode::None {
            return None;
        }

        match (&self.extension_sql, &self.extension_column) {
            (Some(sql), Some(column)) => Some((sql.as_str(), column.as_str())),
            _ => None,
        }
    }
}

/// The set of configured indices, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct IndexConfigs {
    indices: BTreeMap<String, IndexConfig>,
}

impl IndexConfigs {
    pub fn new(configs: impl IntoIterator<Item = IndexConfig>) -> Self {
        let indices = configs
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect();

        Self { indices }
    }

    pub fn get(&self, name: &str) -> Option<&IndexConfig> {
        self.indices.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Index names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexConfig> {
        self.indices.values()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
