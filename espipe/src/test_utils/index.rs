use config::index::{FieldsMode, IndexConfig};
use serde_json::json;

use crate::types::{Cell, SourceRow};

/// Builds an index reading `table` with JDBC style templates and no extension query.
pub fn test_index(name: &str, table: &str, id_columns: &[&str]) -> IndexConfig {
    IndexConfig {
        name: name.to_string(),
        settings: json!({ "number_of_shards": 1 }),
        mapping: json!({ "properties": {} }),
        init_sql: format!("SELECT * FROM {table} WHERE updated_at <= ?"),
        sync_sql: format!("SELECT * FROM {table} WHERE updated_at > ? AND updated_at <= ?"),
        extension_sql: None,
        extension_column: None,
        id_columns: id_columns.iter().map(|column| column.to_string()).collect(),
        fields_mode: FieldsMode::None,
    }
}

/// Adds an extension query joined on `column` to `index`.
pub fn with_extension(
    mut index: IndexConfig,
    extension_sql: &str,
    column: &str,
    mode: FieldsMode,
) -> IndexConfig {
    index.extension_sql = Some(extension_sql.to_string());
    index.extension_column = Some(column.to_string());
    index.fields_mode = mode;
    index
}

pub fn row<const N: usize>(columns: [(&str, Cell); N]) -> SourceRow {
    columns.into_iter().collect()
}

/// Rows `{id, name}` with ids `1..=count`.
pub fn numbered_rows(count: i64) -> Vec<SourceRow> {
    (1..=count)
        .map(|id| row([("id", Cell::I64(id)), ("name", Cell::from(format!("row {id}")))]))
        .collect()
}
