use std::collections::BTreeMap;

use config::index::IndexConfig;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, Document, SourceRow};

/// Separator between id column values of a composite document id.
pub const ID_SEPARATOR: &str = "-";

/// Builds the document for one source row.
///
/// Every column becomes a field named after the lower case column name. The id is the
/// text form of the configured id columns joined by [`ID_SEPARATOR`]. All id columns
/// are checked for presence before any of them is rendered.
pub fn assemble_document(row: SourceRow, index: &IndexConfig) -> EtlResult<Document> {
    let fields: BTreeMap<String, Cell> = row
        .into_columns()
        .into_iter()
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect();

    let missing: Vec<&str> = index
        .id_columns
        .iter()
        .map(String::as_str)
        .filter(|column| {
            fields
                .get(&column.to_lowercase())
                .is_none_or(Cell::is_null)
        })
        .collect();
    if !missing.is_empty() {
        bail!(
            ErrorKind::InvalidDocument,
            "Row has no value for an id column",
            format!(
                "index `{}` requires {:?}, missing {:?}",
                index.name, index.id_columns, missing
            )
        );
    }

    let id = index
        .id_columns
        .iter()
        .filter_map(|column| fields.get(&column.to_lowercase()))
        .map(Cell::to_string)
        .collect::<Vec<_>>()
        .join(ID_SEPARATOR);

    Ok(Document::new(id, fields))
}

#[cfg(test)]
mod tests {
    use config::index::FieldsMode;

    use super::*;

    fn index(id_columns: &[&str]) -> IndexConfig {
        IndexConfig {
            name: "orders".to_string(),
            settings: serde_json::json!({}),
            mapping: serde_json::json!({}),
            init_sql: "select * from orders".to_string(),
            sync_sql: "select * from orders".to_string(),
            extension_sql: None,
            extension_column: None,
            id_columns: id_columns.iter().map(|c| c.to_string()).collect(),
            fields_mode: FieldsMode::None,
        }
    }

    #[test]
    fn composite_id_joins_values() {
        let row: SourceRow = [("a", "1"), ("b", "2")].into_iter().collect();
        let document = assemble_document(row, &index(&["a", "b"])).unwrap();
        assert_eq!(document.id(), "1-2");

        let row: SourceRow = [("a", "7")].into_iter().collect();
        let document = assemble_document(row, &index(&["a"])).unwrap();
        assert_eq!(document.id(), "7");
    }

    #[test]
    fn field_names_are_lower_cased() {
        let row = SourceRow::new(vec![
            ("ID".to_string(), Cell::I64(3)),
            ("Display_Name".to_string(), Cell::from("Lamp")),
        ]);
        let document = assemble_document(row, &index(&["id"])).unwrap();

        assert_eq!(document.id(), "3");
        assert_eq!(document.get("display_name"), Some(&Cell::from("Lamp")));
        assert!(document.get("Display_Name").is_none());
    }

    #[test]
    fn null_or_absent_id_column_is_rejected() {
        let row = SourceRow::new(vec![
            ("a".to_string(), Cell::from("1")),
            ("b".to_string(), Cell::Null),
        ]);
        let err = assemble_document(row, &index(&["a", "b"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDocument);

        let row: SourceRow = [("a", "1")].into_iter().collect();
        let err = assemble_document(row, &index(&["a", "c"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDocument);
    }
}
