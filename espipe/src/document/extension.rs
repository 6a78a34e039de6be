use std::collections::{HashMap, HashSet};

use config::index::FieldsMode;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, Document, SourceRow};

/// Field receiving the concatenated extension rows in [`FieldsMode::ConcatOne`].
pub const CUSTOM_FIELDS: &str = "custom_fields";

/// One row of an extension query: `(join value, field name, field value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionRow {
    pub join_value: String,
    pub field_name: String,
    pub field_value: Cell,
}

impl ExtensionRow {
    /// Reads the first three columns of `row`. The field name is lower cased.
    pub fn from_source_row(row: SourceRow) -> EtlResult<Self> {
        if row.len() < 3 {
            bail!(
                ErrorKind::ConfigError,
                "Extension query must return join value, field name and field value",
                format!("got {} columns", row.len())
            );
        }

        let mut values = row.into_columns().into_iter().map(|(_, value)| value);
        let (Some(join_value), Some(field_name), Some(field_value)) =
            (values.next(), values.next(), values.next())
        else {
            bail!(ErrorKind::InvalidState, "Extension row lost its columns");
        };

        Ok(Self {
            join_value: join_value.to_string(),
            field_name: field_name.to_string().to_lowercase(),
            field_value,
        })
    }
}

/// Returns the distinct non null values of `column` over `documents`, in first seen
/// order.
pub fn collect_join_values(documents: &[Document], column: &str) -> Vec<Cell> {
    let column = column.to_lowercase();
    let mut seen = HashSet::new();

    documents
        .iter()
        .filter_map(|document| document.get(&column))
        .filter(|value| !value.is_null())
        .filter(|value| seen.insert(value.to_string()))
        .cloned()
        .collect()
}

/// Merges extension rows into the documents whose `column` value matches their join
/// value.
///
/// [`FieldsMode::Flatten`] adds every row as a field, a later row overwriting an earlier
/// one with the same name. [`FieldsMode::ConcatOne`] writes `"<name> <value> "` for every
/// row, in arrival order, to [`CUSTOM_FIELDS`].
pub fn merge_extension_rows(
    documents: &mut [Document],
    column: &str,
    mode: FieldsMode,
    rows: Vec<ExtensionRow>,
) {
    let column = column.to_lowercase();

    match mode {
        FieldsMode::None => {}
        FieldsMode::Flatten => {
            let mut grouped: HashMap<String, Vec<(String, Cell)>> = HashMap::new();
            for row in rows {
                grouped
                    .entry(row.join_value)
                    .or_default()
                    .push((row.field_name, row.field_value));
            }

            for document in documents.iter_mut() {
                let Some(fields) = join_key(document, &column).and_then(|key| grouped.get(&key))
                else {
                    continue;
                };
                for (name, value) in fields {
                    document.insert(name.clone(), value.clone());
                }
            }
        }
        FieldsMode::ConcatOne => {
            let mut grouped: HashMap<String, String> = HashMap::new();
            for row in rows {
                let text = grouped.entry(row.join_value).or_default();
                text.push_str(&row.field_name);
                text.push(' ');
                text.push_str(&row.field_value.to_string());
                text.push(' ');
            }

            for document in documents.iter_mut() {
                let Some(text) = join_key(document, &column).and_then(|key| grouped.get(&key))
                else {
                    continue;
                };
                document.insert(CUSTOM_FIELDS.to_string(), Cell::String(text.clone()));
            }
        }
    }
}

fn join_key(document: &Document, column: &str) -> Option<String> {
    document
        .get(column)
        .filter(|value| !value.is_null())
        .map(Cell::to_string)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn document(id: &str, item_id: Cell) -> Document {
        let mut fields = BTreeMap::new();
        fields.insert("item_id".to_string(), item_id);
        Document::new(id.to_string(), fields)
    }

    fn rows() -> Vec<ExtensionRow> {
        vec![
            ExtensionRow {
                join_value: "5".to_string(),
                field_name: "x".to_string(),
                field_value: Cell::from("foo"),
            },
            ExtensionRow {
                join_value: "5".to_string(),
                field_name: "y".to_string(),
                field_value: Cell::from("bar"),
            },
        ]
    }

    #[test]
    fn flatten_adds_fields_to_matching_documents() {
        let mut documents = vec![document("1", Cell::I64(5)), document("2", Cell::I64(6))];
        merge_extension_rows(&mut documents, "ITEM_ID", FieldsMode::Flatten, rows());

        assert_eq!(documents[0].get("x"), Some(&Cell::from("foo")));
        assert_eq!(documents[0].get("y"), Some(&Cell::from("bar")));
        assert!(documents[1].get("x").is_none());
    }

    #[test]
    fn flatten_later_rows_overwrite_earlier_ones() {
        let mut documents = vec![document("1", Cell::I64(5))];
        let mut rows = rows();
        rows.push(ExtensionRow {
            join_value: "5".to_string(),
            field_name: "x".to_string(),
            field_value: Cell::from("baz"),
        });
        merge_extension_rows(&mut documents, "item_id", FieldsMode::Flatten, rows);

        assert_eq!(documents[0].get("x"), Some(&Cell::from("baz")));
    }

    #[test]
    fn concat_one_appends_name_value_pairs() {
        let mut documents = vec![document("1", Cell::from("5"))];
        merge_extension_rows(&mut documents, "item_id", FieldsMode::ConcatOne, rows());

        assert_eq!(
            documents[0].get(CUSTOM_FIELDS),
            Some(&Cell::from("x foo y bar "))
        );
        assert!(documents[0].get("x").is_none());
    }

    #[test]
    fn join_values_are_distinct_and_skip_nulls() {
        let documents = vec![
            document("1", Cell::I64(5)),
            document("2", Cell::Null),
            document("3", Cell::I64(5)),
            document("4", Cell::I64(9)),
        ];

        assert_eq!(
            collect_join_values(&documents, "item_id"),
            vec![Cell::I64(5), Cell::I64(9)]
        );
    }

    #[test]
    fn extension_row_lower_cases_field_name() {
        let row = SourceRow::new(vec![
            ("item_id".to_string(), Cell::I64(5)),
            ("name".to_string(), Cell::from("Color")),
            ("value".to_string(), Cell::from("red")),
        ]);
        let row = ExtensionRow::from_source_row(row).unwrap();

        assert_eq!(row.join_value, "5");
        assert_eq!(row.field_name, "color");
        assert_eq!(row.field_value, Cell::from("red"));
    }
}
