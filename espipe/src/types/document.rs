use std::collections::BTreeMap;

use crate::types::Cell;

/// A flat document ready to be written to the search engine.
///
/// Field names are lower case. The id is derived from the configured id columns and is
/// sent as document metadata, not as a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    fields: BTreeMap<String, Cell>,
}

impl Document {
    pub fn new(id: String, fields: BTreeMap<String, Cell>) -> Self {
        Self { id, fields }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &BTreeMap<String, Cell> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Cell> {
        self.fields.get(field)
    }

    /// Sets `field`, replacing any previous value.
    pub fn insert(&mut self, field: String, value: Cell) {
        self.fields.insert(field, value);
    }
}
