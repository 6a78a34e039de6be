use crate::types::Cell;

/// One row returned by a source query: column names with their values, in select order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceRow {
    columns: Vec<(String, Cell)>,
}

impl SourceRow {
    pub fn new(columns: Vec<(String, Cell)>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[(String, Cell)] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<(String, Cell)> {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for SourceRow
where
    N: Into<String>,
    V: Into<Cell>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}
