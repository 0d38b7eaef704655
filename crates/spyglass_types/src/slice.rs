//! Table slices: the batch ingest unit.

use crate::data::Data;
use crate::error::{TypeError, TypeResult};
use crate::schema::Type;
use crate::type_check;

/// A batch of rows conforming to one flattened record layout.
///
/// Slices are the unit of ingestion: sources produce slices, the stream
/// driver appends their rows to the active partition column by column.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSlice {
    layout: Type,
    rows: Vec<Vec<Data>>,
}

impl TableSlice {
    /// Creates a slice, flattening the layout.
    ///
    /// # Errors
    ///
    /// Returns a type clash if any row does not conform to the layout.
    pub fn new(layout: Type, rows: Vec<Vec<Data>>) -> TypeResult<Self> {
        let layout = layout.flatten();
        let columns = layout.record_fields().len();
        for row in &rows {
            if row.len() != columns {
                return Err(TypeError::type_clash(
                    layout.to_string(),
                    format!("row with {} columns", row.len()),
                ));
            }
            for (field, value) in layout.record_fields().iter().zip(row.iter()) {
                if !type_check(&field.ty, value) {
                    return Err(TypeError::type_clash(field.ty.to_string(), value.to_string()));
                }
            }
        }
        Ok(Self { layout, rows })
    }

    /// The flattened record layout.
    pub fn layout(&self) -> &Type {
        &self.layout
    }

    /// Number of rows in this slice.
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the layout.
    pub fn columns(&self) -> usize {
        self.layout.record_fields().len()
    }

    /// The value at the given row and column.
    pub fn at(&self, row: usize, column: usize) -> &Data {
        &self.rows[row][column]
    }

    /// The given row.
    pub fn row(&self, row: usize) -> &[Data] {
        &self.rows[row]
    }

    /// Iterates over rows.
    pub fn iter(&self) -> impl Iterator<Item = &[Data]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Splits off the first `n` rows into a new slice with the same layout.
    #[must_use]
    pub fn take(&self, n: usize) -> Self {
        Self {
            layout: self.layout.clone(),
            rows: self.rows[..n.min(self.rows.len())].to_vec(),
        }
    }

    /// Returns the rows after the first `n` as a new slice.
    #[must_use]
    pub fn skip(&self, n: usize) -> Self {
        Self {
            layout: self.layout.clone(),
            rows: self.rows[n.min(self.rows.len())..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordField;

    #[test]
    fn slice_flattens_and_checks() {
        let layout = Type::record(vec![
            RecordField::new(
                "id",
                Type::record(vec![RecordField::new("h", Type::address())]),
            ),
            RecordField::new("n", Type::count()),
        ]);
        let slice = TableSlice::new(
            layout,
            vec![vec![Data::Address("::1".parse().unwrap()), Data::Count(1)]],
        )
        .unwrap();
        assert_eq!(slice.columns(), 2);
        assert_eq!(slice.layout().record_fields()[0].name, "id.h");
    }

    #[test]
    fn slice_rejects_bad_rows() {
        let layout = Type::record(vec![RecordField::new("n", Type::count())]);
        assert!(TableSlice::new(layout.clone(), vec![vec![Data::Int(1)]]).is_err());
        assert!(TableSlice::new(layout, vec![vec![]]).is_err());
    }
}
