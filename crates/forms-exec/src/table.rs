//! Table abstraction the executor reads from.
//!
//! Storage is owned elsewhere; the executor only needs row/column counts and
//! bulk rectangular reads. [`ArrowTable`] is the in-memory implementation used
//! for intermediate results and tests: one Arrow array per column, all of the
//! same length. Slicing is zero-copy, so partition-local views share buffers
//! with the table they were cut from.

use std::fmt;
use std::sync::Arc;

use arrow_array::{Array, ArrayRef};
use forms_common::Reference;

use crate::error::{ExecError, Result};

pub trait Table: Send + Sync + fmt::Debug {
    fn num_rows(&self) -> usize;

    fn num_columns(&self) -> usize;

    /// Columns `col..=last_col`, each restricted to rows `row..=last_row`.
    fn read_range(&self, reference: &Reference) -> Result<Vec<ArrayRef>>;

    /// A handle for one execution run. Implementations may hand out a fresh
    /// view over shared storage; the data itself is never copied or mutated.
    fn view_for_execution(&self) -> Arc<dyn Table>;

    /// Rows `offset..offset + len` as a table of their own.
    fn slice_rows(&self, offset: usize, len: usize) -> Result<Arc<dyn Table>>;
}

#[derive(Clone)]
pub struct ArrowTable {
    columns: Vec<ArrayRef>,
    num_rows: usize,
}

impl fmt::Debug for ArrowTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrowTable")
            .field("num_rows", &self.num_rows)
            .field(
                "columns",
                &self
                    .columns
                    .iter()
                    .map(|c| c.data_type().clone())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ArrowTable {
    pub fn try_new(columns: Vec<ArrayRef>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, |c| c.len());
        if let Some(bad) = columns.iter().position(|c| c.len() != num_rows) {
            return Err(ExecError::precondition(format!(
                "column {bad} has {} rows, expected {num_rows}",
                columns[bad].len()
            )));
        }
        Ok(Self { columns, num_rows })
    }

    pub fn column(&self, idx: usize) -> Option<&ArrayRef> {
        self.columns.get(idx)
    }

    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    pub fn into_shared(self) -> Arc<dyn Table> {
        Arc::new(self)
    }
}

impl Table for ArrowTable {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn num_columns(&self) -> usize {
        self.columns.len()
    }

    fn read_range(&self, reference: &Reference) -> Result<Vec<ArrayRef>> {
        if reference.last_row() >= self.num_rows || reference.last_col() >= self.columns.len() {
            return Err(ExecError::precondition(format!(
                "{reference} is outside a {}x{} table",
                self.num_rows,
                self.columns.len()
            )));
        }
        Ok(self.columns[reference.col()..=reference.last_col()]
            .iter()
            .map(|c| c.slice(reference.row(), reference.height()))
            .collect())
    }

    fn view_for_execution(&self) -> Arc<dyn Table> {
        Arc::new(self.clone())
    }

    fn slice_rows(&self, offset: usize, len: usize) -> Result<Arc<dyn Table>> {
        if offset + len > self.num_rows {
            return Err(ExecError::precondition(format!(
                "rows {offset}..{} are outside a table of {} rows",
                offset + len,
                self.num_rows
            )));
        }
        Ok(Arc::new(ArrowTable {
            columns: self.columns.iter().map(|c| c.slice(offset, len)).collect(),
            num_rows: len,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int64Type;
    use arrow_array::{Int64Array, StringArray};
    use forms_common::RefType;

    fn table() -> ArrowTable {
        ArrowTable::try_new(vec![
            Arc::new(Int64Array::from(vec![1, 3, 5, 7])),
            Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = ArrowTable::try_new(vec![
            Arc::new(Int64Array::from(vec![1, 2])),
            Arc::new(Int64Array::from(vec![1])),
        ])
        .unwrap_err();
        assert!(matches!(err, ExecError::Precondition(_)));
    }

    #[test]
    fn reads_rectangles() {
        let t = table();
        let r = Reference::new(1, 0, 2, 1, RefType::FF).unwrap();
        let cols = t.read_range(&r).unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].as_primitive::<Int64Type>().values(), &[3, 5]);
        assert_eq!(cols[1].as_string::<i32>().value(1), "c");

        let oob = Reference::new(0, 0, 4, 0, RefType::FF).unwrap();
        assert!(t.read_range(&oob).is_err());
    }

    #[test]
    fn row_slices_rebase_to_zero() {
        let t = table();
        let s = t.slice_rows(2, 2).unwrap();
        assert_eq!(s.num_rows(), 2);
        let cols = s.read_range(&Reference::cell(0, 0, RefType::FF)).unwrap();
        assert_eq!(cols[0].as_primitive::<Int64Type>().value(0), 5);
        assert!(t.slice_rows(3, 2).is_err());
    }
}
