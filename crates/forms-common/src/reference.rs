//! Rectangular range references into a formula table.
//!
//! A [`Reference`] is a zero-based, inclusive rectangle `(row, col)..=(last_row, last_col)`
//! plus a [`RefType`] describing how each corner moves when the formula is copied
//! down (or across) a range of cells:
//!
//! ```text
//!   RR  both corners relative     A1:B2    window slides with the formula
//!   FF  both corners fixed        $A$1:$B$2  same range for every formula
//!   FR  fixed start, relative end $A$1:B2  window grows (running aggregates)
//!   RF  relative start, fixed end A1:$B$2  window shrinks
//! ```

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the two corners of a reference behave when a formula is replicated.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefType {
    #[default]
    RR,
    RF,
    FR,
    FF,
}

impl RefType {
    /// True when the start corner moves with the formula.
    pub const fn start_relative(self) -> bool {
        matches!(self, RefType::RR | RefType::RF)
    }

    /// True when the end corner moves with the formula.
    pub const fn end_relative(self) -> bool {
        matches!(self, RefType::RR | RefType::FR)
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefType::RR => "RR",
            RefType::RF => "RF",
            RefType::FR => "FR",
            RefType::FF => "FF",
        })
    }
}

/// Direction along which a formula is replicated and partitioned.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Axis {
    #[default]
    AlongRow,
    AlongColumn,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("range must be ordered: ({row}, {col}) is past ({last_row}, {last_col})")]
    Unordered {
        row: usize,
        col: usize,
        last_row: usize,
        last_col: usize,
    },
}

/// A rectangular cell range. Coordinates are zero-based and inclusive.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference {
    row: usize,
    col: usize,
    last_row: usize,
    last_col: usize,
    ref_type: RefType,
}

impl Reference {
    pub fn new(
        row: usize,
        col: usize,
        last_row: usize,
        last_col: usize,
        ref_type: RefType,
    ) -> Result<Self, ReferenceError> {
        if row > last_row || col > last_col {
            return Err(ReferenceError::Unordered {
                row,
                col,
                last_row,
                last_col,
            });
        }
        Ok(Self {
            row,
            col,
            last_row,
            last_col,
            ref_type,
        })
    }

    /// Single-cell reference.
    pub const fn cell(row: usize, col: usize, ref_type: RefType) -> Self {
        Self {
            row,
            col,
            last_row: row,
            last_col: col,
            ref_type,
        }
    }

    #[inline]
    pub const fn row(&self) -> usize {
        self.row
    }
    #[inline]
    pub const fn col(&self) -> usize {
        self.col
    }
    #[inline]
    pub const fn last_row(&self) -> usize {
        self.last_row
    }
    #[inline]
    pub const fn last_col(&self) -> usize {
        self.last_col
    }
    #[inline]
    pub const fn ref_type(&self) -> RefType {
        self.ref_type
    }

    pub const fn height(&self) -> usize {
        self.last_row - self.row + 1
    }

    pub const fn width(&self) -> usize {
        self.last_col - self.col + 1
    }

    pub const fn is_cell(&self) -> bool {
        self.row == self.last_row && self.col == self.last_col
    }

    /// Extent along `axis`: rows for [`Axis::AlongRow`], columns otherwise.
    pub const fn extent(&self, axis: Axis) -> usize {
        match axis {
            Axis::AlongRow => self.height(),
            Axis::AlongColumn => self.width(),
        }
    }

    pub const fn with_ref_type(mut self, ref_type: RefType) -> Self {
        self.ref_type = ref_type;
        self
    }

    /// The concrete range this reference covers for the formula copies in
    /// `start..end` (offsets along `axis` from the first formula).
    ///
    /// Relative corners move by the formula offset; the window for a batch of
    /// formulas spans from the first copy's start corner to the last copy's end
    /// corner. `end` must be greater than `start`.
    pub fn window(&self, start: usize, end: usize, axis: Axis) -> Reference {
        debug_assert!(end > start);
        let first = start;
        let last = end - 1;
        let (mut row, mut col, mut last_row, mut last_col) =
            (self.row, self.col, self.last_row, self.last_col);
        match axis {
            Axis::AlongRow => {
                if self.ref_type.start_relative() {
                    row += first;
                }
                if self.ref_type.end_relative() {
                    last_row += last;
                }
            }
            Axis::AlongColumn => {
                if self.ref_type.start_relative() {
                    col += first;
                }
                if self.ref_type.end_relative() {
                    last_col += last;
                }
            }
        }
        // RF windows can cross over once the start passes the fixed end.
        Reference {
            row: row.min(last_row),
            col: col.min(last_col),
            last_row,
            last_col,
            ref_type: self.ref_type,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "R{}C{}:R{}C{} ({})",
            self.row, self.col, self.last_row, self.last_col, self.ref_type
        )
    }
}
