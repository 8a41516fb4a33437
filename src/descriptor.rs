//   Copyright 2018 Egor Larionov
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

//! Static shape of a problem and the checks applied before anything crosses the boundary.

use crate::error::{CreateError, StructureError};
use ffi::{Index, Number};
use ipopt_bridge_sys as ffi;
use std::collections::HashSet;
use std::fmt;

pub use ffi::{NEGATIVE_INFINITY, POSITIVE_INFINITY};

/// Zero-based indexing (C Style) or one-based indexing (Fortran style).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexingStyle {
    CStyle = 0,
    FortranStyle = 1,
}

impl IndexingStyle {
    /// Index of the first row or column.
    pub fn base(self) -> Index {
        self as Index
    }
}

/// The two sparse matrices exchanged through the structure/value protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SparseMatrix {
    Jacobian,
    Hessian,
}

impl fmt::Display for SparseMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparseMatrix::Jacobian => write!(f, "constraint Jacobian"),
            SparseMatrix::Hessian => write!(f, "Lagrangian Hessian"),
        }
    }
}

/// Sizes and index base of a problem.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SparsityDescriptor {
    pub num_variables: usize,
    pub num_constraints: usize,
    pub num_jacobian_non_zeros: usize,
    pub num_hessian_non_zeros: usize,
    pub indexing_style: IndexingStyle,
}

fn fits_index(what: &'static str, count: usize) -> Result<(), CreateError> {
    if count > Index::MAX as usize {
        Err(CreateError::TooLarge { what, count })
    } else {
        Ok(())
    }
}

impl SparsityDescriptor {
    pub fn new(
        num_variables: usize,
        num_constraints: usize,
        num_jacobian_non_zeros: usize,
        num_hessian_non_zeros: usize,
        indexing_style: IndexingStyle,
    ) -> Result<Self, CreateError> {
        if num_variables == 0 {
            return Err(CreateError::NoVariables);
        }
        fits_index("variable", num_variables)?;
        fits_index("constraint", num_constraints)?;
        fits_index("Jacobian non-zero", num_jacobian_non_zeros)?;
        fits_index("Hessian non-zero", num_hessian_non_zeros)?;
        if num_constraints == 0 && num_jacobian_non_zeros != 0 {
            return Err(CreateError::JacobianWithoutConstraints {
                nele: num_jacobian_non_zeros,
            });
        }
        Ok(SparsityDescriptor {
            num_variables,
            num_constraints,
            num_jacobian_non_zeros,
            num_hessian_non_zeros,
            indexing_style,
        })
    }

    fn shape(&self, matrix: SparseMatrix) -> (usize, usize, usize) {
        match matrix {
            SparseMatrix::Jacobian => (
                self.num_jacobian_non_zeros,
                self.num_constraints,
                self.num_variables,
            ),
            SparseMatrix::Hessian => (
                self.num_hessian_non_zeros,
                self.num_variables,
                self.num_variables,
            ),
        }
    }

    /// Checks coordinates reported in a structure call: the declared number of entries, all
    /// within the matrix (offset by the index base), no repeated entry, and for the Hessian
    /// only the lower triangle.
    pub fn check_structure(
        &self,
        matrix: SparseMatrix,
        rows: &[Index],
        cols: &[Index],
    ) -> Result<(), StructureError> {
        let (expected, nrows, ncols) = self.shape(matrix);
        if rows.len() != expected || cols.len() != expected {
            return Err(StructureError::WrongCount {
                matrix,
                expected,
                actual: rows.len().min(cols.len()),
            });
        }

        let base = self.indexing_style.base();
        let mut seen = HashSet::with_capacity(expected);
        for (index, (&row, &col)) in rows.iter().zip(cols.iter()).enumerate() {
            let (r, c) = (row - base, col - base);
            if r < 0 || c < 0 || r as usize >= nrows || c as usize >= ncols {
                return Err(StructureError::OutOfRange {
                    matrix,
                    index,
                    row,
                    col,
                });
            }
            if matrix == SparseMatrix::Hessian && r < c {
                return Err(StructureError::UpperTriangle { index, row, col });
            }
            if !seen.insert((r, c)) {
                return Err(StructureError::Duplicate {
                    matrix,
                    index,
                    row,
                    col,
                });
            }
        }
        Ok(())
    }
}

/// Maps a bound to the sentinel convention: anything at or beyond `±2e19`, infinities
/// included, becomes exactly the sentinel.
pub fn normalize_bound(value: Number) -> Number {
    if value >= POSITIVE_INFINITY {
        POSITIVE_INFINITY
    } else if value <= NEGATIVE_INFINITY {
        NEGATIVE_INFINITY
    } else {
        value
    }
}

/// Normalizes a pair of bound vectors in place, rejecting NaN.
pub fn normalize_bounds(
    what: &'static str,
    lower: &mut [Number],
    upper: &mut [Number],
) -> Result<(), CreateError> {
    for bounds in [lower, upper] {
        for (index, v) in bounds.iter_mut().enumerate() {
            if v.is_nan() {
                return Err(CreateError::NanBound { what, index });
            }
            *v = normalize_bound(*v);
        }
    }
    Ok(())
}
