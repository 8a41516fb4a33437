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

use crate::descriptor::SparseMatrix;
use ffi::Index;
use ipopt_bridge_sys as ffi;
use thiserror::Error;

/// Reasons an [`Ipopt`](crate::Ipopt) instance could not be created.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CreateError {
    #[error("the problem has no variables")]
    NoVariables,
    #[error("{count} {what}s do not fit the index type of the C interface")]
    TooLarge { what: &'static str, count: usize },
    #[error("{nele} Jacobian non-zeros declared for a problem without constraints")]
    JacobianWithoutConstraints { nele: usize },
    #[error("the problem did not provide its {0} bounds")]
    BoundsUnavailable(&'static str),
    #[error("{what} bound {index} is NaN")]
    NanBound { what: &'static str, index: usize },
    #[error("the problem scaling was rejected")]
    ScalingRejected,
    #[error("option \"{0}\" was rejected")]
    OptionRejected(&'static str),
    #[error("the {0} engine failed to create the problem")]
    EngineFailure(&'static str),
}

/// An invalid sparsity structure reported by a problem.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum StructureError {
    #[error("{matrix} structure has {actual} entries instead of {expected}")]
    WrongCount {
        matrix: SparseMatrix,
        expected: usize,
        actual: usize,
    },
    #[error("{matrix} entry {index} at ({row}, {col}) is out of range")]
    OutOfRange {
        matrix: SparseMatrix,
        index: usize,
        row: Index,
        col: Index,
    },
    #[error("{matrix} entry {index} at ({row}, {col}) appears more than once")]
    Duplicate {
        matrix: SparseMatrix,
        index: usize,
        row: Index,
        col: Index,
    },
    #[error("Hessian entry {index} at ({row}, {col}) is above the diagonal")]
    UpperTriangle { index: usize, row: Index, col: Index },
}
