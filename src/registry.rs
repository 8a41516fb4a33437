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

//! State reached by the engine callbacks, and the callbacks themselves.
//!
//! The engine is handed a pointer to a boxed [`CallbackRegistry`] as `user_data` on every solve
//! and plain `extern "C"` functions, monomorphized for the problem type, at creation. The
//! functions below are the only code that dereferences that pointer.

use crate::descriptor::{SparseMatrix, SparsityDescriptor};
use crate::{
    AlgorithmMode, BasicProblem, ConstrainedProblem, IntermediateCallback,
    IntermediateCallbackData, NewtonProblem,
};
use ffi::{Bool, Index, Number};
use ipopt_bridge_sys as ffi;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;

/// Coordinates of a sparse matrix as reported in the first structure call.
#[derive(Clone, Debug, Default)]
struct Coordinates {
    rows: Vec<Index>,
    cols: Vec<Index>,
}

pub(crate) struct CallbackRegistry<P> {
    pub problem: P,
    pub intermediate_callback: Option<IntermediateCallback<P>>,
    descriptor: SparsityDescriptor,
    jacobian: Option<Coordinates>,
    hessian: Option<Coordinates>,
}

impl<P> CallbackRegistry<P> {
    pub fn new(problem: P, descriptor: SparsityDescriptor) -> Self {
        CallbackRegistry {
            problem,
            intermediate_callback: None,
            descriptor,
            jacobian: None,
            hessian: None,
        }
    }

    pub fn as_user_data(&mut self) -> ffi::UserDataPtr {
        self as *mut Self as ffi::UserDataPtr
    }
}

/// Serves a structure call from the cache, asking the problem with `fill` only the first
/// time. Reported coordinates are validated before they are cached.
fn serve_structure<F>(
    cache: &mut Option<Coordinates>,
    descriptor: &SparsityDescriptor,
    matrix: SparseMatrix,
    rows: &mut [Index],
    cols: &mut [Index],
    fill: F,
) -> bool
where
    F: FnOnce(&mut [Index], &mut [Index]) -> bool,
{
    if cache.is_none() {
        let nele = match matrix {
            SparseMatrix::Jacobian => descriptor.num_jacobian_non_zeros,
            SparseMatrix::Hessian => descriptor.num_hessian_non_zeros,
        };
        let mut coords = Coordinates {
            rows: vec![0; nele],
            cols: vec![0; nele],
        };
        if !fill(&mut coords.rows, &mut coords.cols) {
            log::debug!("problem failed to report its {} structure", matrix);
            return false;
        }
        if let Err(err) = descriptor.check_structure(matrix, &coords.rows, &coords.cols) {
            log::error!("{}", err);
            return false;
        }
        *cache = Some(coords);
    }

    match cache.as_ref() {
        Some(coords) if coords.rows.len() == rows.len() && coords.cols.len() == cols.len() => {
            rows.copy_from_slice(&coords.rows);
            cols.copy_from_slice(&coords.cols);
            true
        }
        _ => {
            log::error!(
                "engine requested {} {} coordinates instead of the declared number",
                rows.len(),
                matrix
            );
            false
        }
    }
}

/// A value call needs an established structure with exactly `nele` coordinates.
fn structure_matches(cache: &Option<Coordinates>, matrix: SparseMatrix, nele: Index) -> bool {
    match cache.as_ref() {
        Some(coords) if coords.rows.len() as Index == nele => true,
        Some(_) => {
            log::error!(
                "engine requested {} {} values instead of the declared number",
                nele,
                matrix
            );
            false
        }
        None => {
            log::error!("engine requested {} values before its structure", matrix);
            false
        }
    }
}

/// Runs user code, reporting a panic as a failed evaluation.
fn guard<F: FnOnce() -> bool>(what: &str, f: F) -> Bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(success) => success as Bool,
        Err(_) => {
            log::error!("panic in {} callback", what);
            ffi::FALSE
        }
    }
}

unsafe fn registry<'a, P>(user_data: ffi::UserDataPtr) -> Option<&'a mut CallbackRegistry<P>> {
    (user_data as *mut CallbackRegistry<P>).as_mut()
}

/// Null pointers and non-positive lengths become empty slices.
unsafe fn input<'a, T>(ptr: *const T, len: Index) -> &'a [T] {
    if ptr.is_null() || len <= 0 {
        &[]
    } else {
        slice::from_raw_parts(ptr, len as usize)
    }
}

unsafe fn output<'a, T>(ptr: *mut T, len: Index) -> &'a mut [T] {
    if ptr.is_null() || len <= 0 {
        &mut []
    } else {
        slice::from_raw_parts_mut(ptr, len as usize)
    }
}

/**
 * Ipopt C API
 */

/// Evaluate the objective function.
pub(crate) unsafe extern "C" fn eval_f<P: BasicProblem>(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    obj_value: *mut Number,
    user_data: ffi::UserDataPtr,
) -> Bool {
    let reg = match registry::<P>(user_data) {
        Some(reg) => reg,
        None => return ffi::FALSE,
    };
    if obj_value.is_null() {
        return ffi::FALSE;
    }
    let x = input(x, n);
    guard("objective", || {
        reg.problem.objective(x, new_x != ffi::FALSE, &mut *obj_value)
    })
}

/// Evaluate the objective gradient.
pub(crate) unsafe extern "C" fn eval_grad_f<P: BasicProblem>(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    grad_f: *mut Number,
    user_data: ffi::UserDataPtr,
) -> Bool {
    let reg = match registry::<P>(user_data) {
        Some(reg) => reg,
        None => return ffi::FALSE,
    };
    let x = input(x, n);
    let grad_f = output(grad_f, n);
    guard("objective gradient", || {
        reg.problem.objective_grad(x, new_x != ffi::FALSE, grad_f)
    })
}

/// Evaluate the constraint function.
pub(crate) unsafe extern "C" fn eval_g<P: ConstrainedProblem>(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    m: Index,
    g: *mut Number,
    user_data: ffi::UserDataPtr,
) -> Bool {
    let reg = match registry::<P>(user_data) {
        Some(reg) => reg,
        None => return ffi::FALSE,
    };
    let x = input(x, n);
    let g = output(g, m);
    guard("constraint", || reg.problem.constraint(x, new_x != ffi::FALSE, g))
}

/// Evaluate the constraint Jacobian.
pub(crate) unsafe extern "C" fn eval_jac_g<P: ConstrainedProblem>(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    _m: Index,
    nele_jac: Index,
    irow: *mut Index,
    jcol: *mut Index,
    values: *mut Number,
    user_data: ffi::UserDataPtr,
) -> Bool {
    let reg = match registry::<P>(user_data) {
        Some(reg) => reg,
        None => return ffi::FALSE,
    };
    if values.is_null() {
        /* return the structure of the jacobian */
        let rows = output(irow, nele_jac);
        let cols = output(jcol, nele_jac);
        let CallbackRegistry {
            problem,
            descriptor,
            jacobian,
            ..
        } = reg;
        guard("constraint Jacobian structure", || {
            serve_structure(jacobian, descriptor, SparseMatrix::Jacobian, rows, cols, |r, c| {
                problem.constraint_jacobian_indices(r, c)
            })
        })
    } else {
        /* return the values of the jacobian of the constraints */
        if !structure_matches(&reg.jacobian, SparseMatrix::Jacobian, nele_jac) {
            return ffi::FALSE;
        }
        let x = input(x, n);
        let vals = output(values, nele_jac);
        guard("constraint Jacobian", || {
            reg.problem
                .constraint_jacobian_values(x, new_x != ffi::FALSE, vals)
        })
    }
}

/// Evaluate the Hessian of an unconstrained problem. There are no constraint multipliers.
pub(crate) unsafe extern "C" fn eval_h<P: NewtonProblem>(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    obj_factor: Number,
    _m: Index,
    _lambda: *mut Number,
    _new_lambda: Bool,
    nele_hess: Index,
    irow: *mut Index,
    jcol: *mut Index,
    values: *mut Number,
    user_data: ffi::UserDataPtr,
) -> Bool {
    let reg = match registry::<P>(user_data) {
        Some(reg) => reg,
        None => return ffi::FALSE,
    };
    if values.is_null() {
        /* return the structure. */
        let rows = output(irow, nele_hess);
        let cols = output(jcol, nele_hess);
        let CallbackRegistry {
            problem,
            descriptor,
            hessian,
            ..
        } = reg;
        guard("Hessian structure", || {
            serve_structure(hessian, descriptor, SparseMatrix::Hessian, rows, cols, |r, c| {
                NewtonProblem::hessian_indices(problem, r, c)
            })
        })
    } else {
        /* return the values. */
        if !structure_matches(&reg.hessian, SparseMatrix::Hessian, nele_hess) {
            return ffi::FALSE;
        }
        let x = input(x, n);
        let vals = output(values, nele_hess);
        guard("Hessian", || {
            NewtonProblem::hessian_values(
                &mut reg.problem,
                x,
                new_x != ffi::FALSE,
                obj_factor,
                vals,
            )
        })
    }
}

/// Evaluate the Hessian of the Lagrangian of a constrained problem.
pub(crate) unsafe extern "C" fn eval_full_h<P: ConstrainedProblem>(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    obj_factor: Number,
    m: Index,
    lambda: *mut Number,
    new_lambda: Bool,
    nele_hess: Index,
    irow: *mut Index,
    jcol: *mut Index,
    values: *mut Number,
    user_data: ffi::UserDataPtr,
) -> Bool {
    let reg = match registry::<P>(user_data) {
        Some(reg) => reg,
        None => return ffi::FALSE,
    };
    if values.is_null() {
        let rows = output(irow, nele_hess);
        let cols = output(jcol, nele_hess);
        let CallbackRegistry {
            problem,
            descriptor,
            hessian,
            ..
        } = reg;
        guard("Hessian structure", || {
            serve_structure(hessian, descriptor, SparseMatrix::Hessian, rows, cols, |r, c| {
                ConstrainedProblem::hessian_indices(problem, r, c)
            })
        })
    } else {
        if !structure_matches(&reg.hessian, SparseMatrix::Hessian, nele_hess) {
            return ffi::FALSE;
        }
        let x = input(x, n);
        let lambda = input(lambda, m);
        let vals = output(values, nele_hess);
        guard("Hessian", || {
            ConstrainedProblem::hessian_values(
                &mut reg.problem,
                x,
                new_x != ffi::FALSE,
                obj_factor,
                lambda,
                new_lambda != ffi::FALSE,
                vals,
            )
        })
    }
}

pub(crate) unsafe extern "C" fn intermediate_cb<P: BasicProblem>(
    alg_mod: ffi::AlgorithmMode,
    iter_count: Index,
    obj_value: Number,
    inf_pr: Number,
    inf_du: Number,
    mu: Number,
    d_norm: Number,
    regularization_size: Number,
    alpha_du: Number,
    alpha_pr: Number,
    ls_trials: Index,
    user_data: ffi::UserDataPtr,
) -> Bool {
    let reg = match registry::<P>(user_data) {
        Some(reg) => reg,
        None => return ffi::FALSE,
    };
    let callback = match reg.intermediate_callback {
        Some(callback) => callback,
        None => return ffi::TRUE,
    };
    let data = IntermediateCallbackData {
        alg_mod: AlgorithmMode::from_raw(alg_mod),
        iter_count,
        obj_value,
        inf_pr,
        inf_du,
        mu,
        d_norm,
        regularization_size,
        alpha_du,
        alpha_pr,
        ls_trials,
    };
    guard("intermediate", || callback(&mut reg.problem, data))
}
