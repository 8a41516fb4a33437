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

//! Evaluation of the user problem through the registered C callbacks.
//!
//! All quantities here are in the user's (unscaled) space and over the full variable vector.
//! Sparse callback output is assembled into dense `nalgebra` matrices.

use crate::problem::{Callbacks, ProblemData};
use ffi::{Index, Number, UserDataPtr};
use ipopt_bridge_sys as ffi;
use nalgebra::{DMatrix, DVector};
use std::ptr;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum EvalError {
    #[error("{0} callback reported failure")]
    Failed(&'static str),
    #[error("{0} callback produced a non-finite value")]
    NonFinite(&'static str),
    #[error("invalid {what} structure: {reason}")]
    Structure { what: &'static str, reason: String },
    #[error("exact Hessian requested but no Hessian callback was registered")]
    MissingHessian,
}

/// Problem functions backed by the user's callbacks.
///
/// The sparsity structures are requested once, when the evaluator is built, and are fixed for
/// the rest of the solve. `new_x` and `new_lambda` are reported to the callbacks by comparing
/// against the last point handed out.
pub struct CallbackNlp {
    n: usize,
    m: usize,
    callbacks: Callbacks,
    user_data: UserDataPtr,
    jac: Vec<(usize, usize)>,
    hess: Vec<(usize, usize)>,
    x: Vec<Number>,
    x_valid: bool,
    lambda: Vec<Number>,
    lambda_valid: bool,
    values: Vec<Number>,
}

impl CallbackNlp {
    /// Builds the evaluator, running the structure phase of the Jacobian and (when
    /// `exact_hessian` is set) the Hessian callback.
    pub fn new(
        data: &ProblemData,
        user_data: UserDataPtr,
        exact_hessian: bool,
    ) -> Result<Self, EvalError> {
        let base = data.index_style as usize;
        let (n, m) = (data.n, data.m);

        let jac = match data.callbacks.eval_jac_g {
            Some(eval_jac_g) if m > 0 => {
                let (rows, cols) = structure(data.nele_jac, |irow, jcol| unsafe {
                    eval_jac_g(
                        n as Index,
                        ptr::null_mut(),
                        ffi::FALSE,
                        m as Index,
                        data.nele_jac as Index,
                        irow,
                        jcol,
                        ptr::null_mut(),
                        user_data,
                    )
                })
                .ok_or_else(|| structure_failed("Jacobian"))?;
                coordinates("Jacobian", &rows, &cols, base, m, n)?
            }
            _ => Vec::new(),
        };

        let hess = if exact_hessian && data.nele_hess > 0 {
            let eval_h = data.callbacks.eval_h.ok_or(EvalError::MissingHessian)?;
            let (rows, cols) = structure(data.nele_hess, |irow, jcol| unsafe {
                eval_h(
                    n as Index,
                    ptr::null_mut(),
                    ffi::FALSE,
                    1.0,
                    m as Index,
                    ptr::null_mut(),
                    ffi::FALSE,
                    data.nele_hess as Index,
                    irow,
                    jcol,
                    ptr::null_mut(),
                    user_data,
                )
            })
            .ok_or_else(|| structure_failed("Hessian"))?;
            coordinates("Hessian", &rows, &cols, base, n, n)?
        } else if exact_hessian && data.callbacks.eval_h.is_none() {
            return Err(EvalError::MissingHessian);
        } else {
            Vec::new()
        };

        Ok(CallbackNlp {
            n,
            m,
            callbacks: data.callbacks,
            user_data,
            jac,
            hess,
            x: vec![0.0; n],
            x_valid: false,
            lambda: vec![0.0; m],
            lambda_valid: false,
            values: Vec::new(),
        })
    }

    /// Copies `x` into the buffer handed to the callbacks and reports whether it changed.
    fn load_x(&mut self, x: &[Number]) -> ffi::Bool {
        debug_assert_eq!(x.len(), self.n);
        if self.x_valid && self.x.as_slice() == x {
            return ffi::FALSE;
        }
        self.x.copy_from_slice(x);
        self.x_valid = true;
        ffi::TRUE
    }

    fn load_lambda(&mut self, lambda: &[Number]) -> ffi::Bool {
        if self.lambda_valid && self.lambda.as_slice() == lambda {
            return ffi::FALSE;
        }
        self.lambda.copy_from_slice(lambda);
        self.lambda_valid = true;
        ffi::TRUE
    }

    pub fn objective(&mut self, x: &[Number]) -> Result<Number, EvalError> {
        let new_x = self.load_x(x);
        let mut obj = 0.0;
        let ok = unsafe {
            (self.callbacks.eval_f)(
                self.n as Index,
                self.x.as_mut_ptr(),
                new_x,
                &mut obj,
                self.user_data,
            )
        };
        if ok == ffi::FALSE {
            return Err(EvalError::Failed("eval_f"));
        }
        if !obj.is_finite() {
            return Err(EvalError::NonFinite("eval_f"));
        }
        Ok(obj)
    }

    pub fn gradient(&mut self, x: &[Number]) -> Result<DVector<Number>, EvalError> {
        let new_x = self.load_x(x);
        let mut grad = DVector::zeros(self.n);
        let ok = unsafe {
            (self.callbacks.eval_grad_f)(
                self.n as Index,
                self.x.as_mut_ptr(),
                new_x,
                grad.as_mut_ptr(),
                self.user_data,
            )
        };
        if ok == ffi::FALSE {
            return Err(EvalError::Failed("eval_grad_f"));
        }
        finite("eval_grad_f", grad.as_slice())?;
        Ok(grad)
    }

    pub fn constraints(&mut self, x: &[Number]) -> Result<DVector<Number>, EvalError> {
        let mut g = DVector::zeros(self.m);
        let eval_g = match self.callbacks.eval_g {
            Some(eval_g) if self.m > 0 => eval_g,
            _ => return Ok(g),
        };
        let new_x = self.load_x(x);
        let ok = unsafe {
            eval_g(
                self.n as Index,
                self.x.as_mut_ptr(),
                new_x,
                self.m as Index,
                g.as_mut_ptr(),
                self.user_data,
            )
        };
        if ok == ffi::FALSE {
            return Err(EvalError::Failed("eval_g"));
        }
        finite("eval_g", g.as_slice())?;
        Ok(g)
    }

    /// Dense `m x n` constraint Jacobian. Duplicate coordinates are summed.
    pub fn jacobian(&mut self, x: &[Number]) -> Result<DMatrix<Number>, EvalError> {
        let mut jac = DMatrix::zeros(self.m, self.n);
        let eval_jac_g = match self.callbacks.eval_jac_g {
            Some(eval_jac_g) if self.m > 0 => eval_jac_g,
            _ => return Ok(jac),
        };
        let new_x = self.load_x(x);
        self.values.clear();
        self.values.resize(self.jac.len(), 0.0);
        let ok = unsafe {
            eval_jac_g(
                self.n as Index,
                self.x.as_mut_ptr(),
                new_x,
                self.m as Index,
                self.jac.len() as Index,
                ptr::null_mut(),
                ptr::null_mut(),
                self.values.as_mut_ptr(),
                self.user_data,
            )
        };
        if ok == ffi::FALSE {
            return Err(EvalError::Failed("eval_jac_g"));
        }
        finite("eval_jac_g", &self.values)?;
        for (&(row, col), &v) in self.jac.iter().zip(self.values.iter()) {
            jac[(row, col)] += v;
        }
        Ok(jac)
    }

    /// Dense symmetric Hessian of `obj_factor * f + lambda^T g`.
    pub fn hessian(
        &mut self,
        x: &[Number],
        obj_factor: Number,
        lambda: &[Number],
    ) -> Result<DMatrix<Number>, EvalError> {
        let mut hess = DMatrix::zeros(self.n, self.n);
        if self.hess.is_empty() {
            return Ok(hess);
        }
        let eval_h = self.callbacks.eval_h.ok_or(EvalError::MissingHessian)?;
        let new_x = self.load_x(x);
        let new_lambda = self.load_lambda(lambda);
        self.values.clear();
        self.values.resize(self.hess.len(), 0.0);
        let lambda_ptr = if self.m > 0 {
            self.lambda.as_mut_ptr()
        } else {
            ptr::null_mut()
        };
        let ok = unsafe {
            eval_h(
                self.n as Index,
                self.x.as_mut_ptr(),
                new_x,
                obj_factor,
                self.m as Index,
                lambda_ptr,
                new_lambda,
                self.hess.len() as Index,
                ptr::null_mut(),
                ptr::null_mut(),
                self.values.as_mut_ptr(),
                self.user_data,
            )
        };
        if ok == ffi::FALSE {
            return Err(EvalError::Failed("eval_h"));
        }
        finite("eval_h", &self.values)?;
        for (&(row, col), &v) in self.hess.iter().zip(self.values.iter()) {
            hess[(row, col)] += v;
            if row != col {
                hess[(col, row)] += v;
            }
        }
        Ok(hess)
    }
}

/// Runs a structure-phase call into freshly allocated coordinate buffers.
fn structure<F>(len: usize, call: F) -> Option<(Vec<Index>, Vec<Index>)>
where
    F: FnOnce(*mut Index, *mut Index) -> ffi::Bool,
{
    // Out-of-range values are caught by `coordinates` below.
    let mut rows = vec![-1; len];
    let mut cols = vec![-1; len];
    if call(rows.as_mut_ptr(), cols.as_mut_ptr()) == ffi::FALSE {
        None
    } else {
        Some((rows, cols))
    }
}

fn structure_failed(what: &'static str) -> EvalError {
    EvalError::Structure {
        what,
        reason: "structure callback reported failure".to_string(),
    }
}

/// Converts reported coordinates to zero-based pairs, checking that they fit the matrix.
fn coordinates(
    what: &'static str,
    rows: &[Index],
    cols: &[Index],
    base: usize,
    nrows: usize,
    ncols: usize,
) -> Result<Vec<(usize, usize)>, EvalError> {
    rows.iter()
        .zip(cols.iter())
        .enumerate()
        .map(|(k, (&row, &col))| {
            let row = (row as i64) - base as i64;
            let col = (col as i64) - base as i64;
            if row < 0 || col < 0 || row as usize >= nrows || col as usize >= ncols {
                Err(EvalError::Structure {
                    what,
                    reason: format!(
                        "entry {} at ({}, {}) lies outside a {}x{} matrix",
                        k, row, col, nrows, ncols
                    ),
                })
            } else {
                Ok((row as usize, col as usize))
            }
        })
        .collect()
}

fn finite(what: &'static str, values: &[Number]) -> Result<(), EvalError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(EvalError::NonFinite(what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_respect_index_base() {
        let coords = coordinates("Jacobian", &[1, 2], &[1, 3], 1, 2, 3).unwrap();
        assert_eq!(coords, vec![(0, 0), (1, 2)]);
        assert!(coordinates("Jacobian", &[0], &[0], 1, 2, 3).is_err());
        assert!(coordinates("Jacobian", &[2], &[0], 0, 2, 3).is_err());
    }

    #[test]
    fn unfilled_structure_is_rejected() {
        let (rows, cols) = structure(2, |_, _| ffi::TRUE).unwrap();
        assert!(matches!(
            coordinates("Hessian", &rows, &cols, 0, 2, 2),
            Err(EvalError::Structure { what: "Hessian", .. })
        ));
    }

    #[test]
    fn non_finite_values_are_reported() {
        assert_eq!(finite("eval_g", &[1.0, 2.0]), Ok(()));
        assert_eq!(
            finite("eval_g", &[1.0, f64::NAN]),
            Err(EvalError::NonFinite("eval_g"))
        );
    }
}
