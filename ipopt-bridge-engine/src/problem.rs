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

//! The record behind an opaque problem handle.

use crate::journal::Journal;
use crate::options::OptionsList;
use ffi::{Eval_F_CB, Eval_G_CB, Eval_Grad_F_CB, Eval_H_CB, Eval_Jac_G_CB, Index, Intermediate_CB, Number};
use ipopt_bridge_sys as ffi;

/// Evaluator entry points registered at creation.
#[derive(Copy, Clone)]
pub struct Callbacks {
    pub eval_f: Eval_F_CB,
    pub eval_grad_f: Eval_Grad_F_CB,
    pub eval_g: Option<Eval_G_CB>,
    pub eval_jac_g: Option<Eval_Jac_G_CB>,
    pub eval_h: Option<Eval_H_CB>,
}

/// Scaling factors registered with `SetIpoptProblemScaling`.
#[derive(Clone, Debug, PartialEq)]
pub struct UserScaling {
    pub obj: Number,
    pub x: Option<Vec<Number>>,
    pub g: Option<Vec<Number>>,
}

/// Everything the engine owns for one problem: copies of the bounds, the callbacks, options
/// and the optional extras registered after creation.
pub struct ProblemData {
    pub n: usize,
    pub m: usize,
    pub x_l: Vec<Number>,
    pub x_u: Vec<Number>,
    pub g_l: Vec<Number>,
    pub g_u: Vec<Number>,
    pub nele_jac: usize,
    pub nele_hess: usize,
    pub index_style: Index,
    pub callbacks: Callbacks,
    pub intermediate_cb: Option<Intermediate_CB>,
    pub options: OptionsList,
    pub scaling: Option<UserScaling>,
    pub journal: Option<Journal>,
}

impl ProblemData {
    /// Checks the arguments of `CreateIpoptProblem` the way the native interface does and
    /// copies the bound arrays.
    ///
    /// # Safety
    ///
    /// The bound pointers must be valid for `n` (respectively `m`) reads when non-null.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        n: Index,
        x_l: *const Number,
        x_u: *const Number,
        m: Index,
        g_l: *const Number,
        g_u: *const Number,
        nele_jac: Index,
        nele_hess: Index,
        index_style: Index,
        eval_f: Option<Eval_F_CB>,
        eval_g: Option<Eval_G_CB>,
        eval_grad_f: Option<Eval_Grad_F_CB>,
        eval_jac_g: Option<Eval_Jac_G_CB>,
        eval_h: Option<Eval_H_CB>,
    ) -> Option<Self> {
        if n < 1 || m < 0 || nele_jac < 0 || nele_hess < 0 {
            return None;
        }
        if x_l.is_null() || x_u.is_null() {
            return None;
        }
        if m > 0 && (g_l.is_null() || g_u.is_null() || nele_jac < 1) {
            return None;
        }
        if m == 0 && nele_jac != 0 {
            return None;
        }
        if index_style != ffi::IndexStyle_C_STYLE && index_style != ffi::IndexStyle_FORTRAN_STYLE {
            return None;
        }
        let (eval_f, eval_grad_f) = match (eval_f, eval_grad_f) {
            (Some(f), Some(grad_f)) => (f, grad_f),
            _ => return None,
        };
        if m > 0 && (eval_g.is_none() || eval_jac_g.is_none()) {
            return None;
        }

        let n = n as usize;
        let m = m as usize;
        let copy = |ptr: *const Number, len: usize| {
            if len == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(ptr, len).to_vec()
            }
        };

        Some(ProblemData {
            n,
            m,
            x_l: copy(x_l, n),
            x_u: copy(x_u, n),
            g_l: copy(g_l, m),
            g_u: copy(g_u, m),
            nele_jac: nele_jac as usize,
            nele_hess: nele_hess as usize,
            index_style,
            callbacks: Callbacks {
                eval_f,
                eval_grad_f,
                eval_g,
                eval_jac_g,
                eval_h,
            },
            intermediate_cb: None,
            options: OptionsList::new(),
            scaling: None,
            journal: None,
        })
    }

    /// Validates and stores user scaling factors.
    ///
    /// # Safety
    ///
    /// The scaling pointers must be valid for `n` (respectively `m`) reads when non-null.
    pub unsafe fn set_scaling(
        &mut self,
        obj: Number,
        x_scaling: *const Number,
        g_scaling: *const Number,
    ) -> bool {
        if !obj.is_finite() || obj == 0.0 {
            return false;
        }
        let read = |ptr: *const Number, len: usize| -> Result<Option<Vec<Number>>, ()> {
            if ptr.is_null() {
                return Ok(None);
            }
            if len == 0 {
                return Ok(Some(Vec::new()));
            }
            let values = std::slice::from_raw_parts(ptr, len).to_vec();
            if values.iter().all(|&v| v.is_finite() && v > 0.0) {
                Ok(Some(values))
            } else {
                Err(())
            }
        };
        let (x, g) = match (read(x_scaling, self.n), read(g_scaling, self.m)) {
            (Ok(x), Ok(g)) => (x, g),
            _ => return false,
        };
        self.scaling = Some(UserScaling { obj, x, g });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    unsafe extern "C" fn eval_f(
        _n: Index,
        _x: *mut Number,
        _new_x: ffi::Bool,
        obj: *mut Number,
        _user_data: ffi::UserDataPtr,
    ) -> ffi::Bool {
        *obj = 0.0;
        ffi::TRUE
    }

    unsafe extern "C" fn eval_grad_f(
        _n: Index,
        _x: *mut Number,
        _new_x: ffi::Bool,
        _grad_f: *mut Number,
        _user_data: ffi::UserDataPtr,
    ) -> ffi::Bool {
        ffi::TRUE
    }

    #[test]
    fn rejects_missing_pieces() {
        let x_l = [0.0; 2];
        let x_u = [1.0; 2];
        unsafe {
            // No variables.
            assert!(ProblemData::new(
                0, x_l.as_ptr(), x_u.as_ptr(), 0, ptr::null(), ptr::null(), 0, 0, 0,
                Some(eval_f), None, Some(eval_grad_f), None, None
            )
            .is_none());
            // Constraints without constraint callbacks.
            assert!(ProblemData::new(
                2, x_l.as_ptr(), x_u.as_ptr(), 1, x_l.as_ptr(), x_u.as_ptr(), 2, 0, 0,
                Some(eval_f), None, Some(eval_grad_f), None, None
            )
            .is_none());
            // Jacobian nonzeros without constraints.
            assert!(ProblemData::new(
                2, x_l.as_ptr(), x_u.as_ptr(), 0, ptr::null(), ptr::null(), 3, 0, 0,
                Some(eval_f), None, Some(eval_grad_f), None, None
            )
            .is_none());
            // Bad index style.
            assert!(ProblemData::new(
                2, x_l.as_ptr(), x_u.as_ptr(), 0, ptr::null(), ptr::null(), 0, 0, 2,
                Some(eval_f), None, Some(eval_grad_f), None, None
            )
            .is_none());
        }
    }

    #[test]
    fn bounds_are_copied() {
        let mut x_l = vec![0.0, -1.0];
        let mut x_u = vec![1.0, 2.0];
        let data = unsafe {
            ProblemData::new(
                2, x_l.as_ptr(), x_u.as_ptr(), 0, ptr::null(), ptr::null(), 0, 0, 0,
                Some(eval_f), None, Some(eval_grad_f), None, None,
            )
        }
        .unwrap();
        x_l[0] = 10.0;
        x_u[1] = -10.0;
        assert_eq!(data.x_l, vec![0.0, -1.0]);
        assert_eq!(data.x_u, vec![1.0, 2.0]);
    }

    #[test]
    fn scaling_validation() {
        let x_l = [0.0; 2];
        let x_u = [1.0; 2];
        let mut data = unsafe {
            ProblemData::new(
                2, x_l.as_ptr(), x_u.as_ptr(), 0, ptr::null(), ptr::null(), 0, 0, 0,
                Some(eval_f), None, Some(eval_grad_f), None, None,
            )
        }
        .unwrap();
        let good = [2.0, 0.5];
        let bad = [2.0, -0.5];
        unsafe {
            assert!(!data.set_scaling(0.0, ptr::null(), ptr::null()));
            assert!(!data.set_scaling(1.0, bad.as_ptr(), ptr::null()));
            assert!(data.scaling.is_none());
            assert!(data.set_scaling(10.0, good.as_ptr(), ptr::null()));
        }
        assert_eq!(
            data.scaling,
            Some(UserScaling {
                obj: 10.0,
                x: Some(vec![2.0, 0.5]),
                g: None
            })
        );
    }
}
