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

//! Owned native problem handle.

use crate::descriptor::SparsityDescriptor;
use crate::error::CreateError;
use crate::IpoptOption;
use ffi::{Index, Number};
use ipopt_bridge_sys as ffi;
use std::ffi::CString;
use std::ptr::{self, NonNull};

/// Evaluator entry points handed to the engine at creation.
#[derive(Copy, Clone)]
pub(crate) struct EvalCallbacks {
    pub eval_f: ffi::Eval_F_CB,
    pub eval_grad_f: ffi::Eval_Grad_F_CB,
    pub eval_g: Option<ffi::Eval_G_CB>,
    pub eval_jac_g: Option<ffi::Eval_Jac_G_CB>,
    pub eval_h: Option<ffi::Eval_H_CB>,
}

/// A live problem of some engine. Freed exactly once, on drop.
pub(crate) struct ProblemHandle {
    raw: NonNull<ffi::IpoptProblemInfo>,
    api: &'static ffi::Api,
}

fn mut_ptr_or_null(buf: &mut [Number]) -> *mut Number {
    if buf.is_empty() {
        ptr::null_mut()
    } else {
        buf.as_mut_ptr()
    }
}

impl ProblemHandle {
    /// Creates a problem. The bound arrays are copied by the engine.
    pub fn create(
        api: &'static ffi::Api,
        descriptor: &SparsityDescriptor,
        x_l: &mut [Number],
        x_u: &mut [Number],
        g_l: &mut [Number],
        g_u: &mut [Number],
        callbacks: EvalCallbacks,
    ) -> Result<Self, CreateError> {
        debug_assert_eq!(x_l.len(), descriptor.num_variables);
        debug_assert_eq!(g_l.len(), descriptor.num_constraints);
        let raw = unsafe {
            (api.create_problem)(
                descriptor.num_variables as Index,
                x_l.as_mut_ptr(),
                x_u.as_mut_ptr(),
                descriptor.num_constraints as Index,
                mut_ptr_or_null(g_l),
                mut_ptr_or_null(g_u),
                descriptor.num_jacobian_non_zeros as Index,
                descriptor.num_hessian_non_zeros as Index,
                descriptor.indexing_style as Index,
                Some(callbacks.eval_f),
                callbacks.eval_g,
                Some(callbacks.eval_grad_f),
                callbacks.eval_jac_g,
                callbacks.eval_h,
            )
        };
        let raw = NonNull::new(raw).ok_or(CreateError::EngineFailure(api.name))?;
        log::debug!(
            "created {} problem with {} variables and {} constraints",
            api.name,
            descriptor.num_variables,
            descriptor.num_constraints
        );
        Ok(ProblemHandle { raw, api })
    }

    pub fn engine_name(&self) -> &'static str {
        self.api.name
    }

    pub fn add_option(&mut self, name: &str, option: IpoptOption) -> bool {
        // Interior NUL bytes can not be passed on.
        let name_cstr = match CString::new(name) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let success = unsafe {
            match option {
                IpoptOption::Num(opt) => {
                    (self.api.add_num_option)(self.raw.as_ptr(), name_cstr.as_ptr(), opt)
                }
                IpoptOption::Str(opt) => {
                    let opt_cstr = match CString::new(opt) {
                        Ok(s) => s,
                        Err(_) => return false,
                    };
                    (self.api.add_str_option)(
                        self.raw.as_ptr(),
                        name_cstr.as_ptr(),
                        opt_cstr.as_ptr(),
                    )
                }
                IpoptOption::Int(opt) => {
                    (self.api.add_int_option)(self.raw.as_ptr(), name_cstr.as_ptr(), opt)
                }
            }
        } != ffi::FALSE;
        if !success {
            log::debug!("{} rejected option {}", self.api.name, name);
        }
        success
    }

    pub fn open_output_file(&mut self, file_name: &str, print_level: i32) -> bool {
        let file_name = match CString::new(file_name) {
            Ok(s) => s,
            Err(_) => return false,
        };
        unsafe {
            (self.api.open_output_file)(self.raw.as_ptr(), file_name.as_ptr(), print_level)
                != ffi::FALSE
        }
    }

    /// Registers scaling factors. Empty slices are passed as null.
    pub fn set_scaling(
        &mut self,
        obj_scaling: Number,
        x_scaling: &mut [Number],
        g_scaling: &mut [Number],
    ) -> bool {
        unsafe {
            (self.api.set_problem_scaling)(
                self.raw.as_ptr(),
                obj_scaling,
                mut_ptr_or_null(x_scaling),
                mut_ptr_or_null(g_scaling),
            ) != ffi::FALSE
        }
    }

    pub fn set_intermediate_callback(&mut self, cb: Option<ffi::Intermediate_CB>) -> bool {
        unsafe { (self.api.set_intermediate_callback)(self.raw.as_ptr(), cb) != ffi::FALSE }
    }

    /// Runs the engine.
    ///
    /// # Safety
    ///
    /// `user_data` must be what the registered callbacks expect, and stay valid for the whole
    /// call. `x` must have one entry per variable; other empty slices are passed as null.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn solve(
        &mut self,
        x: &mut [Number],
        g: &mut [Number],
        obj_val: &mut Number,
        mult_g: &mut [Number],
        mult_x_l: &mut [Number],
        mult_x_u: &mut [Number],
        user_data: ffi::UserDataPtr,
    ) -> ffi::ApplicationReturnStatus {
        (self.api.solve)(
            self.raw.as_ptr(),
            x.as_mut_ptr(),
            mut_ptr_or_null(g),
            obj_val,
            mut_ptr_or_null(mult_g),
            mut_ptr_or_null(mult_x_l),
            mut_ptr_or_null(mult_x_u),
            user_data,
        )
    }
}

impl Drop for ProblemHandle {
    fn drop(&mut self) {
        unsafe {
            (self.api.free_problem)(self.raw.as_ptr());
        }
        log::debug!("freed {} problem", self.api.name);
    }
}
