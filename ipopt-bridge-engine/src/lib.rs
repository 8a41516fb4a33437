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

//! # ipopt-bridge-engine
//!
//! A small interior point engine written in Rust that implements the Ipopt standard C
//! interface. The entry points below have exactly the signatures of `IpStdCInterface.h` and
//! are collected in [`API`], which can be handed to anything expecting an
//! [`ipopt_bridge_sys::Api`].
//!
//! The engine works on dense matrices and is meant for small to medium sized problems. It
//! implements a primal-dual barrier method with inertia correction, an `l1` merit line search,
//! gradient based or user supplied scaling, limited-memory quasi-Newton Hessians, warm starts,
//! an intermediate callback and an output file.
//!
//! Problem handles created here are `Box`ed [`ProblemData`](problem::ProblemData) records.
//! Like the native library, the engine does not protect against a handle being used from two
//! threads at once.

// Entry points keep the names and argument names of the C interface.
#![allow(non_snake_case)]

use ffi::{
    ApplicationReturnStatus, Bool, Eval_F_CB, Eval_G_CB, Eval_Grad_F_CB, Eval_H_CB,
    Eval_Jac_G_CB, Index, Int, Intermediate_CB, IpoptProblem, Number, UserDataPtr,
};
use ipopt_bridge_sys as ffi;
use libc::c_char;
use std::ffi::CStr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;

mod bfgs;
mod ipm;
mod journal;
mod kkt;
mod nlp;
mod options;
mod problem;

use ipm::StartPoint;
use journal::Journal;
use options::OptionError;
use problem::ProblemData;

/// Entry point table of the engine.
pub static API: ffi::Api = ffi::Api {
    name: "reference",
    create_problem: CreateIpoptProblem,
    free_problem: FreeIpoptProblem,
    add_str_option: AddIpoptStrOption,
    add_num_option: AddIpoptNumOption,
    add_int_option: AddIpoptIntOption,
    open_output_file: OpenIpoptOutputFile,
    set_problem_scaling: SetIpoptProblemScaling,
    set_intermediate_callback: SetIntermediateCallback,
    solve: IpoptSolve,
};

/// Reinterprets a handle as the record it points to.
unsafe fn problem_data<'a>(ipopt_problem: IpoptProblem) -> Option<&'a mut ProblemData> {
    (ipopt_problem as *mut ProblemData).as_mut()
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn to_bool(b: bool) -> Bool {
    if b {
        ffi::TRUE
    } else {
        ffi::FALSE
    }
}

/// Runs `f`, turning a panic into `default`.
fn guarded<T, F: FnOnce() -> T>(what: &str, default: T, f: F) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("panic inside {}", what);
            default
        }
    }
}

fn report_option(result: Result<(), OptionError>) -> Bool {
    match result {
        Ok(()) => ffi::TRUE,
        Err(err) => {
            log::warn!("{}", err);
            ffi::FALSE
        }
    }
}

/// Creates a new problem. All arrays are copied. Returns null if the arguments are
/// inconsistent or a required callback is missing.
///
/// # Safety
///
/// Bound arrays must be valid for `n` (respectively `m`) reads, and the callbacks must remain
/// callable until the problem is freed.
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn CreateIpoptProblem(
    n: Index,
    x_L: *mut Number,
    x_U: *mut Number,
    m: Index,
    g_L: *mut Number,
    g_U: *mut Number,
    nele_jac: Index,
    nele_hess: Index,
    index_style: Index,
    eval_f: Option<Eval_F_CB>,
    eval_g: Option<Eval_G_CB>,
    eval_grad_f: Option<Eval_Grad_F_CB>,
    eval_jac_g: Option<Eval_Jac_G_CB>,
    eval_h: Option<Eval_H_CB>,
) -> IpoptProblem {
    guarded("CreateIpoptProblem", std::ptr::null_mut(), || {
        match ProblemData::new(
            n, x_L, x_U, m, g_L, g_U, nele_jac, nele_hess, index_style, eval_f, eval_g,
            eval_grad_f, eval_jac_g, eval_h,
        ) {
            Some(data) => {
                log::trace!("created problem with {} variables and {} constraints", n, m);
                Box::into_raw(Box::new(data)) as IpoptProblem
            }
            None => {
                log::warn!("invalid arguments to CreateIpoptProblem");
                std::ptr::null_mut()
            }
        }
    })
}

/// Frees a problem created with [`CreateIpoptProblem`]. Null is ignored.
///
/// # Safety
///
/// `ipopt_problem` must be null or a live handle of this engine, and must not be used
/// afterwards.
pub unsafe extern "C" fn FreeIpoptProblem(ipopt_problem: IpoptProblem) {
    if ipopt_problem.is_null() {
        return;
    }
    guarded("FreeIpoptProblem", (), || {
        drop(Box::from_raw(ipopt_problem as *mut ProblemData));
    })
}

/// # Safety
///
/// `ipopt_problem` must be a live handle; `keyword` and `val` must be null or NUL terminated.
pub unsafe extern "C" fn AddIpoptStrOption(
    ipopt_problem: IpoptProblem,
    keyword: *const c_char,
    val: *const c_char,
) -> Bool {
    guarded("AddIpoptStrOption", ffi::FALSE, || {
        match (problem_data(ipopt_problem), c_str(keyword), c_str(val)) {
            (Some(data), Some(keyword), Some(val)) => {
                report_option(data.options.set_str(keyword, val))
            }
            _ => ffi::FALSE,
        }
    })
}

/// # Safety
///
/// `ipopt_problem` must be a live handle; `keyword` must be null or NUL terminated.
pub unsafe extern "C" fn AddIpoptNumOption(
    ipopt_problem: IpoptProblem,
    keyword: *const c_char,
    val: Number,
) -> Bool {
    guarded("AddIpoptNumOption", ffi::FALSE, || {
        match (problem_data(ipopt_problem), c_str(keyword)) {
            (Some(data), Some(keyword)) => report_option(data.options.set_num(keyword, val)),
            _ => ffi::FALSE,
        }
    })
}

/// # Safety
///
/// `ipopt_problem` must be a live handle; `keyword` must be null or NUL terminated.
pub unsafe extern "C" fn AddIpoptIntOption(
    ipopt_problem: IpoptProblem,
    keyword: *const c_char,
    val: Int,
) -> Bool {
    guarded("AddIpoptIntOption", ffi::FALSE, || {
        match (problem_data(ipopt_problem), c_str(keyword)) {
            (Some(data), Some(keyword)) => report_option(data.options.set_int(keyword, val)),
            _ => ffi::FALSE,
        }
    })
}

/// Opens (truncating) an output file for the iteration table and exit summary of subsequent
/// solves.
///
/// # Safety
///
/// `ipopt_problem` must be a live handle; `file_name` must be null or NUL terminated.
pub unsafe extern "C" fn OpenIpoptOutputFile(
    ipopt_problem: IpoptProblem,
    file_name: *const c_char,
    print_level: Int,
) -> Bool {
    guarded("OpenIpoptOutputFile", ffi::FALSE, || {
        let (data, file_name) = match (problem_data(ipopt_problem), c_str(file_name)) {
            (Some(data), Some(file_name)) => (data, file_name),
            _ => return ffi::FALSE,
        };
        if !(0..=12).contains(&print_level) {
            log::warn!("invalid print level {} for output file", print_level);
            return ffi::FALSE;
        }
        match Journal::create(file_name, print_level) {
            Ok(journal) => {
                data.journal = Some(journal);
                ffi::TRUE
            }
            Err(err) => {
                log::warn!("could not open output file {}: {}", file_name, err);
                ffi::FALSE
            }
        }
    })
}

/// Registers scaling factors, used when `nlp_scaling_method` is `user-scaling`. Either array
/// may be null.
///
/// # Safety
///
/// `ipopt_problem` must be a live handle; the arrays must be null or valid for `n`
/// (respectively `m`) reads.
pub unsafe extern "C" fn SetIpoptProblemScaling(
    ipopt_problem: IpoptProblem,
    obj_scaling: Number,
    x_scaling: *mut Number,
    g_scaling: *mut Number,
) -> Bool {
    guarded("SetIpoptProblemScaling", ffi::FALSE, || {
        match problem_data(ipopt_problem) {
            Some(data) => to_bool(data.set_scaling(obj_scaling, x_scaling, g_scaling)),
            None => ffi::FALSE,
        }
    })
}

/// Sets or, given null, clears the intermediate callback.
///
/// # Safety
///
/// `ipopt_problem` must be a live handle.
pub unsafe extern "C" fn SetIntermediateCallback(
    ipopt_problem: IpoptProblem,
    intermediate_cb: Option<Intermediate_CB>,
) -> Bool {
    match problem_data(ipopt_problem) {
        Some(data) => {
            data.intermediate_cb = intermediate_cb;
            ffi::TRUE
        }
        None => ffi::FALSE,
    }
}

/// Solves the problem from the starting point in `x`.
///
/// On return `x` holds the final iterate. `g`, `obj_val` and the multiplier arrays are written
/// only when non-null. With `warm_start_init_point` set to `yes`, the multiplier arrays are
/// read as initial values as well.
///
/// # Safety
///
/// `ipopt_problem` must be a live handle, `x` valid for `n` reads and writes, and each
/// non-null output array valid for its length.
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn IpoptSolve(
    ipopt_problem: IpoptProblem,
    x: *mut Number,
    g: *mut Number,
    obj_val: *mut Number,
    mult_g: *mut Number,
    mult_x_L: *mut Number,
    mult_x_U: *mut Number,
    user_data: UserDataPtr,
) -> ApplicationReturnStatus {
    let data = match problem_data(ipopt_problem) {
        Some(data) => data,
        None => return ffi::ApplicationReturnStatus_Invalid_Problem_Definition,
    };
    if x.is_null() {
        return ffi::ApplicationReturnStatus_Invalid_Problem_Definition;
    }
    guarded(
        "IpoptSolve",
        ffi::ApplicationReturnStatus_Unrecoverable_Exception,
        || {
            let (n, m) = (data.n, data.m);
            let read = |ptr: *mut Number, len: usize| {
                if ptr.is_null() {
                    None
                } else {
                    Some(slice::from_raw_parts(ptr, len).to_vec())
                }
            };
            let start = StartPoint {
                x: slice::from_raw_parts(x, n).to_vec(),
                mult_g: if m > 0 { read(mult_g, m) } else { None },
                mult_x_l: read(mult_x_L, n),
                mult_x_u: read(mult_x_U, n),
            };

            // The `output_file` option opens a journal unless one was opened explicitly.
            let mut journal = data.journal.take();
            let output_file = data.options.str("output_file");
            if journal.is_none() && !output_file.is_empty() {
                match Journal::create(output_file, data.options.int("file_print_level")) {
                    Ok(j) => journal = Some(j),
                    Err(err) => log::warn!("could not open output file {}: {}", output_file, err),
                }
            }

            let outcome = ipm::solve(data, journal.as_mut(), &start, user_data);
            data.journal = journal;
            log::trace!(
                "solve returned {} after {} iterations",
                outcome.status,
                outcome.iterations
            );

            if let Some(solution) = outcome.solution {
                let write = |ptr: *mut Number, values: &[Number]| {
                    if !ptr.is_null() && !values.is_empty() {
                        slice::from_raw_parts_mut(ptr, values.len()).copy_from_slice(values);
                    }
                };
                write(x, &solution.x);
                write(g, &solution.g);
                write(mult_g, &solution.mult_g);
                write(mult_x_L, &solution.mult_x_l);
                write(mult_x_U, &solution.mult_x_u);
                if !obj_val.is_null() {
                    *obj_val = solution.obj;
                }
            }
            outcome.status
        },
    )
}
