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

/**
 * Problem 71 of the Hock-Schittkowski test suite driven directly through the C interface of the
 * engine, the way a C program would use `IpStdCInterface.h`.
 *
 *   min   x0 x3 (x0 + x1 + x2) + x2
 *   s.t.  x0 x1 x2 x3 >= 25
 *         x0^2 + x1^2 + x2^2 + x3^2 = 40
 *         1 <= x0, x1, x2, x3 <= 5
 */
use approx::assert_relative_eq;
use ipopt_bridge_engine::API;
use ipopt_bridge_sys::*;
use std::cell::Cell;
use std::ffi::CString;
use std::ptr;
use std::slice;

/// Problem data reached through `user_data`.
struct UserData {
    g_offset: [f64; 2],
    /// Zero or one, the index base reported by the structure calls.
    base: Index,
    stop_at: Option<Index>,
    last_iter: Cell<Index>,
}

impl UserData {
    fn new() -> Self {
        UserData {
            g_offset: [0.0, 0.0],
            base: 0,
            stop_at: None,
            last_iter: Cell::new(-1),
        }
    }
}

unsafe fn user<'a>(user_data: UserDataPtr) -> &'a UserData {
    &*(user_data as *const UserData)
}

unsafe extern "C" fn eval_f(
    n: Index,
    x: *mut Number,
    _new_x: Bool,
    obj_value: *mut Number,
    _user_data: UserDataPtr,
) -> Bool {
    let x = slice::from_raw_parts(x, n as usize);
    *obj_value = x[0] * x[3] * (x[0] + x[1] + x[2]) + x[2];
    TRUE
}

unsafe extern "C" fn eval_grad_f(
    n: Index,
    x: *mut Number,
    _new_x: Bool,
    grad_f: *mut Number,
    _user_data: UserDataPtr,
) -> Bool {
    let x = slice::from_raw_parts(x, n as usize);
    let grad_f = slice::from_raw_parts_mut(grad_f, n as usize);
    grad_f[0] = x[0] * x[3] + x[3] * (x[0] + x[1] + x[2]);
    grad_f[1] = x[0] * x[3];
    grad_f[2] = x[0] * x[3] + 1.0;
    grad_f[3] = x[0] * (x[0] + x[1] + x[2]);
    TRUE
}

unsafe extern "C" fn eval_g(
    n: Index,
    x: *mut Number,
    _new_x: Bool,
    m: Index,
    g: *mut Number,
    user_data: UserDataPtr,
) -> Bool {
    let data = user(user_data);
    let x = slice::from_raw_parts(x, n as usize);
    let g = slice::from_raw_parts_mut(g, m as usize);
    g[0] = x[0] * x[1] * x[2] * x[3] + data.g_offset[0];
    g[1] = x[0] * x[0] + x[1] * x[1] + x[2] * x[2] + x[3] * x[3] + data.g_offset[1];
    TRUE
}

unsafe extern "C" fn eval_jac_g(
    n: Index,
    x: *mut Number,
    _new_x: Bool,
    _m: Index,
    nele_jac: Index,
    irow: *mut Index,
    jcol: *mut Index,
    values: *mut Number,
    user_data: UserDataPtr,
) -> Bool {
    if values.is_null() {
        let base = user(user_data).base;
        let irow = slice::from_raw_parts_mut(irow, nele_jac as usize);
        let jcol = slice::from_raw_parts_mut(jcol, nele_jac as usize);
        // Dense 2x4.
        for k in 0..8 {
            irow[k] = (k / 4) as Index + base;
            jcol[k] = (k % 4) as Index + base;
        }
    } else {
        let x = slice::from_raw_parts(x, n as usize);
        let values = slice::from_raw_parts_mut(values, nele_jac as usize);
        values[0] = x[1] * x[2] * x[3];
        values[1] = x[0] * x[2] * x[3];
        values[2] = x[0] * x[1] * x[3];
        values[3] = x[0] * x[1] * x[2];

        values[4] = 2.0 * x[0];
        values[5] = 2.0 * x[1];
        values[6] = 2.0 * x[2];
        values[7] = 2.0 * x[3];
    }
    TRUE
}

unsafe extern "C" fn eval_h(
    n: Index,
    x: *mut Number,
    _new_x: Bool,
    obj_factor: Number,
    m: Index,
    lambda: *mut Number,
    _new_lambda: Bool,
    nele_hess: Index,
    irow: *mut Index,
    jcol: *mut Index,
    values: *mut Number,
    user_data: UserDataPtr,
) -> Bool {
    if values.is_null() {
        // Lower triangle of the dense 4x4 matrix.
        let base = user(user_data).base;
        let irow = slice::from_raw_parts_mut(irow, nele_hess as usize);
        let jcol = slice::from_raw_parts_mut(jcol, nele_hess as usize);
        let mut idx = 0;
        for row in 0..4 {
            for col in 0..=row {
                irow[idx] = row + base;
                jcol[idx] = col + base;
                idx += 1;
            }
        }
    } else {
        let x = slice::from_raw_parts(x, n as usize);
        let lambda = slice::from_raw_parts(lambda, m as usize);
        let values = slice::from_raw_parts_mut(values, nele_hess as usize);

        values[0] = obj_factor * (2.0 * x[3]); /* 0,0 */
        values[1] = obj_factor * (x[3]); /* 1,0 */
        values[2] = 0.0; /* 1,1 */
        values[3] = obj_factor * (x[3]); /* 2,0 */
        values[4] = 0.0; /* 2,1 */
        values[5] = 0.0; /* 2,2 */
        values[6] = obj_factor * (2.0 * x[0] + x[1] + x[2]); /* 3,0 */
        values[7] = obj_factor * (x[0]); /* 3,1 */
        values[8] = obj_factor * (x[0]); /* 3,2 */
        values[9] = 0.0; /* 3,3 */

        values[1] += lambda[0] * (x[2] * x[3]); /* 1,0 */
        values[3] += lambda[0] * (x[1] * x[3]); /* 2,0 */
        values[4] += lambda[0] * (x[0] * x[3]); /* 2,1 */
        values[6] += lambda[0] * (x[1] * x[2]); /* 3,0 */
        values[7] += lambda[0] * (x[0] * x[2]); /* 3,1 */
        values[8] += lambda[0] * (x[0] * x[1]); /* 3,2 */

        values[0] += lambda[1] * 2.0; /* 0,0 */
        values[2] += lambda[1] * 2.0; /* 1,1 */
        values[5] += lambda[1] * 2.0; /* 2,2 */
        values[9] += lambda[1] * 2.0; /* 3,3 */
    }
    TRUE
}

unsafe extern "C" fn intermediate_cb(
    _alg_mod: AlgorithmMode,
    iter_count: Index,
    _obj_value: Number,
    _inf_pr: Number,
    _inf_du: Number,
    _mu: Number,
    _d_norm: Number,
    _regularization_size: Number,
    _alpha_du: Number,
    _alpha_pr: Number,
    _ls_trials: Index,
    user_data: UserDataPtr,
) -> Bool {
    let data = user(user_data);
    data.last_iter.set(iter_count);
    match data.stop_at {
        Some(stop) if iter_count >= stop => FALSE,
        _ => TRUE,
    }
}

fn create(index_style: IndexStyle) -> IpoptProblem {
    let mut x_l = vec![1.0; 4];
    let mut x_u = vec![5.0; 4];
    let mut g_l = vec![25.0, 40.0];
    let mut g_u = vec![POSITIVE_INFINITY, 40.0];
    unsafe {
        (API.create_problem)(
            4,
            x_l.as_mut_ptr(),
            x_u.as_mut_ptr(),
            2,
            g_l.as_mut_ptr(),
            g_u.as_mut_ptr(),
            8,
            10,
            index_style,
            Some(eval_f),
            Some(eval_g),
            Some(eval_grad_f),
            Some(eval_jac_g),
            Some(eval_h),
        )
    }
}

fn set_str(problem: IpoptProblem, keyword: &str, value: &str) -> bool {
    let keyword = CString::new(keyword).unwrap();
    let value = CString::new(value).unwrap();
    unsafe { (API.add_str_option)(problem, keyword.as_ptr(), value.as_ptr()) == TRUE }
}

fn set_num(problem: IpoptProblem, keyword: &str, value: f64) -> bool {
    let keyword = CString::new(keyword).unwrap();
    unsafe { (API.add_num_option)(problem, keyword.as_ptr(), value) == TRUE }
}

fn set_int(problem: IpoptProblem, keyword: &str, value: i32) -> bool {
    let keyword = CString::new(keyword).unwrap();
    unsafe { (API.add_int_option)(problem, keyword.as_ptr(), value) == TRUE }
}

struct Output {
    status: ApplicationReturnStatus,
    x: Vec<f64>,
    g: Vec<f64>,
    obj: f64,
    mult_g: Vec<f64>,
    mult_x_l: Vec<f64>,
    mult_x_u: Vec<f64>,
}

fn solve(problem: IpoptProblem, x0: &[f64], data: &mut UserData) -> Output {
    let mut out = Output {
        status: 0,
        x: x0.to_vec(),
        g: vec![0.0; 2],
        obj: 0.0,
        mult_g: vec![0.0; 2],
        mult_x_l: vec![0.0; 4],
        mult_x_u: vec![0.0; 4],
    };
    out.status = unsafe {
        (API.solve)(
            problem,
            out.x.as_mut_ptr(),
            out.g.as_mut_ptr(),
            &mut out.obj,
            out.mult_g.as_mut_ptr(),
            out.mult_x_l.as_mut_ptr(),
            out.mult_x_u.as_mut_ptr(),
            data as *mut UserData as UserDataPtr,
        )
    };
    out
}

const X_OPT: [f64; 4] = [1.0, 4.742_999_643_1, 3.821_149_979_9, 1.379_408_293_1];
const OBJ_OPT: f64 = 17.014_017_140_2;

fn assert_hs071_solution(out: &Output) {
    assert_eq!(out.status, ApplicationReturnStatus_Solve_Succeeded);
    for (x, x_opt) in out.x.iter().zip(X_OPT.iter()) {
        assert_relative_eq!(*x, *x_opt, max_relative = 1e-5);
    }
    assert_relative_eq!(out.obj, OBJ_OPT, max_relative = 1e-6);
    assert_relative_eq!(out.g[0], 25.0, max_relative = 1e-6);
    assert_relative_eq!(out.g[1], 40.0, max_relative = 1e-6);
    // Only x0 sits at a bound.
    assert!(out.mult_x_l[0] > 0.1);
    for i in 1..4 {
        assert!(out.mult_x_l[i] < 1e-6);
    }
    assert!(out.mult_x_u.iter().all(|&z| z < 1e-6));
}

#[test]
fn hs071_raw() {
    let problem = create(IndexStyle_C_STYLE);
    assert!(!problem.is_null());
    assert!(set_num(problem, "tol", 1e-7));
    assert!(set_str(problem, "mu_strategy", "adaptive"));
    assert!(set_int(problem, "print_level", 0));

    let mut data = UserData::new();
    let out = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_hs071_solution(&out);

    unsafe { (API.free_problem)(problem) };
}

#[test]
fn hs071_fortran_indexing() {
    let problem = create(IndexStyle_FORTRAN_STYLE);
    assert!(set_int(problem, "print_level", 0));
    let mut data = UserData::new();
    data.base = 1;
    let out = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_hs071_solution(&out);
    unsafe { (API.free_problem)(problem) };
}

#[test]
fn hs071_limited_memory() {
    let problem = create(IndexStyle_C_STYLE);
    assert!(set_str(problem, "hessian_approximation", "limited-memory"));
    assert!(set_int(problem, "print_level", 0));
    let mut data = UserData::new();
    let out = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_hs071_solution(&out);
    unsafe { (API.free_problem)(problem) };
}

#[test]
fn hs071_warm_start_after_perturbation() {
    let problem = create(IndexStyle_C_STYLE);
    assert!(set_int(problem, "print_level", 0));
    let mut data = UserData::new();
    let first = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_eq!(first.status, ApplicationReturnStatus_Solve_Succeeded);

    // Shifting the first constraint moves the solution a little.
    data.g_offset[0] = 0.2;
    assert!(set_str(problem, "warm_start_init_point", "yes"));
    assert!(set_num(problem, "bound_push", 1e-5));
    assert!(set_num(problem, "bound_frac", 1e-5));
    let mut out = Output {
        status: 0,
        x: first.x.clone(),
        g: vec![0.0; 2],
        obj: 0.0,
        mult_g: first.mult_g.clone(),
        mult_x_l: first.mult_x_l.clone(),
        mult_x_u: first.mult_x_u.clone(),
    };
    out.status = unsafe {
        (API.solve)(
            problem,
            out.x.as_mut_ptr(),
            out.g.as_mut_ptr(),
            &mut out.obj,
            out.mult_g.as_mut_ptr(),
            out.mult_x_l.as_mut_ptr(),
            out.mult_x_u.as_mut_ptr(),
            &mut data as *mut UserData as UserDataPtr,
        )
    };
    assert_eq!(out.status, ApplicationReturnStatus_Solve_Succeeded);
    assert_relative_eq!(out.g[0], 25.0, max_relative = 1e-6);
    assert!(out.obj < first.obj);
    unsafe { (API.free_problem)(problem) };
}

#[test]
fn intermediate_callback_stops_the_solve() {
    let problem = create(IndexStyle_C_STYLE);
    assert!(set_int(problem, "print_level", 0));
    unsafe {
        assert_eq!((API.set_intermediate_callback)(problem, Some(intermediate_cb)), TRUE);
    }
    let mut data = UserData::new();
    data.stop_at = Some(2);
    let out = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_eq!(out.status, ApplicationReturnStatus_User_Requested_Stop);
    assert_eq!(data.last_iter.get(), 2);

    // Clearing the callback lets the next solve run to completion.
    unsafe {
        assert_eq!((API.set_intermediate_callback)(problem, None), TRUE);
    }
    data.last_iter.set(-1);
    let out = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_eq!(out.status, ApplicationReturnStatus_Solve_Succeeded);
    assert_eq!(data.last_iter.get(), -1);
    unsafe { (API.free_problem)(problem) };
}

#[test]
fn null_output_buffers_are_skipped() {
    let problem = create(IndexStyle_C_STYLE);
    assert!(set_int(problem, "print_level", 0));
    let mut data = UserData::new();
    let mut x = vec![1.0, 5.0, 5.0, 1.0];
    let status = unsafe {
        (API.solve)(
            problem,
            x.as_mut_ptr(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            &mut data as *mut UserData as UserDataPtr,
        )
    };
    assert_eq!(status, ApplicationReturnStatus_Solve_Succeeded);
    assert_relative_eq!(x[1], X_OPT[1], max_relative = 1e-5);
    unsafe { (API.free_problem)(problem) };
}

#[test]
fn inconsistent_arguments_yield_null() {
    let mut x_l = vec![1.0; 4];
    let mut x_u = vec![5.0; 4];
    let mut g_l = vec![25.0, 40.0];
    let mut g_u = vec![POSITIVE_INFINITY, 40.0];
    let problem = unsafe {
        // Constraints without a Jacobian callback.
        (API.create_problem)(
            4,
            x_l.as_mut_ptr(),
            x_u.as_mut_ptr(),
            2,
            g_l.as_mut_ptr(),
            g_u.as_mut_ptr(),
            8,
            10,
            IndexStyle_C_STYLE,
            Some(eval_f),
            Some(eval_g),
            Some(eval_grad_f),
            None,
            Some(eval_h),
        )
    };
    assert!(problem.is_null());
}

#[test]
fn structure_out_of_range_is_an_invalid_problem() {
    // Zero-based coordinates reported for a one-based problem.
    let problem = create(IndexStyle_FORTRAN_STYLE);
    assert!(set_int(problem, "print_level", 0));
    let mut data = UserData::new();
    let out = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_eq!(out.status, ApplicationReturnStatus_Invalid_Problem_Definition);
    unsafe { (API.free_problem)(problem) };
}

#[test]
fn inconsistent_bounds_are_infeasible() {
    let mut x_l = vec![1.0, 1.0, 6.0, 1.0];
    let mut x_u = vec![5.0; 4];
    let mut g_l = vec![25.0, 40.0];
    let mut g_u = vec![POSITIVE_INFINITY, 40.0];
    let problem = unsafe {
        (API.create_problem)(
            4,
            x_l.as_mut_ptr(),
            x_u.as_mut_ptr(),
            2,
            g_l.as_mut_ptr(),
            g_u.as_mut_ptr(),
            8,
            10,
            IndexStyle_C_STYLE,
            Some(eval_f),
            Some(eval_g),
            Some(eval_grad_f),
            Some(eval_jac_g),
            Some(eval_h),
        )
    };
    assert!(set_int(problem, "print_level", 0));
    let mut data = UserData::new();
    let out = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_eq!(out.status, ApplicationReturnStatus_Infeasible_Problem_Detected);
    unsafe { (API.free_problem)(problem) };
}

#[test]
fn output_file_receives_summary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hs071.out");
    let problem = create(IndexStyle_C_STYLE);
    assert!(set_int(problem, "print_level", 0));
    let file_name = CString::new(path.to_str().unwrap()).unwrap();
    unsafe {
        assert_eq!((API.open_output_file)(problem, file_name.as_ptr(), 5), TRUE);
    }
    let mut data = UserData::new();
    let out = solve(problem, &[1.0, 5.0, 5.0, 1.0], &mut data);
    assert_eq!(out.status, ApplicationReturnStatus_Solve_Succeeded);
    unsafe { (API.free_problem)(problem) };

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Number of variables: 4"));
    assert!(text.contains("EXIT: Optimal Solution Found."));
}
