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

//! Raw definitions of the Ipopt standard C interface (`IpStdCInterface.h`).
//!
//! Besides the scalar types, callback signatures and return codes, this crate defines [`Api`],
//! a table of the entry points of the C interface. Anything implementing the interface,
//! be it the native library (see [`native`], behind the `native` feature) or an engine written
//! in Rust, is handed to the safe layer as a `&'static Api`.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use libc::{c_char, c_double, c_int, c_void};

/// Type for all numbers.
pub type Number = c_double;
/// Type for all indices.
pub type Index = c_int;
/// Type for all integers.
pub type Int = c_int;
/// Booleans cross the interface as plain integers.
pub type Bool = c_int;
/// Pointer handed back unmodified to every callback.
pub type UserDataPtr = *mut c_void;

pub const TRUE: Bool = 1;
pub const FALSE: Bool = 0;

/// Value indicating that a variable or constraint has no upper bound, provided the
/// `nlp_upper_bound_inf` option is less than this.
pub const POSITIVE_INFINITY: Number = 2.0e19;
/// Value indicating that a variable or constraint has no lower bound, provided the
/// `nlp_lower_bound_inf` option is greater than this.
pub const NEGATIVE_INFINITY: Number = -2.0e19;

/// Opaque problem structure owned by the engine.
pub enum IpoptProblemInfo {}
pub type IpoptProblem = *mut IpoptProblemInfo;

pub type IndexStyle = Int;
pub const IndexStyle_C_STYLE: IndexStyle = 0;
pub const IndexStyle_FORTRAN_STYLE: IndexStyle = 1;

pub type AlgorithmMode = Int;
pub const AlgorithmMode_RegularMode: AlgorithmMode = 0;
pub const AlgorithmMode_RestorationPhaseMode: AlgorithmMode = 1;

/// Outcome of `IpoptSolve`. Kept as a plain integer: an engine may return codes unknown to
/// this crate, which must not be transmuted into a Rust enum.
pub type ApplicationReturnStatus = Int;
pub const ApplicationReturnStatus_Solve_Succeeded: ApplicationReturnStatus = 0;
pub const ApplicationReturnStatus_Solved_To_Acceptable_Level: ApplicationReturnStatus = 1;
pub const ApplicationReturnStatus_Infeasible_Problem_Detected: ApplicationReturnStatus = 2;
pub const ApplicationReturnStatus_Search_Direction_Becomes_Too_Small: ApplicationReturnStatus = 3;
pub const ApplicationReturnStatus_Diverging_Iterates: ApplicationReturnStatus = 4;
pub const ApplicationReturnStatus_User_Requested_Stop: ApplicationReturnStatus = 5;
pub const ApplicationReturnStatus_Feasible_Point_Found: ApplicationReturnStatus = 6;
pub const ApplicationReturnStatus_Maximum_Iterations_Exceeded: ApplicationReturnStatus = -1;
pub const ApplicationReturnStatus_Restoration_Failed: ApplicationReturnStatus = -2;
pub const ApplicationReturnStatus_Error_In_Step_Computation: ApplicationReturnStatus = -3;
pub const ApplicationReturnStatus_Maximum_CpuTime_Exceeded: ApplicationReturnStatus = -4;
pub const ApplicationReturnStatus_Not_Enough_Degrees_Of_Freedom: ApplicationReturnStatus = -10;
pub const ApplicationReturnStatus_Invalid_Problem_Definition: ApplicationReturnStatus = -11;
pub const ApplicationReturnStatus_Invalid_Option: ApplicationReturnStatus = -12;
pub const ApplicationReturnStatus_Invalid_Number_Detected: ApplicationReturnStatus = -13;
pub const ApplicationReturnStatus_Unrecoverable_Exception: ApplicationReturnStatus = -100;
pub const ApplicationReturnStatus_NonIpopt_Exception_Thrown: ApplicationReturnStatus = -101;
pub const ApplicationReturnStatus_Insufficient_Memory: ApplicationReturnStatus = -102;
pub const ApplicationReturnStatus_Internal_Error: ApplicationReturnStatus = -199;

// --- Callback function pointer types ---

/// Objective value at `x`.
pub type Eval_F_CB = unsafe extern "C" fn(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    obj_value: *mut Number,
    user_data: UserDataPtr,
) -> Bool;

/// Objective gradient at `x`.
pub type Eval_Grad_F_CB = unsafe extern "C" fn(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    grad_f: *mut Number,
    user_data: UserDataPtr,
) -> Bool;

/// Constraint values at `x`.
pub type Eval_G_CB = unsafe extern "C" fn(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    m: Index,
    g: *mut Number,
    user_data: UserDataPtr,
) -> Bool;

/// Constraint Jacobian. When `values` is null the structure (`iRow`, `jCol`) is requested,
/// otherwise the values at `x` in the order of that structure.
pub type Eval_Jac_G_CB = unsafe extern "C" fn(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    m: Index,
    nele_jac: Index,
    iRow: *mut Index,
    jCol: *mut Index,
    values: *mut Number,
    user_data: UserDataPtr,
) -> Bool;

/// Hessian of the Lagrangian `obj_factor * f + sum(lambda[i] * g[i])`, lower triangle only.
/// Two phases as in [`Eval_Jac_G_CB`].
pub type Eval_H_CB = unsafe extern "C" fn(
    n: Index,
    x: *mut Number,
    new_x: Bool,
    obj_factor: Number,
    m: Index,
    lambda: *mut Number,
    new_lambda: Bool,
    nele_hess: Index,
    iRow: *mut Index,
    jCol: *mut Index,
    values: *mut Number,
    user_data: UserDataPtr,
) -> Bool;

/// Called once per iteration. Returning `FALSE` stops the optimization.
pub type Intermediate_CB = unsafe extern "C" fn(
    alg_mod: AlgorithmMode,
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
    user_data: UserDataPtr,
) -> Bool;

// --- Entry points ---

pub type CreateIpoptProblem_FN = unsafe extern "C" fn(
    n: Index,
    x_L: *mut Number,
    x_U: *mut Number,
    m: Index,
    g_L: *mut Number,
    g_U: *mut Number,
    nele_jac: Index,
    nele_hess: Index,
    index_style: IndexStyle,
    eval_f: Option<Eval_F_CB>,
    eval_g: Option<Eval_G_CB>,
    eval_grad_f: Option<Eval_Grad_F_CB>,
    eval_jac_g: Option<Eval_Jac_G_CB>,
    eval_h: Option<Eval_H_CB>,
) -> IpoptProblem;

pub type FreeIpoptProblem_FN = unsafe extern "C" fn(ipopt_problem: IpoptProblem);

pub type AddIpoptStrOption_FN = unsafe extern "C" fn(
    ipopt_problem: IpoptProblem,
    keyword: *const c_char,
    val: *const c_char,
) -> Bool;

pub type AddIpoptNumOption_FN =
    unsafe extern "C" fn(ipopt_problem: IpoptProblem, keyword: *const c_char, val: Number) -> Bool;

pub type AddIpoptIntOption_FN =
    unsafe extern "C" fn(ipopt_problem: IpoptProblem, keyword: *const c_char, val: Int) -> Bool;

pub type OpenIpoptOutputFile_FN = unsafe extern "C" fn(
    ipopt_problem: IpoptProblem,
    file_name: *const c_char,
    print_level: Int,
) -> Bool;

pub type SetIpoptProblemScaling_FN = unsafe extern "C" fn(
    ipopt_problem: IpoptProblem,
    obj_scaling: Number,
    x_scaling: *mut Number,
    g_scaling: *mut Number,
) -> Bool;

pub type SetIntermediateCallback_FN = unsafe extern "C" fn(
    ipopt_problem: IpoptProblem,
    intermediate_cb: Option<Intermediate_CB>,
) -> Bool;

pub type IpoptSolve_FN = unsafe extern "C" fn(
    ipopt_problem: IpoptProblem,
    x: *mut Number,
    g: *mut Number,
    obj_val: *mut Number,
    mult_g: *mut Number,
    mult_x_L: *mut Number,
    mult_x_U: *mut Number,
    user_data: UserDataPtr,
) -> ApplicationReturnStatus;

/// The C interface as a table of entry points.
///
/// All function pointers follow the semantics documented in `IpStdCInterface.h`:
///
///  - `create_problem` copies all bound arrays and returns null on failure. The callbacks
///    passed to it must stay valid until `free_problem` is called on the returned handle.
///  - `free_problem` must be called exactly once per non-null handle.
///  - `solve` calls the callbacks synchronously on the calling thread, passing `user_data`
///    through unmodified. `g`, `obj_val` and the multiplier arrays may be null, in which case
///    they are not written.
#[derive(Copy, Clone)]
pub struct Api {
    /// Human readable name of the implementation, used in diagnostics.
    pub name: &'static str,
    pub create_problem: CreateIpoptProblem_FN,
    pub free_problem: FreeIpoptProblem_FN,
    pub add_str_option: AddIpoptStrOption_FN,
    pub add_num_option: AddIpoptNumOption_FN,
    pub add_int_option: AddIpoptIntOption_FN,
    pub open_output_file: OpenIpoptOutputFile_FN,
    pub set_problem_scaling: SetIpoptProblemScaling_FN,
    pub set_intermediate_callback: SetIntermediateCallback_FN,
    pub solve: IpoptSolve_FN,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api").field("name", &self.name).finish()
    }
}

/// Entry points of the native Ipopt library.
#[cfg(feature = "native")]
pub mod native {
    use super::*;

    #[link(name = "ipopt")]
    extern "C" {
        pub fn CreateIpoptProblem(
            n: Index,
            x_L: *mut Number,
            x_U: *mut Number,
            m: Index,
            g_L: *mut Number,
            g_U: *mut Number,
            nele_jac: Index,
            nele_hess: Index,
            index_style: IndexStyle,
            eval_f: Option<Eval_F_CB>,
            eval_g: Option<Eval_G_CB>,
            eval_grad_f: Option<Eval_Grad_F_CB>,
            eval_jac_g: Option<Eval_Jac_G_CB>,
            eval_h: Option<Eval_H_CB>,
        ) -> IpoptProblem;

        pub fn FreeIpoptProblem(ipopt_problem: IpoptProblem);

        pub fn AddIpoptStrOption(
            ipopt_problem: IpoptProblem,
            keyword: *const c_char,
            val: *const c_char,
        ) -> Bool;

        pub fn AddIpoptNumOption(
            ipopt_problem: IpoptProblem,
            keyword: *const c_char,
            val: Number,
        ) -> Bool;

        pub fn AddIpoptIntOption(
            ipopt_problem: IpoptProblem,
            keyword: *const c_char,
            val: Int,
        ) -> Bool;

        pub fn OpenIpoptOutputFile(
            ipopt_problem: IpoptProblem,
            file_name: *const c_char,
            print_level: Int,
        ) -> Bool;

        pub fn SetIpoptProblemScaling(
            ipopt_problem: IpoptProblem,
            obj_scaling: Number,
            x_scaling: *mut Number,
            g_scaling: *mut Number,
        ) -> Bool;

        pub fn SetIntermediateCallback(
            ipopt_problem: IpoptProblem,
            intermediate_cb: Option<Intermediate_CB>,
        ) -> Bool;

        pub fn IpoptSolve(
            ipopt_problem: IpoptProblem,
            x: *mut Number,
            g: *mut Number,
            obj_val: *mut Number,
            mult_g: *mut Number,
            mult_x_L: *mut Number,
            mult_x_U: *mut Number,
            user_data: UserDataPtr,
        ) -> ApplicationReturnStatus;
    }

    pub static API: Api = Api {
        name: "libipopt",
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
}
