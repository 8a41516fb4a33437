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

//! # ipopt-bridge
//!
//! A safe interface to the Ipopt C ABI for solving problems of the form
//!
//! ```verbatim
//!    min     f(x)
//!  x in R^n
//!
//!    s.t.       g_L <= g(x) <= g_U
//!               x_L <=  x   <= x_U
//! ```
//!
//! Problems are described by implementing [`BasicProblem`] and, depending on how much
//! derivative information is available, [`NewtonProblem`] or [`ConstrainedProblem`]. An
//! [`Ipopt`] instance owns the problem, the native handle, and the buffers exchanged with the
//! engine on every solve.
//!
//! The engine is selected at build time. With the default `reference-engine` feature the
//! pure-Rust engine in `ipopt-bridge-engine` is used; the `native` feature links a system
//! `libipopt` instead.

use ipopt_bridge_sys as ffi;

mod descriptor;
mod error;
mod handle;
mod registry;
mod status;

pub use descriptor::{
    normalize_bound, IndexingStyle, SparseMatrix, SparsityDescriptor, NEGATIVE_INFINITY,
    POSITIVE_INFINITY,
};
pub use error::{CreateError, StructureError};
pub use ffi::{Index, Int, Number};
pub use status::{SolveStatus, StatusKind};

use descriptor::normalize_bounds;
use handle::{EvalCallbacks, ProblemHandle};
use registry::CallbackRegistry;

#[cfg(not(any(feature = "reference-engine", feature = "native")))]
compile_error!("enable either the `reference-engine` or the `native` feature");

/// Entry points of the engine selected at build time.
#[cfg(feature = "native")]
fn default_api() -> &'static ffi::Api {
    &ffi::native::API
}

#[cfg(all(feature = "reference-engine", not(feature = "native")))]
fn default_api() -> &'static ffi::Api {
    &ipopt_bridge_engine::API
}

/// The non-linear problem to be solved by Ipopt. This trait specifies all the
/// information needed to construct the unconstrained optimization problem (although the
/// variables are allowed to be bounded).
/// In the callbacks within, `x` is the independent variable and must be the same size
/// as returned by `num_variables`. `new_x` is `false` when `x` is the same point as in the
/// previous evaluation call, so cached intermediate values may be reused.
/// Each of the callbacks required during interior point iterations are allowed to fail.
/// In case of failure to produce values, simply return `false` where applicable.
/// This feature could be used to tell Ipopt to try smaller perturbations for `x` for
/// instance.
pub trait BasicProblem {
    /// Specify the indexing style used for arrays in this problem.
    /// (Default is zero-based)
    fn indexing_style(&self) -> IndexingStyle {
        IndexingStyle::CStyle
    }
    /// Total number of variables of the non-linear problem.
    fn num_variables(&self) -> usize;

    /// Specify lower and upper variable bounds given by `x_l` and `x_u` respectively.
    /// Both slices have `num_variables` entries. Values at or beyond `±2e19` (infinities
    /// included) leave the variable unbounded in that direction.
    fn bounds(&self, x_l: &mut [Number], x_u: &mut [Number]) -> bool;

    /// Construct the initial guess of the primal variables for Ipopt to start with.
    /// This is called at the start of every solve.
    fn initial_point(&self, x: &mut [Number]) -> bool;

    /// Construct the initial guess of the lower and upper bounds multipliers for Ipopt to start
    /// with. These are only used when the `warm_start_init_point` option is `"yes"`.
    /// The default leaves the multipliers of the previous solve in place.
    fn initial_bounds_multipliers(&self, _z_l: &mut [Number], _z_u: &mut [Number]) -> bool {
        false
    }

    /// Objective function. This is the function being minimized.
    /// This function is internally called by Ipopt callback `eval_f`.
    fn objective(&mut self, x: &[Number], new_x: bool, obj: &mut Number) -> bool;
    /// Gradient of the objective function.
    /// This function is internally called by Ipopt callback `eval_grad_f`.
    fn objective_grad(&mut self, x: &[Number], new_x: bool, grad_f: &mut [Number]) -> bool;

    /// Provide custom scaling for the objective function. A value other than `1.0` is
    /// registered with the engine at construction, which also switches the
    /// `nlp_scaling_method` option to `"user-scaling"`.
    fn objective_scaling(&self) -> f64 {
        1.0
    }
    /// Provide custom variable scaling by filling `x_scaling` and returning `true`.
    fn variable_scaling(&self, _x_scaling: &mut [Number]) -> bool {
        false
    }
}

/// An extension to the [`BasicProblem`] trait that enables full Newton iterations for
/// unconstrained problems. Problems implementing only `BasicProblem` are solved with a
/// limited-memory quasi-Newton approximation of second derivatives.
/// This interface asks for the Hessian matrix in sparse triplet form.
pub trait NewtonProblem: BasicProblem {
    /// Number of non-zeros in the Hessian matrix.
    fn num_hessian_non_zeros(&self) -> usize;
    /// Hessian indices. These are the row and column indices of the non-zeros
    /// in the sparse representation of the matrix.
    /// This is a symmetric matrix, fill the lower left triangular half only.
    /// This is called once; the reported structure is validated and reused for the lifetime
    /// of the `Ipopt` instance.
    fn hessian_indices(&self, rows: &mut [Index], cols: &mut [Index]) -> bool;
    /// Objective Hessian values scaled by `obj_factor`. Each value must correspond to the
    /// `row` and `column` as specified in `hessian_indices`.
    /// This function is internally called by Ipopt callback `eval_h`.
    fn hessian_values(
        &mut self,
        x: &[Number],
        new_x: bool,
        obj_factor: Number,
        vals: &mut [Number],
    ) -> bool;
}

/// Extends the [`BasicProblem`] trait to enable equality and inequality constraints.
/// Equality constraints are enforced by setting the lower and upper bounds for the constraint
/// to the same value.
/// This type of problem is the target use case for Ipopt.
/// NOTE: Although it's possible to run quasi-Newton iterations on a constrained problem by
/// setting the `hessian_approximation` option to `"limited-memory"`, it doesn't perform well
/// in general. In that case the Hessian callbacks are never called and may simply return
/// `false`.
pub trait ConstrainedProblem: BasicProblem {
    /// Number of equality and inequality constraints.
    fn num_constraints(&self) -> usize;
    /// Number of non-zeros in the constraint Jacobian.
    fn num_constraint_jacobian_non_zeros(&self) -> usize;
    /// Constraint function. This gives the value of each constraint.
    /// The output slice `g` is guaranteed to be the same size as `num_constraints`.
    /// This function is internally called by Ipopt callback `eval_g`.
    fn constraint(&mut self, x: &[Number], new_x: bool, g: &mut [Number]) -> bool;
    /// Specify lower and upper bounds, `g_l` and `g_u` respectively, on the value of the
    /// constraint function.
    fn constraint_bounds(&self, g_l: &mut [Number], g_u: &mut [Number]) -> bool;
    /// Construct the initial guess of the constraint multipliers for warm starts.
    /// The default leaves the multipliers of the previous solve in place.
    fn initial_constraint_multipliers(&self, _lambda: &mut [Number]) -> bool {
        false
    }
    /// Constraint Jacobian indices. These are the row and column indices of the
    /// non-zeros in the sparse representation of the matrix.
    /// This is called once; the reported structure is validated and reused for the lifetime
    /// of the `Ipopt` instance.
    fn constraint_jacobian_indices(&self, rows: &mut [Index], cols: &mut [Index]) -> bool;
    /// Constraint Jacobian values. Each value must correspond to the `row` and
    /// `column` as specified in `constraint_jacobian_indices`.
    /// This function is internally called by Ipopt callback `eval_jac_g`.
    fn constraint_jacobian_values(&mut self, x: &[Number], new_x: bool, vals: &mut [Number])
        -> bool;
    /// Number of non-zeros in the Hessian matrix. This includes the constraint Hessian.
    fn num_hessian_non_zeros(&self) -> usize;
    /// Hessian indices. These are the row and column indices of the non-zeros
    /// in the sparse representation of the matrix.
    /// This should be a symmetric matrix, fill the lower left triangular half only.
    /// Ensure that you provide coordinates for non-zeros of the
    /// objective and constraint Hessians.
    fn hessian_indices(&self, rows: &mut [Index], cols: &mut [Index]) -> bool;
    /// Hessian of the Lagrangian `obj_factor * f(x) + sum(lambda[i] * g_i(x))`. Each value
    /// must correspond to the `row` and `column` as specified in `hessian_indices`.
    /// This function is internally called by Ipopt callback `eval_h`.
    fn hessian_values(
        &mut self,
        x: &[Number],
        new_x: bool,
        obj_factor: Number,
        lambda: &[Number],
        new_lambda: bool,
        vals: &mut [Number],
    ) -> bool;
    /// Provide custom constraint function scaling by filling `g_scaling` and returning `true`.
    fn constraint_scaling(&self, _g_scaling: &mut [Number]) -> bool {
        false
    }
}

/// Type of option you can specify to Ipopt.
/// This is used internally for conversion.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum IpoptOption<'a> {
    /// Numeric option.
    Num(f64),
    /// String option.
    Str(&'a str),
    /// Integer option.
    Int(i32),
}

impl<'a> From<f64> for IpoptOption<'a> {
    fn from(opt: f64) -> Self {
        IpoptOption::Num(opt)
    }
}

impl<'a> From<&'a str> for IpoptOption<'a> {
    fn from(opt: &'a str) -> Self {
        IpoptOption::Str(opt)
    }
}

impl<'a> From<i32> for IpoptOption<'a> {
    fn from(opt: i32) -> Self {
        IpoptOption::Int(opt)
    }
}

/// Whether the engine is in its regular iterations or in the feasibility restoration phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AlgorithmMode {
    Regular,
    RestorationPhase,
}

impl AlgorithmMode {
    fn from_raw(mode: ffi::AlgorithmMode) -> Self {
        if mode == ffi::AlgorithmMode_RestorationPhaseMode {
            AlgorithmMode::RestorationPhase
        } else {
            AlgorithmMode::Regular
        }
    }
}

/// Progress data passed to the intermediate callback.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntermediateCallbackData {
    pub alg_mod: AlgorithmMode,
    pub iter_count: Index,
    pub obj_value: Number,
    pub inf_pr: Number,
    pub inf_du: Number,
    pub mu: Number,
    pub d_norm: Number,
    pub regularization_size: Number,
    pub alpha_du: Number,
    pub alpha_pr: Number,
    pub ls_trials: Index,
}

/// Type defining the callback function for giving intermediate execution control to
/// the user. If set, it is called once per iteration, providing the user with some
/// information on the state of the optimization. This can be used to print some user-
/// defined output. It also gives the user a way to terminate the optimization
/// prematurely. If this method returns false, Ipopt will terminate the optimization.
pub type IntermediateCallback<P> = fn(&mut P, IntermediateCallbackData) -> bool;

/// Primal and dual variables of the last solve.
#[derive(Copy, Clone, Debug)]
pub struct Solution<'a> {
    pub primal_variables: &'a [Number],
    pub constraint_multipliers: &'a [Number],
    pub lower_bound_multipliers: &'a [Number],
    pub upper_bound_multipliers: &'a [Number],
}

/// An interface to the problem and the latest solution.
pub struct SolverData<'a, P> {
    pub problem: &'a P,
    pub solution: Solution<'a>,
}

/// A mutable interface to the problem and the latest solution, for instance to store the
/// solution inside the problem for a later warm start.
pub struct SolverDataMut<'a, P> {
    pub problem: &'a mut P,
    pub solution: Solution<'a>,
}

/// Everything a solve produces. Inspect `status` before trusting the rest.
pub struct SolveResult<'a, P> {
    pub solver_data: SolverDataMut<'a, P>,
    pub constraint_values: &'a [Number],
    pub objective_value: Number,
    pub status: SolveStatus,
}

/// Ipopt interface.
///
/// Owns the native problem handle and the registry of callback state reached by the engine
/// during a solve. The handle is declared first so it is freed before the registry is.
pub struct Ipopt<P: BasicProblem> {
    /// Native problem handle.
    handle: ProblemHandle,
    /// User problem and intermediate callback, at a stable heap address.
    registry: Box<CallbackRegistry<P>>,
    descriptor: SparsityDescriptor,
    /// Vector of variables. This stores the initial guess and the solution.
    x: Vec<Number>,
    /// Constraint values at the solution.
    g: Vec<Number>,
    /// Constraint multipliers.
    mult_g: Vec<Number>,
    /// Variable lower bound multipliers.
    mult_x_l: Vec<Number>,
    /// Variable upper bound multipliers.
    mult_x_u: Vec<Number>,
    /// Warm start constraint multipliers, available for constrained problems.
    init_constraint_multipliers: Option<fn(&P, &mut [Number]) -> bool>,
}

impl<P: BasicProblem> Ipopt<P> {
    /// Create a new unconstrained problem. Second derivatives are approximated with a
    /// limited-memory quasi-Newton method.
    pub fn new_unconstrained(problem: P) -> Result<Self, CreateError> {
        Self::unconstrained_on(default_api(), problem)
    }

    fn unconstrained_on(api: &'static ffi::Api, problem: P) -> Result<Self, CreateError> {
        let descriptor = SparsityDescriptor::new(
            problem.num_variables(),
            0,
            0,
            0,
            problem.indexing_style(),
        )?;
        let callbacks = EvalCallbacks {
            eval_f: registry::eval_f::<P>,
            eval_grad_f: registry::eval_grad_f::<P>,
            eval_g: None,
            eval_jac_g: None,
            eval_h: None,
        };
        let mut ipopt =
            Self::create(api, problem, descriptor, Vec::new(), Vec::new(), None, callbacks)?;
        if !ipopt
            .handle
            .add_option("hessian_approximation", "limited-memory".into())
        {
            return Err(CreateError::OptionRejected("hessian_approximation"));
        }
        Ok(ipopt)
    }

    /// Shared construction path. Bounds are normalized to the sentinel convention before
    /// they are handed to the engine, and problem supplied scaling is registered.
    fn create(
        api: &'static ffi::Api,
        problem: P,
        descriptor: SparsityDescriptor,
        mut g_l: Vec<Number>,
        mut g_u: Vec<Number>,
        g_scaling: Option<Vec<Number>>,
        callbacks: EvalCallbacks,
    ) -> Result<Self, CreateError> {
        let n = descriptor.num_variables;
        let m = descriptor.num_constraints;

        let mut x_l = vec![0.0; n];
        let mut x_u = vec![0.0; n];
        if !problem.bounds(&mut x_l, &mut x_u) {
            return Err(CreateError::BoundsUnavailable("variable"));
        }
        normalize_bounds("variable", &mut x_l, &mut x_u)?;
        normalize_bounds("constraint", &mut g_l, &mut g_u)?;

        let obj_scaling = problem.objective_scaling();
        let mut x_scaling = vec![1.0; n];
        let x_scaling = if problem.variable_scaling(&mut x_scaling) {
            Some(x_scaling)
        } else {
            None
        };

        let handle = ProblemHandle::create(
            api,
            &descriptor,
            &mut x_l,
            &mut x_u,
            &mut g_l,
            &mut g_u,
            callbacks,
        )?;

        let mut ipopt = Ipopt {
            handle,
            registry: Box::new(CallbackRegistry::new(problem, descriptor)),
            descriptor,
            x: vec![0.0; n],
            g: vec![0.0; m],
            mult_g: vec![0.0; m],
            mult_x_l: vec![0.0; n],
            mult_x_u: vec![0.0; n],
            init_constraint_multipliers: None,
        };

        #[allow(clippy::float_cmp)]
        let custom_obj_scaling = obj_scaling != 1.0;
        if custom_obj_scaling || x_scaling.is_some() || g_scaling.is_some() {
            if !ipopt.set_problem_scaling(obj_scaling, x_scaling.as_deref(), g_scaling.as_deref())
            {
                return Err(CreateError::ScalingRejected);
            }
            if !ipopt
                .handle
                .add_option("nlp_scaling_method", "user-scaling".into())
            {
                return Err(CreateError::OptionRejected("nlp_scaling_method"));
            }
        }

        Ok(ipopt)
    }

    /// Name of the engine behind this instance.
    pub fn engine_name(&self) -> &'static str {
        self.handle.engine_name()
    }

    /// Get an immutable reference to the problem and the latest solution.
    pub fn solver_data(&self) -> SolverData<P> {
        SolverData {
            problem: &self.registry.problem,
            solution: Solution {
                primal_variables: &self.x,
                constraint_multipliers: &self.mult_g,
                lower_bound_multipliers: &self.mult_x_l,
                upper_bound_multipliers: &self.mult_x_u,
            },
        }
    }

    /// Get a mutable reference to the problem and the latest solution.
    pub fn solver_data_mut(&mut self) -> SolverDataMut<P> {
        SolverDataMut {
            problem: &mut self.registry.problem,
            solution: Solution {
                primal_variables: &self.x,
                constraint_multipliers: &self.mult_g,
                lower_bound_multipliers: &self.mult_x_l,
                upper_bound_multipliers: &self.mult_x_u,
            },
        }
    }

    /// Set an Ipopt option. Returns `None` if the engine rejects it: an unknown name, a value
    /// of the wrong type or out of range, or a string with an interior NUL byte. A rejected
    /// option leaves earlier settings in place.
    pub fn set_option<'a, O>(&mut self, name: &str, option: O) -> Option<&mut Self>
    where
        O: Into<IpoptOption<'a>>,
    {
        if self.handle.add_option(name, option.into()) {
            Some(self)
        } else {
            None
        }
    }

    /// Set or clear the intermediate callback. If the engine refuses, the previous callback
    /// stays in place.
    pub fn set_intermediate_callback(&mut self, mb_cb: Option<IntermediateCallback<P>>) -> bool {
        let entry = mb_cb.map(|_| registry::intermediate_cb::<P> as ffi::Intermediate_CB);
        if !self.handle.set_intermediate_callback(entry) {
            return false;
        }
        self.registry.intermediate_callback = mb_cb;
        true
    }

    /// Register scaling factors for the objective, and optionally the variables and
    /// constraints. They take effect when the `nlp_scaling_method` option is
    /// `"user-scaling"`. Returns `false` if a vector has the wrong length or the engine
    /// rejects a factor.
    pub fn set_problem_scaling(
        &mut self,
        obj_scaling: Number,
        x_scaling: Option<&[Number]>,
        g_scaling: Option<&[Number]>,
    ) -> bool {
        if x_scaling.map_or(false, |s| s.len() != self.descriptor.num_variables)
            || g_scaling.map_or(false, |s| s.len() != self.descriptor.num_constraints)
        {
            log::debug!("scaling vectors do not match the problem size");
            return false;
        }
        let mut x_scaling = x_scaling.map(<[Number]>::to_vec).unwrap_or_default();
        let mut g_scaling = g_scaling.map(<[Number]>::to_vec).unwrap_or_default();
        self.handle
            .set_scaling(obj_scaling, &mut x_scaling, &mut g_scaling)
    }

    /// Open a file that receives the engine's iteration table and exit summary.
    pub fn open_output_file(&mut self, file_name: &str, print_level: i32) -> bool {
        self.handle.open_output_file(file_name, print_level)
    }

    /// Solve non-linear problem.
    /// Return the solve status and the final value of the objective function.
    pub fn solve(&mut self) -> SolveResult<P> {
        let Ipopt {
            handle,
            registry,
            x,
            g,
            mult_g,
            mult_x_l,
            mult_x_u,
            init_constraint_multipliers,
            ..
        } = self;

        let mut objective_value = 0.0;
        let status = if registry.problem.initial_point(x) {
            registry.problem.initial_bounds_multipliers(mult_x_l, mult_x_u);
            if let Some(init) = *init_constraint_multipliers {
                init(&registry.problem, mult_g);
            }
            let user_data = registry.as_user_data();
            let raw = unsafe {
                handle.solve(
                    x,
                    g,
                    &mut objective_value,
                    mult_g,
                    mult_x_l,
                    mult_x_u,
                    user_data,
                )
            };
            SolveStatus::from_raw(raw)
        } else {
            log::error!("problem did not provide an initial point");
            SolveStatus::InvalidProblemDefinition
        };
        log::debug!("{} engine finished with {:?}", handle.engine_name(), status);

        SolveResult {
            solver_data: SolverDataMut {
                problem: &mut registry.problem,
                solution: Solution {
                    primal_variables: x,
                    constraint_multipliers: mult_g,
                    lower_bound_multipliers: mult_x_l,
                    upper_bound_multipliers: mult_x_u,
                },
            },
            constraint_values: g,
            objective_value,
            status,
        }
    }
}

impl<P: NewtonProblem> Ipopt<P> {
    /// Create a new unconstrained problem with exact second derivatives.
    pub fn new_newton(problem: P) -> Result<Self, CreateError> {
        let descriptor = SparsityDescriptor::new(
            problem.num_variables(),
            0,
            0,
            problem.num_hessian_non_zeros(),
            problem.indexing_style(),
        )?;
        let callbacks = EvalCallbacks {
            eval_f: registry::eval_f::<P>,
            eval_grad_f: registry::eval_grad_f::<P>,
            eval_g: None,
            eval_jac_g: None,
            eval_h: Some(registry::eval_h::<P>),
        };
        Self::create(
            default_api(),
            problem,
            descriptor,
            Vec::new(),
            Vec::new(),
            None,
            callbacks,
        )
    }
}

impl<P: ConstrainedProblem> Ipopt<P> {
    /// Create a new constrained problem.
    pub fn new(problem: P) -> Result<Self, CreateError> {
        let m = problem.num_constraints();
        let descriptor = SparsityDescriptor::new(
            problem.num_variables(),
            m,
            problem.num_constraint_jacobian_non_zeros(),
            problem.num_hessian_non_zeros(),
            problem.indexing_style(),
        )?;

        let mut g_l = vec![0.0; m];
        let mut g_u = vec![0.0; m];
        if !problem.constraint_bounds(&mut g_l, &mut g_u) {
            return Err(CreateError::BoundsUnavailable("constraint"));
        }
        let mut g_scaling = vec![1.0; m];
        let g_scaling = if problem.constraint_scaling(&mut g_scaling) {
            Some(g_scaling)
        } else {
            None
        };

        let callbacks = EvalCallbacks {
            eval_f: registry::eval_f::<P>,
            eval_grad_f: registry::eval_grad_f::<P>,
            eval_g: Some(registry::eval_g::<P>),
            eval_jac_g: Some(registry::eval_jac_g::<P>),
            eval_h: Some(registry::eval_full_h::<P>),
        };
        let mut ipopt =
            Self::create(default_api(), problem, descriptor, g_l, g_u, g_scaling, callbacks)?;
        ipopt.init_constraint_multipliers = Some(P::initial_constraint_multipliers);
        Ok(ipopt)
    }
}
