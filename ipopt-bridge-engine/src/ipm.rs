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

//! Primal-dual interior point method.
//!
//! The problem
//!
//! ```text
//! min f(x)  s.t.  g_L <= g(x) <= g_U,  x_L <= x <= x_U
//! ```
//!
//! is brought into the form `min f(x) s.t. c(x, s) = 0, l <= (x, s) <= u` by giving every
//! inequality constraint a slack `s`, removing fixed variables and scaling. The barrier
//! subproblems are solved with Newton steps on the primal-dual equations, safeguarded by the
//! inertia correction in [`crate::kkt`] and a backtracking line search on an exact `l1`
//! penalty function with a second order correction.

use crate::bfgs::LimitedMemoryBfgs;
use crate::journal::{IterationRow, Journal};
use crate::kkt::{InertiaCorrector, Kkt, KktError, SymmetricSolver};
use crate::nlp::{CallbackNlp, EvalError};
use crate::options::OptionsList;
use crate::problem::ProblemData;
use ffi::{ApplicationReturnStatus, Intermediate_CB, Number, UserDataPtr};
use ipopt_bridge_sys as ffi;
use nalgebra::{DMatrix, DVector};
use std::time::Instant;

/// Reference value for the scaling of the dual and complementarity errors.
const S_MAX: f64 = 100.0;
const KAPPA_EPSILON: f64 = 10.0;
const KAPPA_MU: f64 = 0.2;
const THETA_MU: f64 = 1.5;
const TAU_MIN: f64 = 0.99;
const KAPPA_SIGMA: f64 = 1e10;
const ETA_ARMIJO: f64 = 1e-4;
const RHO_PENALTY: f64 = 0.1;
const MAX_LS_TRIALS: i32 = 40;
const CONSTR_MULT_INIT_MAX: f64 = 1e3;
const ACCEPTABLE_DUAL_INF: f64 = 1e10;
const ACCEPTABLE_CONSTR_VIOL: f64 = 1e-2;
const ACCEPTABLE_COMPL_INF: f64 = 1e-2;

/// Starting point and, for warm starts, the initial multipliers.
#[derive(Clone, Debug, Default)]
pub struct StartPoint {
    pub x: Vec<Number>,
    pub mult_g: Option<Vec<Number>>,
    pub mult_x_l: Option<Vec<Number>>,
    pub mult_x_u: Option<Vec<Number>>,
}

/// Final iterate in the user's space.
#[derive(Clone, Debug)]
pub struct Solution {
    pub x: Vec<Number>,
    pub g: Vec<Number>,
    pub obj: Number,
    pub mult_g: Vec<Number>,
    pub mult_x_l: Vec<Number>,
    pub mult_x_u: Vec<Number>,
}

#[derive(Clone, Debug)]
pub struct Outcome {
    pub status: ApplicationReturnStatus,
    pub iterations: i32,
    /// `None` when the solve stopped before the first iterate was available.
    pub solution: Option<Solution>,
}

/// Early termination with the given status.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Exit(ApplicationReturnStatus);

impl From<EvalError> for Exit {
    fn from(err: EvalError) -> Self {
        log::debug!("{}", err);
        Exit(match err {
            EvalError::Structure { .. } => ffi::ApplicationReturnStatus_Invalid_Problem_Definition,
            EvalError::MissingHessian => ffi::ApplicationReturnStatus_Invalid_Option,
            EvalError::Failed(_) | EvalError::NonFinite(_) => {
                ffi::ApplicationReturnStatus_Invalid_Number_Detected
            }
        })
    }
}

impl From<KktError> for Exit {
    fn from(err: KktError) -> Self {
        log::debug!("{}", err);
        Exit(ffi::ApplicationReturnStatus_Error_In_Step_Computation)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum ScalingMethod {
    None,
    User,
    GradientBased,
}

/// Option values read at the start of a solve.
#[derive(Copy, Clone, Debug)]
struct Settings {
    tol: f64,
    acceptable_tol: f64,
    acceptable_iter: i32,
    constr_viol_tol: f64,
    dual_inf_tol: f64,
    compl_inf_tol: f64,
    max_iter: i32,
    max_cpu_time: f64,
    mu_init: f64,
    adaptive_mu: bool,
    bound_push: f64,
    bound_frac: f64,
    bound_mult_init_val: f64,
    lower_inf: f64,
    upper_inf: f64,
    scaling: ScalingMethod,
    max_gradient: f64,
    obj_scaling_factor: f64,
    exact_hessian: bool,
    warm_start: bool,
    warm_start_bound_push: f64,
    warm_start_mult_bound_push: f64,
    diverging_tol: f64,
    print_level: i32,
    banner: bool,
}

impl Settings {
    fn new(options: &OptionsList) -> Self {
        Settings {
            tol: options.num("tol"),
            acceptable_tol: options.num("acceptable_tol"),
            acceptable_iter: options.int("acceptable_iter"),
            constr_viol_tol: options.num("constr_viol_tol"),
            dual_inf_tol: options.num("dual_inf_tol"),
            compl_inf_tol: options.num("compl_inf_tol"),
            max_iter: options.int("max_iter"),
            max_cpu_time: options.num("max_cpu_time"),
            mu_init: options.num("mu_init"),
            adaptive_mu: options.str("mu_strategy") == "adaptive",
            bound_push: options.num("bound_push"),
            bound_frac: options.num("bound_frac"),
            bound_mult_init_val: options.num("bound_mult_init_val"),
            lower_inf: options.num("nlp_lower_bound_inf"),
            upper_inf: options.num("nlp_upper_bound_inf"),
            scaling: match options.str("nlp_scaling_method") {
                "none" => ScalingMethod::None,
                "user-scaling" => ScalingMethod::User,
                _ => ScalingMethod::GradientBased,
            },
            max_gradient: options.num("nlp_scaling_max_gradient"),
            obj_scaling_factor: options.num("obj_scaling_factor"),
            exact_hessian: options.str("hessian_approximation") == "exact",
            warm_start: options.str("warm_start_init_point") == "yes",
            warm_start_bound_push: options.num("warm_start_bound_push"),
            warm_start_mult_bound_push: options.num("warm_start_mult_bound_push"),
            diverging_tol: options.num("diverging_iterates_tol"),
            print_level: options.int("print_level"),
            banner: options.str("sb") != "yes",
        }
    }

    /// Smallest barrier parameter used.
    fn mu_min(&self) -> f64 {
        self.tol.min(self.compl_inf_tol) / 11.0
    }

    fn has_lower(&self, v: f64) -> bool {
        v > self.lower_inf
    }

    fn has_upper(&self, v: f64) -> bool {
        v < self.upper_inf
    }
}

/// Process CPU time where the platform provides it, wall time otherwise.
struct CpuClock {
    cpu_start: Option<f64>,
    wall_start: Instant,
}

impl CpuClock {
    fn start() -> Self {
        CpuClock {
            cpu_start: process_cpu_time(),
            wall_start: Instant::now(),
        }
    }

    fn elapsed(&self) -> f64 {
        match (self.cpu_start, process_cpu_time()) {
            (Some(start), Some(now)) => now - start,
            _ => self.wall_start.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(unix)]
fn process_cpu_time() -> Option<f64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
    if rc == 0 {
        Some(ts.tv_sec as f64 + ts.tv_nsec as f64 * 1e-9)
    } else {
        None
    }
}

#[cfg(not(unix))]
fn process_cpu_time() -> Option<f64> {
    None
}

/// Objective, variable and constraint scaling factors.
#[derive(Clone, Debug)]
struct Scaling {
    obj: f64,
    x: Vec<f64>,
    g: Vec<f64>,
}

/// Mapping between the user's variables and constraints and the internal primal vector
/// `y = (x_free, s)`. Bounds are stored scaled.
#[derive(Clone, Debug)]
struct Layout {
    free: Vec<usize>,
    fixed: Vec<(usize, f64)>,
    /// Position in `y` of the slack of each inequality constraint.
    slack: Vec<Option<usize>>,
    lower: DVector<f64>,
    upper: DVector<f64>,
    has_lower: Vec<bool>,
    has_upper: Vec<bool>,
    /// Scaled right hand side of each equality constraint.
    eq_rhs: DVector<f64>,
    /// Scaling factor of each entry of `y`.
    var_scale: Vec<f64>,
}

impl Layout {
    fn new(data: &ProblemData, settings: &Settings, scaling: &Scaling) -> Self {
        let mut free = Vec::new();
        let mut fixed = Vec::new();
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        let mut has_lower = Vec::new();
        let mut has_upper = Vec::new();
        let mut var_scale = Vec::new();

        for i in 0..data.n {
            let (l, u) = (data.x_l[i], data.x_u[i]);
            let (hl, hu) = (settings.has_lower(l), settings.has_upper(u));
            if hl && hu && l == u {
                fixed.push((i, l));
                continue;
            }
            let d = scaling.x[i];
            free.push(i);
            lower.push(if hl { d * l } else { f64::NEG_INFINITY });
            upper.push(if hu { d * u } else { f64::INFINITY });
            has_lower.push(hl);
            has_upper.push(hu);
            var_scale.push(d);
        }

        let mut slack = vec![None; data.m];
        let mut eq_rhs = DVector::zeros(data.m);
        for j in 0..data.m {
            let (l, u) = (data.g_l[j], data.g_u[j]);
            let (hl, hu) = (settings.has_lower(l), settings.has_upper(u));
            let d = scaling.g[j];
            if hl && hu && l == u {
                eq_rhs[j] = d * l;
                continue;
            }
            slack[j] = Some(lower.len());
            lower.push(if hl { d * l } else { f64::NEG_INFINITY });
            upper.push(if hu { d * u } else { f64::INFINITY });
            has_lower.push(hl);
            has_upper.push(hu);
            var_scale.push(d);
        }

        Layout {
            free,
            fixed,
            slack,
            lower: DVector::from_vec(lower),
            upper: DVector::from_vec(upper),
            has_lower,
            has_upper,
            eq_rhs,
            var_scale,
        }
    }

    fn nvar(&self) -> usize {
        self.lower.len()
    }

    fn nfree(&self) -> usize {
        self.free.len()
    }

    fn num_bounds(&self) -> usize {
        self.has_lower.iter().filter(|&&b| b).count() + self.has_upper.iter().filter(|&&b| b).count()
    }

    /// Moves `v` at least `push`/`frac` away from the bounds of entry `i`.
    fn push_inside(&self, i: usize, v: f64, push: f64, frac: f64) -> f64 {
        let (l, u) = (self.lower[i], self.upper[i]);
        match (self.has_lower[i], self.has_upper[i]) {
            (true, true) => {
                let p_l = (push * l.abs().max(1.0)).min(frac * (u - l));
                let p_u = (push * u.abs().max(1.0)).min(frac * (u - l));
                if v < l + p_l {
                    l + p_l
                } else if v > u - p_u {
                    u - p_u
                } else {
                    v
                }
            }
            (true, false) => v.max(l + push * l.abs().max(1.0)),
            (false, true) => v.min(u - push * u.abs().max(1.0)),
            (false, false) => v,
        }
    }
}

/// Function values at a primal point. `c` is scaled, `g` is in the user's units.
#[derive(Clone, Debug)]
struct Eval {
    f: f64,
    g: DVector<f64>,
    c: DVector<f64>,
}

/// Scaled derivatives with respect to `y`, plus unscaled derivatives for fixed variables.
#[derive(Clone, Debug)]
struct Derivs {
    grad: DVector<f64>,
    jac: DMatrix<f64>,
    fixed_grad: DVector<f64>,
    fixed_jac: DMatrix<f64>,
}

#[derive(Clone, Debug)]
struct State {
    y: DVector<f64>,
    lambda: DVector<f64>,
    zl: DVector<f64>,
    zu: DVector<f64>,
    eval: Eval,
    derivs: Derivs,
}

/// Accepted trial step.
struct Step {
    dy: DVector<f64>,
    alpha: f64,
    trials: i32,
    y: DVector<f64>,
    eval: Eval,
}

#[derive(Copy, Clone, Debug)]
struct Errors {
    overall: f64,
    dual: f64,
    dual_unscaled: f64,
    primal_unscaled: f64,
    compl_unscaled: f64,
}

struct Solver {
    settings: Settings,
    nlp: CallbackNlp,
    scaling: Scaling,
    layout: Layout,
    intermediate_cb: Option<Intermediate_CB>,
    user_data: UserDataPtr,
    clock: CpuClock,
    iter: i32,
}

/// Solves the problem in `data` starting from `start`.
///
/// Option values are read once, at the start of the solve.
pub fn solve(
    data: &ProblemData,
    mut journal: Option<&mut Journal>,
    start: &StartPoint,
    user_data: UserDataPtr,
) -> Outcome {
    let settings = Settings::new(&data.options);
    let clock = CpuClock::start();
    if settings.banner && settings.print_level > 0 {
        log::debug!(
            "reference interior point engine: {} variables, {} constraints",
            data.n,
            data.m
        );
    }
    if settings.print_level >= 5 {
        for (keyword, value) in data.options.user_values() {
            log::debug!("user option {} = {:?}", keyword, value);
        }
    }
    if let Some(journal) = journal.as_deref_mut() {
        journal.start_solve(data.n, data.m, data.nele_jac, data.nele_hess);
    }

    let mut iterations = 0;
    let (status, solution) = match check_problem(data, &settings)
        .and_then(|_| Solver::new(data, settings, user_data, &start.x, clock))
    {
        Err(Exit(status)) => (status, None),
        Ok(mut solver) => {
            let result = solver.run(start, journal.as_deref_mut());
            iterations = solver.iter;
            result
        }
    };

    let message = exit_message(status);
    if settings.print_level > 0 {
        log::info!("EXIT: {}", message);
    }
    if let Some(journal) = journal {
        let obj = solution.as_ref().map_or(f64::NAN, |s| s.obj);
        journal.finish(message, iterations, obj);
    }
    Outcome {
        status,
        iterations,
        solution,
    }
}

/// Checks bound consistency and degrees of freedom.
fn check_problem(data: &ProblemData, settings: &Settings) -> Result<(), Exit> {
    let inconsistent = |l: &[f64], u: &[f64]| {
        l.iter()
            .zip(u.iter())
            .any(|(&l, &u)| settings.has_lower(l) && settings.has_upper(u) && l > u)
    };
    if inconsistent(&data.x_l, &data.x_u) || inconsistent(&data.g_l, &data.g_u) {
        log::debug!("inconsistent variable bounds or constraint sides");
        return Err(Exit(ffi::ApplicationReturnStatus_Infeasible_Problem_Detected));
    }

    let is_fixed = |l: f64, u: f64| settings.has_lower(l) && settings.has_upper(u) && l == u;
    let num_free = (0..data.n)
        .filter(|&i| !is_fixed(data.x_l[i], data.x_u[i]))
        .count();
    let num_eq = (0..data.m)
        .filter(|&j| is_fixed(data.g_l[j], data.g_u[j]))
        .count();
    if num_eq > num_free {
        log::debug!(
            "{} equality constraints but only {} free variables",
            num_eq,
            num_free
        );
        return Err(Exit(ffi::ApplicationReturnStatus_Not_Enough_Degrees_Of_Freedom));
    }
    Ok(())
}

fn compute_scaling(
    nlp: &mut CallbackNlp,
    data: &ProblemData,
    settings: &Settings,
    x0: &[f64],
) -> Result<Scaling, Exit> {
    let mut scaling = Scaling {
        obj: 1.0,
        x: vec![1.0; data.n],
        g: vec![1.0; data.m],
    };
    match settings.scaling {
        ScalingMethod::None => {}
        ScalingMethod::User => {
            if let Some(user) = data.scaling.as_ref() {
                scaling.obj = user.obj;
                if let Some(x) = user.x.as_ref() {
                    scaling.x.copy_from_slice(x);
                }
                if let Some(g) = user.g.as_ref() {
                    scaling.g.copy_from_slice(g);
                }
            }
        }
        ScalingMethod::GradientBased => {
            let factor = |max: f64| {
                if max > settings.max_gradient {
                    settings.max_gradient / max
                } else {
                    1.0
                }
            };
            let grad = nlp.gradient(x0)?;
            scaling.obj = factor(norm_inf(&grad));
            let jac = nlp.jacobian(x0)?;
            for j in 0..data.m {
                scaling.g[j] = factor(jac.row(j).iter().fold(0.0, |a, v| a.max(v.abs())));
            }
        }
    }
    scaling.obj *= settings.obj_scaling_factor;
    Ok(scaling)
}

impl Solver {
    fn new(
        data: &ProblemData,
        settings: Settings,
        user_data: UserDataPtr,
        x0: &[f64],
        clock: CpuClock,
    ) -> Result<Self, Exit> {
        let mut nlp = CallbackNlp::new(data, user_data, settings.exact_hessian)?;
        let scaling = compute_scaling(&mut nlp, data, &settings, x0)?;
        let layout = Layout::new(data, &settings, &scaling);
        Ok(Solver {
            settings,
            nlp,
            scaling,
            layout,
            intermediate_cb: data.intermediate_cb,
            user_data,
            clock,
            iter: 0,
        })
    }

    fn run(
        &mut self,
        start: &StartPoint,
        journal: Option<&mut Journal>,
    ) -> (ApplicationReturnStatus, Option<Solution>) {
        let mut slot = None;
        let status = match self.iterate(&mut slot, start, journal) {
            Ok(status) => status,
            Err(Exit(status)) => status,
        };
        let solution = slot.as_ref().map(|state| self.solution(state));
        (status, solution)
    }

    fn iterate(
        &mut self,
        slot: &mut Option<State>,
        start: &StartPoint,
        mut journal: Option<&mut Journal>,
    ) -> Result<ApplicationReturnStatus, Exit> {
        let settings = self.settings;
        let nvar = self.layout.nvar();
        let nfree = self.layout.nfree();
        let m = self.layout.slack.len();

        if nvar == 0 {
            // Every variable is fixed and there are no constraints.
            let y = DVector::zeros(0);
            let eval = self.evaluate(&y)?;
            let derivs = self.derivatives(&y)?;
            *slot = Some(State {
                y,
                lambda: DVector::zeros(m),
                zl: DVector::zeros(0),
                zu: DVector::zeros(0),
                eval,
                derivs,
            });
            return Ok(ffi::ApplicationReturnStatus_Solve_Succeeded);
        }

        let st = slot.insert(self.initial_state(start)?);

        let mut mu = settings.mu_init;
        let mut corrector = InertiaCorrector::default();
        let mut bfgs = if settings.exact_hessian {
            None
        } else {
            Some(LimitedMemoryBfgs::new(nfree))
        };
        let mut nu = 0.0_f64;
        let mut acceptable_count = 0;
        let mut tiny_count = 0;
        let mut force_mu_decrease = false;
        let mut row = IterationRow {
            iter: 0,
            restoration: false,
            objective: 0.0,
            inf_pr: 0.0,
            inf_du: 0.0,
            mu,
            d_norm: 0.0,
            regularization: 0.0,
            alpha_du: 0.0,
            alpha_pr: 0.0,
            ls_trials: 0,
        };

        loop {
            let errors = self.errors(st);
            row.iter = self.iter;
            row.objective = st.eval.f / self.scaling.obj;
            row.inf_pr = errors.primal_unscaled;
            row.inf_du = errors.dual;
            row.mu = mu;
            if !self.report(&row, journal.as_deref_mut()) {
                return Ok(ffi::ApplicationReturnStatus_User_Requested_Stop);
            }

            if errors.overall <= settings.tol
                && errors.dual_unscaled <= settings.dual_inf_tol
                && errors.primal_unscaled <= settings.constr_viol_tol
                && errors.compl_unscaled <= settings.compl_inf_tol
            {
                return Ok(ffi::ApplicationReturnStatus_Solve_Succeeded);
            }
            if self.is_acceptable(&errors) {
                acceptable_count += 1;
                if settings.acceptable_iter > 0 && acceptable_count >= settings.acceptable_iter {
                    return Ok(ffi::ApplicationReturnStatus_Solved_To_Acceptable_Level);
                }
            } else {
                acceptable_count = 0;
            }
            if self.iter >= settings.max_iter {
                return Ok(ffi::ApplicationReturnStatus_Maximum_Iterations_Exceeded);
            }
            if self.clock.elapsed() > settings.max_cpu_time {
                return Ok(ffi::ApplicationReturnStatus_Maximum_CpuTime_Exceeded);
            }

            mu = self.update_mu(st, mu, force_mu_decrease);
            force_mu_decrease = false;

            // Primal-dual matrix.
            let mut h = DMatrix::zeros(nvar, nvar);
            match bfgs.as_ref() {
                Some(bfgs) => h.view_mut((0, 0), (nfree, nfree)).copy_from(&bfgs.matrix()),
                None => h.view_mut((0, 0), (nfree, nfree)).copy_from(&self.hessian(st)?),
            }
            let sigma = self.sigma(st);
            for i in 0..nvar {
                h[(i, i)] += sigma[i];
            }
            let kkt = corrector.factorize(&h, &st.derivs.jac, mu)?;
            if kkt.delta_c > 0.0 {
                log::trace!("constraint Jacobian regularized by {:e}", kkt.delta_c);
            }

            let grad_phi = self.barrier_gradient(st, mu);
            let r_d = &grad_phi + st.derivs.jac.tr_mul(&st.lambda);
            let (dy, dlambda) = kkt.solve(&r_d, &st.eval.c);
            let tau = TAU_MIN.max(1.0 - mu);
            let alpha_max = self.max_primal_step(&st.y, &dy, tau);

            let tiny = dy
                .iter()
                .zip(st.y.iter())
                .all(|(d, y)| d.abs() <= 10.0 * f64::EPSILON * (1.0 + y.abs()));
            let step = if tiny {
                tiny_count += 1;
                if tiny_count >= 2 && mu <= settings.mu_min() {
                    return Ok(ffi::ApplicationReturnStatus_Search_Direction_Becomes_Too_Small);
                }
                force_mu_decrease = true;
                let y = &st.y + &dy * alpha_max;
                let eval = self.evaluate(&y)?;
                Step {
                    dy,
                    alpha: alpha_max,
                    trials: 1,
                    y,
                    eval,
                }
            } else {
                tiny_count = 0;
                let c_norm = norm_1(&st.eval.c);
                if c_norm > 0.0 {
                    let curvature = dy.dot(&(&h * &dy)) + kkt.delta_w * dy.norm_squared();
                    let nu_trial = (grad_phi.dot(&dy) + 0.5 * curvature.max(0.0))
                        / ((1.0 - RHO_PENALTY) * c_norm);
                    nu = nu.max(nu_trial);
                }
                match self.line_search(st, mu, nu, &grad_phi, &r_d, &dy, alpha_max, tau, &kkt) {
                    Some(step) => step,
                    None => {
                        log::debug!("line search failed at iteration {}", self.iter);
                        return Ok(if errors.overall <= settings.acceptable_tol {
                            ffi::ApplicationReturnStatus_Solved_To_Acceptable_Level
                        } else {
                            ffi::ApplicationReturnStatus_Restoration_Failed
                        });
                    }
                }
            };

            let (dzl, dzu) = self.bound_multiplier_steps(st, mu, &step.dy);
            let alpha_z = self.max_dual_step(st, &dzl, &dzu, tau);

            let old_x = st.y.rows(0, nfree).into_owned();
            st.lambda += &dlambda * step.alpha;
            let old_lagrangian_grad = lagrangian_grad(&st.derivs, &st.lambda, nfree);

            st.zl += &dzl * alpha_z;
            st.zu += &dzu * alpha_z;
            st.y = step.y;
            st.eval = step.eval;
            self.safeguard_multipliers(st, mu);
            st.derivs = self.derivatives(&st.y)?;

            if let Some(bfgs) = bfgs.as_mut() {
                let s = st.y.rows(0, nfree) - old_x;
                let y = lagrangian_grad(&st.derivs, &st.lambda, nfree) - old_lagrangian_grad;
                bfgs.update(s, y);
            }

            row.d_norm = norm_inf(&step.dy);
            row.regularization = kkt.delta_w;
            row.alpha_pr = step.alpha;
            row.alpha_du = alpha_z;
            row.ls_trials = step.trials;
            self.iter += 1;

            let x_max = self.full_x(&st.y).iter().fold(0.0_f64, |a, v| a.max(v.abs()));
            if x_max > settings.diverging_tol {
                return Ok(ffi::ApplicationReturnStatus_Diverging_Iterates);
            }
        }
    }

    fn initial_state(&mut self, start: &StartPoint) -> Result<State, Exit> {
        let settings = self.settings;
        let nvar = self.layout.nvar();
        let nfree = self.layout.nfree();
        let (push, frac) = if settings.warm_start {
            (settings.warm_start_bound_push, settings.warm_start_bound_push)
        } else {
            (settings.bound_push, settings.bound_frac)
        };

        let mut y = DVector::zeros(nvar);
        for (k, &i) in self.layout.free.iter().enumerate() {
            y[k] = self.layout.push_inside(k, self.scaling.x[i] * start.x[i], push, frac);
        }
        let x = self.full_x(&y);
        let g = self.nlp.constraints(&x)?;
        for (j, slack) in self.layout.slack.iter().enumerate() {
            if let Some(p) = *slack {
                y[p] = self.layout.push_inside(p, self.scaling.g[j] * g[j], push, frac);
            }
        }

        let eval = self.evaluate(&y)?;
        let derivs = self.derivatives(&y)?;

        let init = |has: &[bool], v: f64| {
            DVector::from_iterator(has.len(), has.iter().map(|&h| if h { v } else { 0.0 }))
        };
        let mut zl = init(&self.layout.has_lower, settings.bound_mult_init_val);
        let mut zu = init(&self.layout.has_upper, settings.bound_mult_init_val);
        let m = self.layout.slack.len();

        let warm = if settings.warm_start {
            self.warm_start_multipliers(start)
        } else {
            None
        };
        let lambda = match warm {
            Some((lambda, wzl, wzu)) => {
                zl = wzl;
                zu = wzu;
                lambda
            }
            None if m > 0 => least_squares_multipliers(&derivs, &zl, &zu),
            None => DVector::zeros(0),
        };

        Ok(State {
            y,
            lambda,
            zl,
            zu,
            eval,
            derivs,
        })
    }

    /// Scaled multipliers from the user supplied ones, pushed away from zero.
    fn warm_start_multipliers(
        &self,
        start: &StartPoint,
    ) -> Option<(DVector<f64>, DVector<f64>, DVector<f64>)> {
        let m = self.layout.slack.len();
        let nvar = self.layout.nvar();
        let (mult_x_l, mult_x_u) = match (start.mult_x_l.as_ref(), start.mult_x_u.as_ref()) {
            (Some(l), Some(u)) => (l, u),
            _ => return None,
        };
        let mult_g = match start.mult_g.as_ref() {
            Some(mult_g) => mult_g.clone(),
            None if m == 0 => Vec::new(),
            None => return None,
        };

        let sc = &self.scaling;
        let lambda = DVector::from_iterator(m, (0..m).map(|j| sc.obj * mult_g[j] / sc.g[j]));
        let mut zl = DVector::zeros(nvar);
        let mut zu = DVector::zeros(nvar);
        for (k, &i) in self.layout.free.iter().enumerate() {
            zl[k] = sc.obj * mult_x_l[i] / sc.x[i];
            zu[k] = sc.obj * mult_x_u[i] / sc.x[i];
        }
        for (j, slack) in self.layout.slack.iter().enumerate() {
            if let Some(p) = *slack {
                zl[p] = (-lambda[j]).max(0.0);
                zu[p] = lambda[j].max(0.0);
            }
        }
        let push = self.settings.warm_start_mult_bound_push;
        for i in 0..nvar {
            zl[i] = if self.layout.has_lower[i] { zl[i].max(push) } else { 0.0 };
            zu[i] = if self.layout.has_upper[i] { zu[i].max(push) } else { 0.0 };
        }
        Some((lambda, zl, zu))
    }

    fn full_x(&self, y: &DVector<f64>) -> Vec<f64> {
        let n = self.scaling.x.len();
        let mut x = vec![0.0; n];
        for (k, &i) in self.layout.free.iter().enumerate() {
            x[i] = y[k] / self.scaling.x[i];
        }
        for &(i, v) in self.layout.fixed.iter() {
            x[i] = v;
        }
        x
    }

    fn evaluate(&mut self, y: &DVector<f64>) -> Result<Eval, EvalError> {
        let x = self.full_x(y);
        let f = self.nlp.objective(&x)? * self.scaling.obj;
        let g = self.nlp.constraints(&x)?;
        let c = DVector::from_iterator(
            g.len(),
            self.layout.slack.iter().enumerate().map(|(j, slack)| {
                let gs = self.scaling.g[j] * g[j];
                match *slack {
                    Some(p) => gs - y[p],
                    None => gs - self.layout.eq_rhs[j],
                }
            }),
        );
        Ok(Eval { f, g, c })
    }

    fn derivatives(&mut self, y: &DVector<f64>) -> Result<Derivs, EvalError> {
        let x = self.full_x(y);
        let grad = self.nlp.gradient(&x)?;
        let jac = self.nlp.jacobian(&x)?;
        let (sc, lay) = (&self.scaling, &self.layout);
        let m = lay.slack.len();

        let mut grad_y = DVector::zeros(lay.nvar());
        let mut jac_y = DMatrix::zeros(m, lay.nvar());
        for (k, &i) in lay.free.iter().enumerate() {
            grad_y[k] = sc.obj * grad[i] / sc.x[i];
            for j in 0..m {
                jac_y[(j, k)] = sc.g[j] * jac[(j, i)] / sc.x[i];
            }
        }
        for (j, slack) in lay.slack.iter().enumerate() {
            if let Some(p) = *slack {
                jac_y[(j, p)] = -1.0;
            }
        }

        let nfixed = lay.fixed.len();
        let fixed_grad = DVector::from_iterator(nfixed, lay.fixed.iter().map(|&(i, _)| grad[i]));
        let mut fixed_jac = DMatrix::zeros(m, nfixed);
        for (t, &(i, _)) in lay.fixed.iter().enumerate() {
            for j in 0..m {
                fixed_jac[(j, t)] = jac[(j, i)];
            }
        }

        Ok(Derivs {
            grad: grad_y,
            jac: jac_y,
            fixed_grad,
            fixed_jac,
        })
    }

    /// Scaled Lagrangian Hessian over the free variables.
    fn hessian(&mut self, st: &State) -> Result<DMatrix<f64>, EvalError> {
        let x = self.full_x(&st.y);
        let lambda: Vec<f64> = (0..st.lambda.len())
            .map(|j| st.lambda[j] * self.scaling.g[j])
            .collect();
        let h = self.nlp.hessian(&x, self.scaling.obj, &lambda)?;
        let free = &self.layout.free;
        let dx = &self.scaling.x;
        Ok(DMatrix::from_fn(free.len(), free.len(), |a, b| {
            let (i, k) = (free[a], free[b]);
            h[(i, k)] / (dx[i] * dx[k])
        }))
    }

    fn slack_to_lower(&self, y: &DVector<f64>, i: usize) -> f64 {
        y[i] - self.layout.lower[i]
    }

    fn slack_to_upper(&self, y: &DVector<f64>, i: usize) -> f64 {
        self.layout.upper[i] - y[i]
    }

    fn sigma(&self, st: &State) -> DVector<f64> {
        DVector::from_fn(self.layout.nvar(), |i, _| {
            let mut s = 0.0;
            if self.layout.has_lower[i] {
                s += st.zl[i] / self.slack_to_lower(&st.y, i);
            }
            if self.layout.has_upper[i] {
                s += st.zu[i] / self.slack_to_upper(&st.y, i);
            }
            s
        })
    }

    fn barrier_gradient(&self, st: &State, mu: f64) -> DVector<f64> {
        let mut grad = st.derivs.grad.clone();
        for i in 0..self.layout.nvar() {
            if self.layout.has_lower[i] {
                grad[i] -= mu / self.slack_to_lower(&st.y, i);
            }
            if self.layout.has_upper[i] {
                grad[i] += mu / self.slack_to_upper(&st.y, i);
            }
        }
        grad
    }

    /// Barrier function plus `nu` times the `l1` norm of the constraint residual.
    fn merit(&self, y: &DVector<f64>, eval: &Eval, mu: f64, nu: f64) -> f64 {
        let mut phi = eval.f;
        for i in 0..self.layout.nvar() {
            if self.layout.has_lower[i] {
                let d = self.slack_to_lower(y, i);
                if d <= 0.0 {
                    return f64::INFINITY;
                }
                phi -= mu * d.ln();
            }
            if self.layout.has_upper[i] {
                let d = self.slack_to_upper(y, i);
                if d <= 0.0 {
                    return f64::INFINITY;
                }
                phi -= mu * d.ln();
            }
        }
        phi + nu * norm_1(&eval.c)
    }

    fn bound_multiplier_steps(
        &self,
        st: &State,
        mu: f64,
        dy: &DVector<f64>,
    ) -> (DVector<f64>, DVector<f64>) {
        let nvar = self.layout.nvar();
        let mut dzl = DVector::zeros(nvar);
        let mut dzu = DVector::zeros(nvar);
        for i in 0..nvar {
            if self.layout.has_lower[i] {
                let d = self.slack_to_lower(&st.y, i);
                dzl[i] = mu / d - st.zl[i] - st.zl[i] / d * dy[i];
            }
            if self.layout.has_upper[i] {
                let d = self.slack_to_upper(&st.y, i);
                dzu[i] = mu / d - st.zu[i] + st.zu[i] / d * dy[i];
            }
        }
        (dzl, dzu)
    }

    fn max_primal_step(&self, y: &DVector<f64>, dy: &DVector<f64>, tau: f64) -> f64 {
        let mut alpha = 1.0_f64;
        for i in 0..self.layout.nvar() {
            if self.layout.has_lower[i] && dy[i] < 0.0 {
                alpha = alpha.min(-tau * self.slack_to_lower(y, i) / dy[i]);
            }
            if self.layout.has_upper[i] && dy[i] > 0.0 {
                alpha = alpha.min(tau * self.slack_to_upper(y, i) / dy[i]);
            }
        }
        alpha
    }

    fn max_dual_step(&self, st: &State, dzl: &DVector<f64>, dzu: &DVector<f64>, tau: f64) -> f64 {
        let mut alpha = 1.0_f64;
        for i in 0..self.layout.nvar() {
            if self.layout.has_lower[i] && dzl[i] < 0.0 {
                alpha = alpha.min(-tau * st.zl[i] / dzl[i]);
            }
            if self.layout.has_upper[i] && dzu[i] < 0.0 {
                alpha = alpha.min(-tau * st.zu[i] / dzu[i]);
            }
        }
        alpha
    }

    /// Keeps the bound multipliers within a factor of the primal-dual estimate `mu / slack`.
    fn safeguard_multipliers(&self, st: &mut State, mu: f64) {
        for i in 0..self.layout.nvar() {
            if self.layout.has_lower[i] {
                let d = self.slack_to_lower(&st.y, i);
                st.zl[i] = st.zl[i].clamp(mu / (KAPPA_SIGMA * d), KAPPA_SIGMA * mu / d);
            }
            if self.layout.has_upper[i] {
                let d = self.slack_to_upper(&st.y, i);
                st.zu[i] = st.zu[i].clamp(mu / (KAPPA_SIGMA * d), KAPPA_SIGMA * mu / d);
            }
        }
    }

    /// Complementarity products `(y - l) z_l` and `(u - y) z_u` of all bounded entries.
    fn complementarity(&self, st: &State) -> Vec<f64> {
        let mut compl = Vec::with_capacity(self.layout.num_bounds());
        for i in 0..self.layout.nvar() {
            if self.layout.has_lower[i] {
                compl.push(self.slack_to_lower(&st.y, i) * st.zl[i]);
            }
            if self.layout.has_upper[i] {
                compl.push(self.slack_to_upper(&st.y, i) * st.zu[i]);
            }
        }
        compl
    }

    fn dual_residual(&self, st: &State) -> DVector<f64> {
        &st.derivs.grad + st.derivs.jac.tr_mul(&st.lambda) - &st.zl + &st.zu
    }

    /// Scaling of the dual and complementarity errors for large multipliers.
    fn error_scales(&self, st: &State) -> (f64, f64) {
        let m = st.lambda.len();
        let nb = self.layout.num_bounds();
        let z_sum = norm_1(&st.zl) + norm_1(&st.zu);
        let s_d = if m + nb > 0 {
            S_MAX.max((norm_1(&st.lambda) + z_sum) / (m + nb) as f64) / S_MAX
        } else {
            1.0
        };
        let s_c = if nb > 0 {
            S_MAX.max(z_sum / nb as f64) / S_MAX
        } else {
            1.0
        };
        (s_d, s_c)
    }

    fn errors(&self, st: &State) -> Errors {
        let r_d = self.dual_residual(st);
        let dual = norm_inf(&r_d);
        let primal = norm_inf(&st.eval.c);
        let compl = self
            .complementarity(st)
            .iter()
            .fold(0.0_f64, |a, v| a.max(v.abs()));
        let (s_d, s_c) = self.error_scales(st);
        let obj = self.scaling.obj.abs();

        let dual_unscaled = r_d
            .iter()
            .zip(self.layout.var_scale.iter())
            .fold(0.0_f64, |a, (r, d)| a.max((r * d).abs()))
            / obj;
        let primal_unscaled = st
            .eval
            .c
            .iter()
            .zip(self.scaling.g.iter())
            .fold(0.0_f64, |a, (c, d)| a.max((c / d).abs()));

        Errors {
            overall: (dual / s_d).max(primal).max(compl / s_c),
            dual,
            dual_unscaled,
            primal_unscaled,
            compl_unscaled: compl / obj,
        }
    }

    /// Optimality error of the barrier problem for `mu`.
    fn barrier_error(&self, st: &State, mu: f64) -> f64 {
        let dual = norm_inf(&self.dual_residual(st));
        let primal = norm_inf(&st.eval.c);
        let compl = self
            .complementarity(st)
            .iter()
            .fold(0.0_f64, |a, v| a.max((v - mu).abs()));
        let (s_d, s_c) = self.error_scales(st);
        (dual / s_d).max(primal).max(compl / s_c)
    }

    fn is_acceptable(&self, errors: &Errors) -> bool {
        errors.overall <= self.settings.acceptable_tol
            && errors.dual_unscaled <= ACCEPTABLE_DUAL_INF
            && errors.primal_unscaled <= ACCEPTABLE_CONSTR_VIOL
            && errors.compl_unscaled <= ACCEPTABLE_COMPL_INF
    }

    fn update_mu(&self, st: &State, mu: f64, force_decrease: bool) -> f64 {
        let mu_min = self.settings.mu_min();
        let mut mu = mu;

        if self.settings.adaptive_mu {
            let compl = self.complementarity(st);
            if !compl.is_empty() {
                let avg = compl.iter().sum::<f64>() / compl.len() as f64;
                let min = compl.iter().cloned().fold(f64::INFINITY, f64::min);
                if avg > 0.0 {
                    // LOQO centrality rule, never increasing mu.
                    let xi = (min / avg).max(1e-12);
                    let sigma = 0.1 * (0.05 * (1.0 - xi) / xi).min(2.0).powi(3);
                    mu = mu.min((sigma * avg).max(0.01 * mu)).max(mu_min);
                }
            }
        }

        let mut force = force_decrease;
        while mu > mu_min && (force || self.barrier_error(st, mu) <= KAPPA_EPSILON * mu) {
            mu = (KAPPA_MU * mu).min(mu.powf(THETA_MU)).max(mu_min);
            force = false;
        }
        mu
    }

    #[allow(clippy::too_many_arguments)]
    fn line_search(
        &mut self,
        st: &State,
        mu: f64,
        nu: f64,
        grad_phi: &DVector<f64>,
        r_d: &DVector<f64>,
        dy: &DVector<f64>,
        alpha_max: f64,
        tau: f64,
        kkt: &Kkt,
    ) -> Option<Step> {
        let merit0 = self.merit(&st.y, &st.eval, mu, nu);
        let slope = grad_phi.dot(dy) - nu * norm_1(&st.eval.c);
        let sufficient = |merit: f64, alpha: f64| {
            merit.is_finite()
                && merit - merit0 <= ETA_ARMIJO * alpha * slope + 10.0 * f64::EPSILON * merit0.abs()
        };

        let mut alpha = alpha_max;
        for trial in 1..=MAX_LS_TRIALS {
            let y = &st.y + dy * alpha;
            if let Ok(eval) = self.evaluate(&y) {
                if sufficient(self.merit(&y, &eval, mu, nu), alpha) {
                    return Some(Step {
                        dy: dy.clone(),
                        alpha,
                        trials: trial,
                        y,
                        eval,
                    });
                }
                if trial == 1 && norm_1(&eval.c) >= norm_1(&st.eval.c) && !eval.c.is_empty() {
                    // Second order correction of the constraint residual.
                    let c_soc = &st.eval.c * alpha + &eval.c;
                    let (dy_soc, _) = kkt.solve(r_d, &c_soc);
                    let alpha_soc = self.max_primal_step(&st.y, &dy_soc, tau);
                    let y_soc = &st.y + &dy_soc * alpha_soc;
                    if let Ok(eval_soc) = self.evaluate(&y_soc) {
                        if sufficient(self.merit(&y_soc, &eval_soc, mu, nu), alpha) {
                            return Some(Step {
                                dy: dy_soc,
                                alpha: alpha_soc,
                                trials: trial,
                                y: y_soc,
                                eval: eval_soc,
                            });
                        }
                    }
                }
            }
            alpha *= 0.5;
        }
        None
    }

    /// Calls the intermediate callback and writes the iteration table. Returns `false` if the
    /// user asked to stop.
    fn report(&mut self, row: &IterationRow, journal: Option<&mut Journal>) -> bool {
        if self.settings.print_level >= 5 {
            log::debug!("{}", row.format());
        }
        if let Some(journal) = journal {
            journal.iteration(row);
        }
        match self.intermediate_cb {
            Some(cb) => unsafe {
                cb(
                    ffi::AlgorithmMode_RegularMode,
                    row.iter,
                    row.objective,
                    row.inf_pr,
                    row.inf_du,
                    row.mu,
                    row.d_norm,
                    row.regularization,
                    row.alpha_du,
                    row.alpha_pr,
                    row.ls_trials,
                    self.user_data,
                ) != ffi::FALSE
            },
            None => true,
        }
    }

    /// Unscales the iterate.
    fn solution(&self, st: &State) -> Solution {
        let sc = &self.scaling;
        let n = sc.x.len();
        let m = st.lambda.len();
        let mult_g: Vec<f64> = (0..m).map(|j| sc.g[j] * st.lambda[j] / sc.obj).collect();
        let mut mult_x_l = vec![0.0; n];
        let mut mult_x_u = vec![0.0; n];
        for (k, &i) in self.layout.free.iter().enumerate() {
            mult_x_l[i] = sc.x[i] * st.zl[k] / sc.obj;
            mult_x_u[i] = sc.x[i] * st.zu[k] / sc.obj;
        }
        for (t, &(i, _)) in self.layout.fixed.iter().enumerate() {
            let v = st.derivs.fixed_grad[t]
                + (0..m)
                    .map(|j| mult_g[j] * st.derivs.fixed_jac[(j, t)])
                    .sum::<f64>();
            mult_x_l[i] = v.max(0.0);
            mult_x_u[i] = (-v).max(0.0);
        }
        Solution {
            x: self.full_x(&st.y),
            g: st.eval.g.iter().cloned().collect(),
            obj: st.eval.f / sc.obj,
            mult_g,
            mult_x_l,
            mult_x_u,
        }
    }
}

/// Initial constraint multipliers minimizing the dual infeasibility, or zero if they turn out
/// too large.
fn least_squares_multipliers(
    derivs: &Derivs,
    zl: &DVector<f64>,
    zu: &DVector<f64>,
) -> DVector<f64> {
    let nvar = derivs.grad.len();
    let m = derivs.jac.nrows();
    let mut a = DMatrix::identity(nvar + m, nvar + m);
    a.view_mut((nvar, 0), (m, nvar)).copy_from(&derivs.jac);
    a.view_mut((0, nvar), (nvar, m)).copy_from(&derivs.jac.transpose());
    for j in 0..m {
        a[(nvar + j, nvar + j)] = 0.0;
    }
    let mut rhs = DVector::zeros(nvar + m);
    rhs.rows_mut(0, nvar).copy_from(&(zl - zu - &derivs.grad));
    let lambda = match SymmetricSolver::new(a) {
        Ok(solver) => solver.solve(&rhs).rows(nvar, m).into_owned(),
        Err(_) => return DVector::zeros(m),
    };
    if norm_inf(&lambda) > CONSTR_MULT_INIT_MAX {
        DVector::zeros(m)
    } else {
        lambda
    }
}

/// Gradient of the Lagrangian with respect to the free variables.
fn lagrangian_grad(derivs: &Derivs, lambda: &DVector<f64>, nfree: usize) -> DVector<f64> {
    (&derivs.grad + derivs.jac.tr_mul(lambda)).rows(0, nfree).into_owned()
}

fn norm_inf(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |a: f64, x| a.max(x.abs()))
}

fn norm_1(v: &DVector<f64>) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

/// Message written to the output file and the log at the end of a solve.
pub fn exit_message(status: ApplicationReturnStatus) -> &'static str {
    match status {
        ffi::ApplicationReturnStatus_Solve_Succeeded => "Optimal Solution Found.",
        ffi::ApplicationReturnStatus_Solved_To_Acceptable_Level => "Solved To Acceptable Level.",
        ffi::ApplicationReturnStatus_Infeasible_Problem_Detected => {
            "Problem has inconsistent variable bounds or constraint sides."
        }
        ffi::ApplicationReturnStatus_Search_Direction_Becomes_Too_Small => {
            "Search Direction is becoming Too Small."
        }
        ffi::ApplicationReturnStatus_Diverging_Iterates => {
            "Iterates diverging; problem might be unbounded."
        }
        ffi::ApplicationReturnStatus_User_Requested_Stop => {
            "Stopping optimization at current point as requested by user."
        }
        ffi::ApplicationReturnStatus_Maximum_Iterations_Exceeded => {
            "Maximum Number of Iterations Exceeded."
        }
        ffi::ApplicationReturnStatus_Restoration_Failed => "Restoration Failed!",
        ffi::ApplicationReturnStatus_Error_In_Step_Computation => "Error in step computation!",
        ffi::ApplicationReturnStatus_Maximum_CpuTime_Exceeded => "Maximum CPU time exceeded.",
        ffi::ApplicationReturnStatus_Not_Enough_Degrees_Of_Freedom => {
            "Problem has too few degrees of freedom."
        }
        ffi::ApplicationReturnStatus_Invalid_Problem_Definition => "Invalid problem definition.",
        ffi::ApplicationReturnStatus_Invalid_Option => "Invalid option encountered.",
        ffi::ApplicationReturnStatus_Invalid_Number_Detected => {
            "Invalid number in NLP function or derivative detected."
        }
        _ => "Unrecoverable exception.",
    }
}
