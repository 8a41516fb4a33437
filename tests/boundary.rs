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

//! Behaviour at the boundary between the safe interface and the engine, exercised with
//!
//! ```verbatim
//!   min  x0^2 + x1^2
//!   s.t. x0 + x1 >= 1
//! ```
//!
//! whose solution is `[0.5, 0.5]` with objective `0.5`.

use approx::assert_relative_eq;
use rstest::rstest;

use ipopt_bridge::*;

struct Quadratic {
    start: [f64; 2],
    upper: f64,
    jacobian_rows: [Index; 2],
    fail_jacobian: bool,
    panic_in_objective: bool,
    provide_start: bool,
    last_iteration: Option<Index>,
    stop_at: Option<Index>,
}

impl Default for Quadratic {
    fn default() -> Self {
        Quadratic {
            start: [2.0, 2.0],
            upper: POSITIVE_INFINITY,
            jacobian_rows: [0, 0],
            fail_jacobian: false,
            panic_in_objective: false,
            provide_start: true,
            last_iteration: None,
            stop_at: None,
        }
    }
}

impl Quadratic {
    fn track_iterations(&mut self, data: IntermediateCallbackData) -> bool {
        assert_eq!(data.alg_mod, AlgorithmMode::Regular);
        self.last_iteration = Some(data.iter_count);
        self.stop_at.map_or(true, |k| data.iter_count < k)
    }
}

impl BasicProblem for Quadratic {
    fn num_variables(&self) -> usize {
        2
    }
    fn bounds(&self, x_l: &mut [Number], x_u: &mut [Number]) -> bool {
        x_l.fill(-self.upper);
        x_u.fill(self.upper);
        true
    }
    fn initial_point(&self, x: &mut [Number]) -> bool {
        x.copy_from_slice(&self.start);
        self.provide_start
    }
    fn objective(&mut self, x: &[Number], _new_x: bool, obj: &mut Number) -> bool {
        if self.panic_in_objective {
            panic!("objective is not available");
        }
        *obj = x[0] * x[0] + x[1] * x[1];
        true
    }
    fn objective_grad(&mut self, x: &[Number], _new_x: bool, grad_f: &mut [Number]) -> bool {
        grad_f[0] = 2.0 * x[0];
        grad_f[1] = 2.0 * x[1];
        true
    }
}

impl ConstrainedProblem for Quadratic {
    fn num_constraints(&self) -> usize {
        1
    }
    fn num_constraint_jacobian_non_zeros(&self) -> usize {
        2
    }
    fn constraint(&mut self, x: &[Number], _new_x: bool, g: &mut [Number]) -> bool {
        g[0] = x[0] + x[1];
        true
    }
    fn constraint_bounds(&self, g_l: &mut [Number], g_u: &mut [Number]) -> bool {
        g_l[0] = 1.0;
        g_u[0] = self.upper;
        true
    }
    fn constraint_jacobian_indices(&self, rows: &mut [Index], cols: &mut [Index]) -> bool {
        rows.copy_from_slice(&self.jacobian_rows);
        cols.copy_from_slice(&[0, 1]);
        true
    }
    fn constraint_jacobian_values(
        &mut self,
        _x: &[Number],
        _new_x: bool,
        vals: &mut [Number],
    ) -> bool {
        vals.fill(1.0);
        !self.fail_jacobian
    }
    fn num_hessian_non_zeros(&self) -> usize {
        2
    }
    fn hessian_indices(&self, rows: &mut [Index], cols: &mut [Index]) -> bool {
        rows.copy_from_slice(&[0, 1]);
        cols.copy_from_slice(&[0, 1]);
        true
    }
    fn hessian_values(
        &mut self,
        _x: &[Number],
        _new_x: bool,
        obj_factor: Number,
        _lambda: &[Number],
        _new_lambda: bool,
        vals: &mut [Number],
    ) -> bool {
        vals.fill(2.0 * obj_factor);
        true
    }
}

fn quadratic(problem: Quadratic) -> Ipopt<Quadratic> {
    let mut ipopt = Ipopt::new(problem).unwrap();
    ipopt.set_option("print_level", 0);
    ipopt
}

#[test]
fn create_and_drop_without_solving() {
    let ipopt = Ipopt::new(Quadratic::default()).unwrap();
    assert!(!ipopt.engine_name().is_empty());
    drop(ipopt);
}

#[test]
fn constrained_quadratic() {
    let mut ipopt = quadratic(Quadratic::default());
    let SolveResult {
        solver_data: SolverDataMut { solution, .. },
        constraint_values: g,
        objective_value: obj,
        status,
    } = ipopt.solve();

    assert_eq!(status, SolveStatus::SolveSucceeded);
    assert_relative_eq!(solution.primal_variables[0], 0.5, max_relative = 1e-6);
    assert_relative_eq!(solution.primal_variables[1], 0.5, max_relative = 1e-6);
    assert_relative_eq!(obj, 0.5, max_relative = 1e-6);
    assert_relative_eq!(g[0], 1.0, max_relative = 1e-6);
    // The active lower constraint bound has a negative multiplier.
    assert_relative_eq!(solution.constraint_multipliers[0], -1.0, max_relative = 1e-5);
}

fn solve_with_upper_bound(upper: f64) -> (SolveStatus, Vec<f64>, f64) {
    let mut ipopt = quadratic(Quadratic {
        upper,
        ..Quadratic::default()
    });
    let result = ipopt.solve();
    (
        result.status,
        result.solver_data.solution.primal_variables.to_vec(),
        result.objective_value,
    )
}

#[rstest]
#[case(1e30)]
#[case(f64::INFINITY)]
#[case(2.5e19)]
fn bounds_beyond_the_sentinel_are_unbounded(#[case] upper: f64) {
    assert_eq!(normalize_bound(upper), POSITIVE_INFINITY);
    assert_eq!(normalize_bound(-upper), NEGATIVE_INFINITY);
    let reference = solve_with_upper_bound(POSITIVE_INFINITY);
    assert_eq!(reference.0, SolveStatus::SolveSucceeded);
    assert_eq!(solve_with_upper_bound(upper), reference);
}

#[test]
fn nan_bounds_are_rejected() {
    let result = Ipopt::new(Quadratic {
        upper: f64::NAN,
        ..Quadratic::default()
    });
    assert!(matches!(result, Err(CreateError::NanBound { .. })));
}

#[test]
fn failing_jacobian_never_succeeds() {
    let mut ipopt = quadratic(Quadratic {
        fail_jacobian: true,
        ..Quadratic::default()
    });
    let status = ipopt.solve().status;
    assert!(!status.is_solved());
    assert!(matches!(
        status.kind(),
        StatusKind::EvaluationError | StatusKind::RestorationFailure
    ));
}

#[test]
fn invalid_jacobian_structure_is_an_invalid_problem() {
    // There is no constraint row 1.
    let mut ipopt = quadratic(Quadratic {
        jacobian_rows: [0, 1],
        ..Quadratic::default()
    });
    let status = ipopt.solve().status;
    assert_eq!(status, SolveStatus::InvalidProblemDefinition);
    assert_eq!(status.kind(), StatusKind::InvalidSetup);
}

#[test]
fn panicking_callback_is_a_failed_evaluation() {
    let mut ipopt = quadratic(Quadratic {
        panic_in_objective: true,
        ..Quadratic::default()
    });
    let status = ipopt.solve().status;
    assert_eq!(status, SolveStatus::InvalidNumberDetected);

    // The instance is still usable afterwards.
    ipopt.solver_data_mut().problem.panic_in_objective = false;
    assert_eq!(ipopt.solve().status, SolveStatus::SolveSucceeded);
}

#[test]
fn missing_initial_point() {
    let mut ipopt = quadratic(Quadratic {
        provide_start: false,
        ..Quadratic::default()
    });
    assert_eq!(ipopt.solve().status, SolveStatus::InvalidProblemDefinition);
}

#[test]
fn rejected_options_leave_earlier_values() {
    let mut ipopt = quadratic(Quadratic::default());
    assert!(ipopt.set_option("max_iter", 0).is_some());
    assert!(ipopt.set_option("max_itr", 100).is_none());
    assert!(ipopt.set_option("max_iter", 100.0).is_none());
    assert!(ipopt.set_option("max_iter", -1).is_none());
    assert_eq!(ipopt.solve().status, SolveStatus::MaximumIterationsExceeded);

    // Last write wins.
    assert!(ipopt.set_option("max_iter", 100).is_some());
    assert_eq!(ipopt.solve().status, SolveStatus::SolveSucceeded);
}

#[test]
fn intermediate_callback_stops_after_iteration() {
    let mut ipopt = quadratic(Quadratic {
        stop_at: Some(2),
        ..Quadratic::default()
    });
    ipopt.set_intermediate_callback(Some(Quadratic::track_iterations));
    let SolveResult {
        solver_data: SolverDataMut { problem, .. },
        status,
        ..
    } = ipopt.solve();
    assert_eq!(status, SolveStatus::UserRequestedStop);
    assert_eq!(problem.last_iteration, Some(2));

    // Clearing the callback lets the solve finish without reporting.
    problem.last_iteration = None;
    ipopt.set_intermediate_callback(None);
    let SolveResult {
        solver_data: SolverDataMut { problem, .. },
        status,
        ..
    } = ipopt.solve();
    assert_eq!(status, SolveStatus::SolveSucceeded);
    assert_eq!(problem.last_iteration, None);
}

#[test]
fn repeated_solves_are_independent() {
    let mut ipopt = quadratic(Quadratic::default());
    let first = ipopt.solve().solver_data.solution.primal_variables.to_vec();

    ipopt.solver_data_mut().problem.start = [-3.0, 4.0];
    let SolveResult {
        solver_data: SolverDataMut { solution, .. },
        status,
        ..
    } = ipopt.solve();
    assert_eq!(status, SolveStatus::SolveSucceeded);
    assert_relative_eq!(solution.primal_variables[0], 0.5, max_relative = 1e-6);
    assert_relative_eq!(solution.primal_variables[1], 0.5, max_relative = 1e-6);

    ipopt.solver_data_mut().problem.start = [2.0, 2.0];
    let third = ipopt.solve().solver_data.solution.primal_variables.to_vec();
    assert_eq!(first, third);
}

#[test]
fn scaling_vectors_must_match_the_problem() {
    let mut ipopt = quadratic(Quadratic::default());
    assert!(ipopt.set_problem_scaling(1.0, Some(&[1.0, 1.0]), Some(&[2.0])));
    assert!(!ipopt.set_problem_scaling(1.0, Some(&[1.0, 1.0]), Some(&[2.0, 2.0])));
    assert!(!ipopt.set_problem_scaling(f64::NAN, None, None));
    assert!(!ipopt.set_problem_scaling(1.0, Some(&[1.0, 0.0]), None));

    // Registered factors only apply with user scaling. The solution is the same either way.
    assert!(ipopt.set_option("nlp_scaling_method", "user-scaling").is_some());
    let SolveResult {
        solver_data: SolverDataMut { solution, .. },
        status,
        ..
    } = ipopt.solve();
    assert_eq!(status, SolveStatus::SolveSucceeded);
    assert_relative_eq!(solution.primal_variables[0], 0.5, max_relative = 1e-6);
}

#[test]
fn output_file_receives_summary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quadratic.out");
    let mut ipopt = quadratic(Quadratic::default());
    assert!(ipopt.open_output_file(path.to_str().unwrap(), 5));
    assert_eq!(ipopt.solve().status, SolveStatus::SolveSucceeded);
    drop(ipopt);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Number of variables: 2"));
    assert!(text.contains("EXIT: Optimal Solution Found."));
}
