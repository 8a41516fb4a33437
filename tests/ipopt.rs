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

//! HS071 with one-based indexing, counting how often each callback is reached.

use approx::assert_relative_eq;

use ipopt_bridge::*;
use std::cell::Cell;

struct NLP {
    g_offset: [f64; 2],
    jacobian_structure_calls: Cell<usize>,
    hessian_structure_calls: Cell<usize>,
    jacobian_value_calls: usize,
    hessian_value_calls: usize,
}

impl NLP {
    fn new() -> Self {
        NLP {
            g_offset: [0.0, 0.0],
            jacobian_structure_calls: Cell::new(0),
            hessian_structure_calls: Cell::new(0),
            jacobian_value_calls: 0,
            hessian_value_calls: 0,
        }
    }
}

impl BasicProblem for NLP {
    fn indexing_style(&self) -> IndexingStyle {
        IndexingStyle::FortranStyle
    }
    fn num_variables(&self) -> usize {
        4
    }
    fn bounds(&self, x_l: &mut [Number], x_u: &mut [Number]) -> bool {
        x_l.fill(1.0);
        x_u.fill(5.0);
        true
    }
    fn initial_point(&self, x: &mut [Number]) -> bool {
        x.copy_from_slice(&[1.0, 5.0, 5.0, 1.0]);
        true
    }
    fn objective(&mut self, x: &[Number], _new_x: bool, obj: &mut Number) -> bool {
        *obj = x[0] * x[3] * (x[0] + x[1] + x[2]) + x[2];
        true
    }
    fn objective_grad(&mut self, x: &[Number], _new_x: bool, grad_f: &mut [Number]) -> bool {
        grad_f[0] = x[0] * x[3] + x[3] * (x[0] + x[1] + x[2]);
        grad_f[1] = x[0] * x[3];
        grad_f[2] = x[0] * x[3] + 1.0;
        grad_f[3] = x[0] * (x[0] + x[1] + x[2]);
        true
    }
}

impl ConstrainedProblem for NLP {
    fn num_constraints(&self) -> usize {
        2
    }
    fn num_constraint_jacobian_non_zeros(&self) -> usize {
        8
    }
    fn constraint_bounds(&self, g_l: &mut [Number], g_u: &mut [Number]) -> bool {
        g_l.copy_from_slice(&[25.0, 40.0]);
        g_u.copy_from_slice(&[f64::INFINITY, 40.0]);
        true
    }
    fn constraint(&mut self, x: &[Number], _new_x: bool, g: &mut [Number]) -> bool {
        g[0] = x[0] * x[1] * x[2] * x[3] + self.g_offset[0];
        g[1] = x[0] * x[0] + x[1] * x[1] + x[2] * x[2] + x[3] * x[3] + self.g_offset[1];
        true
    }
    fn constraint_jacobian_indices(&self, irow: &mut [Index], jcol: &mut [Index]) -> bool {
        self.jacobian_structure_calls
            .set(self.jacobian_structure_calls.get() + 1);
        let mut idx = 0;
        for row in 1..=2 {
            for col in 1..=4 {
                irow[idx] = row;
                jcol[idx] = col;
                idx += 1;
            }
        }
        true
    }
    fn constraint_jacobian_values(
        &mut self,
        x: &[Number],
        _new_x: bool,
        vals: &mut [Number],
    ) -> bool {
        self.jacobian_value_calls += 1;
        vals[0] = x[1] * x[2] * x[3]; /* 1,1 */
        vals[1] = x[0] * x[2] * x[3]; /* 1,2 */
        vals[2] = x[0] * x[1] * x[3]; /* 1,3 */
        vals[3] = x[0] * x[1] * x[2]; /* 1,4 */

        vals[4] = 2.0 * x[0]; /* 2,1 */
        vals[5] = 2.0 * x[1]; /* 2,2 */
        vals[6] = 2.0 * x[2]; /* 2,3 */
        vals[7] = 2.0 * x[3]; /* 2,4 */
        true
    }
    fn num_hessian_non_zeros(&self) -> usize {
        10
    }
    fn hessian_indices(&self, irow: &mut [Index], jcol: &mut [Index]) -> bool {
        self.hessian_structure_calls
            .set(self.hessian_structure_calls.get() + 1);
        let mut idx = 0;
        for row in 1..=4 {
            for col in 1..=row {
                irow[idx] = row;
                jcol[idx] = col;
                idx += 1;
            }
        }
        true
    }
    fn hessian_values(
        &mut self,
        x: &[Number],
        _new_x: bool,
        obj_factor: Number,
        lambda: &[Number],
        _new_lambda: bool,
        vals: &mut [Number],
    ) -> bool {
        self.hessian_value_calls += 1;
        vals[0] = obj_factor * 2.0 * x[3] + lambda[1] * 2.0; /* 1,1 */

        vals[1] = obj_factor * x[3] + lambda[0] * x[2] * x[3]; /* 2,1 */
        vals[2] = lambda[1] * 2.0; /* 2,2 */

        vals[3] = obj_factor * x[3] + lambda[0] * x[1] * x[3]; /* 3,1 */
        vals[4] = lambda[0] * x[0] * x[3]; /* 3,2 */
        vals[5] = lambda[1] * 2.0; /* 3,3 */

        vals[6] = obj_factor * (2.0 * x[0] + x[1] + x[2]) + lambda[0] * x[1] * x[2]; /* 4,1 */
        vals[7] = obj_factor * x[0] + lambda[0] * x[0] * x[2]; /* 4,2 */
        vals[8] = obj_factor * x[0] + lambda[0] * x[0] * x[1]; /* 4,3 */
        vals[9] = lambda[1] * 2.0; /* 4,4 */
        true
    }
}

const X_OPT: [f64; 4] = [1.0, 4.743000, 3.821150, 1.379408];
const OBJ_OPT: f64 = 1.701402e+01;

#[test]
fn hs071_test() {
    let mut ipopt = Ipopt::new(NLP::new()).unwrap();
    ipopt.set_option("tol", 1e-7);
    ipopt.set_option("mu_strategy", "adaptive");
    ipopt.set_option("sb", "yes");
    ipopt.set_option("print_level", 0);

    {
        let SolveResult {
            solver_data: SolverDataMut { problem, solution },
            constraint_values: g,
            objective_value: obj,
            status,
        } = ipopt.solve();

        assert_eq!(status, SolveStatus::SolveSucceeded);
        assert!(status.is_solved());
        for (x, x_opt) in solution.primal_variables.iter().zip(X_OPT.iter()) {
            assert_relative_eq!(*x, *x_opt, max_relative = 1e-5);
        }
        assert_relative_eq!(obj, OBJ_OPT, max_relative = 1e-6);
        assert_relative_eq!(g[0], 25.0, max_relative = 1e-6);
        assert_relative_eq!(g[1], 40.0, max_relative = 1e-6);

        // Both sparse matrices were described once and evaluated many times.
        assert_eq!(problem.jacobian_structure_calls.get(), 1);
        assert_eq!(problem.hessian_structure_calls.get(), 1);
        assert!(problem.jacobian_value_calls > 1);
        assert!(problem.hessian_value_calls > 1);

        problem.g_offset[0] = 0.2;
    }

    // A second solve restarts from the initial point and still reuses the structure.
    let SolveResult {
        solver_data: SolverDataMut { problem, solution },
        objective_value: obj,
        status,
        ..
    } = ipopt.solve();

    assert_eq!(status, SolveStatus::SolveSucceeded);
    assert_relative_eq!(solution.primal_variables[1], 4.749269, max_relative = 1e-5);
    assert_relative_eq!(obj, 1.690362e+01, max_relative = 1e-6);
    assert_eq!(problem.jacobian_structure_calls.get(), 1);
    assert_eq!(problem.hessian_structure_calls.get(), 1);
}

#[test]
fn hs071_limited_memory_test() {
    let mut ipopt = Ipopt::new(NLP::new()).unwrap();
    ipopt.set_option("tol", 1e-7);
    ipopt.set_option("print_level", 0);
    ipopt.set_option("hessian_approximation", "limited-memory");

    let SolveResult {
        solver_data: SolverDataMut { problem, solution },
        objective_value: obj,
        status,
        ..
    } = ipopt.solve();

    assert_eq!(status, SolveStatus::SolveSucceeded);
    for (x, x_opt) in solution.primal_variables.iter().zip(X_OPT.iter()) {
        assert_relative_eq!(*x, *x_opt, max_relative = 1e-5);
    }
    assert_relative_eq!(obj, OBJ_OPT, max_relative = 1e-6);
    // The Hessian callbacks are never reached.
    assert_eq!(problem.hessian_structure_calls.get(), 0);
    assert_eq!(problem.hessian_value_calls, 0);
}
