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

//! Symmetric indefinite factorization of the primal-dual system
//!
//! ```text
//! [ W + Sigma + dw I    J^T   ] [ dy ]     [ r_d ]
//! [        J          -dc I   ] [ dl ] = - [ r_c ]
//! ```
//!
//! with the inertia correction of Wächter & Biegler: `dw` grows until the matrix has exactly
//! as many positive eigenvalues as primal variables and as many negative ones as constraints.
//!
//! The matrix is factorized as `P A P^T = L D L^T` with Bunch-Kaufman pivoting, where `D` has
//! 1x1 and 2x2 blocks. By Sylvester's law the inertia of `A` is read off the blocks of `D`.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

const DELTA_W_INIT: f64 = 1e-4;
const DELTA_W_MIN: f64 = 1e-20;
const DELTA_W_MAX: f64 = 1e40;
const KAPPA_W_MINUS: f64 = 1.0 / 3.0;
const KAPPA_W_PLUS: f64 = 8.0;
const KAPPA_W_PLUS_FIRST: f64 = 100.0;
const DELTA_C_FACTOR: f64 = 1e-8;
const DELTA_C_EXPONENT: f64 = 0.25;
/// A pivot column below this fraction of the largest entry of its original row is zero.
const ZERO_PIVOT: f64 = 1e-13;
/// Bunch-Kaufman growth bound `(1 + sqrt(17)) / 8`.
const BK_ALPHA: f64 = 0.640_388_203_202_208_4;

#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum KktError {
    #[error("primal-dual matrix could not be regularized")]
    TooMuchRegularization,
    #[error("primal-dual matrix has non-finite entries")]
    NonFinite,
}

/// A diagonal block of `D`.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Pivot {
    One(f64),
    /// `[[a, b], [b, c]]` with `ac - b^2 < 0`.
    Two { a: f64, b: f64, c: f64 },
    Zero,
}

/// `L D L^T` factorization of a symmetric matrix, used as a solver.
pub struct SymmetricSolver {
    matrix: DMatrix<f64>,
    /// Unit lower triangular `L` below the diagonal blocks.
    factor: DMatrix<f64>,
    /// Blocks of `D` with the index of their first row.
    pivots: Vec<(usize, Pivot)>,
    /// Original index of each permuted row.
    perm: Vec<usize>,
}

impl SymmetricSolver {
    pub fn new(matrix: DMatrix<f64>) -> Result<Self, KktError> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(KktError::NonFinite);
        }
        let n = matrix.nrows();
        let mut a = matrix.clone();
        let mut perm: Vec<usize> = (0..n).collect();
        let mut scale: Vec<f64> = (0..n)
            .map(|i| a.row(i).iter().fold(0.0_f64, |m, v| m.max(v.abs())))
            .collect();
        let mut pivots = Vec::new();

        let mut k = 0;
        while k < n {
            let absakk = a[(k, k)].abs();
            let (imax, colmax) = ((k + 1)..n)
                .map(|i| (i, a[(i, k)].abs()))
                .fold((k, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

            if absakk.max(colmax) <= ZERO_PIVOT * scale[k] {
                for i in (k + 1)..n {
                    a[(i, k)] = 0.0;
                }
                pivots.push((k, Pivot::Zero));
                k += 1;
                continue;
            }

            let (kp, two) = if absakk >= BK_ALPHA * colmax {
                (k, false)
            } else {
                let rowmax = (k..n)
                    .filter(|&j| j != imax)
                    .fold(0.0_f64, |m, j| m.max(a[(imax, j)].abs()));
                if absakk * rowmax >= BK_ALPHA * colmax * colmax {
                    (k, false)
                } else if a[(imax, imax)].abs() >= BK_ALPHA * rowmax {
                    (imax, false)
                } else {
                    (imax, true)
                }
            };

            let kk = if two { k + 1 } else { k };
            if kp != kk {
                a.swap_rows(kk, kp);
                a.swap_columns(kk, kp);
                perm.swap(kk, kp);
                scale.swap(kk, kp);
            }

            if two {
                let (pa, pb, pc) = (a[(k, k)], a[(k + 1, k)], a[(k + 1, k + 1)]);
                let det = pa * pc - pb * pb;
                let w: Vec<(f64, f64)> =
                    ((k + 2)..n).map(|i| (a[(i, k)], a[(i, k + 1)])).collect();
                let l: Vec<(f64, f64)> = w
                    .iter()
                    .map(|&(w0, w1)| ((w0 * pc - w1 * pb) / det, (w1 * pa - w0 * pb) / det))
                    .collect();
                for (ii, &(l0, l1)) in l.iter().enumerate() {
                    for (jj, &(w0, w1)) in w.iter().enumerate() {
                        a[(k + 2 + ii, k + 2 + jj)] -= l0 * w0 + l1 * w1;
                    }
                }
                for (ii, &(l0, l1)) in l.iter().enumerate() {
                    a[(k + 2 + ii, k)] = l0;
                    a[(k + 2 + ii, k + 1)] = l1;
                }
                pivots.push((k, Pivot::Two { a: pa, b: pb, c: pc }));
                k += 2;
            } else {
                let d = a[(k, k)];
                let w: Vec<f64> = ((k + 1)..n).map(|i| a[(i, k)]).collect();
                for (ii, &wi) in w.iter().enumerate() {
                    let li = wi / d;
                    for (jj, &wj) in w.iter().enumerate() {
                        a[(k + 1 + ii, k + 1 + jj)] -= li * wj;
                    }
                    a[(k + 1 + ii, k)] = li;
                }
                pivots.push((k, Pivot::One(d)));
                k += 1;
            }
        }

        Ok(SymmetricSolver {
            matrix,
            factor: a,
            pivots,
            perm,
        })
    }

    /// Counts of `(positive, negative, zero)` eigenvalues.
    pub fn inertia(&self) -> (usize, usize, usize) {
        self.pivots
            .iter()
            .fold((0, 0, 0), |(p, n, z), &(_, pivot)| match pivot {
                Pivot::One(d) if d > 0.0 => (p + 1, n, z),
                Pivot::One(_) => (p, n + 1, z),
                Pivot::Two { .. } => (p + 1, n + 1, z),
                Pivot::Zero => (p, n, z + 1),
            })
    }

    /// Solves `A x = b`, ignoring the null space of `A`, followed by one step of iterative
    /// refinement.
    pub fn solve(&self, b: &DVector<f64>) -> DVector<f64> {
        let mut x = self.apply_inverse(b);
        let residual = b - &self.matrix * &x;
        x += self.apply_inverse(&residual);
        x
    }

    fn apply_inverse(&self, b: &DVector<f64>) -> DVector<f64> {
        let n = self.perm.len();
        let l = &self.factor;
        let mut y = DVector::from_iterator(n, self.perm.iter().map(|&i| b[i]));

        // L z = P b
        for &(k, pivot) in &self.pivots {
            let width = if let Pivot::Two { .. } = pivot { 2 } else { 1 };
            for c in k..k + width {
                let yc = y[c];
                for i in (k + width)..n {
                    y[i] -= l[(i, c)] * yc;
                }
            }
        }

        // D w = z
        for &(k, pivot) in &self.pivots {
            match pivot {
                Pivot::One(d) => y[k] /= d,
                Pivot::Two { a, b, c } => {
                    let det = a * c - b * b;
                    let (y0, y1) = (y[k], y[k + 1]);
                    y[k] = (c * y0 - b * y1) / det;
                    y[k + 1] = (a * y1 - b * y0) / det;
                }
                Pivot::Zero => y[k] = 0.0,
            }
        }

        // L^T v = w
        for &(k, pivot) in self.pivots.iter().rev() {
            let width = if let Pivot::Two { .. } = pivot { 2 } else { 1 };
            for c in k..k + width {
                let dot: f64 = ((k + width)..n).map(|i| l[(i, c)] * y[i]).sum();
                y[c] -= dot;
            }
        }

        let mut x = DVector::zeros(n);
        for (pos, &i) in self.perm.iter().enumerate() {
            x[i] = y[pos];
        }
        x
    }
}

/// Factorized primal-dual matrix along with the regularization that was needed.
pub struct Kkt {
    solver: SymmetricSolver,
    n: usize,
    pub delta_w: f64,
    pub delta_c: f64,
}

impl Kkt {
    /// Solves for `(dy, dlambda)` given the dual and primal right hand sides.
    pub fn solve(&self, r_d: &DVector<f64>, r_c: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let m = r_c.len();
        let mut rhs = DVector::zeros(self.n + m);
        rhs.rows_mut(0, self.n).copy_from(&(-r_d));
        rhs.rows_mut(self.n, m).copy_from(&(-r_c));
        let sol = self.solver.solve(&rhs);
        (sol.rows(0, self.n).into_owned(), sol.rows(self.n, m).into_owned())
    }
}

/// Remembers the last regularization between iterations.
#[derive(Clone, Debug, Default)]
pub struct InertiaCorrector {
    last_delta_w: f64,
}

impl InertiaCorrector {
    /// Factorizes the primal-dual matrix for the Hessian block `h` (already including
    /// `Sigma`) and the constraint Jacobian `jac`, regularizing as needed.
    pub fn factorize(
        &mut self,
        h: &DMatrix<f64>,
        jac: &DMatrix<f64>,
        mu: f64,
    ) -> Result<Kkt, KktError> {
        let n = h.nrows();
        let m = jac.nrows();

        let mut delta_w = 0.0;
        let mut delta_c = 0.0;
        loop {
            let solver = SymmetricSolver::new(assemble(h, jac, delta_w, delta_c))?;
            let (pos, neg, zero) = solver.inertia();
            if pos == n && neg == m && zero == 0 {
                if delta_w > 0.0 {
                    self.last_delta_w = delta_w;
                }
                return Ok(Kkt {
                    solver,
                    n,
                    delta_w,
                    delta_c,
                });
            }
            if zero > 0 && m > 0 && delta_c == 0.0 {
                // Rank deficient constraint Jacobian.
                delta_c = DELTA_C_FACTOR * mu.powf(DELTA_C_EXPONENT);
                continue;
            }
            delta_w = if delta_w == 0.0 {
                if self.last_delta_w == 0.0 {
                    DELTA_W_INIT
                } else {
                    (KAPPA_W_MINUS * self.last_delta_w).max(DELTA_W_MIN)
                }
            } else if self.last_delta_w == 0.0 {
                KAPPA_W_PLUS_FIRST * delta_w
            } else {
                KAPPA_W_PLUS * delta_w
            };
            if delta_w > DELTA_W_MAX {
                return Err(KktError::TooMuchRegularization);
            }
        }
    }
}

fn assemble(h: &DMatrix<f64>, jac: &DMatrix<f64>, delta_w: f64, delta_c: f64) -> DMatrix<f64> {
    let n = h.nrows();
    let m = jac.nrows();
    let mut k = DMatrix::zeros(n + m, n + m);
    k.view_mut((0, 0), (n, n)).copy_from(h);
    for i in 0..n {
        k[(i, i)] += delta_w;
    }
    if m > 0 {
        k.view_mut((n, 0), (m, n)).copy_from(jac);
        k.view_mut((0, n), (n, m)).copy_from(&jac.transpose());
        for j in 0..m {
            k[(n + j, n + j)] = -delta_c;
        }
    }
    k
}
