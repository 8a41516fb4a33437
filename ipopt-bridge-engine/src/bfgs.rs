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

//! Limited-memory BFGS approximation of the Lagrangian Hessian, used when
//! `hessian_approximation` is `limited-memory`.

use nalgebra::{DMatrix, DVector};
use std::collections::VecDeque;

/// Number of correction pairs kept.
const MAX_HISTORY: usize = 6;
/// Powell damping threshold.
const DAMPING: f64 = 0.2;

#[derive(Clone, Debug)]
pub struct LimitedMemoryBfgs {
    n: usize,
    sigma: f64,
    pairs: VecDeque<(DVector<f64>, DVector<f64>)>,
}

impl LimitedMemoryBfgs {
    pub fn new(n: usize) -> Self {
        LimitedMemoryBfgs {
            n,
            sigma: 1.0,
            pairs: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    /// Dense approximation built from `sigma * I` and the stored pairs.
    pub fn matrix(&self) -> DMatrix<f64> {
        let mut b = DMatrix::identity(self.n, self.n) * self.sigma;
        for (s, y) in self.pairs.iter() {
            apply_update(&mut b, s, y);
        }
        b
    }

    /// Records the step `s` and the change `y` in the Lagrangian gradient.
    ///
    /// The pair is damped so that the approximation stays positive definite; pairs with a
    /// negligible step are skipped.
    pub fn update(&mut self, s: DVector<f64>, y: DVector<f64>) {
        let ss = s.dot(&s);
        if ss <= f64::EPSILON * f64::EPSILON {
            return;
        }
        if self.pairs.is_empty() {
            // Shanno-Phua scaling of the initial matrix.
            let sy = s.dot(&y);
            if sy > 0.0 {
                self.sigma = (y.dot(&y) / sy).clamp(1e-8, 1e8);
            }
        }

        let b = self.matrix();
        let bs = &b * &s;
        let sbs = s.dot(&bs);
        let sy = s.dot(&y);
        let y = if sy < DAMPING * sbs {
            let theta = (1.0 - DAMPING) * sbs / (sbs - sy);
            &y * theta + &bs * (1.0 - theta)
        } else {
            y
        };

        if self.pairs.len() == MAX_HISTORY {
            self.pairs.pop_front();
        }
        self.pairs.push_back((s, y));
    }
}

fn apply_update(b: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
    let bs = &*b * s;
    let sbs = s.dot(&bs);
    let sy = s.dot(y);
    if sbs <= 0.0 || sy <= 0.0 {
        return;
    }
    *b -= (&bs * bs.transpose()) / sbs;
    *b += (y * y.transpose()) / sy;
}
