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

//! Output file receiving the iteration table and exit summary of each solve.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Print level from which the per-iteration table is written.
const ITERATION_LEVEL: i32 = 5;
/// Print level from which the exit summary is written.
const SUMMARY_LEVEL: i32 = 1;

/// One row of the iteration table.
#[derive(Copy, Clone, Debug)]
pub struct IterationRow {
    pub iter: i32,
    pub restoration: bool,
    pub objective: f64,
    pub inf_pr: f64,
    pub inf_du: f64,
    pub mu: f64,
    pub d_norm: f64,
    pub regularization: f64,
    pub alpha_du: f64,
    pub alpha_pr: f64,
    pub ls_trials: i32,
}

impl IterationRow {
    pub fn format(&self) -> String {
        let lg = |v: f64| {
            if v > 0.0 {
                format!("{:5.1}", v.log10())
            } else {
                "    -".to_string()
            }
        };
        format!(
            "{:4}{} {:14.7e} {:8.2e} {:8.2e} {} {:8.2e} {} {:8.2e} {:8.2e} {:3}",
            self.iter,
            if self.restoration { 'r' } else { ' ' },
            self.objective,
            self.inf_pr,
            self.inf_du,
            lg(self.mu),
            self.d_norm,
            lg(self.regularization),
            self.alpha_du,
            self.alpha_pr,
            self.ls_trials
        )
    }
}

pub struct Journal {
    out: BufWriter<File>,
    print_level: i32,
    header_due: bool,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("print_level", &self.print_level)
            .finish()
    }
}

impl Journal {
    pub fn create<P: AsRef<Path>>(path: P, print_level: i32) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Journal {
            out: BufWriter::new(file),
            print_level,
            header_due: true,
        })
    }

    pub fn start_solve(&mut self, n: usize, m: usize, nele_jac: usize, nele_hess: usize) {
        if self.print_level < SUMMARY_LEVEL {
            return;
        }
        let _ = writeln!(
            self.out,
            "Number of variables: {}\nNumber of constraints: {}\n\
             Nonzeros in constraint Jacobian: {}\nNonzeros in Lagrangian Hessian: {}\n",
            n, m, nele_jac, nele_hess
        );
        self.header_due = true;
    }

    pub fn iteration(&mut self, row: &IterationRow) {
        if self.print_level < ITERATION_LEVEL {
            return;
        }
        if self.header_due {
            let _ = writeln!(
                self.out,
                "iter    objective    inf_pr   inf_du lg(mu)  ||d||  lg(rg) alpha_du alpha_pr  ls"
            );
            self.header_due = false;
        }
        let _ = writeln!(self.out, "{}", row.format());
    }

    pub fn finish(&mut self, message: &str, iterations: i32, objective: f64) {
        if self.print_level >= SUMMARY_LEVEL {
            let _ = writeln!(
                self.out,
                "\nNumber of Iterations....: {}\nObjective...............: {:.16e}\n\nEXIT: {}",
                iterations, objective, message
            );
        }
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_table_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solve.out");
        let mut journal = Journal::create(&path, 5).unwrap();
        journal.start_solve(2, 1, 2, 2);
        journal.iteration(&IterationRow {
            iter: 0,
            restoration: false,
            objective: 8.0,
            inf_pr: 0.0,
            inf_du: 1.0,
            mu: 0.1,
            d_norm: 0.0,
            regularization: 0.0,
            alpha_du: 0.0,
            alpha_pr: 0.0,
            ls_trials: 0,
        });
        journal.finish("Optimal Solution Found.", 0, 8.0);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Number of variables: 2"));
        assert!(text.contains("iter    objective"));
        assert!(text.contains("EXIT: Optimal Solution Found."));
    }

    #[test]
    fn quiet_journal_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quiet.out");
        let mut journal = Journal::create(&path, 0).unwrap();
        journal.start_solve(2, 1, 2, 2);
        journal.finish("Optimal Solution Found.", 0, 8.0);
        assert!(std::fs::read_to_string(&path).unwrap().is_empty());
    }
}
