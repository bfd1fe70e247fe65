//! Problem container, solver configuration, and result types.

use crate::error::{QpError, QpResult};
use crate::graph::{Keyed, LinearConstraint, QuadraticFactor};
use crate::values::{Key, VectorValues};
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::fmt;

/// A quadratic program over keyed factors:
///
/// ```text
/// minimize    0.5 xᵀ G x − gᵀ x + f0      (sum of quadratic factors)
/// subject to  c_eq(x)   = 0                (scalar linear rows)
///             c_ineq(x) ≤ 0
/// ```
///
/// Constraints are added through [`add_equality`](QpProblem::add_equality) /
/// [`add_inequality`](QpProblem::add_inequality), which assign each row a
/// synthetic dual key, unique across both constraint sets. The problem is
/// immutable once handed to the solver.
#[derive(Debug, Clone, Default)]
pub struct QpProblem {
    cost: Vec<QuadraticFactor>,
    equalities: Vec<LinearConstraint>,
    inequalities: Vec<LinearConstraint>,
}

impl QpProblem {
    /// Empty problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a quadratic cost factor.
    pub fn add_cost(&mut self, factor: QuadraticFactor) {
        self.cost.push(factor);
    }

    /// Append an equality row `Σ aₖ·xₖ = rhs`; returns its dual key.
    pub fn add_equality(&mut self, terms: Vec<(Key, DVector<f64>)>, rhs: f64) -> Key {
        let dual_key = self.next_dual_key();
        self.equalities.push(LinearConstraint::new(terms, rhs, dual_key));
        dual_key
    }

    /// Append an inequality row `Σ aₖ·xₖ ≤ rhs`; returns its dual key.
    pub fn add_inequality(&mut self, terms: Vec<(Key, DVector<f64>)>, rhs: f64) -> Key {
        let dual_key = self.next_dual_key();
        self.inequalities.push(LinearConstraint::new(terms, rhs, dual_key));
        dual_key
    }

    fn next_dual_key(&self) -> Key {
        Key::dual((self.equalities.len() + self.inequalities.len()) as u64)
    }

    /// The cost factors.
    pub fn cost(&self) -> &[QuadraticFactor] {
        &self.cost
    }

    /// The equality rows.
    pub fn equalities(&self) -> &[LinearConstraint] {
        &self.equalities
    }

    /// The inequality rows.
    pub fn inequalities(&self) -> &[LinearConstraint] {
        &self.inequalities
    }

    /// Objective value `Σ factor.error(x)`.
    pub fn objective(&self, x: &VectorValues) -> f64 {
        self.cost.iter().map(|f| f.error(x)).sum()
    }

    /// Per-key dimension across all factors.
    ///
    /// The first occurrence of a key fixes its dimension; a later factor
    /// disagreeing is a caller error, reported here rather than deep inside
    /// the iteration loop.
    pub fn key_dims(&self) -> QpResult<BTreeMap<Key, usize>> {
        let mut dims: BTreeMap<Key, usize> = BTreeMap::new();

        let mut record = |key: Key, dim: usize| -> QpResult<()> {
            match dims.get(&key) {
                Some(&seen) if seen != dim => Err(QpError::InvalidProblem(format!(
                    "key {key} has dimension {seen} in one factor and {dim} in another"
                ))),
                Some(_) => Ok(()),
                None => {
                    dims.insert(key, dim);
                    Ok(())
                }
            }
        };

        for factor in &self.cost {
            for (key, _, dim) in factor.layout() {
                record(key, dim)?;
            }
        }
        for constraint in self.equalities.iter().chain(self.inequalities.iter()) {
            for (key, a) in constraint.terms() {
                record(*key, a.len())?;
            }
        }
        Ok(dims)
    }

    /// Validate the problem once, at entry.
    pub fn validate(&self) -> QpResult<()> {
        if self.cost.is_empty() {
            return Err(QpError::InvalidProblem(
                "problem has no cost factors".to_string(),
            ));
        }
        for constraint in self.equalities.iter().chain(self.inequalities.iter()) {
            if constraint.keys().is_empty() {
                return Err(QpError::InvalidProblem(format!(
                    "constraint {} touches no keys",
                    constraint.dual_key()
                )));
            }
        }
        self.key_dims()?;
        Ok(())
    }
}

/// Solver configuration.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Boundary tolerance: an inequality with `|c(x)|` below this at the
    /// initial point is marked active. Doubles as the feasibility slack when
    /// screening the initial point.
    pub active_tol: f64,

    /// Sign tolerance for the leaving-constraint test: an active multiplier
    /// must exceed this to be dropped from the working set.
    pub dual_sign_tol: f64,

    /// Iteration cap. Exhausting it is reported as
    /// [`SolveStatus::MaxIterations`], not an error.
    pub max_iterations: usize,

    /// Print a per-iteration table.
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            active_tol: 1e-7,
            dual_sign_tol: 1e-9,
            max_iterations: 100,
            verbose: false,
        }
    }
}

/// Terminal outcome of an [`optimize`](crate::solver::QpSolver::optimize) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// KKT conditions satisfied: primal feasible, active multipliers have the
    /// correct sign.
    Converged,

    /// Iteration cap reached before convergence. The returned iterate is the
    /// best-so-far; the caller decides whether to accept it.
    MaxIterations,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Converged => write!(f, "Converged"),
            SolveStatus::MaxIterations => write!(f, "MaxIterations"),
        }
    }
}

/// Solution pair with status and iteration count.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Terminal status.
    pub status: SolveStatus,

    /// Primal solution.
    pub values: VectorValues,

    /// Lagrange multipliers of the final working set, keyed by dual key.
    /// Constraints absent from the map have multiplier zero.
    pub duals: VectorValues,

    /// Number of iterations performed.
    pub iterations: usize,
}
