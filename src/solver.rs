//! Active-set iteration and the top-level solve driver.
//!
//! The solver holds only read-only problem data after construction: the
//! immutable [`QpProblem`], the column ordering, and the per-sub-graph
//! variable indices. Each [`iterate`](QpSolver::iterate) call is a pure
//! function of its input [`QpState`], so independent solves may run
//! concurrently on separate solver instances.

use crate::error::{QpError, QpResult};
use crate::graph::{Keyed, VariableIndex};
use crate::linalg::kkt;
use crate::linalg::ordering::Ordering;
use crate::problem::{QpProblem, SolveResult, SolveStatus, SolverConfig};
use crate::values::{Key, VectorValues};
use crate::working_set::WorkingSet;
use std::collections::BTreeSet;

/// Snapshot of the solver at one iteration.
///
/// `iterate` consumes one state and produces a new one; nothing is mutated
/// in place, so callers can keep a history of snapshots for inspection or
/// rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct QpState {
    /// Current primal iterate.
    pub values: VectorValues,
    /// Multipliers from the most recent full-step dual solve.
    pub duals: VectorValues,
    /// Active inequality constraints.
    pub working_set: WorkingSet,
    /// True once the KKT conditions hold.
    pub converged: bool,
    /// Iterations performed so far.
    pub iterations: usize,
}

/// Active-set QP solver over a keyed factor-graph problem.
///
/// Requires a feasible initial value; there is no phase-1 LP to repair an
/// infeasible start.
pub struct QpSolver {
    pub(crate) problem: QpProblem,
    pub(crate) config: SolverConfig,
    pub(crate) ordering: Ordering,
    pub(crate) cost_index: VariableIndex,
    pub(crate) equality_index: VariableIndex,
    pub(crate) inequality_index: VariableIndex,
    pub(crate) constrained_keys: BTreeSet<Key>,
}

impl QpSolver {
    /// Build a solver for `problem`, validating it once.
    pub fn new(problem: QpProblem, config: SolverConfig) -> QpResult<Self> {
        problem.validate()?;
        let dims = problem.key_dims()?;
        let ordering = Ordering::new(&dims);

        let cost_index = VariableIndex::build(problem.cost());
        let equality_index = VariableIndex::build(problem.equalities());
        let inequality_index = VariableIndex::build(problem.inequalities());

        let constrained_keys = problem
            .equalities()
            .iter()
            .chain(problem.inequalities().iter())
            .flat_map(|c| c.keys())
            .collect();

        Ok(Self {
            problem,
            config,
            ordering,
            cost_index,
            equality_index,
            inequality_index,
            constrained_keys,
        })
    }

    /// The problem being solved.
    pub fn problem(&self) -> &QpProblem {
        &self.problem
    }

    /// The configuration in effect.
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve the equality-constrained QP defined by the current working set.
    ///
    /// Every active inequality is enforced as an equality alongside the
    /// original equality rows. Fails with
    /// [`QpError::SingularSystem`] on a degenerate working set.
    pub fn solve_with_working_set(&self, working_set: &WorkingSet) -> QpResult<VectorValues> {
        let inequalities = self.problem.inequalities();
        let rows: Vec<_> = self
            .problem
            .equalities()
            .iter()
            .chain(working_set.iter().map(|ix| &inequalities[ix]))
            .collect();

        let (system, rhs) = kkt::assemble_saddle_point(&self.ordering, self.problem.cost(), &rows);
        let sol = kkt::solve_sparse_square(&system, &rhs).ok_or_else(|| {
            QpError::SingularSystem {
                keys: self.ordering.keys().collect(),
            }
        })?;

        // The primal block; the internal multipliers are discarded. The
        // published duals come from the dual graph.
        Ok(self
            .ordering
            .scatter(&sol.rows(0, self.ordering.dim()).into_owned()))
    }

    /// Largest α ∈ [0, 1] keeping `xk + α p` feasible for every inactive
    /// inequality, with the index of the first constraint attaining it.
    ///
    /// A constraint moving toward its boundary along `p` (`a·p > 0` for the
    /// `≤ 0` margin) caps α at the crossing; ones moving away are never
    /// binding. Ties at the minimum break to the lowest index. Returns
    /// `(1.0, None)` when the full step stays feasible.
    pub fn compute_step_size(
        &self,
        working_set: &WorkingSet,
        xk: &VectorValues,
        p: &VectorValues,
    ) -> (f64, Option<usize>) {
        let mut alpha = 1.0;
        let mut blocking = None;

        for (ix, constraint) in self.problem.inequalities().iter().enumerate() {
            if working_set.is_active(ix) {
                continue;
            }
            let slope = constraint.dot(p);
            if slope <= 0.0 {
                continue;
            }
            let margin = constraint.evaluate(xk);
            let crossing = (-margin / slope).max(0.0);
            if crossing < alpha {
                alpha = crossing;
                blocking = Some(ix);
            }
        }
        (alpha, blocking)
    }

    /// The active inequality with the most positive multiplier, if any
    /// exceeds the sign tolerance.
    ///
    /// Active inequalities of a `≤ 0` minimization must have λ ≤ 0 at an
    /// optimum; the worst violator leaves the working set. Equalities never
    /// leave. Iteration is in ascending index order and the comparison is
    /// strict, so ties keep the lowest index.
    pub fn identify_leaving_constraint(
        &self,
        working_set: &WorkingSet,
        lambdas: &VectorValues,
    ) -> Option<usize> {
        let inequalities = self.problem.inequalities();
        let mut worst = None;
        let mut worst_lambda = self.config.dual_sign_tol;

        for ix in working_set.iter() {
            let lambda = lambdas
                .get(inequalities[ix].dual_key())
                .map(|v| v[0])
                .unwrap_or(0.0);
            if lambda > worst_lambda {
                worst_lambda = lambda;
                worst = Some(ix);
            }
        }
        worst
    }

    /// Initial working set from the starting point.
    ///
    /// Cold start: an inequality whose margin is on the boundary
    /// (`|c(x0)| ≤ active_tol`) is active. Warm start with non-empty duals:
    /// a constraint whose dual key appears in `duals` is honored as active
    /// only while it still passes the boundary test at `x0` (stale hints are
    /// dropped); constraints absent from `duals` stay inactive.
    pub fn identify_active_constraints(
        &self,
        initial: &VectorValues,
        duals: &VectorValues,
        use_warm_start: bool,
    ) -> WorkingSet {
        let warm = use_warm_start && !duals.is_empty();
        let mut active = Vec::new();

        for (ix, constraint) in self.problem.inequalities().iter().enumerate() {
            let on_boundary = constraint.evaluate(initial).abs() <= self.config.active_tol;
            let is_active = if warm {
                duals.contains(constraint.dual_key()) && on_boundary
            } else {
                on_boundary
            };
            if is_active {
                active.push(ix);
            }
        }
        WorkingSet::from_indices(active)
    }

    /// Seed the initial state, screening the starting point.
    ///
    /// Every problem key must be assigned with the right dimension, every
    /// equality satisfied within `active_tol`, and every inequality within
    /// the same slack. Violations fail with
    /// [`QpError::InfeasibleInitialValue`] before any iteration runs. Keys
    /// the problem does not reference are dropped from the seeded state.
    pub fn initialize(
        &self,
        initial: &VectorValues,
        duals: &VectorValues,
        use_warm_start: bool,
    ) -> QpResult<QpState> {
        for key in self.ordering.keys() {
            let (_, dim) = self.ordering.offset(key).unwrap_or((0, 0));
            match initial.dim_of(key) {
                Some(d) if d == dim => {}
                Some(d) => {
                    return Err(QpError::InvalidProblem(format!(
                        "initial value for {key} has dimension {d}, expected {dim}"
                    )))
                }
                None => {
                    return Err(QpError::InvalidProblem(format!(
                        "initial values missing key {key}"
                    )))
                }
            }
        }

        for constraint in self.problem.equalities() {
            let violation = constraint.evaluate(initial).abs();
            if violation > self.config.active_tol {
                return Err(QpError::InfeasibleInitialValue {
                    constraint: constraint.dual_key(),
                    violation,
                });
            }
        }
        for constraint in self.problem.inequalities() {
            let violation = constraint.evaluate(initial);
            if violation > self.config.active_tol {
                return Err(QpError::InfeasibleInitialValue {
                    constraint: constraint.dual_key(),
                    violation,
                });
            }
        }

        Ok(QpState {
            values: self.ordering.scatter(&self.ordering.gather(initial)),
            duals: duals.clone(),
            working_set: self.identify_active_constraints(initial, duals, use_warm_start),
            converged: false,
            iterations: 0,
        })
    }

    /// One active-set iteration.
    ///
    /// Already-converged states are returned unchanged. Otherwise: solve
    /// within the working set; if an inactive inequality blocks the full
    /// step, take the partial step and add it (duals are carried over
    /// unchanged, they are only meaningful at a working-set vertex); at a
    /// full step, solve the dual graph and either drop the worst
    /// sign-violating constraint or declare convergence.
    pub fn iterate(&self, state: &QpState) -> QpResult<QpState> {
        if state.converged {
            return Ok(state.clone());
        }

        let solution = self.solve_with_working_set(&state.working_set)?;
        let p = solution.subtract(&state.values);
        let (alpha, blocking) = self.compute_step_size(&state.working_set, &state.values, &p);

        if let Some(entering) = blocking {
            log::debug!(
                "iter {}: partial step alpha={:.3e}, inequality {} enters",
                state.iterations,
                alpha,
                entering
            );
            return Ok(QpState {
                values: state.values.add_scaled(&p, alpha),
                duals: state.duals.clone(),
                working_set: state.working_set.with(entering),
                converged: false,
                iterations: state.iterations + 1,
            });
        }

        let dual_graph = self.build_dual_graph(&state.working_set, &solution);
        let duals = self.solve_dual_graph(&dual_graph)?;

        match self.identify_leaving_constraint(&state.working_set, &duals) {
            Some(leaving) => {
                log::debug!(
                    "iter {}: full step, inequality {} leaves",
                    state.iterations,
                    leaving
                );
                Ok(QpState {
                    values: solution,
                    duals,
                    working_set: state.working_set.without(leaving),
                    converged: false,
                    iterations: state.iterations + 1,
                })
            }
            None => Ok(QpState {
                values: solution,
                duals,
                working_set: state.working_set.clone(),
                converged: true,
                iterations: state.iterations + 1,
            }),
        }
    }

    /// Run the active-set method from a feasible starting point.
    ///
    /// Returns the primal/dual solution pair with the terminal status:
    /// [`SolveStatus::Converged`], or [`SolveStatus::MaxIterations`] with the
    /// best-so-far iterate when the cap is exhausted. Infeasible starts and
    /// singular working sets fail with [`QpError`].
    pub fn optimize(
        &self,
        initial: &VectorValues,
        duals: &VectorValues,
        use_warm_start: bool,
    ) -> QpResult<SolveResult> {
        let mut state = self.initialize(initial, duals, use_warm_start)?;

        if self.config.verbose {
            println!("Active-set QP solver");
            println!(
                "Problem: keys = {}, equalities = {}, inequalities = {}",
                self.ordering.keys().count(),
                self.problem.equalities().len(),
                self.problem.inequalities().len()
            );
            println!("{:>4} {:>14} {:>8}", "Iter", "Objective", "Active");
            println!("{}", "-".repeat(30));
        }

        while !state.converged && state.iterations < self.config.max_iterations {
            state = self.iterate(&state)?;
            if self.config.verbose {
                println!(
                    "{:4} {:14.6e} {:8}",
                    state.iterations,
                    self.problem.objective(&state.values),
                    state.working_set.len()
                );
            }
        }

        let status = if state.converged {
            SolveStatus::Converged
        } else {
            SolveStatus::MaxIterations
        };

        if self.config.verbose {
            println!("{}", "-".repeat(30));
            println!("Status: {status}");
            println!("Iterations: {}", state.iterations);
        }

        Ok(SolveResult {
            status,
            values: state.values,
            duals: state.duals,
            iterations: state.iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::QuadraticFactor;
    use nalgebra::{DMatrix, DVector};

    fn x(id: u64) -> Key {
        Key::primal(id)
    }

    fn scalar_values(entries: &[(u64, f64)]) -> VectorValues {
        let mut v = VectorValues::new();
        for &(id, val) in entries {
            v.insert(x(id), DVector::from_vec(vec![val]));
        }
        v
    }

    /// min 0.5 u^2 with bounds u <= 4 (row 0) and -u <= -1, i.e. u >= 1 (row 1).
    fn bounded_scalar_problem() -> QpSolver {
        let mut qp = QpProblem::new();
        qp.add_cost(QuadraticFactor::unary(
            x(0),
            DMatrix::from_row_slice(1, 1, &[1.0]),
            DVector::zeros(1),
            0.0,
        ));
        qp.add_inequality(vec![(x(0), DVector::from_vec(vec![1.0]))], 4.0);
        qp.add_inequality(vec![(x(0), DVector::from_vec(vec![-1.0]))], -1.0);
        QpSolver::new(qp, SolverConfig::default()).unwrap()
    }

    #[test]
    fn test_step_size_caps_at_crossing() {
        let solver = bounded_scalar_problem();
        let ws = WorkingSet::new();
        let xk = scalar_values(&[(0, 2.0)]);
        // Step toward 0 crosses u >= 1 at alpha = 0.5.
        let p = scalar_values(&[(0, -2.0)]);

        let (alpha, blocking) = solver.compute_step_size(&ws, &xk, &p);
        assert!((alpha - 0.5).abs() < 1e-12);
        assert_eq!(blocking, Some(1));
    }

    #[test]
    fn test_step_size_full_step_when_unblocked() {
        let solver = bounded_scalar_problem();
        let ws = WorkingSet::new();
        let xk = scalar_values(&[(0, 2.0)]);
        let p = scalar_values(&[(0, 1.0)]);

        let (alpha, blocking) = solver.compute_step_size(&ws, &xk, &p);
        assert_eq!(alpha, 1.0);
        assert_eq!(blocking, None);
    }

    #[test]
    fn test_step_size_ignores_active_rows() {
        let solver = bounded_scalar_problem();
        let ws = WorkingSet::from_indices([1]);
        let xk = scalar_values(&[(0, 1.0)]);
        let p = scalar_values(&[(0, -1.0)]);

        // The only constraint that would block is active, so it is skipped.
        let (alpha, blocking) = solver.compute_step_size(&ws, &xk, &p);
        assert_eq!(alpha, 1.0);
        assert_eq!(blocking, None);
    }

    #[test]
    fn test_identify_active_cold_start() {
        let solver = bounded_scalar_problem();
        let on_upper = scalar_values(&[(0, 4.0)]);
        let interior = scalar_values(&[(0, 2.0)]);

        let ws = solver.identify_active_constraints(&on_upper, &VectorValues::new(), false);
        assert!(ws.is_active(0));
        assert!(!ws.is_active(1));

        let ws = solver.identify_active_constraints(&interior, &VectorValues::new(), false);
        assert!(ws.is_empty());
    }

    #[test]
    fn test_identify_active_warm_start_drops_stale_hints() {
        let solver = bounded_scalar_problem();
        let mut duals = VectorValues::new();
        // Hint says the lower bound (dual key l1) was active.
        duals.insert(Key::dual(1), DVector::from_vec(vec![-0.5]));

        // Consistent: starting on the lower boundary keeps it active.
        let ws = solver.identify_active_constraints(&scalar_values(&[(0, 1.0)]), &duals, true);
        assert!(ws.is_active(1));

        // Stale: starting in the interior drops the hint.
        let ws = solver.identify_active_constraints(&scalar_values(&[(0, 2.0)]), &duals, true);
        assert!(ws.is_empty());

        // Warm start ignores boundary contact for constraints with no hint.
        let ws = solver.identify_active_constraints(&scalar_values(&[(0, 4.0)]), &duals, true);
        assert!(!ws.is_active(0));
    }

    #[test]
    fn test_leaving_constraint_picks_most_positive() {
        let solver = bounded_scalar_problem();
        let ws = WorkingSet::from_indices([0, 1]);

        let mut lambdas = VectorValues::new();
        lambdas.insert(Key::dual(0), DVector::from_vec(vec![0.3]));
        lambdas.insert(Key::dual(1), DVector::from_vec(vec![0.7]));
        assert_eq!(solver.identify_leaving_constraint(&ws, &lambdas), Some(1));

        let mut lambdas = VectorValues::new();
        lambdas.insert(Key::dual(0), DVector::from_vec(vec![-0.3]));
        lambdas.insert(Key::dual(1), DVector::from_vec(vec![-0.7]));
        assert_eq!(solver.identify_leaving_constraint(&ws, &lambdas), None);

        // Equal positives keep the lowest index.
        let mut lambdas = VectorValues::new();
        lambdas.insert(Key::dual(0), DVector::from_vec(vec![0.5]));
        lambdas.insert(Key::dual(1), DVector::from_vec(vec![0.5]));
        assert_eq!(solver.identify_leaving_constraint(&ws, &lambdas), Some(0));
    }

    #[test]
    fn test_initialize_rejects_missing_key() {
        let solver = bounded_scalar_problem();
        let result = solver.initialize(&VectorValues::new(), &VectorValues::new(), false);
        assert!(matches!(result, Err(QpError::InvalidProblem(_))));
    }
}
