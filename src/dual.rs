//! Dual graph construction: solving for the Lagrange multipliers of the
//! active constraints.
//!
//! With the Lagrangian `L(x, λ) = f(x) − Σₖ λₖ cₖ(x)`, stationarity at the
//! working-set solution requires, for each key `xᵢ` touched by a constraint,
//!
//! ```text
//! Σₖ λₖ ∇cₖ(xᵢ) = ∇f(xᵢ)
//! ```
//!
//! where `k` ranges over the active constraints touching `xᵢ`. Each such key
//! contributes one [`DualFactor`]: Jacobian-transpose columns over the
//! multiplier unknowns and the unconstrained-cost gradient as right-hand
//! side. Keys touched by no constraint are excluded; their stationarity is
//! enforced by the primal solve. The assembled graph is a small sparse
//! least-squares problem over the multipliers.

use crate::error::{QpError, QpResult};
use crate::graph::{LinearConstraint, VariableIndex};
use crate::solver::QpSolver;
use crate::values::{Key, VectorValues};
use crate::working_set::WorkingSet;
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// One stationarity equation over the multiplier unknowns.
#[derive(Debug, Clone)]
pub struct DualFactor {
    /// `(dual key, ∇cₖ(xᵢ))` for each active constraint touching the key.
    pub terms: Vec<(Key, DVector<f64>)>,
    /// `∇f(xᵢ)` at the candidate solution.
    pub rhs: DVector<f64>,
}

/// The dual graph: one factor per constrained key.
pub type DualGraph = Vec<DualFactor>;

impl QpSolver {
    /// Jacobian-transpose columns contributed by every active factor in
    /// `constraints` touching `key`. Inactive factors contribute nothing.
    pub(crate) fn collect_dual_jacobians(
        &self,
        key: Key,
        constraints: &[LinearConstraint],
        index: &VariableIndex,
        is_active: impl Fn(usize) -> bool,
    ) -> Vec<(Key, DVector<f64>)> {
        index
            .factors(key)
            .iter()
            .filter(|&&ix| is_active(ix))
            .map(|&ix| {
                let constraint = &constraints[ix];
                let a = constraint
                    .jacobian(key)
                    .unwrap_or_else(|| panic!("indexed constraint does not touch {key}"));
                (constraint.dual_key(), a.clone())
            })
            .collect()
    }

    /// The stationarity equation for one constrained key, or `None` when no
    /// active constraint touches it.
    ///
    /// The right-hand side is assembled from the cost factors incident to
    /// the key, independent of the working set.
    pub fn create_dual_factor(
        &self,
        key: Key,
        working_set: &WorkingSet,
        delta: &VectorValues,
    ) -> Option<DualFactor> {
        let mut terms =
            self.collect_dual_jacobians(key, self.problem.equalities(), &self.equality_index, |_| {
                true
            });
        terms.extend(self.collect_dual_jacobians(
            key,
            self.problem.inequalities(),
            &self.inequality_index,
            |ix| working_set.is_active(ix),
        ));
        if terms.is_empty() {
            return None;
        }

        let (_, dim) = self.ordering.offset(key)?;
        let mut rhs = DVector::zeros(dim);
        for &ix in self.cost_index.factors(key) {
            rhs += self.problem.cost()[ix].gradient(key, delta);
        }

        Some(DualFactor { terms, rhs })
    }

    /// Assemble the dual graph at the candidate solution `delta`.
    ///
    /// Pure function of the working set and `delta`.
    pub fn build_dual_graph(&self, working_set: &WorkingSet, delta: &VectorValues) -> DualGraph {
        self.constrained_keys
            .iter()
            .filter_map(|&key| self.create_dual_factor(key, working_set, delta))
            .collect()
    }

    /// Solve the dual graph for the multipliers, keyed by dual key.
    ///
    /// Stacks the factors into one least-squares system over the active
    /// multipliers. A rank-deficient stacking (redundant active rows) fails
    /// with [`QpError::SingularSystem`] naming the dual keys.
    pub fn solve_dual_graph(&self, graph: &DualGraph) -> QpResult<VectorValues> {
        let mut columns: BTreeMap<Key, usize> = BTreeMap::new();
        for factor in graph {
            for (dual_key, _) in &factor.terms {
                let next = columns.len();
                columns.entry(*dual_key).or_insert(next);
            }
        }
        if columns.is_empty() {
            return Ok(VectorValues::new());
        }

        let rows: usize = graph.iter().map(|f| f.rhs.len()).sum();
        let mut a = DMatrix::zeros(rows, columns.len());
        let mut b = DVector::zeros(rows);

        let mut row = 0;
        for factor in graph {
            let dim = factor.rhs.len();
            for (dual_key, column) in &factor.terms {
                let col = columns[dual_key];
                for r in 0..dim {
                    a[(row + r, col)] += column[r];
                }
            }
            for r in 0..dim {
                b[row + r] = factor.rhs[r];
            }
            row += dim;
        }

        log::trace!(
            "dual solve: {} equations over {} multipliers",
            rows,
            columns.len()
        );

        let sol = crate::linalg::kkt::solve_normal_equations(&a, &b).ok_or_else(|| {
            QpError::SingularSystem {
                keys: columns.keys().copied().collect(),
            }
        })?;

        let mut lambdas = VectorValues::new();
        for (dual_key, col) in &columns {
            lambdas.insert(*dual_key, DVector::from_vec(vec![sol[*col]]));
        }
        Ok(lambdas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::QuadraticFactor;
    use crate::problem::{QpProblem, SolverConfig};
    use nalgebra::DMatrix;

    fn x(id: u64) -> Key {
        Key::primal(id)
    }

    /// min 0.5 u^2, subject to -u <= -2 (u >= 2).
    fn lower_bound_problem() -> QpSolver {
        let mut qp = QpProblem::new();
        qp.add_cost(QuadraticFactor::unary(
            x(0),
            DMatrix::from_row_slice(1, 1, &[1.0]),
            DVector::zeros(1),
            0.0,
        ));
        qp.add_inequality(vec![(x(0), DVector::from_vec(vec![-1.0]))], -2.0);
        QpSolver::new(qp, SolverConfig::default()).unwrap()
    }

    #[test]
    fn test_dual_factor_skips_inactive() {
        let solver = lower_bound_problem();
        let mut delta = VectorValues::new();
        delta.insert(x(0), DVector::from_vec(vec![2.0]));

        // Nothing active: no equation for the key.
        assert!(solver
            .create_dual_factor(x(0), &WorkingSet::new(), &delta)
            .is_none());

        let ws = WorkingSet::from_indices([0]);
        let factor = solver.create_dual_factor(x(0), &ws, &delta).unwrap();
        assert_eq!(factor.terms.len(), 1);
        assert_eq!(factor.terms[0].0, Key::dual(0));
        // ∇f(2) = 2
        assert!((factor.rhs[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_dual_solve_sign() {
        // At u = 2 with the bound active: -λ = ∇f(2) = 2, so λ = -2.
        let solver = lower_bound_problem();
        let mut delta = VectorValues::new();
        delta.insert(x(0), DVector::from_vec(vec![2.0]));

        let ws = WorkingSet::from_indices([0]);
        let graph = solver.build_dual_graph(&ws, &delta);
        assert_eq!(graph.len(), 1);

        let lambdas = solver.solve_dual_graph(&graph).unwrap();
        let lambda = lambdas.get(Key::dual(0)).unwrap()[0];
        assert!((lambda + 2.0).abs() < 1e-10, "lambda = {lambda}");
    }

    #[test]
    fn test_empty_dual_graph() {
        let solver = lower_bound_problem();
        let mut delta = VectorValues::new();
        delta.insert(x(0), DVector::from_vec(vec![3.0]));

        let graph = solver.build_dual_graph(&WorkingSet::new(), &delta);
        assert!(graph.is_empty());
        assert!(solver.solve_dual_graph(&graph).unwrap().is_empty());
    }
}
