//! Saddle-point assembly and factorization for the working-set solve, and
//! the normal-equations least squares used by the dual graph.
//!
//! Treating every active constraint as an equality, the step within the
//! current working set solves
//!
//! ```text
//! [G   Aᵀ] [x]   [g]
//! [A   0 ] [ν] = [b]
//! ```
//!
//! where `G`, `g` come from the quadratic cost factors and the rows of `A`
//! are the original equalities plus the active inequalities. The system is
//! assembled sparse from the keyed blocks, then densified for factorization:
//! working-set systems are small, and a dense LU with a residual guard is
//! both simpler and more robust against the rank-deficient active sets this
//! method must detect.

use crate::graph::{LinearConstraint, QuadraticFactor};
use crate::linalg::ordering::Ordering;
use nalgebra::{Cholesky, DMatrix, DVector};
use sprs::{CsMat, TriMat};

/// Relative residual above which an LU "solution" is rejected as singular.
const RESIDUAL_TOL: f64 = 1e-8;

/// Densify a CSC matrix. Duplicate entries accumulate.
pub fn to_dense(a: &CsMat<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(a.rows(), a.cols());
    for (&val, (row, col)) in a.iter() {
        out[(row, col)] += val;
    }
    out
}

/// Assemble the saddle-point system for the given constraint rows.
///
/// Unknowns are the stacked primal blocks of `ordering` followed by one
/// internal multiplier per row. Returns the system matrix (CSC) and the
/// right-hand side `[g; b]`.
pub fn assemble_saddle_point(
    ordering: &Ordering,
    cost: &[QuadraticFactor],
    rows: &[&LinearConstraint],
) -> (CsMat<f64>, DVector<f64>) {
    let n = ordering.dim();
    let nc = rows.len();
    let dim = n + nc;

    let mut tri = TriMat::new((dim, dim));
    let mut rhs = DVector::zeros(dim);

    // G blocks and g entries from the cost factors. Duplicate triplets are
    // summed on conversion, so overlapping factors accumulate.
    for factor in cost {
        let layout: Vec<(usize, usize, usize)> = factor
            .layout()
            .map(|(key, local, d)| {
                let (global, _) = ordering
                    .offset(key)
                    .unwrap_or_else(|| panic!("assembly: unordered key {key}"));
                (local, global, d)
            })
            .collect();

        let info = factor.info();
        let linear = factor.linear();
        for &(li, gi, di) in &layout {
            for r in 0..di {
                rhs[gi + r] += linear[li + r];
            }
            for &(lj, gj, dj) in &layout {
                for r in 0..di {
                    for c in 0..dj {
                        let v = info[(li + r, lj + c)];
                        if v != 0.0 {
                            tri.add_triplet(gi + r, gj + c, v);
                        }
                    }
                }
            }
        }
    }

    // Constraint rows A and their transpose.
    for (i, row) in rows.iter().enumerate() {
        for (key, a) in row.terms() {
            let (global, dim_k) = ordering
                .offset(*key)
                .unwrap_or_else(|| panic!("assembly: unordered key {key}"));
            for c in 0..dim_k {
                let v = a[c];
                if v != 0.0 {
                    tri.add_triplet(n + i, global + c, v);
                    tri.add_triplet(global + c, n + i, v);
                }
            }
        }
        rhs[n + i] = row.rhs();
    }

    (tri.to_csc(), rhs)
}

/// Solve `K z = rhs` by dense LU with a residual guard.
///
/// Returns `None` when the factorization reports a singular matrix or when
/// the residual betrays a near-singular one (partial-pivot LU can hand back
/// garbage for those instead of failing).
pub fn solve_sparse_square(k: &CsMat<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    assert_eq!(k.rows(), k.cols(), "system must be square");
    assert_eq!(k.rows(), rhs.len(), "rhs length mismatch");

    let dense = to_dense(k);
    let sol = dense.lu().solve(rhs)?;

    let mut residual = -rhs.clone();
    for (&val, (row, col)) in k.iter() {
        residual[row] += val * sol[col];
    }
    let scale = 1.0 + rhs.amax();
    if residual.amax() > RESIDUAL_TOL * scale {
        return None;
    }
    Some(sol)
}

/// Least-squares solve of a stacked `rows × cols` system via the normal
/// equations `AᵀA x = Aᵀb`.
///
/// Returns `None` when `AᵀA` is not positive definite (rank-deficient
/// stacking, e.g. redundant active constraints).
pub fn solve_normal_equations(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    assert_eq!(a.nrows(), b.len(), "rhs length mismatch");
    let ata = a.transpose() * a;
    let atb = a.transpose() * b;
    Cholesky::new(ata).map(|chol| chol.solve(&atb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Key;
    use std::collections::BTreeMap;

    fn scalar_ordering(n: u64) -> Ordering {
        let mut dims = BTreeMap::new();
        for i in 0..n {
            dims.insert(Key::primal(i), 1);
        }
        Ordering::new(&dims)
    }

    #[test]
    fn test_equality_constrained_solve() {
        // min 0.5 (u^2 + w^2) - (u + 5w)  s.t.  u - w = 0
        // Lagrangian solution: u = w = 3.
        let ordering = scalar_ordering(2);
        let cost = vec![QuadraticFactor::new(
            vec![(Key::primal(0), 1), (Key::primal(1), 1)],
            DMatrix::identity(2, 2),
            DVector::from_vec(vec![1.0, 5.0]),
            0.0,
        )];
        let row = LinearConstraint::new(
            vec![
                (Key::primal(0), DVector::from_vec(vec![1.0])),
                (Key::primal(1), DVector::from_vec(vec![-1.0])),
            ],
            0.0,
            Key::dual(0),
        );

        let (k, rhs) = assemble_saddle_point(&ordering, &cost, &[&row]);
        assert_eq!(k.rows(), 3);

        let sol = solve_sparse_square(&k, &rhs).expect("system is nonsingular");
        assert!((sol[0] - 3.0).abs() < 1e-10, "u = {}", sol[0]);
        assert!((sol[1] - 3.0).abs() < 1e-10, "w = {}", sol[1]);
    }

    #[test]
    fn test_duplicate_rows_are_singular() {
        let ordering = scalar_ordering(2);
        let cost = vec![QuadraticFactor::new(
            vec![(Key::primal(0), 1), (Key::primal(1), 1)],
            DMatrix::identity(2, 2),
            DVector::zeros(2),
            0.0,
        )];
        let row = LinearConstraint::new(
            vec![
                (Key::primal(0), DVector::from_vec(vec![1.0])),
                (Key::primal(1), DVector::from_vec(vec![1.0])),
            ],
            1.0,
            Key::dual(0),
        );

        let (k, rhs) = assemble_saddle_point(&ordering, &cost, &[&row, &row]);
        assert!(solve_sparse_square(&k, &rhs).is_none());
    }

    #[test]
    fn test_normal_equations_exact() {
        // Overdetermined but consistent: [1; 1] x = [2; 2]
        let a = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
        let b = DVector::from_vec(vec![2.0, 2.0]);
        let x = solve_normal_equations(&a, &b).expect("full column rank");
        assert!((x[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_normal_equations_rank_deficient() {
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let b = DVector::from_vec(vec![1.0]);
        assert!(solve_normal_equations(&a, &b).is_none());
    }
}
