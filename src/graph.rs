//! Factor types of the QP and the variable index.
//!
//! The cost is a sum of [`QuadraticFactor`]s, each a quadratic form over a
//! small set of keys. Constraints are scalar [`LinearConstraint`] rows.
//! [`VariableIndex`] maps each key to the factors touching it; it is built
//! once per sub-graph and reused every iteration.

use crate::values::{Key, VectorValues};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Capability shared by all factor kinds: enumerate the keys touched.
pub trait Keyed {
    /// Keys this factor involves, in the factor's own order.
    fn keys(&self) -> Vec<Key>;
}

/// Quadratic cost factor `0.5 xᵀGx − gᵀx + f` over a small set of keys.
///
/// `info` is the full symmetric information matrix over the stacked block
/// dimensions of the factor's keys, `linear` the stacked linear term `g`,
/// `constant` the offset `f`.
#[derive(Debug, Clone)]
pub struct QuadraticFactor {
    keys: Vec<Key>,
    dims: Vec<usize>,
    info: DMatrix<f64>,
    linear: DVector<f64>,
    constant: f64,
}

impl QuadraticFactor {
    /// Build a factor from its keyed block layout.
    ///
    /// `info` must be square and symmetric over the sum of the block
    /// dimensions; `linear` must have the same stacked length.
    pub fn new(
        terms: Vec<(Key, usize)>,
        info: DMatrix<f64>,
        linear: DVector<f64>,
        constant: f64,
    ) -> Self {
        assert!(!terms.is_empty(), "cost factor must touch at least one key");
        let total: usize = terms.iter().map(|(_, d)| d).sum();
        assert_eq!(info.nrows(), total, "info matrix rows mismatch block dims");
        assert_eq!(info.ncols(), total, "info matrix cols mismatch block dims");
        assert_eq!(linear.len(), total, "linear term length mismatch block dims");

        let (keys, dims) = terms.into_iter().unzip();
        Self { keys, dims, info, linear, constant }
    }

    /// Convenience constructor for a single-key factor.
    pub fn unary(key: Key, info: DMatrix<f64>, linear: DVector<f64>, constant: f64) -> Self {
        let dim = linear.len();
        Self::new(vec![(key, dim)], info, linear, constant)
    }

    /// The stacked information matrix `G`.
    pub fn info(&self) -> &DMatrix<f64> {
        &self.info
    }

    /// The stacked linear term `g`.
    pub fn linear(&self) -> &DVector<f64> {
        &self.linear
    }

    /// Per-key layout: `(key, local offset, dim)` in stacking order.
    pub fn layout(&self) -> impl Iterator<Item = (Key, usize, usize)> + '_ {
        let mut offset = 0;
        self.keys.iter().zip(self.dims.iter()).map(move |(&key, &dim)| {
            let entry = (key, offset, dim);
            offset += dim;
            entry
        })
    }

    fn block_of(&self, key: Key) -> Option<(usize, usize)> {
        self.layout().find(|&(k, _, _)| k == key).map(|(_, o, d)| (o, d))
    }

    fn stack(&self, x: &VectorValues) -> DVector<f64> {
        let total = self.linear.len();
        let mut out = DVector::zeros(total);
        for (key, offset, dim) in self.layout() {
            let v = x
                .get(key)
                .unwrap_or_else(|| panic!("cost factor: missing value for {key}"));
            for i in 0..dim {
                out[offset + i] = v[i];
            }
        }
        out
    }

    /// `0.5 xᵀGx − gᵀx + f` at `x`.
    pub fn error(&self, x: &VectorValues) -> f64 {
        let xs = self.stack(x);
        let gx = &self.info * &xs;
        0.5 * xs.dot(&gx) - self.linear.dot(&xs) + self.constant
    }

    /// Block rows of the gradient `Gx − g` belonging to `key`.
    ///
    /// Panics if the factor does not touch `key`.
    pub fn gradient(&self, key: Key, x: &VectorValues) -> DVector<f64> {
        let (offset, dim) = self
            .block_of(key)
            .unwrap_or_else(|| panic!("cost factor does not touch {key}"));
        let xs = self.stack(x);
        let grad = &self.info * &xs - &self.linear;
        grad.rows(offset, dim).into_owned()
    }
}

impl Keyed for QuadraticFactor {
    fn keys(&self) -> Vec<Key> {
        self.keys.clone()
    }
}

/// One scalar linear constraint row `Σ aₖ·xₖ (= | ≤) rhs`.
///
/// [`evaluate`](LinearConstraint::evaluate) returns the signed margin
/// `Σ aₖ·xₖ − rhs`: an equality is satisfied at 0, an inequality is feasible
/// at ≤ 0. Each row carries one scalar multiplier, named by its synthetic
/// dual key; vector-valued equalities are expressed as several rows.
#[derive(Debug, Clone)]
pub struct LinearConstraint {
    terms: Vec<(Key, DVector<f64>)>,
    rhs: f64,
    dual_key: Key,
}

impl LinearConstraint {
    pub(crate) fn new(terms: Vec<(Key, DVector<f64>)>, rhs: f64, dual_key: Key) -> Self {
        assert!(!terms.is_empty(), "constraint must touch at least one key");
        Self { terms, rhs, dual_key }
    }

    /// Synthetic key naming this row's Lagrange multiplier.
    pub fn dual_key(&self) -> Key {
        self.dual_key
    }

    /// Right-hand side / threshold.
    pub fn rhs(&self) -> f64 {
        self.rhs
    }

    /// The per-key gradient columns `aₖ`.
    pub fn terms(&self) -> &[(Key, DVector<f64>)] {
        &self.terms
    }

    /// Gradient column for `key`, if the row touches it.
    pub fn jacobian(&self, key: Key) -> Option<&DVector<f64>> {
        self.terms.iter().find(|(k, _)| *k == key).map(|(_, a)| a)
    }

    /// Signed margin `Σ aₖ·xₖ − rhs` at `x`.
    pub fn evaluate(&self, x: &VectorValues) -> f64 {
        self.dot(x) - self.rhs
    }

    /// Directional derivative `Σ aₖ·pₖ` along `p`.
    pub fn dot(&self, p: &VectorValues) -> f64 {
        self.terms
            .iter()
            .map(|(key, a)| {
                let v = p
                    .get(*key)
                    .unwrap_or_else(|| panic!("constraint: missing value for {key}"));
                a.dot(v)
            })
            .sum()
    }
}

impl Keyed for LinearConstraint {
    fn keys(&self) -> Vec<Key> {
        self.terms.iter().map(|(k, _)| *k).collect()
    }
}

/// Read-only index from key to the indices of the factors touching it.
///
/// Stays consistent with the original immutable factor lists; only the
/// working set varies across iterations.
#[derive(Debug, Clone, Default)]
pub struct VariableIndex {
    index: BTreeMap<Key, Vec<usize>>,
}

impl VariableIndex {
    /// Build the index over a factor list.
    pub fn build<F: Keyed>(factors: &[F]) -> Self {
        let mut index: BTreeMap<Key, Vec<usize>> = BTreeMap::new();
        for (ix, factor) in factors.iter().enumerate() {
            for key in factor.keys() {
                index.entry(key).or_default().push(ix);
            }
        }
        Self { index }
    }

    /// Indices of the factors touching `key` (empty if none).
    pub fn factors(&self, key: Key) -> &[usize] {
        self.index.get(&key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Keys with at least one incident factor, in order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.index.keys().copied()
    }
}
