//! Column layout of the stacked keyed system.

use crate::values::{Key, VectorValues};
use nalgebra::DVector;
use std::collections::BTreeMap;

/// Maps each key to its `(offset, dim)` column block, in sorted key order.
///
/// The sorted order doubles as the elimination order handed to the
/// factorization, so identical problems produce identical pivot sequences.
#[derive(Debug, Clone)]
pub struct Ordering {
    offsets: BTreeMap<Key, (usize, usize)>,
    dim: usize,
}

impl Ordering {
    /// Layout from a key → dimension map.
    pub fn new(dims: &BTreeMap<Key, usize>) -> Self {
        let mut offsets = BTreeMap::new();
        let mut offset = 0;
        for (&key, &dim) in dims {
            offsets.insert(key, (offset, dim));
            offset += dim;
        }
        Self { offsets, dim: offset }
    }

    /// `(offset, dim)` of `key`, if present.
    pub fn offset(&self, key: Key) -> Option<(usize, usize)> {
        self.offsets.get(&key).copied()
    }

    /// Total stacked dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Keys in layout order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.offsets.keys().copied()
    }

    /// Stack `values` into one flat vector. Every key of the layout must be
    /// assigned in `values`.
    pub fn gather(&self, values: &VectorValues) -> DVector<f64> {
        let mut out = DVector::zeros(self.dim);
        for (&key, &(offset, dim)) in &self.offsets {
            let v = values
                .get(key)
                .unwrap_or_else(|| panic!("gather: missing value for {key}"));
            for i in 0..dim {
                out[offset + i] = v[i];
            }
        }
        out
    }

    /// Split a flat vector back into keyed blocks.
    pub fn scatter(&self, v: &DVector<f64>) -> VectorValues {
        assert_eq!(v.len(), self.dim, "scatter: length mismatch");
        let mut out = VectorValues::new();
        for (&key, &(offset, dim)) in &self.offsets {
            out.insert(key, v.rows(offset, dim).into_owned());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_scatter_roundtrip() {
        let mut dims = BTreeMap::new();
        dims.insert(Key::primal(2), 2);
        dims.insert(Key::primal(0), 1);
        let ordering = Ordering::new(&dims);
        assert_eq!(ordering.dim(), 3);
        assert_eq!(ordering.offset(Key::primal(0)), Some((0, 1)));
        assert_eq!(ordering.offset(Key::primal(2)), Some((1, 2)));

        let mut values = VectorValues::new();
        values.insert(Key::primal(0), DVector::from_vec(vec![5.0]));
        values.insert(Key::primal(2), DVector::from_vec(vec![1.0, 2.0]));

        let flat = ordering.gather(&values);
        assert_eq!(flat, DVector::from_vec(vec![5.0, 1.0, 2.0]));
        assert_eq!(ordering.scatter(&flat), values);
    }
}
