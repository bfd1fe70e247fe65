//! The working set: inequality constraints currently enforced as equalities.

use std::collections::BTreeSet;

/// Indices (into the problem's inequality list) of the active constraints.
///
/// Members are identified by index into the immutable inequality list, never
/// by copies of the rows, so the variable indices built at construction stay
/// valid. Updates are functional: [`with`](WorkingSet::with) and
/// [`without`](WorkingSet::without) return a new set, keeping each `QpState`
/// snapshot immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    active: BTreeSet<usize>,
}

impl WorkingSet {
    /// Empty working set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Working set from a list of active indices.
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            active: indices.into_iter().collect(),
        }
    }

    /// True if constraint `ix` is active.
    pub fn is_active(&self, ix: usize) -> bool {
        self.active.contains(&ix)
    }

    /// A new set with `ix` added.
    pub fn with(&self, ix: usize) -> Self {
        let mut active = self.active.clone();
        active.insert(ix);
        Self { active }
    }

    /// A new set with `ix` removed.
    pub fn without(&self, ix: usize) -> Self {
        let mut active = self.active.clone();
        active.remove(&ix);
        Self { active }
    }

    /// Active indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.active.iter().copied()
    }

    /// Number of active constraints.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// True if no inequality is active.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_functional_updates() {
        let ws = WorkingSet::new();
        let ws2 = ws.with(3).with(1);

        assert!(ws.is_empty());
        assert_eq!(ws2.len(), 2);
        assert!(ws2.is_active(1) && ws2.is_active(3));

        let ws3 = ws2.without(3);
        assert!(ws2.is_active(3), "snapshot must not change");
        assert!(!ws3.is_active(3));
    }

    #[test]
    fn test_ascending_iteration() {
        let ws = WorkingSet::from_indices([5, 0, 2]);
        let order: Vec<usize> = ws.iter().collect();
        assert_eq!(order, vec![0, 2, 5]);
    }
}
