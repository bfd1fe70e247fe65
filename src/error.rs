//! Error types for the active-set QP solver.

use crate::values::Key;
use thiserror::Error;

/// Errors that can occur while setting up or running the solver.
#[derive(Error, Debug)]
pub enum QpError {
    /// The caller-supplied starting point violates a constraint.
    ///
    /// This solver has no phase-1 LP to repair an infeasible start, so the
    /// error is fatal to the current `optimize` call; the caller must supply
    /// a feasible point.
    #[error("infeasible initial value: constraint {constraint} violated by {violation:.3e}")]
    InfeasibleInitialValue {
        /// Dual key of the violated constraint.
        constraint: Key,
        /// Amount by which the constraint is violated.
        violation: f64,
    },

    /// The linear system for the current working set is singular or
    /// underdetermined (degenerate active set).
    #[error("singular working-set system over keys {keys:?}")]
    SingularSystem {
        /// Keys of the unknowns in the failed system.
        keys: Vec<Key>,
    },

    /// Problem validation failed.
    #[error("invalid problem: {0}")]
    InvalidProblem(String),
}

/// Result type for solver operations.
pub type QpResult<T> = Result<T, QpError>;
