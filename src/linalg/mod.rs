//! Linear-algebra glue for the keyed block systems.
//!
//! Ordering of keyed unknowns into flat columns, sparse assembly of the
//! working-set saddle-point system, and the dense factorizations behind both
//! the primal solve and the dual least squares.

pub mod kkt;
pub mod ordering;
