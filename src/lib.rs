//! Active-set quadratic programming over keyed factor graphs.
//!
//! Solves problems of the form
//!
//! ```text
//! minimize    0.5 xᵀ G x − gᵀ x + f0
//! subject to  c_eq(x)   = 0
//!             c_ineq(x) ≤ 0
//! ```
//!
//! where the cost is a sum of quadratic factors over a sparse set of named
//! variables (keys) and the constraints are scalar linear rows, mirroring a
//! factor-graph representation rather than a dense matrix. The intended use
//! is as the trust-region / inner-loop subproblem solver inside a nonlinear
//! constrained optimizer: the outer loop linearizes its problem into a QP,
//! this crate solves it once per outer iteration, warm-started from the
//! previous active set.
//!
//! # Algorithm
//!
//! A primal active-set method (Nocedal & Wright, ch. 16):
//!
//! - Each iteration solves the QP with the working set enforced as
//!   equalities (a sparse saddle-point system over the keyed blocks).
//! - A line search against the inactive inequalities caps the step at the
//!   first boundary crossing; the blocking constraint enters the working set.
//! - At a full step, a sparse dual graph (one stationarity equation per
//!   constrained key) is solved for the Lagrange multipliers; an active
//!   inequality with a positive multiplier leaves the working set.
//! - Convergence is declared when the full step is feasible and every active
//!   multiplier has the correct sign.
//!
//! The solver requires a feasible starting point. There is no phase-1 LP:
//! an infeasible start fails with [`QpError::InfeasibleInitialValue`].
//!
//! # Example
//!
//! ```ignore
//! use qp_core::{Key, QpProblem, QpSolver, QuadraticFactor, SolverConfig, VectorValues};
//! use nalgebra::{DMatrix, DVector};
//!
//! // minimize 0.5 x^2  subject to  x >= 2
//! let x = Key::primal(0);
//! let mut qp = QpProblem::new();
//! qp.add_cost(QuadraticFactor::unary(
//!     x,
//!     DMatrix::from_row_slice(1, 1, &[1.0]),
//!     DVector::zeros(1),
//!     0.0,
//! ));
//! qp.add_inequality(vec![(x, DVector::from_vec(vec![-1.0]))], -2.0);
//!
//! let solver = QpSolver::new(qp, SolverConfig::default())?;
//! let mut start = VectorValues::new();
//! start.insert(x, DVector::from_vec(vec![5.0]));
//!
//! let result = solver.optimize(&start, &VectorValues::new(), true)?;
//! assert_eq!(result.values.get(x).unwrap()[0], 2.0);
//! ```

#![warn(clippy::all)]

pub mod dual;
pub mod error;
pub mod graph;
pub mod linalg;
pub mod problem;
pub mod solver;
pub mod values;
pub mod working_set;

pub use dual::{DualFactor, DualGraph};
pub use error::{QpError, QpResult};
pub use graph::{Keyed, LinearConstraint, QuadraticFactor, VariableIndex};
pub use problem::{QpProblem, SolveResult, SolveStatus, SolverConfig};
pub use solver::{QpSolver, QpState};
pub use values::{Key, VectorValues};
pub use working_set::WorkingSet;
