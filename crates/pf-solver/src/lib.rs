//! System assembly and solve for dynamic-phasor networks.
//!
//! Each topology variant (which components are active, which switches are
//! closed) gets its own matrix, stamped once and factorized eagerly, so a
//! singular network is rejected before the first step. Per step only the
//! right-hand side changes: it is zeroed, every active component's
//! `right_vector` is added in, and the active factorization is applied.

pub mod assembler;
pub mod error;
pub mod factor;
pub mod variant;

pub use assembler::Assembler;
pub use error::{SolverError, SolverResult};
pub use factor::{Factorization, RELATIVE_PIVOT_TOLERANCE, factorize};
pub use variant::TopologyVariant;
