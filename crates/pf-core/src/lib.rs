//! pf-core: stable foundation for phasorflow.
//!
//! Contains:
//! - units (uom SI types + constructors for circuit parameters)
//! - numeric (Real/Complex + tolerances + finiteness helpers)
//! - ids (stable compact IDs for components, attributes and tasks)
//! - attribute (typed attribute arena shared by tasks and solver)
//! - stamp (system matrix / source vector stamping buffers)
//! - topology (active component view of one system variant)
//! - context (per-step execution context handed to tasks)
//! - timing (step timers)
//! - error (shared error types)

pub mod attribute;
pub mod context;
pub mod error;
pub mod ids;
pub mod numeric;
pub mod stamp;
pub mod timing;
pub mod topology;
pub mod units;

// Re-exports: nice ergonomics for downstream crates
pub use attribute::{
    Attr, AttributeKind, AttributeRegistry, AttributeStore, AttributeType, AttributeValue,
    ComplexVector, RealVector,
};
pub use context::StepContext;
pub use error::{CoreError, CoreResult};
pub use ids::*;
pub use numeric::*;
pub use stamp::{SourceStamp, SystemMatrix, Terminal};
pub use topology::Topology;
