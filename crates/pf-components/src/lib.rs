//! pf-components: component library for dynamic-phasor networks.
//!
//! Provides models for common network elements:
//! - Resistors, companion-model inductors and capacitors
//! - Ideal voltage and current sources with attribute-driven setpoints
//! - Switches whose position is part of the topology variant
//! - A constant-impedance load composed of primitive parts
//! - A classical synchronous machine with swing dynamics
//!
//! All components implement [`MnaComponent`]. Each one is driven by a
//! PreStep task (source contribution) and a PostStep task (read-back and
//! state update) built by [`component_tasks`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pf_components::{InitContext, MnaComponent, Resistor, component_tasks};
//! use pf_core::units::ohm;
//! use pf_core::{AttributeRegistry, ComplexVector, ComponentId, Terminal};
//!
//! let mut registry = AttributeRegistry::new();
//! let x = registry
//!     .register("solver", "left_vector", ComplexVector::zeros(1))
//!     .unwrap();
//! let mut init = InitContext::new(&mut registry, x, 314.159, 1e-3, 1);
//!
//! let mut r = Resistor::new("r1", Terminal::Node(0), Terminal::Ground, ohm(10.0));
//! r.initialize(&mut init).unwrap();
//!
//! let r: Arc<dyn MnaComponent> = Arc::new(r);
//! let tasks = component_tasks(&r, ComponentId::from_index(0), x);
//! assert_eq!(tasks.len(), 1);
//! ```

pub mod capacitor;
pub mod common;
pub mod companion;
pub mod error;
pub mod inductor;
pub mod integrator;
pub mod machine;
pub mod resistor;
pub mod rx_load;
pub mod sources;
pub mod switch;
pub mod task;
pub mod traits;

// Re-exports
pub use capacitor::Capacitor;
pub use companion::Companion;
pub use error::{ComponentError, ComponentResult};
pub use inductor::Inductor;
pub use integrator::{IntegrationMethod, OdeModel};
pub use machine::{MachineParams, SynchronousMachine};
pub use resistor::Resistor;
pub use rx_load::RxLoad;
pub use sources::{CurrentSource, VoltageSource};
pub use switch::Switch;
pub use task::{ComponentTask, component_tasks};
pub use traits::{InitContext, Interface, MnaComponent};
