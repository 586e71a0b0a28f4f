//! pf-sim: simulation construction, stepping and run control.
//!
//! # Architecture
//!
//! - [`SimulationBuilder`] initializes components against a shared
//!   attribute registry, builds and validates the task schedule and
//!   factorizes every topology variant. Everything that can be checked is
//!   checked here and reported as [`ConfigError`].
//! - [`Simulation::step`] runs one step: pending switch events, PreStep
//!   tasks, assemble and solve, PostStep tasks, then step records.
//! - [`SimulationController`] drives a simulation from its own thread with
//!   start/pause/step/stop commands and optional wall-clock pacing.
//!
//! # Example
//!
//! ```no_run
//! use pf_components::{Resistor, VoltageSource};
//! use pf_core::units::ohm;
//! use pf_core::{Complex, Terminal};
//! use pf_sim::{SimOptions, SimulationBuilder};
//!
//! let mut builder = SimulationBuilder::new(SimOptions::new("divider"));
//! builder.add_component(VoltageSource::new(
//!     "vs",
//!     Terminal::Node(0),
//!     Terminal::Ground,
//!     Complex::new(10.0, 0.0),
//! ));
//! builder.add_component(Resistor::new("r", Terminal::Node(0), Terminal::Ground, ohm(5.0)));
//!
//! let mut sim = builder.build().unwrap();
//! sim.run().unwrap();
//! assert_eq!(sim.lvector().len(), 2);
//! ```

pub mod builder;
pub mod controller;
pub mod error;
pub mod events;
pub mod external;
pub mod options;
pub mod record;
pub mod simulation;

pub use builder::{SimulationBuilder, VariantSpec};
pub use controller::{ControllerState, RealTimeStats, SimulationController};
pub use error::{ConfigError, InterfaceError, SimError, SimResult};
pub use events::{EventSchedule, SwitchEvent};
pub use external::{ChannelEnds, ChannelInterface, ExportSample, ExternalInterface};
pub use options::{RealTimeOptions, SimOptions};
pub use record::{RecordCollector, RecordData, RecordValue, StepObserver, StepRecord};
pub use simulation::{Simulation, StepTimings};
