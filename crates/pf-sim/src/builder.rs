//! Simulation construction.

use std::collections::HashSet;
use std::sync::Arc;

use pf_components::{ComponentError, InitContext, MnaComponent, component_tasks};
use pf_core::{AttributeRegistry, ComplexVector, ComponentId, Real, Terminal, Topology};
use pf_solver::Assembler;
use pf_tasks::{Schedule, Scheduler, TaskRef};
use tracing::info;

use crate::error::{ConfigError, SimResult};
use crate::events::{EventSchedule, SwitchEvent};
use crate::options::SimOptions;
use crate::record::StepObserver;
use crate::simulation::{Simulation, SimulationParts};

/// Label of the solver as writer of the solution vector.
pub(crate) const SOLVER_OWNER: &str = "solver";

/// Deviations of one topology variant from "everything active, switches open".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantSpec {
    inactive: Vec<String>,
    closed: Vec<String>,
}

impl VariantSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave component `name` out of this variant.
    pub fn deactivate(mut self, name: impl Into<String>) -> Self {
        self.inactive.push(name.into());
        self
    }

    /// Close switch `name` in this variant.
    pub fn close(mut self, name: impl Into<String>) -> Self {
        self.closed.push(name.into());
        self
    }
}

/// Incremental builder for a [`Simulation`].
///
/// Add components, variants and switch events, then call
/// [`SimulationBuilder::build`] to initialize components, validate the task
/// graph and factorize every variant.
pub struct SimulationBuilder {
    options: SimOptions,
    components: Vec<Box<dyn MnaComponent>>,
    variants: Vec<(String, VariantSpec)>,
    events: Vec<(Real, String)>,
    observers: Vec<Box<dyn StepObserver>>,
}

impl SimulationBuilder {
    pub fn new(options: SimOptions) -> Self {
        Self {
            options,
            components: Vec::new(),
            variants: Vec::new(),
            events: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// Add a top-level component and return its id.
    pub fn add_component(&mut self, component: impl MnaComponent + 'static) -> ComponentId {
        self.add_boxed(Box::new(component))
    }

    pub fn add_boxed(&mut self, component: Box<dyn MnaComponent>) -> ComponentId {
        let id = ComponentId::from_usize(self.components.len());
        self.components.push(component);
        id
    }

    /// Declare a topology variant. Without any, a single variant named
    /// `default` with every component active is used. The first declared
    /// variant is active at step 0.
    pub fn add_variant(&mut self, name: impl Into<String>, spec: VariantSpec) -> &mut Self {
        self.variants.push((name.into(), spec));
        self
    }

    /// Activate `variant` at the first step whose time reaches `time`.
    pub fn schedule_switch(&mut self, time: Real, variant: impl Into<String>) -> &mut Self {
        self.events.push((time, variant.into()));
        self
    }

    pub fn add_observer(&mut self, observer: impl StepObserver + 'static) -> &mut Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn build(self) -> SimResult<Simulation> {
        let SimulationBuilder {
            options,
            mut components,
            variants,
            events,
            observers,
        } = self;

        options.validate()?;
        if components.is_empty() {
            return Err(ConfigError::NoComponents.into());
        }
        check_unique_names(&components)?;

        let nodes = node_count(&components);

        let mut registry = AttributeRegistry::new();
        let left_vector = registry
            .register(SOLVER_OWNER, "left_vector", ComplexVector::zeros(0))
            .map_err(ConfigError::from)?;
        // Virtual rows are handed out during initialization, parts included.
        let size = {
            let mut init = InitContext::new(
                &mut registry,
                left_vector,
                options.omega,
                options.dt,
                nodes,
            );
            for (i, component) in components.iter_mut().enumerate() {
                init.set_owner(ComponentId::from_usize(i));
                component
                    .initialize(&mut init)
                    .map_err(|source| ConfigError::Component {
                        component: component.name().to_string(),
                        source,
                    })?;
            }
            init.system_size()
        };
        for component in &components {
            if highest_node(component.as_ref()) > nodes {
                return Err(ConfigError::Component {
                    component: component.name().to_string(),
                    source: ComponentError::InvalidArg {
                        what: "part terminal is not a network node",
                    },
                }
                .into());
            }
        }
        let attrs = registry.freeze();
        attrs
            .set(left_vector, ComplexVector::zeros(size))
            .map_err(ConfigError::from)?;

        let components: Vec<Arc<dyn MnaComponent>> =
            components.into_iter().map(Arc::from).collect();

        let tasks: Vec<TaskRef> = components
            .iter()
            .enumerate()
            .flat_map(|(i, c)| component_tasks(c, ComponentId::from_usize(i), left_vector))
            .collect();
        let schedule = Schedule::build(tasks, &[(left_vector.id(), SOLVER_OWNER)], &attrs)
            .map_err(ConfigError::from)?;
        let scheduler = Scheduler::new(schedule, options.policy, options.threads)
            .map_err(ConfigError::from)?;

        let mut assembler =
            Assembler::new(size, components.clone(), left_vector).map_err(ConfigError::from)?;
        if variants.is_empty() {
            assembler
                .add_variant("default", Topology::all_active(components.len()))
                .map_err(ConfigError::from)?;
        }
        for (name, spec) in &variants {
            let topology = resolve_variant(spec, &components)?;
            assembler
                .add_variant(name.clone(), topology)
                .map_err(ConfigError::from)?;
        }

        let mut switch_events = Vec::with_capacity(events.len());
        for (time, name) in events {
            if !(time.is_finite() && time >= 0.0) {
                return Err(ConfigError::InvalidOption {
                    what: format!("switch to '{name}' at invalid time {time}"),
                }
                .into());
            }
            let variant = assembler
                .find_variant(&name)
                .ok_or(ConfigError::InvalidVariant { variant: name })?;
            switch_events.push(SwitchEvent { time, variant });
        }

        info!(
            simulation = %options.name,
            components = components.len(),
            nodes,
            system_size = size,
            variants = assembler.variant_count(),
            switch_events = switch_events.len(),
            steps = options.total_steps(),
            "simulation built"
        );

        let events = EventSchedule::new(switch_events, options.dt);
        Ok(Simulation::from_parts(SimulationParts {
            options,
            attrs,
            components,
            scheduler,
            assembler,
            events,
            observers,
            left_vector,
        }))
    }
}

fn check_unique_names(components: &[Box<dyn MnaComponent>]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for c in components {
        if !seen.insert(c.name()) {
            return Err(ConfigError::DuplicateComponent {
                name: c.name().to_string(),
            });
        }
    }
    Ok(())
}

/// One past the highest node index used by any terminal, parts included.
fn node_count(components: &[Box<dyn MnaComponent>]) -> usize {
    components
        .iter()
        .map(|c| highest_node(c.as_ref()))
        .max()
        .unwrap_or(0)
}

fn highest_node(component: &dyn MnaComponent) -> usize {
    let own = component
        .terminals()
        .iter()
        .filter_map(|t| t.index().map(|i| i + 1))
        .max()
        .unwrap_or(0);
    component
        .subcomponents()
        .iter()
        .map(|part| highest_node(part.as_ref()))
        .fold(own, usize::max)
}

fn resolve_variant(
    spec: &VariantSpec,
    components: &[Arc<dyn MnaComponent>],
) -> Result<Topology, ConfigError> {
    let lookup = |name: &str| {
        components
            .iter()
            .position(|c| c.name() == name)
            .map(ComponentId::from_usize)
            .ok_or_else(|| ConfigError::UnknownComponent {
                name: name.to_string(),
            })
    };

    let mut topology = Topology::all_active(components.len());
    for name in &spec.inactive {
        topology.set_active(lookup(name)?, false)?;
    }
    for name in &spec.closed {
        topology.set_closed(lookup(name)?, true)?;
    }
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_components::Resistor;
    use pf_core::units::ohm;

    fn resistor(name: &str, a: usize, b: Terminal) -> Box<dyn MnaComponent> {
        Box::new(Resistor::new(name, Terminal::Node(a), b, ohm(1.0)))
    }

    #[test]
    fn node_count_is_highest_index_plus_one() {
        let comps = vec![
            resistor("a", 0, Terminal::Ground),
            resistor("b", 3, Terminal::Node(1)),
        ];
        assert_eq!(node_count(&comps), 4);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let comps = vec![
            resistor("r", 0, Terminal::Ground),
            resistor("r", 1, Terminal::Ground),
        ];
        assert_eq!(
            check_unique_names(&comps),
            Err(ConfigError::DuplicateComponent { name: "r".into() })
        );
    }

    #[test]
    fn variant_names_resolve_to_ids() {
        let comps: Vec<Arc<dyn MnaComponent>> = vec![
            Arc::from(resistor("r1", 0, Terminal::Ground)),
            Arc::from(resistor("sw", 0, Terminal::Node(1))),
        ];
        let topo = resolve_variant(&VariantSpec::new().deactivate("r1").close("sw"), &comps).unwrap();
        assert!(!topo.is_active(ComponentId::from_index(0)));
        assert!(topo.is_closed(ComponentId::from_index(1)));

        let err = resolve_variant(&VariantSpec::new().close("nope"), &comps).unwrap_err();
        assert_eq!(err, ConfigError::UnknownComponent { name: "nope".into() });
    }
}
