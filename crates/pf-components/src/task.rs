//! PreStep/PostStep tasks bound to a component.

use std::sync::Arc;

use pf_core::{Attr, ComplexVector, ComponentId, SourceStamp, StepContext};
use pf_tasks::{Dependencies, Phase, Task, TaskError, TaskRef, TaskResult};

use crate::traits::MnaComponent;

enum Body {
    Source(Attr<SourceStamp>),
    Solution(Attr<ComplexVector>),
}

/// One phase of one component's per-step work.
///
/// Skipped while the owning top-level component is inactive in the current
/// topology variant.
pub struct ComponentTask {
    name: String,
    owner: ComponentId,
    phase: Phase,
    deps: Dependencies,
    component: Arc<dyn MnaComponent>,
    body: Body,
}

impl ComponentTask {
    pub fn owner(&self) -> ComponentId {
        self.owner
    }
}

impl Task for ComponentTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn dependencies(&self) -> &Dependencies {
        &self.deps
    }

    fn execute(&self, ctx: &StepContext<'_>) -> TaskResult<()> {
        if !ctx.topology.is_active(self.owner) {
            return Ok(());
        }

        let result = match self.body {
            Body::Source(rv) => ctx.attrs.write(rv, |stamp| {
                stamp.clear();
                self.component.stamp_source(ctx, stamp)
            }),
            Body::Solution(x) => ctx
                .attrs
                .read(x, |solution| self.component.update_from_solution(ctx, solution)),
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TaskError::execution(&self.name, e)),
            Err(e) => Err(TaskError::execution(&self.name, e)),
        }
    }
}

/// Build the tasks of `component` and, recursively, of its subcomponents.
///
/// Tasks are named `<component>.MnaPreStep` / `<component>.MnaPostStep`.
/// Subcomponent tasks come first so a composite's tasks can read what its
/// parts write.
pub fn component_tasks(
    component: &Arc<dyn MnaComponent>,
    owner: ComponentId,
    left_vector: Attr<ComplexVector>,
) -> Vec<TaskRef> {
    let mut tasks = Vec::new();
    for sub in component.subcomponents() {
        tasks.extend(component_tasks(sub, owner, left_vector));
    }

    if let Some(rv) = component.right_vector() {
        let deps = component.pre_step_dependencies().write(rv);
        tasks.push(Arc::new(ComponentTask {
            name: format!("{}.MnaPreStep", component.name()),
            owner,
            phase: Phase::PreStep,
            deps,
            component: Arc::clone(component),
            body: Body::Source(rv),
        }) as TaskRef);
    }

    let deps = component.post_step_dependencies().read(left_vector);
    tasks.push(Arc::new(ComponentTask {
        name: format!("{}.MnaPostStep", component.name()),
        owner,
        phase: Phase::PostStep,
        deps,
        component: Arc::clone(component),
        body: Body::Solution(left_vector),
    }) as TaskRef);

    tasks
}
