//! Dependency graph over tasks and its layered schedule.
//!
//! An edge A→B exists when A writes an attribute that B reads and both run
//! in the same phase. Edges never cross the phase boundary: a PostStep task
//! reading what a PreStep task wrote is ordered by the solve barrier, not by
//! the graph.

use std::collections::HashMap;

use pf_core::{AttrId, AttributeStore};
use tracing::info;

use crate::error::{TaskError, TaskResult};
use crate::task::{Phase, TaskRef};

/// Layered execution order for both phases, computed once per simulation.
pub struct Schedule {
    tasks: Vec<TaskRef>,
    pre_step: Vec<Vec<usize>>,
    post_step: Vec<Vec<usize>>,
}

impl Schedule {
    /// Validate the task set and compute its layers.
    ///
    /// `reserved` lists attributes written outside any task (the solver's
    /// solution vector) together with a label naming the writer. A task
    /// declaring a write to one of them violates single-writer discipline.
    pub fn build(
        tasks: Vec<TaskRef>,
        reserved: &[(AttrId, &str)],
        attrs: &AttributeStore,
    ) -> TaskResult<Self> {
        let writers = collect_writers(&tasks, reserved, attrs)?;

        let pre_step = layer_phase(&tasks, &writers, Phase::PreStep)?;
        let post_step = layer_phase(&tasks, &writers, Phase::PostStep)?;

        info!(
            tasks = tasks.len(),
            pre_step_layers = pre_step.len(),
            post_step_layers = post_step.len(),
            "task schedule built"
        );

        Ok(Self {
            tasks,
            pre_step,
            post_step,
        })
    }

    /// Layers of one phase; tasks inside a layer are independent.
    pub fn layers(&self, phase: Phase) -> &[Vec<usize>] {
        match phase {
            Phase::PreStep => &self.pre_step,
            Phase::PostStep => &self.post_step,
        }
    }

    pub fn tasks(&self) -> &[TaskRef] {
        &self.tasks
    }

    pub fn task(&self, index: usize) -> Option<&TaskRef> {
        self.tasks.get(index)
    }

    /// Layer number of every task, indexed like [`Schedule::tasks`].
    pub fn layer_of(&self) -> Vec<usize> {
        let mut out = vec![0; self.tasks.len()];
        for layers in [&self.pre_step, &self.post_step] {
            for (l, layer) in layers.iter().enumerate() {
                for &t in layer {
                    out[t] = l;
                }
            }
        }
        out
    }

    /// Position of a task by name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.name() == name)
    }
}

fn collect_writers(
    tasks: &[TaskRef],
    reserved: &[(AttrId, &str)],
    attrs: &AttributeStore,
) -> TaskResult<HashMap<AttrId, usize>> {
    let mut writers: HashMap<AttrId, usize> = HashMap::new();

    for (i, task) in tasks.iter().enumerate() {
        for &attr in &task.dependencies().writes {
            if let Some((_, owner)) = reserved.iter().find(|(id, _)| *id == attr) {
                return Err(TaskError::MultipleWriters {
                    attr: attrs.label(attr),
                    first: (*owner).to_string(),
                    second: task.name().to_string(),
                });
            }
            if let Some(&first) = writers.get(&attr) {
                if first != i {
                    return Err(TaskError::MultipleWriters {
                        attr: attrs.label(attr),
                        first: tasks[first].name().to_string(),
                        second: task.name().to_string(),
                    });
                }
            }
            writers.insert(attr, i);
        }
    }

    Ok(writers)
}

/// Kahn's algorithm, emitting one layer per round of zero in-degree tasks.
fn layer_phase(
    tasks: &[TaskRef],
    writers: &HashMap<AttrId, usize>,
    phase: Phase,
) -> TaskResult<Vec<Vec<usize>>> {
    let members: Vec<usize> = (0..tasks.len())
        .filter(|&i| tasks[i].phase() == phase)
        .collect();

    let mut successors: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut in_degree: HashMap<usize, usize> = members.iter().map(|&i| (i, 0)).collect();

    for &reader in &members {
        let mut preds: Vec<usize> = tasks[reader]
            .dependencies()
            .reads
            .iter()
            .filter_map(|attr| writers.get(attr).copied())
            .filter(|&w| w != reader && tasks[w].phase() == phase)
            .collect();
        preds.sort_unstable();
        preds.dedup();

        for w in preds {
            successors.entry(w).or_default().push(reader);
            *in_degree.entry(reader).or_default() += 1;
        }
    }

    let mut current: Vec<usize> = members
        .iter()
        .copied()
        .filter(|i| in_degree.get(i).copied() == Some(0))
        .collect();
    let mut layers = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
        current.sort_unstable();
        let mut next = Vec::new();
        for &t in &current {
            if let Some(succ) = successors.get(&t) {
                for &s in succ {
                    if let Some(deg) = in_degree.get_mut(&s) {
                        *deg -= 1;
                        if *deg == 0 {
                            next.push(s);
                        }
                    }
                }
            }
        }
        placed += current.len();
        layers.push(std::mem::replace(&mut current, next));
    }

    if placed != members.len() {
        let mut stuck: Vec<String> = members
            .iter()
            .filter(|i| in_degree.get(i).copied().unwrap_or(0) > 0)
            .map(|&i| tasks[i].name().to_string())
            .collect();
        stuck.sort();
        return Err(TaskError::Cycle {
            phase,
            tasks: stuck,
        });
    }

    Ok(layers)
}
