//! Which components take part in one system variant.

use crate::error::{CoreError, CoreResult};
use crate::ids::ComponentId;

/// Activity and switch-position view of one topology variant.
///
/// Indexed by top-level component id. Components outside the view are
/// treated as inactive and switches default to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Topology {
    active: Vec<bool>,
    closed: Vec<bool>,
}

impl Topology {
    /// Every one of `count` components active, all switches open.
    pub fn all_active(count: usize) -> Self {
        Self {
            active: vec![true; count],
            closed: vec![false; count],
        }
    }

    pub fn set_active(&mut self, id: ComponentId, active: bool) -> CoreResult<()> {
        *slot_mut(&mut self.active, id)? = active;
        Ok(())
    }

    pub fn set_closed(&mut self, id: ComponentId, closed: bool) -> CoreResult<()> {
        *slot_mut(&mut self.closed, id)? = closed;
        Ok(())
    }

    pub fn is_active(&self, id: ComponentId) -> bool {
        self.active.get(id.slot()).copied().unwrap_or(false)
    }

    pub fn is_closed(&self, id: ComponentId) -> bool {
        self.closed.get(id.slot()).copied().unwrap_or(false)
    }

    pub fn component_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }
}

fn slot_mut(flags: &mut [bool], id: ComponentId) -> CoreResult<&mut bool> {
    let len = flags.len();
    flags.get_mut(id.slot()).ok_or(CoreError::IndexOob {
        what: "topology component",
        index: id.slot(),
        len,
    })
}
