//! Time-ordered topology switch events.

use pf_core::{Real, VariantId};
use serde::Serialize;

/// Swap to `variant` at the first step whose time reaches `time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwitchEvent {
    pub time: Real,
    #[serde(serialize_with = "serialize_variant")]
    pub variant: VariantId,
}

fn serialize_variant<S: serde::Serializer>(id: &VariantId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(id.index())
}

/// Pending switch events consumed in time order.
#[derive(Debug, Clone, Default)]
pub struct EventSchedule {
    events: Vec<SwitchEvent>,
    next: usize,
    /// Slack on the time comparison so `k * dt` rounding never delays a switch.
    tolerance: Real,
}

impl EventSchedule {
    pub fn new(mut events: Vec<SwitchEvent>, dt: Real) -> Self {
        // Stable: events at equal times keep declaration order and the last wins.
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            events,
            next: 0,
            tolerance: dt * 1e-6,
        }
    }

    /// Consume every event due at `time` and return the variant to activate.
    pub fn due(&mut self, time: Real) -> Option<VariantId> {
        let mut variant = None;
        while let Some(event) = self.events.get(self.next) {
            if event.time > time + self.tolerance {
                break;
            }
            variant = Some(event.variant);
            self.next += 1;
        }
        variant
    }

    pub fn pending(&self) -> &[SwitchEvent] {
        &self.events[self.next..]
    }

    pub fn is_empty(&self) -> bool {
        self.next >= self.events.len()
    }
}
