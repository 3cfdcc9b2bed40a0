//! Visual event queue.
//!
//! The simulation core never renders. Anything a display layer would care
//! about (hit flashes, explosions, roster changes) is pushed here and
//! drained by the rendering collaborator once per frame.

use crate::math::Vec2;
use crate::net::ConnId;

/// Display-worthy happening, in world coordinates where relevant.
///
/// `ProjectileHit` and `ShipsCollided` come out of local simulation and
/// say what happened; `HullDamaged` reflects an authoritative hull change
/// whose cause the wire does not carry, so a renderer should show it as
/// generic damage rather than a shell splash.
#[derive(Debug, Clone, PartialEq)]
pub enum VisualEvent {
    ProjectileHit { target: ConnId, at: Vec2 },
    ShipsCollided { a: ConnId, b: ConnId, at: Vec2 },
    HullDamaged { id: ConnId, at: Vec2 },
    ShipDestroyed { id: ConnId, destroyer_name: String },
    ShipRespawned { id: ConnId },
    PlayerJoined { id: ConnId, name: String },
    PlayerLeft { id: ConnId },
}

/// FIFO queue of pending visual events.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<VisualEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: VisualEvent) {
        self.events.push(event);
    }

    /// Hands all pending events to the caller, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<VisualEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_in_order() {
        let mut q = EventQueue::default();
        q.push(VisualEvent::PlayerJoined {
            id: ConnId(1),
            name: "Ahab".into(),
        });
        q.push(VisualEvent::PlayerLeft { id: ConnId(1) });

        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], VisualEvent::PlayerJoined { .. }));
        assert!(q.is_empty());
    }
}
