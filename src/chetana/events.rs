//! Typed event channel for consciousness-layer signals.
//!
//! The event set is closed: affect threshold crossings, intention creation,
//! and intention status changes. Events land in a bounded ring buffer;
//! when it overflows, the oldest events are dropped. Consumers drain.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::sankalpa::IntentionStatus;

/// Default event buffer capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A consciousness-layer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChetanaEvent {
    /// An affect scalar crossed its alert threshold.
    AffectChanged {
        /// Which scalar moved: "frustration", "confidence", "arousal", "valence".
        field: String,
        value: f32,
    },
    /// A new intention was extracted from a user message.
    GoalCreated { intention_id: String, goal: String },
    /// An intention changed status.
    GoalChanged {
        intention_id: String,
        status: IntentionStatus,
    },
}

impl ChetanaEvent {
    /// Wire name of this event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AffectChanged { .. } => "chetana:affect_changed",
            Self::GoalCreated { .. } => "chetana:goal_created",
            Self::GoalChanged { .. } => "chetana:goal_changed",
        }
    }
}

/// Bounded event buffer. Oldest events are dropped on overflow.
#[derive(Debug)]
pub struct EventBus {
    events: VecDeque<ChetanaEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an event, dropping the oldest if full.
    pub fn emit(&mut self, event: ChetanaEvent) {
        tracing::debug!(event = event.name(), "chetana event");
        if self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Remove and return all buffered events, oldest first.
    pub fn drain(&mut self) -> Vec<ChetanaEvent> {
        self.events.drain(..).collect()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_stable() {
        let e = ChetanaEvent::AffectChanged {
            field: "frustration".into(),
            value: 0.8,
        };
        assert_eq!(e.name(), "chetana:affect_changed");
        let e = ChetanaEvent::GoalCreated {
            intention_id: "abc".into(),
            goal: "add auth".into(),
        };
        assert_eq!(e.name(), "chetana:goal_created");
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut bus = EventBus::new(2);
        for i in 0..3 {
            bus.emit(ChetanaEvent::GoalCreated {
                intention_id: format!("id-{i}"),
                goal: format!("goal {i}"),
            });
        }
        assert_eq!(bus.dropped(), 1);
        let events = bus.drain();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ChetanaEvent::GoalCreated { intention_id, .. } => assert_eq!(intention_id, "id-1"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn drain_empties_buffer() {
        let mut bus = EventBus::default();
        bus.emit(ChetanaEvent::AffectChanged {
            field: "confidence".into(),
            value: 0.9,
        });
        assert_eq!(bus.drain().len(), 1);
        assert!(bus.is_empty());
    }
}
