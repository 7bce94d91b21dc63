use smallvec::SmallVec;

use super::{ReplayPhase, UserEvent};

// CALLBACK REGISTRY
// ================================================================================================

/// Index of a pattern within the engine's pattern vector.
pub type PatternIdx = u16;

/// The two-dimensional dispatch table mapping `(sweep, user event)` to the list of subscribed
/// patterns, in registration order.
#[derive(Clone, Debug)]
pub struct CallbackRegistry {
    // row-major: phase * UserEvent::COUNT + user_event
    table: Vec<SmallVec<[PatternIdx; 4]>>,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    /// Returns a new, empty registry.
    pub fn new() -> Self {
        Self {
            table: vec![SmallVec::new(); ReplayPhase::COUNT * UserEvent::COUNT],
        }
    }

    #[inline(always)]
    fn slot(phase: ReplayPhase, user_event: UserEvent) -> usize {
        phase.as_usize() * UserEvent::COUNT + user_event.as_usize()
    }

    /// Appends a subscriber to the `(phase, user_event)` callback list.
    ///
    /// Lists preserve registration order; a pattern subscribing twice to the same slot will be
    /// invoked twice, so patterns declare each subscription once.
    pub fn subscribe(&mut self, phase: ReplayPhase, user_event: UserEvent, pattern: PatternIdx) {
        self.table[Self::slot(phase, user_event)].push(pattern);
    }

    /// Returns the subscribers of `(phase, user_event)` in registration order.
    pub fn subscribers(&self, phase: ReplayPhase, user_event: UserEvent) -> &[PatternIdx] {
        &self.table[Self::slot(phase, user_event)]
    }

    /// Returns true if any pattern subscribes to the specified slot.
    pub fn has_subscribers(&self, phase: ReplayPhase, user_event: UserEvent) -> bool {
        !self.table[Self::slot(phase, user_event)].is_empty()
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_keep_registration_order() {
        let mut reg = CallbackRegistry::new();
        reg.subscribe(ReplayPhase::MainForward, UserEvent::RecvComplete, 2);
        reg.subscribe(ReplayPhase::MainForward, UserEvent::RecvComplete, 0);
        reg.subscribe(ReplayPhase::MainForward, UserEvent::RecvComplete, 7);
        assert_eq!(reg.subscribers(ReplayPhase::MainForward, UserEvent::RecvComplete), &[2, 0, 7]);
    }

    #[test]
    fn slots_are_independent_across_phases() {
        let mut reg = CallbackRegistry::new();
        reg.subscribe(ReplayPhase::MainForward, UserEvent::Enter, 1);
        assert!(reg.has_subscribers(ReplayPhase::MainForward, UserEvent::Enter));
        assert!(!reg.has_subscribers(ReplayPhase::ForwardCount, UserEvent::Enter));
        assert!(reg.subscribers(ReplayPhase::BackwardSync, UserEvent::Enter).is_empty());
    }
}
