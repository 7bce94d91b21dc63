use hindsight_core::{CallpathId, CommId, EventIdx, LocationId, TimeMap};

use crate::cbdata::CostKind;

// SYNCHPOINT
// ================================================================================================

/// An event at which this location exchanged causal ordering with at least one peer.
///
/// The per-location set of synchpoints is the skeleton on which critical-path tracking and
/// delay analysis operate. A synchpoint that experienced a wait state carries the waiting time
/// and its wait-state kind; non-waiting synchpoints carry a zero wait.
#[derive(Clone, Copy, Debug)]
pub struct Synchpoint {
    /// The synchronizing event.
    pub event: EventIdx,
    /// The call path of the synchronizing event.
    pub callpath: CallpathId,
    /// Waiting time experienced at this synchpoint (zero if none).
    pub wait_time: f64,
    /// Which wait-state kind produced the waiting time.
    pub kind: Option<CostKind>,
    /// The peer location, for point-to-point synchpoints.
    pub peer: Option<LocationId>,
    /// The communicator, for collective synchpoints.
    pub comm: Option<CommId>,
}

// SYNCHPOINT HANDLER
// ================================================================================================

/// The per-location synchpoint registry.
///
/// Populated in event order during the main forward sweep and consulted (read-mostly) by the
/// backward sweeps; late-receiver classification amends wait times during the backward
/// synchronization sweep, before the cost sweep reads them.
#[derive(Debug, Default)]
pub struct SynchpointHandler {
    // ascending by event index
    points: Vec<Synchpoint>,
}

impl SynchpointHandler {
    /// Returns a new, empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a synchpoint. Must be called in ascending event order.
    pub fn record(&mut self, sp: Synchpoint) {
        debug_assert!(
            self.points.last().is_none_or(|last| last.event < sp.event),
            "synchpoints must be recorded in ascending event order"
        );
        self.points.push(sp);
    }

    /// Returns the synchpoint at the specified event, if any.
    pub fn get(&self, event: EventIdx) -> Option<&Synchpoint> {
        self.points
            .binary_search_by_key(&event, |sp| sp.event)
            .ok()
            .map(|i| &self.points[i])
    }

    /// Amends the wait time and kind of the synchpoint at the specified event. Returns false if
    /// no synchpoint exists there.
    pub fn set_wait(&mut self, event: EventIdx, wait_time: f64, kind: CostKind) -> bool {
        match self.points.binary_search_by_key(&event, |sp| sp.event) {
            Ok(i) => {
                self.points[i].wait_time = wait_time;
                self.points[i].kind = Some(kind);
                true
            },
            Err(_) => false,
        }
    }

    /// Returns the most recent synchpoint strictly before the specified event.
    pub fn prev_before(&self, event: EventIdx) -> Option<&Synchpoint> {
        let i = self.points.partition_point(|sp| sp.event < event);
        i.checked_sub(1).map(|i| &self.points[i])
    }

    /// Returns the synchpoints strictly between `after` (exclusive; stream start if `None`) and
    /// `before` (exclusive).
    pub fn between(&self, after: Option<EventIdx>, before: EventIdx) -> &[Synchpoint] {
        let lo = match after {
            Some(a) => self.points.partition_point(|sp| sp.event <= a),
            None => 0,
        };
        let hi = self.points.partition_point(|sp| sp.event < before);
        &self.points[lo.min(hi)..hi]
    }

    /// Returns the wait-time profile (per call path) of the synchpoints strictly between the
    /// specified events.
    pub fn wait_map_between(&self, after: Option<EventIdx>, before: EventIdx) -> TimeMap {
        let mut map = TimeMap::new();
        for sp in self.between(after, before) {
            map.add(sp.callpath, sp.wait_time);
        }
        map
    }

    /// Returns the total waiting time of the synchpoints in the closed interval
    /// `[from, to]`.
    pub fn total_wait_in(&self, from: EventIdx, to: EventIdx) -> f64 {
        let lo = self.points.partition_point(|sp| sp.event < from);
        let hi = self.points.partition_point(|sp| sp.event <= to);
        self.points[lo.min(hi)..hi].iter().map(|sp| sp.wait_time).sum()
    }

    /// Returns the wait-time profile of the synchpoints in the closed interval `[from, to]`.
    pub fn wait_map_in(&self, from: EventIdx, to: EventIdx) -> TimeMap {
        let lo = self.points.partition_point(|sp| sp.event < from);
        let hi = self.points.partition_point(|sp| sp.event <= to);
        let mut map = TimeMap::new();
        for sp in &self.points[lo.min(hi)..hi] {
            map.add(sp.callpath, sp.wait_time);
        }
        map
    }

    /// Returns all synchpoints in event order.
    pub fn iter(&self) -> impl Iterator<Item = &Synchpoint> {
        self.points.iter()
    }

    /// Returns the total waiting time across all synchpoints.
    pub fn total_wait(&self) -> f64 {
        self.points.iter().map(|sp| sp.wait_time).sum()
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(event: u32, wait: f64) -> Synchpoint {
        Synchpoint {
            event: EventIdx::new(event),
            callpath: CallpathId::ROOT,
            wait_time: wait,
            kind: (wait > 0.0).then_some(CostKind::Ls),
            peer: None,
            comm: None,
        }
    }

    #[test]
    fn prev_before_finds_the_nearest_earlier_point() {
        let mut handler = SynchpointHandler::new();
        handler.record(sp(2, 0.0));
        handler.record(sp(5, 1.0));
        handler.record(sp(9, 0.0));

        assert_eq!(handler.prev_before(EventIdx::new(9)).unwrap().event, EventIdx::new(5));
        assert_eq!(handler.prev_before(EventIdx::new(6)).unwrap().event, EventIdx::new(5));
        assert_eq!(handler.prev_before(EventIdx::new(5)).unwrap().event, EventIdx::new(2));
        assert!(handler.prev_before(EventIdx::new(2)).is_none());
    }

    #[test]
    fn between_is_exclusive_on_both_ends() {
        let mut handler = SynchpointHandler::new();
        handler.record(sp(2, 0.0));
        handler.record(sp(5, 1.0));
        handler.record(sp(9, 0.0));

        let mid: Vec<_> = handler
            .between(Some(EventIdx::new(2)), EventIdx::new(9))
            .iter()
            .map(|s| s.event)
            .collect();
        assert_eq!(mid, vec![EventIdx::new(5)]);

        let from_start: Vec<_> =
            handler.between(None, EventIdx::new(5)).iter().map(|s| s.event).collect();
        assert_eq!(from_start, vec![EventIdx::new(2)]);
    }

    #[test]
    fn set_wait_amends_in_place() {
        let mut handler = SynchpointHandler::new();
        handler.record(sp(4, 0.0));
        assert!(handler.set_wait(EventIdx::new(4), 2.5, CostKind::Lr));
        assert_eq!(handler.get(EventIdx::new(4)).unwrap().wait_time, 2.5);
        assert!(!handler.set_wait(EventIdx::new(7), 1.0, CostKind::Lr));
    }
}
