use std::sync::Arc;

use hindsight_core::{EventIdx, EventPayload};

use crate::{
    am::AmRuntime,
    cbdata::CbData,
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
    synchpoints::Synchpoint,
};

// VISITS
// ================================================================================================

/// Counts region visits per call path. One of the two base metrics.
#[derive(Default)]
pub struct VisitsPattern {
    severities: SeverityMap,
}

impl Pattern for VisitsPattern {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::VISITS,
            parent: None,
            name: "Visits",
            unique_name: "visits",
            description: "Number of visits to each call path",
            unit: "occ",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        vec![(ReplayPhase::MainForward, UserEvent::Enter)]
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        _user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        self.severities.add(data.callpath_of(at), 1.0);
        data.count = 1;
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }
}

// TIME
// ================================================================================================

/// Accumulates the elapsed time of each call-path instance. One of the two base metrics.
#[derive(Default)]
pub struct TimePattern {
    severities: SeverityMap,
}

impl Pattern for TimePattern {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::TIME,
            parent: None,
            name: "Time",
            unique_name: "time",
            description: "Total time spent in each call path, including children",
            unit: "sec",
            mode: Mode::Inclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        vec![(ReplayPhase::MainForward, UserEvent::Leave)]
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        _user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let leave = data.event(at);
        if let Some(enter) = leave.enterptr() {
            self.severities.add(data.callpath_of(at), leave.time() - enter.time());
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }
}

// SYNCHPOINT RECORDER
// ================================================================================================

/// Hidden pattern populating the synchpoint handler during the main forward sweep.
///
/// Registered after every wait-state detector, so by the time it fires on a tag the detectors
/// have already deposited the event's idle time and wait kind in the scratchpad.
#[derive(Default)]
pub struct SynchpointRecorder {
    severities: SeverityMap,
}

impl SynchpointRecorder {
    fn record_p2p(&self, at: EventIdx, data: &mut CbData<'_>) {
        let EventPayload::P2p { peer, comm, .. } = *data.payload_of(at) else {
            return;
        };
        let peer_loc = data.defs.comm(comm).location_at(peer);
        let sp = Synchpoint {
            event: at,
            callpath: data.callpath_of(at),
            wait_time: data.idle,
            kind: data.wait_kind,
            peer: Some(peer_loc),
            comm: Some(comm),
        };
        data.synch.record(sp);
    }

    fn record_collective(&self, at: EventIdx, data: &mut CbData<'_>) {
        let EventPayload::Collective { comm, .. } = *data.payload_of(at) else {
            return;
        };
        let sp = Synchpoint {
            event: at,
            callpath: data.callpath_of(at),
            wait_time: data.idle,
            kind: data.wait_kind,
            peer: None,
            comm: Some(comm),
        };
        data.synch.record(sp);
    }

    fn record_team(&self, at: EventIdx, data: &mut CbData<'_>) {
        // only team-synchronizing group boundaries become synchpoints; multi-wait groups get
        // their synchpoints from the completions inside them
        let region = data.event(at).record().region();
        let is_team_sync = region.is_some_and(|r| {
            let r = data.defs.region(r);
            r.is_omp_barrier() || r.is_omp_parallel()
        });
        if !is_team_sync {
            return;
        }
        let team = data.defs.location(data.location()).thread_team;
        let sp = Synchpoint {
            event: at,
            callpath: data.callpath_of(at),
            wait_time: data.idle,
            kind: data.wait_kind,
            peer: None,
            comm: team,
        };
        data.synch.record(sp);
    }
}

impl Pattern for SynchpointRecorder {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: 0,
            parent: None,
            name: "Synchpoints",
            unique_name: "synchpoints",
            description: "Internal synchpoint bookkeeping",
            unit: "occ",
            mode: Mode::Exclusive,
            hidden: true,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        use UserEvent::*;
        [
            PostSend, SendComplete, PostRecv, SyncColl, Coll12n, CollN21, CollN2n, CollScan,
            InitEnd, FinalizeEnd, RmaCollEnd, GroupEnter, GroupLeave,
        ]
        .into_iter()
        .map(|ue| (ReplayPhase::MainForward, ue))
        .collect()
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        match user_event {
            UserEvent::PostSend | UserEvent::SendComplete | UserEvent::PostRecv => {
                self.record_p2p(at, data);
            },
            UserEvent::SyncColl
            | UserEvent::Coll12n
            | UserEvent::CollN21
            | UserEvent::CollN2n
            | UserEvent::CollScan
            | UserEvent::InitEnd
            | UserEvent::FinalizeEnd
            | UserEvent::RmaCollEnd => {
                self.record_collective(at, data);
            },
            UserEvent::GroupEnter | UserEvent::GroupLeave => {
                self.record_team(at, data);
            },
            _ => {},
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        Vec::new()
    }
}

// CLOCK VIOLATIONS
// ================================================================================================

/// Counts clock-condition violations per call path.
///
/// Violations are recovered from locally (the offending subtractions clamp at zero); the count
/// makes them visible in the report so a skewed trace does not pass silently.
#[derive(Default)]
pub struct ClockViolationCounts {
    severities: SeverityMap,
}

impl Pattern for ClockViolationCounts {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::CLOCK_VIOLATIONS,
            parent: None,
            name: "Clock Violations",
            unique_name: "clock_violations",
            description: "Number of clock-condition violations observed during replay",
            unit: "occ",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        vec![
            (ReplayPhase::MainForward, UserEvent::CcvP2p),
            (ReplayPhase::MainForward, UserEvent::CcvColl),
        ]
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        _user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        self.severities.add(data.callpath_of(at), 1.0);
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }
}

// ASYNC DRIVER
// ================================================================================================

/// Hidden pattern that advances the active-message runtime while replay is in flight.
///
/// Attached only when asynchronous processing is enabled; the runtime's process-wide lifecycle
/// is scoped by the analyzer, not by this pattern.
pub struct AsyncDriver {
    runtime: Arc<dyn AmRuntime>,
    severities: SeverityMap,
}

impl AsyncDriver {
    /// Returns a new driver advancing the specified runtime.
    pub fn new(runtime: Arc<dyn AmRuntime>) -> Self {
        Self { runtime, severities: SeverityMap::new() }
    }
}

impl Pattern for AsyncDriver {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: 0,
            parent: None,
            name: "AsyncDriver",
            unique_name: "async_driver",
            description: "Advances the active-message runtime during replay",
            unit: "occ",
            mode: Mode::Exclusive,
            hidden: true,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        ReplayPhase::ALL
            .into_iter()
            .flat_map(|phase| [(phase, UserEvent::Enter), (phase, UserEvent::Leave)])
            .collect()
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        _user_event: UserEvent,
        _at: EventIdx,
        _data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        self.runtime.advance();
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        Vec::new()
    }
}
