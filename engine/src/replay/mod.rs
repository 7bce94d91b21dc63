use std::cell::RefCell;

use hindsight_core::{
    Buffer, EventIdx, EventKind, EventPayload, EventRef, Rank, Region, Timestamp,
};
use smallvec::SmallVec;

mod phase;
mod registry;
mod user_event;

pub use phase::{Direction, ReplayPhase};
pub use registry::{CallbackRegistry, PatternIdx};
pub use user_event::UserEvent;

use crate::{
    cbdata::{CbData, CollectiveInfo, RankTime, RemoteEvent},
    errors::{AnalysisError, DetectorError},
    exchange::{peer_location, Channel},
    patterns::{Pattern, PatternMeta, SeverityMap},
    statistics::StatRecord,
    Role,
};

// REPLAY ENGINE
// ================================================================================================

/// The replay dispatcher: owns the registered patterns and drives named sweeps over one
/// location's event stream, invoking the subscribers of every dispatched user event in
/// registration order.
///
/// Re-entrant notifications raised by callbacks are carried on an explicit stack in the
/// scratchpad and processed depth-first before the dispatcher moves on; a registration-time
/// check rejects patterns that could notify themselves into a cycle.
pub struct ReplayEngine {
    patterns: Vec<RefCell<Box<dyn Pattern>>>,
    registry: CallbackRegistry,
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayEngine {
    /// Returns a new engine with no registered patterns.
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            registry: CallbackRegistry::new(),
        }
    }

    // REGISTRATION
    // --------------------------------------------------------------------------------------------

    /// Registers a pattern, appending its callbacks to the per-sweep, per-tag lists.
    ///
    /// # Errors
    /// Rejects a pattern that notifies a user event it also subscribes to on the same sweep.
    pub fn register(&mut self, pattern: Box<dyn Pattern>) -> Result<(), AnalysisError> {
        let idx = self.patterns.len() as PatternIdx;
        let subscriptions = pattern.subscriptions();
        for &(phase, user_event) in &subscriptions {
            if pattern.notifies(phase).contains(&user_event) {
                return Err(AnalysisError::CallbackCycle {
                    pattern: pattern.meta().unique_name,
                    phase,
                    user_event,
                });
            }
        }
        for (phase, user_event) in subscriptions {
            self.registry.subscribe(phase, user_event, idx);
        }
        self.patterns.push(RefCell::new(pattern));
        Ok(())
    }

    // DISPATCH
    // --------------------------------------------------------------------------------------------

    fn dispatch(
        &self,
        phase: ReplayPhase,
        user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), AnalysisError> {
        for &p in self.registry.subscribers(phase, user_event) {
            {
                let mut pattern = self.patterns[p as usize].borrow_mut();
                pattern.handle(phase, user_event, at, data).map_err(|source| {
                    AnalysisError::Detector {
                        phase,
                        location: data.location(),
                        user_event,
                        event: at,
                        source,
                    }
                })?;
            }
            // depth-first processing of notifications raised by the callback that just returned
            while let Some((queued_event, queued_at)) = data.pop_pending() {
                self.dispatch(phase, queued_event, queued_at, data)?;
            }
        }
        Ok(())
    }

    fn fail(
        &self,
        phase: ReplayPhase,
        user_event: UserEvent,
        at: EventIdx,
        data: &CbData<'_>,
        source: DetectorError,
    ) -> AnalysisError {
        AnalysisError::Detector {
            phase,
            location: data.location(),
            user_event,
            event: at,
            source,
        }
    }

    // SWEEPS
    // --------------------------------------------------------------------------------------------

    /// Walks the location's events in the phase's direction, firing every matching callback.
    #[tracing::instrument(skip_all, fields(sweep = phase.name(), location = %data.location().0))]
    pub fn run_phase(&self, phase: ReplayPhase, data: &mut CbData<'_>) -> Result<(), AnalysisError> {
        data.reset_event();
        self.dispatch(phase, UserEvent::SweepBegin, EventIdx::new(0), data)?;

        let len = data.trace.len();
        match phase.direction() {
            Direction::Forward => {
                for i in 0..len {
                    self.step(phase, EventIdx::from(i), data)?;
                }
            },
            Direction::Backward => {
                for i in (0..len).rev() {
                    self.step(phase, EventIdx::from(i), data)?;
                }
            },
        }

        data.reset_event();
        let last = EventIdx::from(len.saturating_sub(1));
        self.dispatch(phase, UserEvent::SweepEnd, last, data)?;
        Ok(())
    }

    fn step(
        &self,
        phase: ReplayPhase,
        idx: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), AnalysisError> {
        data.reset_event();
        let ev = data.trace.event(idx);

        if ev.kind() == EventKind::ThreadFork {
            data.last_fork = Some(ev.time());
        }

        // peer and collective exchanges are driven by the dispatcher; they populate the
        // scratchpad before the built-in tags fire
        match (phase.direction(), ev.kind()) {
            (Direction::Forward, EventKind::SendStart) if phase == ReplayPhase::MainForward => {
                self.forward_send(phase, idx, data)?;
            },
            (Direction::Forward, EventKind::RecvComplete) if phase == ReplayPhase::MainForward => {
                self.forward_recv(phase, idx, data)?;
            },
            (Direction::Forward, EventKind::CollectiveEnd)
                if phase == ReplayPhase::MainForward =>
            {
                self.forward_collective(phase, idx, data)?;
            },
            (Direction::Backward, EventKind::RecvComplete) => {
                self.inverse_send(phase, idx, data)?;
            },
            (Direction::Backward, EventKind::SendStart) => {
                self.inverse_recv(phase, idx, data)?;
            },
            _ => {},
        }

        for tag in builtin_tags(&ev, data.defs) {
            self.dispatch(phase, tag, idx, data)?;
        }
        Ok(())
    }

    // PEER EXCHANGES
    // --------------------------------------------------------------------------------------------

    fn forward_send(
        &self,
        phase: ReplayPhase,
        idx: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), AnalysisError> {
        let ev = data.trace.event(idx);
        let Some((peer, comm, tag, _bytes)) = ev.record().p2p() else {
            return Ok(());
        };
        data.local.insert(Role::Send, idx);
        if let Some(enter) = ev.enterptr() {
            data.local.insert(Role::EnterSend, enter.idx());
        }

        let my_rank = data
            .defs
            .comm(comm)
            .rank_of(data.location())
            .unwrap_or(u32::MAX);
        let blocking = ev
            .enterptr()
            .and_then(|e| e.record().region())
            .is_some_and(|r| data.defs.region(r).is_mpi_block_send());
        let mut buf = Buffer::new();
        buf.put_u32(my_rank);
        buf.put_time(ev.time());
        buf.put_time(ev.enclosing_enter_time());
        buf.put_u8(blocking as u8);
        data.local_buf = buf;

        self.dispatch(phase, UserEvent::PreSend, idx, data)?;

        let dst = peer_location(data.defs, comm, peer);
        let buf = std::mem::take(&mut data.local_buf);
        data.exchange.send(dst, comm, tag, Channel::Forward, buf);

        self.dispatch(phase, UserEvent::PostSend, idx, data)
    }

    fn forward_recv(
        &self,
        phase: ReplayPhase,
        idx: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), AnalysisError> {
        let ev = data.trace.event(idx);
        let Some((peer, comm, tag, _bytes)) = ev.record().p2p() else {
            return Ok(());
        };
        data.local.insert(Role::Recv, idx);
        if let Some(enter) = ev.enterptr() {
            data.local.insert(Role::EnterRecv, enter.idx());
        }
        let request_enter = ev
            .request()
            .and_then(|req| req.enterptr())
            .or_else(|| ev.enterptr());
        if let Some(enter) = request_enter {
            data.local.insert(Role::EnterRecvRequest, enter.idx());
        }

        self.dispatch(phase, UserEvent::PreRecv, idx, data)?;

        let src = peer_location(data.defs, comm, peer);
        let mut buf = data
            .exchange
            .recv(src, comm, tag, Channel::Forward)
            .map_err(|e| self.fail(phase, UserEvent::PreRecv, idx, data, e))?;

        let parse =
            |buf: &mut Buffer| -> Result<(Rank, Timestamp, Timestamp, bool), DetectorError> {
                let rank = buf.get_u32()?;
                let send_time = buf.get_time()?;
                let enter_send = buf.get_time()?;
                let blocking = buf.get_u8()? != 0;
                Ok((rank, send_time, enter_send, blocking))
            };
        let (rank, send_time, enter_send, blocking) =
            parse(&mut buf).map_err(|e| self.fail(phase, UserEvent::PostRecv, idx, data, e))?;
        data.remote.insert(Role::Send, RemoteEvent { time: send_time, rank });
        data.remote.insert(Role::EnterSend, RemoteEvent { time: enter_send, rank });
        data.remote_send_blocking = blocking;
        data.remote_buf = buf;

        // clock condition: a message cannot arrive before it was sent
        if send_time > ev.time() {
            tracing::warn!(
                target: "clock_violation",
                location = data.location().0,
                event = idx.as_u32(),
                "p2p clock-condition violation: send at {send_time} after receive at {}",
                ev.time(),
            );
            self.dispatch(phase, UserEvent::CcvP2p, idx, data)?;
        }

        self.dispatch(phase, UserEvent::PostRecv, idx, data)
    }

    fn inverse_send(
        &self,
        phase: ReplayPhase,
        idx: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), AnalysisError> {
        let ev = data.trace.event(idx);
        let Some((peer, comm, tag, _bytes)) = ev.record().p2p() else {
            return Ok(());
        };
        data.inv_local.insert(Role::Recv, idx);
        if let Some(enter) = ev.enterptr() {
            data.inv_local.insert(Role::EnterRecv, enter.idx());
        }

        let my_rank = data
            .defs
            .comm(comm)
            .rank_of(data.location())
            .unwrap_or(u32::MAX);
        let request_enter_time = ev
            .request()
            .map(|req| req.enclosing_enter_time())
            .unwrap_or_else(|| ev.enclosing_enter_time());

        let mut buf = Buffer::new();
        buf.put_u32(my_rank);
        buf.put_time(ev.time());
        buf.put_time(ev.enclosing_enter_time());
        buf.put_time(request_enter_time);
        data.local_buf = buf;

        self.dispatch(phase, UserEvent::PreInvSend, idx, data)?;

        let dst = peer_location(data.defs, comm, peer);
        let buf = std::mem::take(&mut data.local_buf);
        data.exchange.send(dst, comm, tag, Channel::Inverse, buf);
        Ok(())
    }

    fn inverse_recv(
        &self,
        phase: ReplayPhase,
        idx: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), AnalysisError> {
        let ev = data.trace.event(idx);
        let Some((peer, comm, tag, _bytes)) = ev.record().p2p() else {
            return Ok(());
        };
        data.inv_local.insert(Role::Send, idx);
        if let Some(enter) = ev.enterptr() {
            data.inv_local.insert(Role::EnterSend, enter.idx());
        }

        let src = peer_location(data.defs, comm, peer);
        let mut buf = data
            .exchange
            .recv(src, comm, tag, Channel::Inverse)
            .map_err(|e| self.fail(phase, UserEvent::PostInvRecv, idx, data, e))?;

        let parse =
            |buf: &mut Buffer| -> Result<(Rank, Timestamp, Timestamp, Timestamp), DetectorError> {
                let rank = buf.get_u32()?;
                let recv_time = buf.get_time()?;
                let enter_recv = buf.get_time()?;
                let request_enter = buf.get_time()?;
                Ok((rank, recv_time, enter_recv, request_enter))
            };
        let (rank, recv_time, enter_recv, request_enter) =
            parse(&mut buf).map_err(|e| self.fail(phase, UserEvent::PostInvRecv, idx, data, e))?;
        data.inv_remote.insert(Role::Recv, RemoteEvent { time: recv_time, rank });
        data.inv_remote.insert(Role::EnterRecv, RemoteEvent { time: enter_recv, rank });
        data.inv_remote
            .insert(Role::EnterRecvRequest, RemoteEvent { time: request_enter, rank });
        data.remote_buf = buf;

        self.dispatch(phase, UserEvent::PostInvRecv, idx, data)
    }

    // COLLECTIVE EXCHANGE
    // --------------------------------------------------------------------------------------------

    fn forward_collective(
        &self,
        phase: ReplayPhase,
        idx: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), AnalysisError> {
        let ev = data.trace.event(idx);
        let EventPayload::Collective { comm, root, .. } = *ev.payload() else {
            return Ok(());
        };
        let comm_def = data.defs.comm(comm);
        let Some(my_rank) = comm_def.rank_of(data.location()) else {
            return Ok(());
        };
        let begin_time = ev.beginptr().map(|b| b.time()).unwrap_or_else(|| ev.time());

        let mut buf = Buffer::new();
        buf.put_u32(my_rank);
        buf.put_time(begin_time);
        buf.put_time(ev.time());
        let all = data
            .exchange
            .allgather(comm, comm_def, buf.into_bytes())
            .map_err(|e| self.fail(phase, UserEvent::CollEnd, idx, data, e))?;

        let mut earliest = RankTime { rank: 0, time: Timestamp::MAX };
        let mut latest = RankTime { rank: 0, time: Timestamp::MIN };
        let mut earliest_end = RankTime { rank: 0, time: Timestamp::MAX };
        let mut root_info = None;
        for (rank, bytes) in all {
            let mut buf = Buffer::from_bytes(bytes);
            let decode = |buf: &mut Buffer| -> Result<(Rank, Timestamp, Timestamp), DetectorError> {
                let r = buf.get_u32()?;
                let begin = buf.get_time()?;
                let end = buf.get_time()?;
                Ok((r, begin, end))
            };
            let (r, begin, end) =
                decode(&mut buf).map_err(|e| self.fail(phase, UserEvent::CollEnd, idx, data, e))?;
            debug_assert_eq!(r, rank);
            if begin < earliest.time {
                earliest = RankTime { rank, time: begin };
            }
            if begin > latest.time {
                latest = RankTime { rank, time: begin };
            }
            if end < earliest_end.time {
                earliest_end = RankTime { rank, time: end };
            }
            if root == Some(rank) {
                root_info = Some(RankTime { rank, time: begin });
            }
        }

        data.collinfo = Some(CollectiveInfo {
            my: RankTime { rank: my_rank, time: begin_time },
            root: root_info,
            earliest,
            latest,
            earliest_end,
            my_end: ev.time(),
        });
        Ok(())
    }

    // FINALIZATION & RESULTS
    // --------------------------------------------------------------------------------------------

    /// Invokes every pattern's finalization hook, in registration order.
    pub fn finish(&self, data: &mut CbData<'_>) -> Result<(), AnalysisError> {
        for pattern in &self.patterns {
            let mut pattern = pattern.borrow_mut();
            pattern.finish(data).map_err(|source| AnalysisError::Detector {
                phase: ReplayPhase::ForwardCount,
                location: data.location(),
                user_event: UserEvent::SweepEnd,
                event: EventIdx::new(0),
                source,
            })?;
        }
        Ok(())
    }

    /// Collects `(identity, severities)` of every registered pattern, in registration order.
    pub fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        self.patterns.iter().flat_map(|p| p.borrow().results()).collect()
    }

    /// Collects the statistics records of the patterns that produce them.
    pub fn stat_records(&self) -> Vec<StatRecord> {
        self.patterns.iter().filter_map(|p| p.borrow().stat_records()).flatten().collect()
    }
}

// BUILT-IN TAGS
// ================================================================================================

fn is_group_region(region: &Region) -> bool {
    region.is_mpi_wait_multi() || region.is_omp_parallel() || region.is_omp_barrier()
}

fn classify_collective(region: &Region) -> Option<UserEvent> {
    if region.is_mpi_barrier() {
        Some(UserEvent::SyncColl)
    } else if region.is_mpi_12n() {
        Some(UserEvent::Coll12n)
    } else if region.is_mpi_n21() {
        Some(UserEvent::CollN21)
    } else if region.is_mpi_n2n() {
        Some(UserEvent::CollN2n)
    } else if region.is_mpi_scan() {
        Some(UserEvent::CollScan)
    } else if region.is_mpi_init() {
        Some(UserEvent::InitEnd)
    } else if region.is_mpi_finalize() {
        Some(UserEvent::FinalizeEnd)
    } else if region.is_mpi_rma_create() || region.is_mpi_rma_free() || region.is_mpi_rma_fence() {
        Some(UserEvent::RmaCollEnd)
    } else {
        None
    }
}

/// Computes the built-in user-event tags of an event, in dispatch order.
pub(crate) fn builtin_tags(
    ev: &EventRef<'_>,
    defs: &hindsight_core::GlobalDefs,
) -> SmallVec<[UserEvent; 2]> {
    let mut tags = SmallVec::new();
    match ev.kind() {
        EventKind::Enter => {
            tags.push(UserEvent::Enter);
            if let Some(region) = ev.record().region() {
                if is_group_region(defs.region(region)) {
                    tags.push(UserEvent::GroupEnter);
                }
            }
        },
        EventKind::Leave => {
            tags.push(UserEvent::Leave);
            if let Some(region) = ev.record().region() {
                if is_group_region(defs.region(region)) {
                    tags.push(UserEvent::GroupLeave);
                }
            }
        },
        EventKind::SendStart => tags.push(UserEvent::SendStart),
        EventKind::SendComplete => tags.push(UserEvent::SendComplete),
        EventKind::RecvRequest => tags.push(UserEvent::RecvRequest),
        EventKind::RecvComplete => tags.push(UserEvent::RecvComplete),
        EventKind::CollectiveBegin => tags.push(UserEvent::CollBegin),
        EventKind::CollectiveEnd => {
            tags.push(UserEvent::CollEnd);
            let region = ev.enterptr().and_then(|e| e.record().region());
            if let Some(region) = region {
                if let Some(tag) = classify_collective(defs.region(region)) {
                    tags.push(tag);
                }
            }
        },
        EventKind::RmaPut => tags.push(UserEvent::RmaPut),
        EventKind::RmaGet => tags.push(UserEvent::RmaGet),
        EventKind::RmaLock => tags.push(UserEvent::RmaLock),
        EventKind::RmaUnlock => tags.push(UserEvent::RmaUnlock),
        EventKind::RmaPost => tags.push(UserEvent::RmaPost),
        EventKind::RmaWait => tags.push(UserEvent::RmaWait),
        EventKind::RmaStart => tags.push(UserEvent::RmaStart),
        EventKind::RmaComplete => tags.push(UserEvent::RmaComplete),
        EventKind::ThreadFork => tags.push(UserEvent::ThreadFork),
        EventKind::ThreadJoin => tags.push(UserEvent::ThreadJoin),
        EventKind::ThreadAcquireLock => tags.push(UserEvent::ThreadAcquireLock),
        EventKind::ThreadReleaseLock => tags.push(UserEvent::ThreadReleaseLock),
        EventKind::TaskComplete => tags.push(UserEvent::TaskComplete),
    }
    tags
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use hindsight_core::{
        CommKind, Communicator, EventRecord, GlobalDefs, LocalTrace, Location, LocationId,
        Paradigm, RegionId,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::caches::{LockCache, RmaEpochCache, TimeMapCache};
    use crate::exchange::Exchange;
    use crate::synchpoints::SynchpointHandler;

    type Log = Rc<RefCell<Vec<(UserEvent, u16)>>>;

    struct Probe {
        id: u16,
        log: Log,
        subscriptions: Vec<UserEvent>,
        notify_on: Option<(UserEvent, UserEvent)>,
        severities: SeverityMap,
    }

    impl Probe {
        fn new(id: u16, log: Log, subscriptions: Vec<UserEvent>) -> Self {
            Self { id, log, subscriptions, notify_on: None, severities: SeverityMap::new() }
        }

        fn notifying(mut self, on: UserEvent, emits: UserEvent) -> Self {
            self.notify_on = Some((on, emits));
            self
        }
    }

    impl Pattern for Probe {
        fn meta(&self) -> PatternMeta {
            PatternMeta {
                id: 9000 + self.id as u32,
                parent: None,
                name: "Probe",
                unique_name: "probe",
                description: "dispatch-order probe",
                unit: "occ",
                mode: crate::patterns::Mode::Exclusive,
                hidden: true,
            }
        }

        fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
            self.subscriptions
                .iter()
                .map(|&ue| (ReplayPhase::MainForward, ue))
                .collect()
        }

        fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
            if phase == ReplayPhase::MainForward && self.notify_on.is_some() {
                // the probe only ever emits LateSender in these tests
                &[UserEvent::LateSender]
            } else {
                &[]
            }
        }

        fn handle(
            &mut self,
            _phase: ReplayPhase,
            user_event: UserEvent,
            at: EventIdx,
            data: &mut CbData<'_>,
        ) -> Result<(), DetectorError> {
            self.log.borrow_mut().push((user_event, self.id));
            if let Some((on, emits)) = self.notify_on {
                if user_event == on {
                    data.notify(emits, at);
                }
            }
            Ok(())
        }

        fn severities(&self) -> &SeverityMap {
            &self.severities
        }
    }

    fn single_location_world() -> (GlobalDefs, LocalTrace) {
        let mut defs = GlobalDefs::default();
        defs.regions.push(hindsight_core::Region::new("main", Paradigm::User));
        defs.locations.push(Location { rank: 0, thread: 0, thread_team: None });
        defs.communicators.push(Communicator::new(CommKind::Mpi, vec![LocationId(0)]));
        let trace = LocalTrace::link(
            LocationId(0),
            vec![
                EventRecord::new(
                    hindsight_core::Timestamp::new(0.0),
                    EventKind::Enter,
                    EventPayload::Region { region: RegionId(0) },
                ),
                EventRecord::new(
                    hindsight_core::Timestamp::new(1.0),
                    EventKind::Leave,
                    EventPayload::Region { region: RegionId(0) },
                ),
            ],
        )
        .unwrap();
        (defs, trace)
    }

    fn run_main_forward(engine: &ReplayEngine, defs: &GlobalDefs, trace: &LocalTrace) {
        let cpaths = vec![hindsight_core::CallpathId::ROOT; trace.len()];
        let hub = Exchange::new(1);
        let exchange = hub.handle(LocationId(0));
        let timemaps = TimeMapCache::new(trace, &cpaths, &defs.callpaths);
        let mut synch = SynchpointHandler::new();
        let locks = LockCache::default();
        let rma = RmaEpochCache::default();
        let mut data = CbData::new(
            defs, trace, &cpaths, &exchange, &timemaps, &mut synch, &locks, &rma,
        );
        engine.run_phase(ReplayPhase::MainForward, &mut data).unwrap();
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut engine = ReplayEngine::new();
        engine
            .register(Box::new(Probe::new(0, Rc::clone(&log), vec![UserEvent::Enter])))
            .unwrap();
        engine
            .register(Box::new(Probe::new(1, Rc::clone(&log), vec![UserEvent::Enter])))
            .unwrap();

        let (defs, trace) = single_location_world();
        run_main_forward(&engine, &defs, &trace);

        let fired: Vec<_> = log
            .borrow()
            .iter()
            .filter(|(ue, _)| *ue == UserEvent::Enter)
            .map(|&(_, id)| id)
            .collect();
        assert_eq!(fired, vec![0, 1]);
    }

    #[test]
    fn notifications_fire_before_later_subscribers_move_on() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut engine = ReplayEngine::new();
        // probe 0 notifies LateSender from Enter; probe 1 listens on both
        engine
            .register(Box::new(
                Probe::new(0, Rc::clone(&log), vec![UserEvent::Enter])
                    .notifying(UserEvent::Enter, UserEvent::LateSender),
            ))
            .unwrap();
        engine
            .register(Box::new(Probe::new(
                1,
                Rc::clone(&log),
                vec![UserEvent::Enter, UserEvent::LateSender],
            )))
            .unwrap();

        let (defs, trace) = single_location_world();
        run_main_forward(&engine, &defs, &trace);

        let fired: Vec<_> = log
            .borrow()
            .iter()
            .filter(|(ue, _)| matches!(ue, UserEvent::Enter | UserEvent::LateSender))
            .map(|&(ue, id)| (ue, id))
            .collect();
        // the notification raised by probe 0 is processed depth-first, before probe 1's own
        // Enter subscription fires
        assert_eq!(
            fired,
            vec![
                (UserEvent::Enter, 0),
                (UserEvent::LateSender, 1),
                (UserEvent::Enter, 1),
            ]
        );
    }

    #[test]
    fn self_notification_is_rejected_at_registration() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut engine = ReplayEngine::new();
        let err = engine
            .register(Box::new(
                Probe::new(0, log, vec![UserEvent::LateSender])
                    .notifying(UserEvent::LateSender, UserEvent::LateSender),
            ))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::CallbackCycle { .. }));
    }

    #[test]
    fn group_tags_are_computed_from_region_classification() {
        let mut defs = GlobalDefs::default();
        defs.regions.push(hindsight_core::Region::new("MPI_Waitall", Paradigm::Mpi));
        let trace = LocalTrace::link(
            LocationId(0),
            vec![
                EventRecord::new(
                    hindsight_core::Timestamp::new(0.0),
                    EventKind::Enter,
                    EventPayload::Region { region: RegionId(0) },
                ),
                EventRecord::new(
                    hindsight_core::Timestamp::new(1.0),
                    EventKind::Leave,
                    EventPayload::Region { region: RegionId(0) },
                ),
            ],
        )
        .unwrap();

        let enter_tags = builtin_tags(&trace.event(EventIdx::new(0)), &defs);
        assert_eq!(enter_tags.as_slice(), &[UserEvent::Enter, UserEvent::GroupEnter]);
        let leave_tags = builtin_tags(&trace.event(EventIdx::new(1)), &defs);
        assert_eq!(leave_tags.as_slice(), &[UserEvent::Leave, UserEvent::GroupLeave]);
    }
}
