use hindsight_core::{Buffer, EventIdx, EventPayload, LockParadigm, Timestamp};

use crate::{
    cbdata::{CbData, CostKind},
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
};

// OMP PATTERNS
// ================================================================================================

struct BarrierState {
    enter: Timestamp,
    task_time: f64,
    explicit: bool,
}

/// The OpenMP wait-state family: fork/join idleness of parallel regions, barrier waits
/// (explicit and implicit, discounted by task execution inside the barrier), and lock
/// contention for critical sections and the lock API.
///
/// Team reductions run over the thread-team communicator; every member of the team reaches its
/// parallel-region and barrier boundaries in the same order, so the team rendezvous lines up
/// without a master-side coordinator.
#[derive(Default)]
pub struct OmpPatterns {
    fork: SeverityMap,
    join: SeverityMap,
    ebarrier: SeverityMap,
    ibarrier: SeverityMap,
    critical: SeverityMap,
    lock_api: SeverityMap,
    barrier: Option<BarrierState>,
}

impl OmpPatterns {
    fn on_parallel_enter(
        &mut self,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let Some(team_id) = data.defs.location(data.location()).thread_team else {
            return Ok(());
        };
        let team = data.defs.comm(team_id);
        let my_enter = data.event(at).time();
        let fork_time = data.last_fork.unwrap_or(Timestamp::MIN);

        let mut buf = Buffer::new();
        buf.put_time(my_enter);
        buf.put_time(fork_time);
        let all = data.exchange.allgather(team_id, team, buf.into_bytes())?;

        let mut fork = Timestamp::MIN;
        let mut latest_enter = Timestamp::MIN;
        for (_, bytes) in all {
            let mut buf = Buffer::from_bytes(bytes);
            let enter = buf.get_time()?;
            let forked = buf.get_time()?;
            latest_enter = latest_enter.max(enter);
            fork = fork.max(forked);
        }
        if fork == Timestamp::MIN {
            return Ok(());
        }

        let my_idle = (my_enter - fork).max(0.0);
        if my_idle > 0.0 {
            data.idle = my_idle;
            data.wait_kind = Some(CostKind::OmpIdle);
        }
        // the master pays the management cost of getting the whole team started
        if data.defs.location(data.location()).is_master() {
            let team_idle = (latest_enter - fork).max(0.0);
            if team_idle > 0.0 {
                self.fork.add(data.callpath_of(at), team_idle);
                data.notify(UserEvent::OmpMgmtFork, at);
            }
        }
        Ok(())
    }

    fn on_parallel_leave(
        &mut self,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let Some(team_id) = data.defs.location(data.location()).thread_team else {
            return Ok(());
        };
        let team = data.defs.comm(team_id);
        let my_leave = data.event(at).time();

        let mut buf = Buffer::new();
        buf.put_time(my_leave);
        let all = data.exchange.allgather(team_id, team, buf.into_bytes())?;

        let mut latest_leave = Timestamp::MIN;
        for (_, bytes) in all {
            let mut buf = Buffer::from_bytes(bytes);
            latest_leave = latest_leave.max(buf.get_time()?);
        }

        let idle = (latest_leave - my_leave).max(0.0);
        if idle > 0.0 {
            self.join.add(data.callpath_of(at), idle);
            data.idle = idle;
            data.wait_kind = Some(CostKind::OmpIdle);
            data.notify(UserEvent::OmpMgmtJoin, at);
        }
        Ok(())
    }

    fn on_barrier_enter(&mut self, at: EventIdx, data: &mut CbData<'_>, explicit: bool) {
        self.barrier = Some(BarrierState {
            enter: data.event(at).time(),
            task_time: 0.0,
            explicit,
        });
    }

    fn on_barrier_leave(
        &mut self,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let Some(state) = self.barrier.take() else {
            return Ok(());
        };
        let Some(team_id) = data.defs.location(data.location()).thread_team else {
            return Ok(());
        };
        let team = data.defs.comm(team_id);

        let mut buf = Buffer::new();
        buf.put_time(state.enter);
        let all = data.exchange.allgather(team_id, team, buf.into_bytes())?;

        let mut latest_enter = Timestamp::MIN;
        for (_, bytes) in all {
            let mut buf = Buffer::from_bytes(bytes);
            latest_enter = latest_enter.max(buf.get_time()?);
        }

        // time spent executing tasks while inside the barrier is useful work, not waiting
        let idle = ((latest_enter - state.enter) - state.task_time).max(0.0);
        if idle > 0.0 {
            let cp = data.callpath_of(at);
            data.idle = idle;
            data.wait_kind = Some(CostKind::OmpBarrier);
            if state.explicit {
                self.ebarrier.add(cp, idle);
                data.notify(UserEvent::OmpEbarrierWait, at);
            } else {
                self.ibarrier.add(cp, idle);
                data.notify(UserEvent::OmpIbarrierWait, at);
            }
        }
        Ok(())
    }

    fn on_task_complete(&mut self, at: EventIdx, data: &mut CbData<'_>) {
        if let Some(state) = self.barrier.as_mut() {
            let ev = data.event(at);
            if let Some(prev) = ev.prev() {
                state.task_time += ev.time() - prev.time();
            }
        }
    }

    fn on_acquire_lock(&mut self, at: EventIdx, data: &mut CbData<'_>) {
        let EventPayload::ThreadLock { lock, paradigm } = *data.payload_of(at) else {
            return;
        };
        let map = match paradigm {
            LockParadigm::OmpCritical => &mut self.critical,
            LockParadigm::OmpLockApi => &mut self.lock_api,
            // pthread locks belong to the pthread detector; unknown paradigms are a no-op
            _ => return,
        };
        let ev = data.event(at);
        let Some(last_release) = data.locks.last_release_before(lock, data.location(), ev.time())
        else {
            return;
        };
        let enter = ev.enclosing_enter_time();
        let idle = (last_release - enter).max(0.0);
        if idle > 0.0 {
            map.add(data.callpath_of(at), idle);
            data.idle = idle;
            data.notify(UserEvent::ThreadLockContention, at);
        }
    }
}

impl Pattern for OmpPatterns {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::OMP_MANAGEMENT,
            parent: None,
            name: "OMP Management",
            unique_name: "omp_management",
            description: "Thread-management overhead of OpenMP parallel regions",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        use UserEvent::*;
        [GroupEnter, GroupLeave, TaskComplete, ThreadAcquireLock]
            .into_iter()
            .map(|ue| (ReplayPhase::MainForward, ue))
            .collect()
    }

    fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
        match phase {
            ReplayPhase::MainForward => &[
                UserEvent::OmpMgmtFork,
                UserEvent::OmpMgmtJoin,
                UserEvent::OmpEbarrierWait,
                UserEvent::OmpIbarrierWait,
                UserEvent::ThreadLockContention,
            ],
            _ => &[],
        }
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        match user_event {
            UserEvent::GroupEnter | UserEvent::GroupLeave => {
                let Some(region) = data.event(at).record().region() else {
                    return Ok(());
                };
                let region = data.defs.region(region);
                match user_event {
                    UserEvent::GroupEnter if region.is_omp_parallel() => {
                        self.on_parallel_enter(at, data)?;
                    },
                    UserEvent::GroupEnter if region.is_omp_barrier() => {
                        self.on_barrier_enter(at, data, region.is_omp_ebarrier());
                    },
                    UserEvent::GroupLeave if region.is_omp_parallel() => {
                        self.on_parallel_leave(at, data)?;
                    },
                    UserEvent::GroupLeave if region.is_omp_barrier() => {
                        self.on_barrier_leave(at, data)?;
                    },
                    _ => {},
                }
            },
            UserEvent::TaskComplete => self.on_task_complete(at, data),
            UserEvent::ThreadAcquireLock => self.on_acquire_lock(at, data),
            _ => {},
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.fork
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        let entry = |id, parent, name, unique_name, description, map: &SeverityMap| {
            (
                PatternMeta {
                    id,
                    parent,
                    name,
                    unique_name,
                    description,
                    unit: "sec",
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                map.clone(),
            )
        };
        vec![
            entry(
                ids::OMP_FORK,
                Some(ids::OMP_MANAGEMENT),
                "OMP Fork",
                "omp_fork",
                "Time the team needed to start executing a parallel region",
                &self.fork,
            ),
            entry(
                ids::OMP_JOIN,
                Some(ids::OMP_MANAGEMENT),
                "OMP Join",
                "omp_join",
                "Time threads idled at the end of a parallel region",
                &self.join,
            ),
            entry(
                ids::OMP_EBARRIER_WAIT,
                None,
                "Wait at OMP Barrier (explicit)",
                "omp_ebarrier_wait",
                "Waiting time in explicit OpenMP barriers",
                &self.ebarrier,
            ),
            entry(
                ids::OMP_IBARRIER_WAIT,
                None,
                "Wait at OMP Barrier (implicit)",
                "omp_ibarrier_wait",
                "Waiting time in implicit OpenMP barriers",
                &self.ibarrier,
            ),
            entry(
                ids::OMP_CRITICAL_CONTENTION,
                None,
                "OMP Critical Contention",
                "omp_critical_contention",
                "Time spent waiting to enter a contended critical section",
                &self.critical,
            ),
            entry(
                ids::OMP_LOCK_API_CONTENTION,
                None,
                "OMP Lock API Contention",
                "omp_lock_api_contention",
                "Time spent waiting in contended OpenMP lock API calls",
                &self.lock_api,
            ),
        ]
    }
}
