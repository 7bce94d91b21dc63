use hindsight_core::{EventIdx, EventPayload, Timestamp};

use crate::{
    cbdata::CbData,
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
};

// RMA PATTERNS
// ================================================================================================

/// The MPI one-sided (RMA) wait-state family.
///
/// Window collectives (create/free/fence) reuse the generic collective snapshot; the
/// general-active-target (post/start/complete/wait) and passive-target (lock/unlock) checks
/// consult the pre-built per-window epoch cache instead of peeking at raw predecessor events.
#[derive(Default)]
pub struct RmaPatterns {
    wait_at_create: SeverityMap,
    wait_at_free: SeverityMap,
    wait_at_fence: SeverityMap,
    late_post: SeverityMap,
    early_wait: SeverityMap,
    late_complete: SeverityMap,
    lock_contention: SeverityMap,
}

impl RmaPatterns {
    fn on_window_collective(
        &mut self,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let Some(info) = data.collinfo else {
            return Ok(());
        };
        let Some(region) = data.event(at).enterptr().and_then(|e| e.record().region()) else {
            return Ok(());
        };
        let region = data.defs.region(region);
        let cp = data.callpath_of(at);

        if region.is_mpi_rma_create() {
            let idle = (info.latest.time - info.my.time).max(0.0);
            if idle > 0.0 {
                self.wait_at_create.add(cp, idle);
                data.idle = idle;
                data.notify(UserEvent::RmaWaitAtCreate, at);
            }
        } else if region.is_mpi_rma_free() {
            let idle = (info.latest.time - info.my.time).max(0.0);
            if idle > 0.0 {
                self.wait_at_free.add(cp, idle);
                data.idle = idle;
                data.notify(UserEvent::RmaWaitAtFree, at);
            }
        } else if region.is_mpi_rma_fence() {
            // time spent issuing our own RMA operations inside the fence is not waiting
            let busy_until = data
                .rma
                .last_op_of_location_before(data.location(), info.my_end)
                .unwrap_or(Timestamp::MIN);
            let effective_begin = info.my.time.max(busy_until);
            let idle = (info.latest.time - effective_begin).max(0.0);
            if idle > 0.0 {
                self.wait_at_fence.add(cp, idle);
                data.idle = idle;
                data.notify(UserEvent::RmaWaitAtFence, at);
            }
        }
        Ok(())
    }

    fn on_complete(&mut self, at: EventIdx, data: &mut CbData<'_>) {
        let EventPayload::RmaEpoch { window } = *data.payload_of(at) else {
            return;
        };
        let ev = data.event(at);
        let enter = ev.enclosing_enter_time();
        let Some(last_post) = data.rma.last_post_before(window, ev.time()) else {
            return;
        };
        let idle = (last_post - enter).max(0.0);
        if idle > 0.0 {
            self.late_post.add(data.callpath_of(at), idle);
            data.idle = idle;
            data.notify(UserEvent::RmaLatePost, at);
        }
    }

    fn on_wait(&mut self, at: EventIdx, data: &mut CbData<'_>) {
        let EventPayload::RmaEpoch { window } = *data.payload_of(at) else {
            return;
        };
        let ev = data.event(at);
        let enter = ev.enclosing_enter_time();
        let Some(last_complete) = data.rma.last_complete_before(window, ev.time()) else {
            return;
        };
        let idle = (last_complete - enter).max(0.0);
        if idle == 0.0 {
            return;
        }
        let cp = data.callpath_of(at);
        self.early_wait.add(cp, idle);
        data.idle = idle;
        data.notify(UserEvent::RmaEarlyWait, at);

        // the portion after the epoch's last transfer is attributable to a late Win_complete
        let last_op = data
            .rma
            .last_comm_op_before(window, None, ev.time())
            .unwrap_or(Timestamp::MIN)
            .max(enter);
        let late_complete = (last_complete - last_op).max(0.0).min(idle);
        if late_complete > 0.0 {
            self.late_complete.add(cp, late_complete);
            data.notify(UserEvent::RmaLateComplete, at);
        }
    }

    fn on_unlock(&mut self, at: EventIdx, data: &mut CbData<'_>) {
        let EventPayload::RmaLock { window, .. } = *data.payload_of(at) else {
            return;
        };
        let ev = data.event(at);
        let Some(own) = data.rma.own_epoch(window, data.location(), ev.time()) else {
            return;
        };
        let epochs = data.rma.contending_epochs(
            window,
            data.location(),
            own.enter_lock,
            own.unlock,
            own.exclusive,
        );
        let mut idle = 0.0;
        for epoch in epochs {
            // epochs granted before ours held us up from the moment we asked for the lock
            if epoch.lock <= own.lock {
                idle += (epoch.unlock.min(own.unlock) - own.enter_lock).max(0.0);
            }
        }
        if idle > 0.0 {
            self.lock_contention.add(data.callpath_of(at), idle);
            data.idle = idle;
            data.notify(UserEvent::RmaLockContention, at);
        }
    }
}

impl Pattern for RmaPatterns {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::MPI_RMA_EARLY_WAIT,
            parent: None,
            name: "RMA Early Wait",
            unique_name: "mpi_rma_early_wait",
            description: "Time a target waited in Win_wait before all origins completed",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        use UserEvent::*;
        [RmaCollEnd, RmaComplete, RmaWait, RmaUnlock]
            .into_iter()
            .map(|ue| (ReplayPhase::MainForward, ue))
            .collect()
    }

    fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
        match phase {
            ReplayPhase::MainForward => &[
                UserEvent::RmaWaitAtCreate,
                UserEvent::RmaWaitAtFree,
                UserEvent::RmaWaitAtFence,
                UserEvent::RmaLatePost,
                UserEvent::RmaEarlyWait,
                UserEvent::RmaLateComplete,
                UserEvent::RmaLockContention,
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
            UserEvent::RmaCollEnd => self.on_window_collective(at, data)?,
            UserEvent::RmaComplete => self.on_complete(at, data),
            UserEvent::RmaWait => self.on_wait(at, data),
            UserEvent::RmaUnlock => self.on_unlock(at, data),
            _ => {},
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.early_wait
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        let entry = |id, name, unique_name, description, map: &SeverityMap| {
            (
                PatternMeta {
                    id,
                    parent: None,
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
                ids::MPI_RMA_WAIT_AT_CREATE,
                "RMA Wait at Create",
                "mpi_rma_wait_at_create",
                "Idle time in collective RMA window creation",
                &self.wait_at_create,
            ),
            entry(
                ids::MPI_RMA_WAIT_AT_FREE,
                "RMA Wait at Free",
                "mpi_rma_wait_at_free",
                "Idle time in collective RMA window destruction",
                &self.wait_at_free,
            ),
            entry(
                ids::MPI_RMA_WAIT_AT_FENCE,
                "RMA Wait at Fence",
                "mpi_rma_wait_at_fence",
                "Idle time in RMA fence synchronization",
                &self.wait_at_fence,
            ),
            entry(
                ids::MPI_RMA_LATE_POST,
                "RMA Late Post",
                "mpi_rma_late_post",
                "Time an origin waited in Win_complete for a late exposure epoch",
                &self.late_post,
            ),
            entry(
                ids::MPI_RMA_EARLY_WAIT,
                "RMA Early Wait",
                "mpi_rma_early_wait",
                "Time a target waited in Win_wait before all origins completed",
                &self.early_wait,
            ),
            (
                PatternMeta {
                    id: ids::MPI_RMA_LATE_COMPLETE,
                    parent: Some(ids::MPI_RMA_EARLY_WAIT),
                    name: "RMA Late Complete",
                    unique_name: "mpi_rma_late_complete",
                    description: "Early-wait time between the last transfer and Win_complete",
                    unit: "sec",
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                self.late_complete.clone(),
            ),
            entry(
                ids::MPI_RMA_LOCK_CONTENTION,
                "RMA Lock Contention",
                "mpi_rma_lock_contention",
                "Time passive-target epochs overlapped on a contended window lock",
                &self.lock_contention,
            ),
        ]
    }
}
