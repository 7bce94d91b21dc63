use hindsight_core::EventIdx;

use crate::{
    cbdata::{CbData, CollectiveInfo, CostKind},
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
};

// COLLECTIVE PATTERNS
// ================================================================================================

/// The MPI collective wait-state family.
///
/// All members share the collective snapshot the dispatcher deposits in the scratchpad and
/// differ only in which ranks accumulate and against which reference time:
///
/// - wait-at (barrier, N-to-N): `latest_begin − my_begin` on every rank;
/// - completion (barrier, N-to-N, init, finalize): `my_end − earliest_end`;
/// - late broadcast: `root_begin − my_begin` on non-root ranks;
/// - early reduce: `latest_begin − my_begin` on the root;
/// - early scan: `latest_begin − my_begin`.
#[derive(Default)]
pub struct CollectivePatterns {
    wait_barrier: SeverityMap,
    barrier_compl: SeverityMap,
    late_bcast: SeverityMap,
    early_reduce: SeverityMap,
    early_scan: SeverityMap,
    wait_nxn: SeverityMap,
    nxn_compl: SeverityMap,
    init_compl: SeverityMap,
    finalize_wait: SeverityMap,
}

impl CollectivePatterns {
    fn wait_time(info: &CollectiveInfo) -> f64 {
        (info.latest.time - info.my.time).max(0.0)
    }

    fn completion_time(info: &CollectiveInfo) -> f64 {
        (info.my_end - info.earliest_end.time).max(0.0)
    }

    fn check_clock_condition(info: &CollectiveInfo, at: EventIdx, data: &mut CbData<'_>) {
        // a synchronizing collective cannot end anywhere before its last participant arrived
        if info.earliest_end.time < info.latest.time {
            tracing::warn!(
                target: "clock_violation",
                location = data.location().0,
                event = at.as_u32(),
                "collective clock-condition violation: earliest end {} before latest begin {}",
                info.earliest_end.time,
                info.latest.time,
            );
            data.notify(UserEvent::CcvColl, at);
        }
    }
}

impl Pattern for CollectivePatterns {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::MPI_WAIT_BARRIER,
            parent: None,
            name: "Wait at Barrier",
            unique_name: "mpi_wait_barrier",
            description: "Time spent waiting in front of a barrier",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        use UserEvent::*;
        [SyncColl, Coll12n, CollN21, CollN2n, CollScan, InitEnd, FinalizeEnd]
            .into_iter()
            .map(|ue| (ReplayPhase::MainForward, ue))
            .collect()
    }

    fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
        match phase {
            ReplayPhase::MainForward => &[
                UserEvent::WaitBarrier,
                UserEvent::WaitNxn,
                UserEvent::EarlyReduce,
                UserEvent::EarlyScan,
                UserEvent::LateBcast,
                UserEvent::BarrierCompl,
                UserEvent::NxnCompl,
                UserEvent::InitCompl,
                UserEvent::FinalizeWait,
                UserEvent::CcvColl,
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
        let Some(info) = data.collinfo else {
            return Ok(());
        };
        let cp = data.callpath_of(at);

        match user_event {
            UserEvent::SyncColl => {
                Self::check_clock_condition(&info, at, data);
                let wait = Self::wait_time(&info);
                if wait > 0.0 {
                    self.wait_barrier.add(cp, wait);
                    data.idle = wait;
                    data.wait_kind = Some(CostKind::Barrier);
                    data.notify(UserEvent::WaitBarrier, at);
                }
                let completion = Self::completion_time(&info);
                if completion > 0.0 {
                    self.barrier_compl.add(cp, completion);
                    data.completion = completion;
                    data.notify(UserEvent::BarrierCompl, at);
                }
            },
            UserEvent::CollN2n => {
                Self::check_clock_condition(&info, at, data);
                let wait = Self::wait_time(&info);
                if wait > 0.0 {
                    self.wait_nxn.add(cp, wait);
                    data.idle = wait;
                    data.wait_kind = Some(CostKind::N2n);
                    data.notify(UserEvent::WaitNxn, at);
                }
                let completion = Self::completion_time(&info);
                if completion > 0.0 {
                    self.nxn_compl.add(cp, completion);
                    data.completion = completion;
                    data.notify(UserEvent::NxnCompl, at);
                }
            },
            UserEvent::Coll12n => {
                let Some(root) = info.root else {
                    return Ok(());
                };
                if info.my.rank != root.rank {
                    let wait = (root.time - info.my.time).max(0.0);
                    if wait > 0.0 {
                        self.late_bcast.add(cp, wait);
                        data.idle = wait;
                        data.wait_kind = Some(CostKind::C12n);
                        data.notify(UserEvent::LateBcast, at);
                    }
                }
            },
            UserEvent::CollN21 => {
                let Some(root) = info.root else {
                    return Ok(());
                };
                if info.my.rank == root.rank {
                    let wait = Self::wait_time(&info);
                    if wait > 0.0 {
                        self.early_reduce.add(cp, wait);
                        data.idle = wait;
                        data.wait_kind = Some(CostKind::N21);
                        data.notify(UserEvent::EarlyReduce, at);
                    }
                }
            },
            UserEvent::CollScan => {
                let wait = Self::wait_time(&info);
                if wait > 0.0 {
                    self.early_scan.add(cp, wait);
                    data.idle = wait;
                    data.wait_kind = Some(CostKind::N2n);
                    data.notify(UserEvent::EarlyScan, at);
                }
            },
            UserEvent::InitEnd => {
                let completion = Self::completion_time(&info);
                if completion > 0.0 {
                    self.init_compl.add(cp, completion);
                    data.completion = completion;
                    data.notify(UserEvent::InitCompl, at);
                }
            },
            UserEvent::FinalizeEnd => {
                let completion = Self::completion_time(&info);
                if completion > 0.0 {
                    self.finalize_wait.add(cp, completion);
                    data.completion = completion;
                    data.notify(UserEvent::FinalizeWait, at);
                }
            },
            _ => {},
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.wait_barrier
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
                ids::MPI_WAIT_BARRIER,
                None,
                "Wait at Barrier",
                "mpi_wait_barrier",
                "Time spent waiting in front of a barrier",
                &self.wait_barrier,
            ),
            entry(
                ids::MPI_BARRIER_COMPLETION,
                Some(ids::MPI_WAIT_BARRIER),
                "Barrier Completion",
                "mpi_barrier_completion",
                "Time spent finishing a barrier after the first rank left",
                &self.barrier_compl,
            ),
            entry(
                ids::MPI_LATEBCAST,
                None,
                "Late Broadcast",
                "mpi_latebcast",
                "Time non-root ranks waited for a late root in one-to-N collectives",
                &self.late_bcast,
            ),
            entry(
                ids::MPI_EARLYREDUCE,
                None,
                "Early Reduce",
                "mpi_earlyreduce",
                "Time the root of an N-to-one collective waited for the last contributor",
                &self.early_reduce,
            ),
            entry(
                ids::MPI_EARLYSCAN,
                None,
                "Early Scan",
                "mpi_earlyscan",
                "Time ranks of a prefix reduction waited for their predecessors",
                &self.early_scan,
            ),
            entry(
                ids::MPI_WAIT_NXN,
                None,
                "Wait at N x N",
                "mpi_wait_nxn",
                "Time spent waiting in front of an N-to-N collective",
                &self.wait_nxn,
            ),
            entry(
                ids::MPI_NXN_COMPLETION,
                Some(ids::MPI_WAIT_NXN),
                "N x N Completion",
                "mpi_nxn_completion",
                "Time spent finishing an N-to-N collective after the first rank left",
                &self.nxn_compl,
            ),
            entry(
                ids::MPI_INIT_EXIT,
                None,
                "Init/Exit",
                "mpi_init_completion",
                "Idle time finishing MPI initialization",
                &self.init_compl,
            ),
            entry(
                ids::MPI_FINALIZE_WAIT,
                None,
                "Wait at Finalize",
                "mpi_finalize_wait",
                "Idle time finishing MPI finalization",
                &self.finalize_wait,
            ),
        ]
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use hindsight_core::Timestamp;

    use super::*;
    use crate::cbdata::RankTime;

    fn info(my: f64, latest: f64, earliest_end: f64, my_end: f64) -> CollectiveInfo {
        CollectiveInfo {
            my: RankTime { rank: 0, time: Timestamp::new(my) },
            root: None,
            earliest: RankTime { rank: 0, time: Timestamp::new(my.min(latest)) },
            latest: RankTime { rank: 1, time: Timestamp::new(latest) },
            earliest_end: RankTime { rank: 1, time: Timestamp::new(earliest_end) },
            my_end: Timestamp::new(my_end),
        }
    }

    #[test]
    fn wait_time_is_clamped_at_zero() {
        // arriving last means no wait, even with clock skew pushing the difference negative
        assert_eq!(CollectivePatterns::wait_time(&info(5.0, 3.0, 6.0, 6.0)), 0.0);
        assert_eq!(CollectivePatterns::wait_time(&info(1.0, 3.0, 6.0, 6.0)), 2.0);
    }

    #[test]
    fn completion_time_measures_the_tail() {
        assert_eq!(CollectivePatterns::completion_time(&info(0.0, 0.0, 4.0, 6.5)), 2.5);
        assert_eq!(CollectivePatterns::completion_time(&info(0.0, 0.0, 6.5, 4.0)), 0.0);
    }
}
