use hindsight_core::{Buffer, BufferTag, CallpathId, EventIdx, EventPayload, Timestamp};

use crate::{
    cbdata::{CbData, CostKind},
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
};

// CRITICAL PATH
// ================================================================================================

/// Traces the globally longest causal chain backwards through the trace.
///
/// A single `on_critical_path` flag travels across the backward synchronization sweep. It
/// starts on the location that finished last; at every wait-state synchpoint the sweep visits,
/// the flag is handed to the location that caused the wait (the sender of a late message, the
/// latest-arriving rank of a collective, the master of a fork). Whenever a location gives the
/// flag away it banks the time profile of the sub-interval it owned, minus the waiting time in
/// it; the global reduction of those profiles is the critical-path profile downstream impact
/// patterns consume.
#[derive(Default)]
pub struct CriticalPath {
    severities: SeverityMap,
    on_cp: bool,
    end_event: Option<EventIdx>,
}

impl CriticalPath {
    fn close_segment(&mut self, from: EventIdx, data: &mut CbData<'_>) {
        let end = self.end_event.unwrap_or(from);
        if from > end {
            return;
        }
        let mut profile = data.timemaps.time_map(from, end);
        if from.as_u32() + 1 <= end.as_u32() {
            let waits = data.synch.wait_map_in(EventIdx::new(from.as_u32() + 1), end);
            profile.subtract_clamped(&waits);
        }
        for (cp, v) in profile.iter() {
            self.severities.add(cp, v);
        }
    }

    fn take_flag(&mut self, at: EventIdx) {
        tracing::debug!(target: "critical_path", event = at.as_u32(), "took the critical-path flag");
        self.on_cp = true;
        self.end_event = Some(at);
    }

    fn on_sweep_begin(&mut self, data: &mut CbData<'_>) -> Result<(), DetectorError> {
        // the flag starts on the location that finished last
        let end_time = data.trace.end_time().unwrap_or(Timestamp::MIN);
        let all = data.exchange.allreduce_max_world(&[end_time.secs()])?;
        if !data.trace.is_empty() && end_time.secs() == all[0] {
            // ties resolve to the lowest location id
            let mut buf = Buffer::new();
            buf.put_u32(data.location().0);
            let claims = data.exchange.allgather_world(buf.into_bytes())?;
            let mut winner = u32::MAX;
            for bytes in claims {
                let mut buf = Buffer::from_bytes(bytes);
                let id = buf.get_u32()?;
                if id != u32::MAX {
                    winner = winner.min(id);
                }
            }
            if winner == data.location().0 {
                self.take_flag(EventIdx::from(data.trace.len() - 1));
            }
        } else {
            // non-candidates still participate in the claim round
            let mut buf = Buffer::new();
            buf.put_u32(u32::MAX);
            data.exchange.allgather_world(buf.into_bytes())?;
        }
        Ok(())
    }

    /// Receiver side of a point-to-point synchpoint: pack the flag hand-off.
    fn on_inverse_send(&mut self, at: EventIdx, data: &mut CbData<'_>) {
        let hand_off = self.on_cp
            && data
                .synch
                .get(at)
                .is_some_and(|sp| sp.kind == Some(CostKind::Ls) && sp.wait_time > 0.0);
        data.local_buf.begin_section(BufferTag::CriticalPath);
        data.local_buf.put_u8(hand_off as u8);
        data.local_buf.end_section();
        if hand_off {
            self.close_segment(at, data);
            self.on_cp = false;
            self.end_event = None;
        }
    }

    /// Sender side of a point-to-point synchpoint: accept the flag if it was handed off.
    fn on_inverse_recv(&mut self, at: EventIdx, data: &mut CbData<'_>) -> Result<(), DetectorError> {
        data.remote_buf.expect_section(BufferTag::CriticalPath)?;
        let flag = data.remote_buf.get_u8()? != 0;
        if flag {
            self.take_flag(at);
        }
        Ok(())
    }

    /// Collective synchpoint: the flag moves to the latest-arriving rank.
    fn on_collective(&mut self, at: EventIdx, data: &mut CbData<'_>) -> Result<(), DetectorError> {
        let EventPayload::Collective { comm, .. } = *data.payload_of(at) else {
            return Ok(());
        };
        let comm_def = data.defs.comm(comm);
        if comm_def.rank_of(data.location()).is_none() {
            return Ok(());
        }
        let begin = data.event(at).beginptr().map(|b| b.time()).unwrap_or_else(|| {
            data.event(at).time()
        });
        self.team_hand_off(at, data, comm, begin.secs(), None)
    }

    /// OpenMP boundary: at a join or barrier the flag moves to the latest-arriving thread; at a
    /// fork it moves to the master, which pays for starting the team.
    fn on_team_boundary(
        &mut self,
        user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let Some(region) = data.event(at).record().region() else {
            return Ok(());
        };
        let region = data.defs.region(region);
        let Some(team) = data.defs.location(data.location()).thread_team else {
            return Ok(());
        };
        let ev = data.event(at);
        let (key, winner) = match user_event {
            // fork boundary: the flag always lands on the master thread
            UserEvent::GroupEnter if region.is_omp_parallel() => (0.0, Some(0)),
            // join boundary: the last thread to leave the region owned the path
            UserEvent::GroupLeave if region.is_omp_parallel() => (ev.time().secs(), None),
            // barrier: the last thread to arrive owned the path
            UserEvent::GroupLeave if region.is_omp_barrier() => {
                (ev.enclosing_enter_time().secs(), None)
            },
            _ => return Ok(()),
        };
        self.team_hand_off(at, data, team, key, winner)
    }

    fn team_hand_off(
        &mut self,
        at: EventIdx,
        data: &mut CbData<'_>,
        comm: hindsight_core::CommId,
        my_order_key: f64,
        winner: Option<hindsight_core::Rank>,
    ) -> Result<(), DetectorError> {
        let comm_def = data.defs.comm(comm);
        let Some(my_rank) = comm_def.rank_of(data.location()) else {
            return Ok(());
        };
        let waited = data
            .synch
            .get(at)
            .is_some_and(|sp| sp.wait_time > 0.0);

        let mut buf = Buffer::new();
        buf.put_u8(self.on_cp as u8);
        buf.put_f64(my_order_key);
        let all = data.exchange.allgather(comm, comm_def, buf.into_bytes())?;

        let mut any_flag = false;
        let mut latest_rank = 0;
        let mut latest_key = f64::NEG_INFINITY;
        for (rank, bytes) in all {
            let mut buf = Buffer::from_bytes(bytes);
            let flag = buf.get_u8()? != 0;
            let key = buf.get_f64()?;
            any_flag |= flag;
            if key > latest_key {
                latest_key = key;
                latest_rank = rank;
            }
        }
        let latest_rank = winner.unwrap_or(latest_rank);

        if self.on_cp && my_rank != latest_rank && waited {
            self.close_segment(at, data);
            self.on_cp = false;
            self.end_event = None;
        }
        if any_flag && my_rank == latest_rank && !self.on_cp {
            self.take_flag(at);
        }
        Ok(())
    }

    fn on_sweep_end(&mut self, data: &mut CbData<'_>) {
        if self.on_cp {
            if !data.trace.is_empty() {
                self.close_segment(EventIdx::new(0), data);
            }
            self.on_cp = false;
            self.end_event = None;
        }
    }
}

impl Pattern for CriticalPath {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::CRITICAL_PATH,
            parent: None,
            name: "Critical Path Profile",
            unique_name: "critical_path",
            description: "Time this location spent on the global critical path",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        use UserEvent::*;
        [
            SweepBegin, PreInvSend, PostInvRecv, SyncColl, Coll12n, CollN21, CollN2n, CollScan,
            InitEnd, FinalizeEnd, GroupEnter, GroupLeave, SweepEnd,
        ]
        .into_iter()
        .map(|ue| (ReplayPhase::BackwardSync, ue))
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
            UserEvent::SweepBegin => self.on_sweep_begin(data)?,
            UserEvent::PreInvSend => self.on_inverse_send(at, data),
            UserEvent::PostInvRecv => self.on_inverse_recv(at, data)?,
            UserEvent::SyncColl
            | UserEvent::Coll12n
            | UserEvent::CollN21
            | UserEvent::CollN2n
            | UserEvent::CollScan
            | UserEvent::InitEnd
            | UserEvent::FinalizeEnd => self.on_collective(at, data)?,
            UserEvent::GroupEnter | UserEvent::GroupLeave => {
                self.on_team_boundary(user_event, at, data)?
            },
            UserEvent::SweepEnd => self.on_sweep_end(data),
            _ => {},
        }
        Ok(())
    }

    fn finish(&mut self, data: &mut CbData<'_>) -> Result<(), DetectorError> {
        // publish the per-callpath vectors every impact pattern reads
        let n = data.defs.callpaths.len();
        let mut local_cp = vec![0.0; n];
        for (cp, v) in self.severities.iter() {
            local_cp[cp.as_usize()] = v;
        }
        let mut local_time = vec![0.0; n];
        for (cp, v) in data.timemaps.full_profile().iter() {
            local_time[cp.as_usize()] = v;
        }
        let global = data.exchange.allreduce_sum_world(&local_cp)?;

        data.local_critical_path = local_cp;
        data.local_time_profile = local_time;
        data.global_critical_path = global;
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }
}

// CRITICAL-PATH IMPACT
// ================================================================================================

/// The four metrics derived from the critical-path and local time profiles:
///
/// - *activity impact*: the portion of the critical path covered by this location's own
///   activity, `min(gcpath, local_time)`;
/// - *critical imbalance impact*: the share of globally wasted waiting time attributable to
///   call paths that are over-represented on the critical path, redistributed to the call paths
///   this location actually has on its critical-path profile;
/// - *inter-partition imbalance*: off-critical-path headroom, globally reduced and attributed
///   back the same way;
/// - *non-critical activities*: `max(local_time − gcpath, 0)`.
#[derive(Default)]
pub struct CriticalPathImpact {
    activity: SeverityMap,
    imbalance: SeverityMap,
    inter_partition: SeverityMap,
    non_critical: SeverityMap,
}

impl Pattern for CriticalPathImpact {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::CRITICAL_PATH_ACTIVITIES,
            parent: Some(ids::CRITICAL_PATH),
            name: "Critical-Path Activity Impact",
            unique_name: "critical_path_activities",
            description: "Critical-path share covered by this location's activity",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        Vec::new()
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        _user_event: UserEvent,
        _at: EventIdx,
        _data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        Ok(())
    }

    fn finish(&mut self, data: &mut CbData<'_>) -> Result<(), DetectorError> {
        let gcpath = &data.global_critical_path;
        let local_time = &data.local_time_profile;
        let local_cp = &data.local_critical_path;
        if gcpath.is_empty() {
            return Ok(());
        }

        // excess and headroom compare against the per-location average demand of the critical
        // path, so a perfectly balanced program shows neither
        let share = 1.0 / data.defs.num_locations().max(1) as f64;
        let mut excess = vec![0.0; gcpath.len()];
        let mut headroom = vec![0.0; gcpath.len()];
        for (i, (&g, &t)) in itertools::izip!(gcpath, local_time).enumerate() {
            let cp = CallpathId::from(i as u32);
            self.activity.add(cp, g.min(t));
            self.non_critical.add(cp, (t - g).max(0.0));
            excess[i] = (g * share - t).max(0.0);
            headroom[i] = (t - g * share).max(0.0);
        }

        // rescale global excess by the globally wasted waiting time and hand every location its
        // proportional share of the call paths it holds on the critical path
        let wait_total = data.synch.total_wait();
        let mut reduced = excess.clone();
        reduced.push(wait_total);
        let reduced = data.exchange.allreduce_sum_world(&reduced)?;
        let (global_excess, agg_wait) = reduced.split_at(excess.len());
        let agg_excess: f64 = global_excess.iter().sum();
        let factor = if agg_excess > 0.0 { agg_wait[0] / agg_excess } else { 0.0 };

        let global_headroom = data.exchange.allreduce_sum_world(&headroom)?;

        for i in 0..gcpath.len() {
            if gcpath[i] <= 0.0 {
                continue;
            }
            let share = local_cp[i] / gcpath[i];
            let cp = CallpathId::from(i as u32);
            self.imbalance.add(cp, factor * global_excess[i] * share);
            self.inter_partition.add(cp, global_headroom[i] * share);
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.activity
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        vec![
            (self.meta(), self.activity.clone()),
            (
                PatternMeta {
                    id: ids::CRITICAL_IMBALANCE,
                    parent: Some(ids::CRITICAL_PATH),
                    name: "Critical Imbalance Impact",
                    unique_name: "critical_imbalance",
                    description: "Waiting time attributable to critical-path imbalance",
                    unit: "sec",
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                self.imbalance.clone(),
            ),
            (
                PatternMeta {
                    id: ids::INTER_PARTITION_IMBALANCE,
                    parent: Some(ids::CRITICAL_PATH),
                    name: "Inter-Partition Imbalance",
                    unique_name: "inter_partition_imbalance",
                    description: "Shared headroom attributed to local critical-path call paths",
                    unit: "sec",
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                self.inter_partition.clone(),
            ),
            (
                PatternMeta {
                    id: ids::NON_CRITICAL_PATH_ACTIVITIES,
                    parent: Some(ids::CRITICAL_PATH),
                    name: "Non-Critical-Path Activities",
                    unique_name: "non_critical_path_activities",
                    description: "Activity time with no impact on the program's makespan",
                    unit: "sec",
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                self.non_critical.clone(),
            ),
        ]
    }
}
