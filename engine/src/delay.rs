use std::collections::{BTreeMap, HashMap};

use hindsight_core::{Buffer, BufferTag, EventIdx, EventPayload, Rank};

use crate::{
    cbdata::{add_scale, CbData, CostKind},
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
    Role,
};

// DELAY ANALYSIS
// ================================================================================================

/// Root-cause analysis: attributes every wait state's magnitude to the call paths of the
/// location that caused it.
///
/// During the backward cost sweep, the waiting side of each synchpoint ships its waiting time
/// and its accumulated inbound scales; the delaying side computes the profile of its interval
/// since the previous synchpoint, splits it into computation (`δ`) and propagating waits (`ω`),
/// and distributes the waiting time over `δ` with the scale `min(w / (δ + ω), 1)`. Short-term
/// costs blame the immediate interval; long-term costs follow the accumulated inbound scales;
/// `ω` contributions land in the propagating/indirect wait-state metrics. Every attribution is
/// also pushed into the per-synchpoint cost map, so upstream intervals inherit the blame when
/// the sweep reaches them.
pub struct DelayAnalysis {
    short: BTreeMap<CostKind, SeverityMap>,
    long: BTreeMap<CostKind, SeverityMap>,
    propagating: SeverityMap,
    indirect: SeverityMap,
    // receiver-side estimate of the matching sender's late-receiver wait, by receive event
    lr_rwait: HashMap<EventIdx, f64>,
}

impl Default for DelayAnalysis {
    fn default() -> Self {
        let mut short = BTreeMap::new();
        let mut long = BTreeMap::new();
        for kind in CostKind::ALL {
            short.insert(kind, SeverityMap::new());
            long.insert(kind, SeverityMap::new());
        }
        Self {
            short,
            long,
            propagating: SeverityMap::new(),
            indirect: SeverityMap::new(),
            lr_rwait: HashMap::new(),
        }
    }
}

impl DelayAnalysis {
    /// Attributes a wait of magnitude `w` to the interval ending at `at` on this location.
    ///
    /// `scale_long` carries the waiter's accumulated inbound scales; `width` is the number of
    /// peers paying for each unit of delay (1 except for OpenMP idleness, where every worker
    /// pays for the master's serial time).
    fn attribute(
        &mut self,
        kind: CostKind,
        w: f64,
        scale_long: f64,
        width: f64,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let prev = data.synch.prev_before(at).map(|sp| sp.event);
        let from = prev.unwrap_or(EventIdx::new(0));
        let lo = prev.map(|p| EventIdx::new(p.as_u32() + 1)).unwrap_or(EventIdx::new(0));

        let mut delta = data.timemaps.time_map(from, at);
        let omega = data.synch.wait_map_in(lo, at);
        delta.subtract_clamped(&omega);

        let denom = (delta.sum() + omega.sum()) * width;
        // an empty interval cannot absorb blame; leave the severities unchanged
        if denom <= 0.0 {
            return Ok(());
        }
        let scale = (w / denom).min(1.0);
        tracing::debug!(
            target: "root_cause",
            kind = ?kind,
            event = at.as_u32(),
            rwait = w,
            scale,
            "attributing delay costs"
        );

        for (cp, v) in delta.iter() {
            self.short.get_mut(&kind).expect("all kinds present").add(cp, scale * v * width);
            if scale_long > 0.0 {
                self.long.get_mut(&kind).expect("all kinds present").add(cp, scale_long * v);
            }
        }
        // waits inside the interval that were blamed through the chain are indirect causes
        if scale_long > 0.0 {
            for (cp, v) in omega.iter() {
                self.indirect.add(cp, scale_long * v);
            }
        }

        // every waiting synchpoint of the interval, the predecessor included, inherits the
        // blame; their own shipments forward it when the sweep reaches them
        let exclusive_below_prev =
            prev.and_then(|p| p.as_u32().checked_sub(1)).map(EventIdx::new);
        let prop_sps: Vec<EventIdx> = data
            .synch
            .between(exclusive_below_prev, EventIdx::new(at.as_u32() + 1))
            .iter()
            .filter(|sp| sp.wait_time > 0.0)
            .map(|sp| sp.event)
            .collect();
        for &sp in &prop_sps {
            data.delay_costs.add(sp, kind, scale + scale_long);
        }

        data.delay_info = delta;
        data.wait_info = omega;
        data.prop_sp_map = prop_sps;
        data.prev_sp = prev;
        data.rwait = w;
        add_scale(&mut data.sum_scales, kind, scale + scale_long);
        Ok(())
    }

    /// The shared collective-delay skeleton: gather waits and inbound scales across the
    /// communicator, then let the delaying rank (`reducer`) absorb the blame.
    #[allow(clippy::too_many_arguments)]
    fn collective_delay(
        &mut self,
        kind: CostKind,
        at: EventIdx,
        data: &mut CbData<'_>,
        comm: hindsight_core::CommId,
        reducer: Option<Rank>,
        width_from_team: bool,
    ) -> Result<(), DetectorError> {
        let comm_def = data.defs.comm(comm);
        let Some(my_rank) = comm_def.rank_of(data.location()) else {
            return Ok(());
        };

        let (my_wait, begin) = match data.synch.get(at) {
            Some(sp) => {
                let wait = if sp.kind == Some(kind) { sp.wait_time } else { 0.0 };
                (wait, data.event(at).enclosing_enter_time())
            },
            None => (0.0, data.event(at).enclosing_enter_time()),
        };
        let scale_in = data.delay_costs.total_scale(at);
        if my_wait > 0.0 && scale_in > 0.0 {
            self.propagating.add(data.callpath_of(at), my_wait.min(scale_in * my_wait));
        }

        let mut buf = Buffer::new();
        buf.begin_section(kind.buffer_tag());
        buf.put_f64(my_wait);
        buf.put_f64(scale_in);
        buf.put_time(begin);
        buf.end_section();
        let all = data.exchange.allgather(comm, comm_def, buf.into_bytes())?;

        let mut latest_rank = 0;
        let mut latest_begin = f64::NEG_INFINITY;
        let mut waits = vec![0.0; all.len()];
        let mut scales = vec![0.0; all.len()];
        for (rank, bytes) in all {
            let mut buf = Buffer::from_bytes(bytes);
            buf.expect_section(kind.buffer_tag())?;
            let wait = buf.get_f64()?;
            let scale = buf.get_f64()?;
            let begin = buf.get_time()?;
            waits[rank as usize] = wait;
            scales[rank as usize] = scale;
            if begin.secs() > latest_begin {
                latest_begin = begin.secs();
                latest_rank = rank;
            }
        }
        let reducer = reducer.unwrap_or(latest_rank);
        if my_rank != reducer {
            return Ok(());
        }

        let w_total: f64 = waits
            .iter()
            .enumerate()
            .filter(|(r, _)| *r as Rank != reducer)
            .map(|(_, w)| w)
            .sum();
        let scale_long: f64 = scales
            .iter()
            .enumerate()
            .filter(|(r, _)| *r as Rank != reducer)
            .map(|(_, s)| s)
            .sum();
        if w_total <= 0.0 && scale_long <= 0.0 {
            return Ok(());
        }

        let width = if width_from_team {
            let size = comm_def.size().saturating_sub(1).max(1) as f64;
            data.omp_idle_scale = size;
            size
        } else {
            1.0
        };
        self.attribute(kind, w_total, scale_long, width, at, data)
    }

    fn short_meta(kind: CostKind) -> PatternMeta {
        let (id, name, unique_name, description) = match kind {
            CostKind::Ls => (
                ids::DELAY_LATESENDER,
                "Late-Sender Delay Costs (short-term)",
                "delay_latesender",
                "Delay directly causing late-sender wait states",
            ),
            CostKind::Lr => (
                ids::DELAY_LATERECEIVER,
                "Late-Receiver Delay Costs (short-term)",
                "delay_latereceiver",
                "Delay directly causing late-receiver wait states",
            ),
            CostKind::Barrier => (
                ids::DELAY_BARRIER,
                "Barrier Delay Costs (short-term)",
                "delay_barrier",
                "Delay directly causing barrier wait states",
            ),
            CostKind::N2n => (
                ids::DELAY_N2N,
                "N x N Delay Costs (short-term)",
                "delay_n2n",
                "Delay directly causing N-to-N collective wait states",
            ),
            CostKind::C12n => (
                ids::DELAY_12N,
                "1-to-N Delay Costs (short-term)",
                "delay_12n",
                "Delay directly causing one-to-N collective wait states",
            ),
            CostKind::N21 => (
                ids::DELAY_N21,
                "N-to-1 Delay Costs (short-term)",
                "delay_n21",
                "Delay directly causing N-to-one collective wait states",
            ),
            CostKind::OmpBarrier => (
                ids::DELAY_OMPBARRIER,
                "OMP Barrier Delay Costs (short-term)",
                "delay_ompbarrier",
                "Delay directly causing OpenMP barrier wait states",
            ),
            CostKind::OmpIdle => (
                ids::DELAY_OMPIDLE,
                "OMP Idleness Delay Costs (short-term)",
                "delay_ompidle",
                "Delay directly causing OpenMP worker idleness",
            ),
        };
        PatternMeta {
            id,
            parent: None,
            name,
            unique_name,
            description,
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn long_meta(kind: CostKind) -> PatternMeta {
        let short = Self::short_meta(kind);
        let (id, name, unique_name) = match kind {
            CostKind::Ls => (
                ids::DELAY_LATESENDER_LONGTERM,
                "Late-Sender Delay Costs (long-term)",
                "delay_latesender_longterm",
            ),
            CostKind::Lr => (
                ids::DELAY_LATERECEIVER_LONGTERM,
                "Late-Receiver Delay Costs (long-term)",
                "delay_latereceiver_longterm",
            ),
            CostKind::Barrier => (
                ids::DELAY_BARRIER_LONGTERM,
                "Barrier Delay Costs (long-term)",
                "delay_barrier_longterm",
            ),
            CostKind::N2n => {
                (ids::DELAY_N2N_LONGTERM, "N x N Delay Costs (long-term)", "delay_n2n_longterm")
            },
            CostKind::C12n => {
                (ids::DELAY_12N_LONGTERM, "1-to-N Delay Costs (long-term)", "delay_12n_longterm")
            },
            CostKind::N21 => {
                (ids::DELAY_N21_LONGTERM, "N-to-1 Delay Costs (long-term)", "delay_n21_longterm")
            },
            CostKind::OmpBarrier => (
                ids::DELAY_OMPBARRIER_LONGTERM,
                "OMP Barrier Delay Costs (long-term)",
                "delay_ompbarrier_longterm",
            ),
            CostKind::OmpIdle => (
                ids::DELAY_OMPIDLE_LONGTERM,
                "OMP Idleness Delay Costs (long-term)",
                "delay_ompidle_longterm",
            ),
        };
        PatternMeta {
            id,
            parent: Some(short.id),
            name,
            unique_name,
            description: "Delay causing wait states through wait-state propagation",
            ..short
        }
    }
}

impl Pattern for DelayAnalysis {
    fn meta(&self) -> PatternMeta {
        Self::short_meta(CostKind::Ls)
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        use UserEvent::*;
        let mut subs = vec![(ReplayPhase::MainForward, PostRecv)];
        subs.extend(
            [
                PreInvSend,
                PostInvRecv,
                SyncColl,
                Coll12n,
                CollN21,
                CollN2n,
                CollScan,
                GroupEnter,
                GroupLeave,
            ]
            .into_iter()
            .map(|ue| (ReplayPhase::BackwardCost, ue)),
        );
        subs
    }

    fn handle(
        &mut self,
        phase: ReplayPhase,
        user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        if phase == ReplayPhase::MainForward {
            // receiver-side estimate of how long a blocking sender had to wait for us
            if user_event == UserEvent::PostRecv && data.remote_send_blocking {
                let enter_send = data.remote.get(Role::EnterSend)?.time;
                if let Some(req_enter) = data.local.try_get(Role::EnterRecvRequest) {
                    let w = (data.event(req_enter).time() - enter_send).max(0.0);
                    if w > 0.0 {
                        self.lr_rwait.insert(at, w);
                    }
                }
            }
            return Ok(());
        }

        match user_event {
            UserEvent::PreInvSend => {
                // waiting side of a late-sender synchpoint: ship wait and inbound scales
                let rwait = data
                    .synch
                    .get(at)
                    .filter(|sp| sp.kind == Some(CostKind::Ls))
                    .map(|sp| sp.wait_time)
                    .unwrap_or(0.0);
                data.input_scales = data.delay_costs.scales(at);
                let scale_in = data.delay_costs.total_scale(at);
                data.local_buf.begin_section(BufferTag::Delay);
                data.local_buf.put_f64(rwait);
                data.local_buf.put_f64(scale_in);
                data.local_buf.end_section();

                // a wait that downstream analysis blamed is itself a propagating wait state
                if rwait > 0.0 && scale_in > 0.0 {
                    self.propagating.add(data.callpath_of(at), rwait.min(scale_in * rwait));
                }

                // delaying side of a late-receiver synchpoint: we held the sender up
                if let Some(&w) = self.lr_rwait.get(&at) {
                    self.attribute(CostKind::Lr, w, 0.0, 1.0, at, data)?;
                }
            },
            UserEvent::PostInvRecv => {
                data.remote_buf.expect_section(BufferTag::Delay)?;
                let rwait = data.remote_buf.get_f64()?;
                let scale_in = data.remote_buf.get_f64()?;
                if rwait > 0.0 || scale_in > 0.0 {
                    self.attribute(CostKind::Ls, rwait, scale_in, 1.0, at, data)?;
                }
            },
            UserEvent::SyncColl => {
                let EventPayload::Collective { comm, .. } = *data.payload_of(at) else {
                    return Ok(());
                };
                self.collective_delay(CostKind::Barrier, at, data, comm, None, false)?;
            },
            UserEvent::CollN2n | UserEvent::CollScan => {
                let EventPayload::Collective { comm, .. } = *data.payload_of(at) else {
                    return Ok(());
                };
                self.collective_delay(CostKind::N2n, at, data, comm, None, false)?;
            },
            UserEvent::Coll12n => {
                let EventPayload::Collective { comm, root, .. } = *data.payload_of(at) else {
                    return Ok(());
                };
                self.collective_delay(CostKind::C12n, at, data, comm, root, false)?;
            },
            UserEvent::CollN21 => {
                let EventPayload::Collective { comm, .. } = *data.payload_of(at) else {
                    return Ok(());
                };
                self.collective_delay(CostKind::N21, at, data, comm, None, false)?;
            },
            UserEvent::GroupEnter => {
                // fork boundary: the master's serial interval idles every worker
                let Some(region) = data.event(at).record().region() else {
                    return Ok(());
                };
                if !data.defs.region(region).is_omp_parallel() {
                    return Ok(());
                }
                let Some(team) = data.defs.location(data.location()).thread_team else {
                    return Ok(());
                };
                self.collective_delay(CostKind::OmpIdle, at, data, team, Some(0), true)?;
            },
            UserEvent::GroupLeave => {
                let Some(region) = data.event(at).record().region() else {
                    return Ok(());
                };
                if !data.defs.region(region).is_omp_barrier() {
                    return Ok(());
                }
                let Some(team) = data.defs.location(data.location()).thread_team else {
                    return Ok(());
                };
                self.collective_delay(CostKind::OmpBarrier, at, data, team, None, false)?;
            },
            _ => {},
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.short[&CostKind::Ls]
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        let mut results = Vec::new();
        for kind in CostKind::ALL {
            results.push((Self::short_meta(kind), self.short[&kind].clone()));
            results.push((Self::long_meta(kind), self.long[&kind].clone()));
        }
        results.push((
            PatternMeta {
                id: ids::WAIT_PROPAGATING,
                parent: None,
                name: "Propagating Wait States",
                unique_name: "wait_propagating",
                description: "Waiting time that itself delayed downstream synchpoints",
                unit: "sec",
                mode: Mode::Exclusive,
                hidden: false,
            },
            self.propagating.clone(),
        ));
        results.push((
            PatternMeta {
                id: ids::WAIT_INDIRECT,
                parent: None,
                name: "Indirect Wait States",
                unique_name: "wait_indirect",
                description: "Waiting time caused through a chain of synchpoints",
                unit: "sec",
                mode: Mode::Exclusive,
                hidden: false,
            },
            self.indirect.clone(),
        ));
        results
    }
}
