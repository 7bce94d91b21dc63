use std::collections::VecDeque;

use hindsight_core::{CallpathId, CommId, EventIdx, EventKind, Rank, Timestamp};

use crate::{
    cbdata::{CbData, CostKind},
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
    Role,
};

/// Depth of the wrong-order candidate FIFO. Kept at the original constant; the algorithm does
/// not depend on the exact value, only on the FIFO discarding its oldest entry on overflow.
pub(crate) const WRONG_ORDER_FIFO_CAPACITY: usize = 100;

// LATE SENDER
// ================================================================================================

/// Detects late-sender wait states: a receive blocked because the matching send had not been
/// issued yet.
///
/// Inside a multi-request completion region (waitall-style) the detector accumulates the
/// maximum idle across all completions and emits a single late-sender event at the group
/// boundary; outside, every receive is judged on its own.
#[derive(Default)]
pub struct LateSender {
    severities: SeverityMap,
    in_group: bool,
    max_idle: f64,
}

impl LateSender {
    fn compute_idle(&self, at: EventIdx, data: &mut CbData<'_>) -> Result<f64, DetectorError> {
        let enter_send = data.remote.get(Role::EnterSend)?.time;
        let enter_recv_idx = data.local.get(Role::EnterRecv)?;
        let enter_recv = data.event(enter_recv_idx);
        let leave_recv = enter_recv.leaveptr().map(|l| l.time()).unwrap_or_else(|| {
            // unclosed region; bound the wait by the completion itself
            data.event(at).time()
        });
        Ok((enter_send.min(leave_recv) - enter_recv.time()).max(0.0))
    }
}

impl Pattern for LateSender {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::MPI_LATESENDER,
            parent: None,
            name: "Late Sender",
            unique_name: "mpi_latesender",
            description: "Time a receive blocked waiting for the matching send",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        vec![
            (ReplayPhase::MainForward, UserEvent::GroupEnter),
            (ReplayPhase::MainForward, UserEvent::PostRecv),
            (ReplayPhase::MainForward, UserEvent::GroupLeave),
        ]
    }

    fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
        match phase {
            ReplayPhase::MainForward => &[UserEvent::LateSender],
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
            UserEvent::GroupEnter => {
                let is_multi_wait = data
                    .event(at)
                    .record()
                    .region()
                    .is_some_and(|r| data.defs.region(r).is_mpi_wait_multi());
                if is_multi_wait {
                    self.in_group = true;
                    self.max_idle = 0.0;
                }
            },
            UserEvent::PostRecv => {
                let idle = self.compute_idle(at, data)?;
                if idle > 0.0 {
                    tracing::debug!(
                        target: "waitstate",
                        event = at.as_u32(),
                        idle,
                        "late-sender wait state"
                    );
                    data.idle = idle;
                    data.wait_kind = Some(CostKind::Ls);
                }
                if self.in_group {
                    self.max_idle = self.max_idle.max(idle);
                } else if idle > 0.0 {
                    self.severities.add(data.callpath_of(at), idle);
                    data.notify(UserEvent::LateSender, at);
                }
            },
            UserEvent::GroupLeave => {
                if !self.in_group {
                    return Ok(());
                }
                let is_multi_wait = data
                    .event(at)
                    .record()
                    .region()
                    .is_some_and(|r| data.defs.region(r).is_mpi_wait_multi());
                if !is_multi_wait {
                    return Ok(());
                }
                if self.max_idle > 0.0 {
                    self.severities.add(data.callpath_of(at), self.max_idle);
                    data.idle = self.max_idle;
                    data.wait_kind = Some(CostKind::Ls);
                    data.notify(UserEvent::LateSender, at);
                }
                self.in_group = false;
                self.max_idle = 0.0;
            },
            _ => {},
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }
}

// LATE SENDER, WRONG ORDER
// ================================================================================================

struct WoRecord {
    send_time: Timestamp,
    source: (CommId, Rank),
    idle: f64,
    callpath: CallpathId,
}

/// Detects late-sender wait states caused by messages arriving in the wrong order.
///
/// Recent late-sender occurrences sit in a bounded FIFO; every subsequent receive checks
/// whether a buffered record's send happened *after* the current message's send, in which case
/// the buffered wait was avoidable and its idle time is charged to the wrong-order pattern
/// (split by same/different source).
#[derive(Default)]
pub struct LateSenderWrongOrder {
    severities: SeverityMap,
    different_source: SeverityMap,
    same_source: SeverityMap,
    fifo: VecDeque<WoRecord>,
}

impl Pattern for LateSenderWrongOrder {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::MPI_LATESENDER_WO,
            parent: Some(ids::MPI_LATESENDER),
            name: "Late Sender, Wrong Order",
            unique_name: "mpi_latesender_wo",
            description: "Late-sender time caused by out-of-order message arrival",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        vec![(ReplayPhase::MainForward, UserEvent::PostRecv)]
    }

    fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
        match phase {
            ReplayPhase::MainForward => &[UserEvent::LateSenderWo],
            _ => &[],
        }
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        _user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let send = data.remote.get(Role::Send)?;
        let Some((_, comm, _, _)) = data.event(at).record().p2p() else {
            return Ok(());
        };
        let source = (comm, send.rank);

        // buffer this receive's late-sender occurrence, discarding the oldest on overflow
        if data.idle > 0.0 && data.wait_kind == Some(CostKind::Ls) {
            if self.fifo.len() == WRONG_ORDER_FIFO_CAPACITY {
                self.fifo.pop_front();
            }
            self.fifo.push_back(WoRecord {
                send_time: send.time,
                source,
                idle: data.idle,
                callpath: data.callpath_of(at),
            });
        }

        // any buffered record whose send happened after this message's send arrived wrong-order
        let mut matched = Vec::new();
        self.fifo.retain(|rec| {
            if rec.send_time > send.time {
                matched.push((rec.source, rec.idle, rec.callpath));
                false
            } else {
                true
            }
        });
        for (rec_source, idle, callpath) in matched {
            self.severities.add(callpath, idle);
            if rec_source == source {
                self.same_source.add(callpath, idle);
            } else {
                self.different_source.add(callpath, idle);
            }
            data.idle = idle;
            data.notify(UserEvent::LateSenderWo, at);
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        vec![
            (self.meta(), self.severities.clone()),
            (
                PatternMeta {
                    id: ids::MPI_LSWO_DIFFERENT,
                    parent: Some(ids::MPI_LATESENDER_WO),
                    name: "Late Sender, Wrong Order, Different Source",
                    unique_name: "mpi_lswo_different",
                    description: "Wrong-order late-sender time, messages from different sources",
                    unit: "sec",
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                self.different_source.clone(),
            ),
            (
                PatternMeta {
                    id: ids::MPI_LSWO_SAME,
                    parent: Some(ids::MPI_LATESENDER_WO),
                    name: "Late Sender, Wrong Order, Same Source",
                    unique_name: "mpi_lswo_same",
                    description: "Wrong-order late-sender time, messages from the same source",
                    unit: "sec",
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                self.same_source.clone(),
            ),
        ]
    }
}

// LATE RECEIVER
// ================================================================================================

/// Detects late-receiver wait states during the backward synchronization sweep: a blocking send
/// (or the wait completing a non-blocking send) blocked until the matching receive was posted.
#[derive(Default)]
pub struct LateReceiver {
    severities: SeverityMap,
}

impl Pattern for LateReceiver {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::MPI_LATERECEIVER,
            parent: None,
            name: "Late Receiver",
            unique_name: "mpi_latereceiver",
            description: "Time a send blocked waiting for the matching receive to be posted",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        vec![(ReplayPhase::BackwardSync, UserEvent::PostInvRecv)]
    }

    fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
        match phase {
            ReplayPhase::BackwardSync => &[UserEvent::LateReceiver],
            _ => &[],
        }
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        _user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let send = data.event(at);

        // the waiting event is the completion for non-blocking sends, the send itself otherwise
        let (wait_idx, wait_ev) = match send.completion() {
            Some(completion) => (completion.idx(), completion),
            None => (at, send),
        };
        let Some(enter) = wait_ev.enterptr() else {
            return Ok(());
        };
        let region = enter.record().region().map(|r| data.defs.region(r));
        let may_block = match wait_ev.kind() {
            EventKind::SendStart => region.is_some_and(|r| r.is_mpi_block_send()),
            EventKind::SendComplete => {
                region.is_some_and(|r| r.is_mpi_wait_single() || r.is_mpi_wait_multi())
            },
            _ => false,
        };
        if !may_block {
            return Ok(());
        }

        let enter_recv_req = data.inv_remote.get(Role::EnterRecvRequest)?.time;
        let leave = enter.leaveptr().map(|l| l.time()).unwrap_or_else(|| wait_ev.time());
        let idle = (enter_recv_req.min(leave) - enter.time()).max(0.0);
        if idle > 0.0 {
            self.severities.add(data.callpath_of(wait_idx), idle);
            data.synch.set_wait(wait_idx, idle, CostKind::Lr);
            data.idle = idle;
            data.wait_kind = Some(CostKind::Lr);
            data.notify(UserEvent::LateReceiver, wait_idx);
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.severities
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_order_fifo_is_bounded() {
        let mut wo = LateSenderWrongOrder::default();
        for i in 0..200 {
            if wo.fifo.len() == WRONG_ORDER_FIFO_CAPACITY {
                wo.fifo.pop_front();
            }
            wo.fifo.push_back(WoRecord {
                send_time: Timestamp::new(i as f64),
                source: (CommId(0), 0),
                idle: 1.0,
                callpath: CallpathId::ROOT,
            });
        }
        assert_eq!(wo.fifo.len(), WRONG_ORDER_FIFO_CAPACITY);
        // only the 100 most recent survive
        assert_eq!(wo.fifo.front().unwrap().send_time, Timestamp::new(100.0));
        assert_eq!(wo.fifo.back().unwrap().send_time, Timestamp::new(199.0));
    }
}
