use std::collections::BTreeMap;

use hindsight_core::{
    Buffer, BufferTag, CallpathId, EventIdx, EventKind, EventPayload, EventRef, GlobalDefs,
    LocalTrace, LocationId, Rank, TimeMap, Timestamp,
};

use crate::{
    caches::{LockCache, RmaEpochCache, TimeMapCache},
    errors::DetectorError,
    exchange::ExchangeHandle,
    replay::UserEvent,
    synchpoints::SynchpointHandler,
};

// ROLE
// ================================================================================================

/// Symbolic labels under which events and peer data are stored in the per-event scratchpad,
/// so downstream callbacks retrieve them by role rather than by raw event pointer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Role {
    /// The send event of the current message.
    Send,
    /// The receive event of the current message.
    Recv,
    /// The enter event of the region containing the send.
    EnterSend,
    /// The enter event of the region containing the receive.
    EnterRecv,
    /// The enter event of the region in which a non-blocking receive was posted.
    EnterRecvRequest,
    /// A send buffered by the late-sender detector for wrong-order analysis.
    SendLs,
    /// A receive buffered for late-receiver analysis.
    RecvLr,
    /// The begin event of the current collective.
    BeginColl,
    /// The end event of the current collective.
    EndColl,
    /// The fork event of the current parallel region.
    Fork,
    /// The join event of the current parallel region.
    Join,
}

// EVENT SETS
// ================================================================================================

/// Local events of the current exchange, stored by role.
#[derive(Clone, Debug, Default)]
pub struct EventSet {
    map: BTreeMap<Role, EventIdx>,
}

impl EventSet {
    /// Stores an event under the specified role, replacing any previous holder.
    pub fn insert(&mut self, role: Role, event: EventIdx) {
        self.map.insert(role, event);
    }

    /// Returns the event stored under the specified role.
    ///
    /// # Errors
    /// A missing role is a fatal registration-order error.
    pub fn get(&self, role: Role) -> Result<EventIdx, DetectorError> {
        self.map.get(&role).copied().ok_or(DetectorError::MissingRole { role })
    }

    /// Returns the event stored under the specified role, if present.
    pub fn try_get(&self, role: Role) -> Option<EventIdx> {
        self.map.get(&role).copied()
    }

    /// Drops all stored events.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// A snapshot of a remote event received through the peer exchange: its timestamp on the remote
/// clock and the remote's rank in the exchange communicator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RemoteEvent {
    /// Timestamp of the remote event.
    pub time: Timestamp,
    /// Rank of the remote location.
    pub rank: Rank,
}

/// Remote-event snapshots of the current exchange, stored by role.
#[derive(Clone, Debug, Default)]
pub struct RemoteEventSet {
    map: BTreeMap<Role, RemoteEvent>,
}

impl RemoteEventSet {
    /// Stores a snapshot under the specified role.
    pub fn insert(&mut self, role: Role, event: RemoteEvent) {
        self.map.insert(role, event);
    }

    /// Returns the snapshot stored under the specified role.
    ///
    /// # Errors
    /// A missing role is a fatal registration-order error.
    pub fn get(&self, role: Role) -> Result<RemoteEvent, DetectorError> {
        self.map.get(&role).copied().ok_or(DetectorError::MissingRole { role })
    }

    /// Returns the snapshot stored under the specified role, if present.
    pub fn try_get(&self, role: Role) -> Option<RemoteEvent> {
        self.map.get(&role).copied()
    }

    /// Drops all stored snapshots.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

// COLLECTIVE INFO
// ================================================================================================

/// A `(rank, timestamp)` pair inside a collective snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankTime {
    /// Rank within the collective's communicator.
    pub rank: Rank,
    /// The timestamp.
    pub time: Timestamp,
}

/// The snapshot of a collective operation, made available to every detector at the collective's
/// end event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollectiveInfo {
    /// This location's begin time and rank.
    pub my: RankTime,
    /// The root's begin time and rank, for rooted collectives.
    pub root: Option<RankTime>,
    /// The earliest begin across the communicator.
    pub earliest: RankTime,
    /// The latest begin across the communicator.
    pub latest: RankTime,
    /// The earliest end across the communicator.
    pub earliest_end: RankTime,
    /// This location's end time.
    pub my_end: Timestamp,
}

// COST KIND
// ================================================================================================

/// The closed set of wait-state kinds the delay analysis attributes costs for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CostKind {
    /// Late-sender waits.
    Ls,
    /// Late-receiver waits.
    Lr,
    /// Barrier waits.
    Barrier,
    /// N-to-N collective waits.
    N2n,
    /// One-to-N collective waits.
    C12n,
    /// N-to-one collective waits.
    N21,
    /// OpenMP barrier waits.
    OmpBarrier,
    /// OpenMP idleness (fork/join).
    OmpIdle,
}

impl CostKind {
    /// All kinds, in wire order.
    pub const ALL: [CostKind; 8] = [
        Self::Ls,
        Self::Lr,
        Self::Barrier,
        Self::N2n,
        Self::C12n,
        Self::N21,
        Self::OmpBarrier,
        Self::OmpIdle,
    ];

    /// Returns the buffer section tag carrying remote costs of this kind.
    pub fn buffer_tag(self) -> BufferTag {
        match self {
            Self::Ls => BufferTag::RcostLs,
            Self::Lr => BufferTag::RcostLr,
            Self::Barrier => BufferTag::RcostBarrier,
            Self::N2n => BufferTag::RcostN2n,
            Self::C12n => BufferTag::Rcost12n,
            Self::N21 => BufferTag::RcostN21,
            Self::OmpBarrier => BufferTag::RcostOmpBarrier,
            Self::OmpIdle => BufferTag::RcostOmpIdle,
        }
    }

    /// Returns a stable wire discriminant.
    pub fn as_u8(self) -> u8 {
        self.buffer_tag() as u8
    }

    /// Inverse of [`Self::as_u8`].
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_u8() == byte)
    }
}

/// Accumulated long-term scales per cost kind.
pub type ScaleMap = BTreeMap<CostKind, f64>;

/// Adds `scale` to the `kind` entry of a scale map.
pub fn add_scale(map: &mut ScaleMap, kind: CostKind, scale: f64) {
    if scale > 0.0 {
        *map.entry(kind).or_insert(0.0) += scale;
    }
}

// DELAY COST MAP
// ================================================================================================

/// Per-synchpoint record of the cumulative scales with which downstream wait states have been
/// blamed on the interval ending at that synchpoint.
#[derive(Clone, Debug, Default)]
pub struct DelayCostMap {
    map: BTreeMap<EventIdx, ScaleMap>,
}

impl DelayCostMap {
    /// Adds a scale for the specified kind to the entry of a synchpoint.
    pub fn add(&mut self, sp: EventIdx, kind: CostKind, scale: f64) {
        add_scale(self.map.entry(sp).or_default(), kind, scale);
    }

    /// Returns the inbound scales recorded for a synchpoint.
    pub fn scales(&self, sp: EventIdx) -> ScaleMap {
        self.map.get(&sp).cloned().unwrap_or_default()
    }

    /// Returns the sum of all inbound scales recorded for a synchpoint.
    pub fn total_scale(&self, sp: EventIdx) -> f64 {
        self.map.get(&sp).map(|m| m.values().sum()).unwrap_or(0.0)
    }
}

// CBDATA
// ================================================================================================

/// The shared mutable scratchpad passed to every callback within one sweep.
///
/// The borrowed references (definitions, trace, caches) outlive the sweep; the owned containers
/// are per-event state that the dispatcher resets between events, and per-sweep state
/// (synchpoint handler view, delay cost map, critical-path vectors) that persists across events
/// of the sweep. Each detector re-initializes what it writes.
pub struct CbData<'a> {
    /// The shared global definitions.
    pub defs: &'a GlobalDefs,
    /// This location's event stream.
    pub trace: &'a LocalTrace,
    /// Per-event call path of this location's stream (the call stack's leaf at each event).
    pub cpaths: &'a [CallpathId],
    /// The peer-exchange handle.
    pub exchange: &'a ExchangeHandle,
    /// The time-map cache over this location's stream.
    pub timemaps: &'a TimeMapCache<'a>,
    /// The synchpoint handler; populated during the main forward sweep, read backwards.
    pub synch: &'a mut SynchpointHandler,
    /// The cross-location lock-tracking cache.
    pub locks: &'a LockCache,
    /// The cross-location RMA epoch cache.
    pub rma: &'a RmaEpochCache,

    // per-event primitives produced by upstream detectors for downstream consumers
    /// Idle (wait) time computed by the wait-state detector firing on the current event.
    pub idle: f64,
    /// Which wait-state kind `idle` belongs to.
    pub wait_kind: Option<CostKind>,
    /// Completion idle time computed on the current event.
    pub completion: f64,
    /// Generic count output on the current event.
    pub count: u64,

    /// Local events of the current exchange, by role.
    pub local: EventSet,
    /// Remote snapshots of the current exchange, by role.
    pub remote: RemoteEventSet,
    /// Local events of the current inverse exchange, by role.
    pub inv_local: EventSet,
    /// Remote snapshots of the current inverse exchange, by role.
    pub inv_remote: RemoteEventSet,
    /// Buffer being packed for the outgoing peer exchange.
    pub local_buf: Buffer,
    /// Buffer received from the peer.
    pub remote_buf: Buffer,
    /// Whether the remote send of the current exchange was issued from a blocking send call.
    pub remote_send_blocking: bool,
    /// The collective snapshot of the current collective end, if any.
    pub collinfo: Option<CollectiveInfo>,

    // delay / critical-path pipeline
    /// δ: the delaying interval's runtime-minus-wait profile.
    pub delay_info: TimeMap,
    /// ω: the delaying interval's propagating-wait profile.
    pub wait_info: TimeMap,
    /// Collective-delay profile produced by the shared collective-delay helper.
    pub coll_delay_info: TimeMap,
    /// Inbound long-term scales of the current synchpoint.
    pub input_scales: ScaleMap,
    /// Sum of short- and long-term scales computed at the current synchpoint.
    pub sum_scales: ScaleMap,
    /// Synchpoints between the previous synchpoint and the current event.
    pub prop_sp_map: Vec<EventIdx>,
    /// The most recent synchpoint before the current event.
    pub prev_sp: Option<EventIdx>,
    /// The remote waiting time shipped by the waiting peer.
    pub rwait: f64,
    /// Cost multiplier for OpenMP master delays extending a parallel region.
    pub omp_idle_scale: f64,
    /// The per-synchpoint long-term cost bookkeeping of the backward cost sweep.
    pub delay_costs: DelayCostMap,

    // per-callpath vectors computed once and then read by dependent patterns
    /// The globally reduced critical-path profile, indexed by call-path id.
    pub global_critical_path: Vec<f64>,
    /// This location's critical-path profile, indexed by call-path id.
    pub local_critical_path: Vec<f64>,
    /// This location's total time profile, indexed by call-path id.
    pub local_time_profile: Vec<f64>,

    /// Timestamp of the most recent thread fork seen on this location.
    pub last_fork: Option<Timestamp>,

    // notify stack, drained depth-first by the dispatcher
    pending: Vec<(UserEvent, EventIdx)>,
}

impl<'a> CbData<'a> {
    /// Returns a new scratchpad for one sweep over `trace`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        defs: &'a GlobalDefs,
        trace: &'a LocalTrace,
        cpaths: &'a [CallpathId],
        exchange: &'a ExchangeHandle,
        timemaps: &'a TimeMapCache<'a>,
        synch: &'a mut SynchpointHandler,
        locks: &'a LockCache,
        rma: &'a RmaEpochCache,
    ) -> Self {
        Self {
            defs,
            trace,
            cpaths,
            exchange,
            timemaps,
            synch,
            locks,
            rma,
            idle: 0.0,
            wait_kind: None,
            completion: 0.0,
            count: 0,
            local: EventSet::default(),
            remote: RemoteEventSet::default(),
            inv_local: EventSet::default(),
            inv_remote: RemoteEventSet::default(),
            local_buf: Buffer::new(),
            remote_buf: Buffer::new(),
            remote_send_blocking: false,
            collinfo: None,
            delay_info: TimeMap::new(),
            wait_info: TimeMap::new(),
            coll_delay_info: TimeMap::new(),
            input_scales: ScaleMap::new(),
            sum_scales: ScaleMap::new(),
            prop_sp_map: Vec::new(),
            prev_sp: None,
            rwait: 0.0,
            omp_idle_scale: 1.0,
            delay_costs: DelayCostMap::default(),
            global_critical_path: Vec::new(),
            local_critical_path: Vec::new(),
            local_time_profile: Vec::new(),
            last_fork: None,
            pending: Vec::new(),
        }
    }

    /// This location's id.
    pub fn location(&self) -> LocationId {
        self.trace.location()
    }

    /// Returns the event at the specified index.
    pub fn event(&self, idx: EventIdx) -> EventRef<'a> {
        self.trace.event(idx)
    }

    /// Returns the call path of the specified event.
    pub fn callpath_of(&self, idx: EventIdx) -> CallpathId {
        self.cpaths[idx.as_usize()]
    }

    /// Queues a user event to be dispatched (depth-first) after the current callback returns.
    pub fn notify(&mut self, user_event: UserEvent, at: EventIdx) {
        self.pending.push((user_event, at));
    }

    /// Pops the most recently queued notification.
    pub(crate) fn pop_pending(&mut self) -> Option<(UserEvent, EventIdx)> {
        self.pending.pop()
    }

    /// Clears the per-event scratch state. Called by the dispatcher before each event.
    pub(crate) fn reset_event(&mut self) {
        self.idle = 0.0;
        self.wait_kind = None;
        self.completion = 0.0;
        self.count = 0;
        self.local.clear();
        self.remote.clear();
        self.inv_local.clear();
        self.inv_remote.clear();
        self.local_buf = Buffer::new();
        self.remote_buf = Buffer::new();
        self.remote_send_blocking = false;
        self.collinfo = None;
        self.input_scales.clear();
        self.sum_scales.clear();
        self.prop_sp_map.clear();
        self.prev_sp = None;
        self.rwait = 0.0;
    }

    /// Returns the kind of the event at the specified index.
    pub fn kind_of(&self, idx: EventIdx) -> EventKind {
        self.trace.record(idx).kind
    }

    /// Returns the payload of the event at the specified index.
    pub fn payload_of(&self, idx: EventIdx) -> &'a EventPayload {
        &self.trace.record(idx).payload
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_roles_are_detector_errors() {
        let set = EventSet::default();
        assert!(matches!(
            set.get(Role::EnterRecv),
            Err(DetectorError::MissingRole { role: Role::EnterRecv })
        ));

        let remote = RemoteEventSet::default();
        assert!(matches!(
            remote.get(Role::Send),
            Err(DetectorError::MissingRole { role: Role::Send })
        ));
    }

    #[test]
    fn cost_kind_wire_discriminants_round_trip() {
        for kind in CostKind::ALL {
            assert_eq!(CostKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(CostKind::from_u8(0xff), None);
    }

    #[test]
    fn delay_cost_map_accumulates_per_kind() {
        let mut costs = DelayCostMap::default();
        let sp = EventIdx::new(4);
        costs.add(sp, CostKind::Ls, 0.5);
        costs.add(sp, CostKind::Ls, 0.25);
        costs.add(sp, CostKind::Barrier, 1.0);
        // non-positive scales are dropped by the guard
        costs.add(sp, CostKind::Lr, 0.0);

        assert_eq!(costs.scales(sp).get(&CostKind::Ls), Some(&0.75));
        assert_eq!(costs.scales(sp).get(&CostKind::Lr), None);
        assert_eq!(costs.total_scale(sp), 1.75);
        assert_eq!(costs.total_scale(EventIdx::new(9)), 0.0);
    }

    #[test]
    fn scale_map_guard_drops_non_positive_entries() {
        let mut scales = ScaleMap::new();
        add_scale(&mut scales, CostKind::N2n, 0.0);
        add_scale(&mut scales, CostKind::N2n, -1.0);
        assert!(scales.is_empty());
        add_scale(&mut scales, CostKind::N2n, 2.0);
        assert_eq!(scales[&CostKind::N2n], 2.0);
    }
}
