//! Shared test harness for the Hindsight analyzer.
//!
//! [`WorldBuilder`] assembles a synthetic parallel world (locations, communicators, regions)
//! and one [`TraceBuilder`] per location for writing its event stream fluently. `build()` links
//! the traces; `analyze()` additionally runs the full analysis and returns the report.

use std::collections::HashMap;

use hindsight_core::{
    CallpathId, CommId, CommKind, Communicator, EventKind, EventPayload, EventRecord, GlobalDefs,
    LocalTrace, Location, LocationId, LockId, LockParadigm, MsgTag, Paradigm, Rank, Region,
    RegionId, RequestId, Timestamp, Window, WindowId,
};
use hindsight_engine::{run_analysis, AnalysisError, AnalysisReport, AnalyzerConfig};

// WORLD BUILDER
// ================================================================================================

/// Builds the global definitions and per-location event streams of a synthetic trace.
pub struct WorldBuilder {
    defs: GlobalDefs,
    regions: HashMap<(String, Paradigm), RegionId>,
    events: Vec<Vec<EventRecord>>,
}

impl WorldBuilder {
    /// A world of `n` single-threaded MPI processes; communicator 0 spans all of them.
    pub fn with_ranks(n: u32) -> Self {
        let mut defs = GlobalDefs::default();
        for rank in 0..n {
            defs.locations.push(Location { rank, thread: 0, thread_team: None });
        }
        let members = (0..n).map(LocationId).collect();
        defs.communicators.push(Communicator::new(CommKind::Mpi, members));
        Self {
            defs,
            regions: HashMap::new(),
            events: (0..n).map(|_| Vec::new()).collect(),
        }
    }

    /// A world of one process with `n` threads; communicator 0 is their thread team.
    pub fn with_threads(n: u32) -> Self {
        let mut defs = GlobalDefs::default();
        for thread in 0..n {
            defs.locations.push(Location {
                rank: 0,
                thread,
                thread_team: Some(CommId(0)),
            });
        }
        let members = (0..n).map(LocationId).collect();
        defs.communicators.push(Communicator::new(CommKind::ThreadTeam, members));
        Self {
            defs,
            regions: HashMap::new(),
            events: (0..n).map(|_| Vec::new()).collect(),
        }
    }

    /// The id of the world communicator (or thread team).
    pub fn world(&self) -> CommId {
        CommId(0)
    }

    /// Adds an RMA window over the world communicator.
    pub fn window(&mut self) -> WindowId {
        let id = WindowId(self.defs.windows.len() as u32);
        self.defs.windows.push(Window { comm: CommId(0) });
        id
    }

    /// Interns a region by name and paradigm.
    pub fn region(&mut self, name: &str, paradigm: Paradigm) -> RegionId {
        if let Some(&id) = self.regions.get(&(name.to_string(), paradigm)) {
            return id;
        }
        let id = RegionId(self.defs.regions.len() as u32);
        self.defs.regions.push(Region::new(name, paradigm));
        self.regions.insert((name.to_string(), paradigm), id);
        id
    }

    /// Returns the trace builder of the specified location.
    pub fn on(&mut self, location: u32) -> TraceBuilder<'_> {
        TraceBuilder { world: self, location: location as usize, open: Vec::new() }
    }

    /// Links all traces and returns them with the definitions.
    pub fn build(self) -> Result<(GlobalDefs, Vec<LocalTrace>), AnalysisError> {
        let traces = self
            .events
            .into_iter()
            .enumerate()
            .map(|(i, events)| LocalTrace::link(LocationId(i as u32), events))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((self.defs, traces))
    }

    /// Links all traces and runs the full analysis.
    pub fn analyze(self, config: &AnalyzerConfig) -> Result<AnalysisReport, AnalysisError> {
        let (defs, traces) = self.build()?;
        run_analysis(defs, traces, config)
    }
}

// TRACE BUILDER
// ================================================================================================

/// Fluent event-stream writer for one location.
///
/// `enter`/`leave` maintain the region stack, so `leave` needs no arguments; the peer-exchange
/// and collective helpers default to the world communicator.
pub struct TraceBuilder<'a> {
    world: &'a mut WorldBuilder,
    location: usize,
    open: Vec<RegionId>,
}

impl TraceBuilder<'_> {
    fn push(&mut self, t: f64, kind: EventKind, payload: EventPayload) -> &mut Self {
        self.world.events[self.location].push(EventRecord::new(
            Timestamp::new(t),
            kind,
            payload,
        ));
        self
    }

    /// Enters a region.
    pub fn enter(&mut self, t: f64, name: &str, paradigm: Paradigm) -> &mut Self {
        let region = self.world.region(name, paradigm);
        self.open.push(region);
        self.push(t, EventKind::Enter, EventPayload::Region { region })
    }

    /// Leaves the innermost open region.
    ///
    /// # Panics
    /// Panics if no region is open.
    pub fn leave(&mut self, t: f64) -> &mut Self {
        let region = self.open.pop().expect("leave without open region");
        self.push(t, EventKind::Leave, EventPayload::Region { region })
    }

    /// A blocking send (message leaves immediately).
    pub fn send(&mut self, t: f64, peer: Rank, tag: MsgTag, bytes: u64) -> &mut Self {
        self.push(
            t,
            EventKind::SendStart,
            EventPayload::P2p { peer, comm: CommId(0), tag, bytes, request: None },
        )
    }

    /// A blocking receive (message arrives at completion).
    pub fn recv(&mut self, t: f64, peer: Rank, tag: MsgTag, bytes: u64) -> &mut Self {
        self.push(
            t,
            EventKind::RecvComplete,
            EventPayload::P2p { peer, comm: CommId(0), tag, bytes, request: None },
        )
    }

    /// Posts a non-blocking receive.
    pub fn recv_request(
        &mut self,
        t: f64,
        peer: Rank,
        tag: MsgTag,
        bytes: u64,
        request: u32,
    ) -> &mut Self {
        self.push(
            t,
            EventKind::RecvRequest,
            EventPayload::P2p {
                peer,
                comm: CommId(0),
                tag,
                bytes,
                request: Some(RequestId(request)),
            },
        )
    }

    /// Completes a non-blocking receive.
    pub fn recv_complete(
        &mut self,
        t: f64,
        peer: Rank,
        tag: MsgTag,
        bytes: u64,
        request: u32,
    ) -> &mut Self {
        self.push(
            t,
            EventKind::RecvComplete,
            EventPayload::P2p {
                peer,
                comm: CommId(0),
                tag,
                bytes,
                request: Some(RequestId(request)),
            },
        )
    }

    /// Starts a non-blocking send.
    pub fn send_request(
        &mut self,
        t: f64,
        peer: Rank,
        tag: MsgTag,
        bytes: u64,
        request: u32,
    ) -> &mut Self {
        self.push(
            t,
            EventKind::SendStart,
            EventPayload::P2p {
                peer,
                comm: CommId(0),
                tag,
                bytes,
                request: Some(RequestId(request)),
            },
        )
    }

    /// Completes a non-blocking send.
    pub fn send_complete(
        &mut self,
        t: f64,
        peer: Rank,
        tag: MsgTag,
        bytes: u64,
        request: u32,
    ) -> &mut Self {
        self.push(
            t,
            EventKind::SendComplete,
            EventPayload::P2p {
                peer,
                comm: CommId(0),
                tag,
                bytes,
                request: Some(RequestId(request)),
            },
        )
    }

    /// A collective begin on the world communicator.
    pub fn coll_begin(&mut self, t: f64) -> &mut Self {
        self.push(
            t,
            EventKind::CollectiveBegin,
            EventPayload::Collective { comm: CommId(0), root: None, bytes_out: 0, bytes_in: 0 },
        )
    }

    /// A collective end on the world communicator.
    pub fn coll_end(
        &mut self,
        t: f64,
        root: Option<Rank>,
        bytes_out: u64,
        bytes_in: u64,
    ) -> &mut Self {
        self.push(
            t,
            EventKind::CollectiveEnd,
            EventPayload::Collective { comm: CommId(0), root, bytes_out, bytes_in },
        )
    }

    /// Forks the thread team (master only).
    pub fn thread_fork(&mut self, t: f64) -> &mut Self {
        self.push(t, EventKind::ThreadFork, EventPayload::ThreadTeam { team: CommId(0) })
    }

    /// Joins the thread team (master only).
    pub fn thread_join(&mut self, t: f64) -> &mut Self {
        self.push(t, EventKind::ThreadJoin, EventPayload::ThreadTeam { team: CommId(0) })
    }

    /// Acquires a thread lock.
    pub fn acquire_lock(&mut self, t: f64, lock: u32, paradigm: LockParadigm) -> &mut Self {
        self.push(
            t,
            EventKind::ThreadAcquireLock,
            EventPayload::ThreadLock { lock: LockId(lock), paradigm },
        )
    }

    /// Releases a thread lock.
    pub fn release_lock(&mut self, t: f64, lock: u32, paradigm: LockParadigm) -> &mut Self {
        self.push(
            t,
            EventKind::ThreadReleaseLock,
            EventPayload::ThreadLock { lock: LockId(lock), paradigm },
        )
    }

    /// Marks the completion of an explicit task.
    pub fn task_complete(&mut self, t: f64) -> &mut Self {
        self.push(t, EventKind::TaskComplete, EventPayload::None)
    }

    /// Opens an RMA exposure epoch.
    pub fn rma_post(&mut self, t: f64, window: WindowId) -> &mut Self {
        self.push(t, EventKind::RmaPost, EventPayload::RmaEpoch { window })
    }

    /// Closes an RMA exposure epoch.
    pub fn rma_wait(&mut self, t: f64, window: WindowId) -> &mut Self {
        self.push(t, EventKind::RmaWait, EventPayload::RmaEpoch { window })
    }

    /// Opens an RMA access epoch.
    pub fn rma_start(&mut self, t: f64, window: WindowId) -> &mut Self {
        self.push(t, EventKind::RmaStart, EventPayload::RmaEpoch { window })
    }

    /// Closes an RMA access epoch.
    pub fn rma_complete(&mut self, t: f64, window: WindowId) -> &mut Self {
        self.push(t, EventKind::RmaComplete, EventPayload::RmaEpoch { window })
    }

    /// Issues an RMA put.
    pub fn rma_put(&mut self, t: f64, window: WindowId, target: Rank, bytes: u64) -> &mut Self {
        self.push(t, EventKind::RmaPut, EventPayload::RmaComm { window, target, bytes })
    }

    /// Acquires an RMA window lock.
    pub fn rma_lock(&mut self, t: f64, window: WindowId, target: Rank, exclusive: bool) -> &mut Self {
        self.push(t, EventKind::RmaLock, EventPayload::RmaLock { window, target, exclusive })
    }

    /// Releases an RMA window lock.
    pub fn rma_unlock(&mut self, t: f64, window: WindowId, target: Rank) -> &mut Self {
        self.push(
            t,
            EventKind::RmaUnlock,
            EventPayload::RmaLock { window, target, exclusive: false },
        )
    }
}

// HELPERS
// ================================================================================================

/// Installs a compact `tracing` subscriber honoring `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}

/// Looks up the call path of a region chain rooted at the synthetic program root.
///
/// Returns `None` if the chain was never walked by any location.
pub fn callpath(defs: &GlobalDefs, chain: &[&str]) -> Option<CallpathId> {
    let mut current = CallpathId::ROOT;
    for name in chain {
        let mut found = None;
        for &child in defs.callpaths.node(current).children() {
            let region = defs.callpaths.node(child).region()?;
            if defs.region(region).name() == *name {
                found = Some(child);
                break;
            }
        }
        current = found?;
    }
    Some(current)
}

/// Asserts two floats are equal within `1e-9` absolute tolerance.
#[macro_export]
macro_rules! assert_close {
    ($left:expr, $right:expr $(,)?) => {{
        let (l, r): (f64, f64) = ($left, $right);
        assert!(
            (l - r).abs() < 1e-9,
            "assertion failed: `{}` ≈ `{}` (left: {l}, right: {r})",
            stringify!($left),
            stringify!($right),
        );
    }};
    ($left:expr, $right:expr, $tol:expr $(,)?) => {{
        let (l, r): (f64, f64) = ($left, $right);
        assert!(
            (l - r).abs() < $tol,
            "assertion failed: `{}` ≈ `{}` within {} (left: {l}, right: {r})",
            stringify!($left),
            stringify!($right),
            $tol,
        );
    }};
}
