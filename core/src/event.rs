use core::fmt::{self, Display};

use crate::{CommId, RegionId, Timestamp};

// IDENTIFIERS
// ================================================================================================

/// Rank of a location within a communicator or thread team.
pub type Rank = u32;

/// Message tag of a point-to-point operation.
pub type MsgTag = i32;

/// Identifier of a non-blocking request, pairing a start event with its completion.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestId(pub u32);

/// Identifier of an RMA window.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindowId(pub u32);

/// Identifier of a lock object (OpenMP lock, Pthread mutex/condvar, or RMA window lock).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LockId(pub u32);

/// Position of an event within a location's stream.
///
/// Raw indices are only meaningful together with the owning [`LocalTrace`](crate::LocalTrace);
/// navigation (`prev`, `enterptr`, `completion`, ...) goes through the trace's link tables.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventIdx(u32);

impl EventIdx {
    /// Returns a new event index.
    pub const fn new(idx: u32) -> Self {
        Self(idx)
    }

    /// Returns the raw index as `usize`.
    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw index.
    #[inline(always)]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for EventIdx {
    fn from(idx: u32) -> Self {
        Self(idx)
    }
}

impl From<usize> for EventIdx {
    fn from(idx: usize) -> Self {
        Self(idx as u32)
    }
}

impl Display for EventIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

// EVENT KIND
// ================================================================================================

/// The closed enumeration of event kinds a location's stream may contain.
///
/// Group-enter/group-leave and init/finalize boundaries are not stored kinds: the replay
/// dispatcher derives them from `Enter`/`Leave` and `CollectiveEnd` plus region classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    /// A call path was entered.
    Enter,
    /// A call path was left.
    Leave,
    /// A message left this location (blocking send, or the posting half of a non-blocking send).
    SendStart,
    /// A non-blocking send was completed by a wait/test operation.
    SendComplete,
    /// A non-blocking receive was posted.
    RecvRequest,
    /// A message arrived at this location (blocking receive, or the completing half of a
    /// non-blocking receive).
    RecvComplete,
    /// A collective operation began on this location.
    CollectiveBegin,
    /// A collective operation ended on this location.
    CollectiveEnd,
    /// An RMA put was issued.
    RmaPut,
    /// An RMA get was issued.
    RmaGet,
    /// An RMA window lock was acquired.
    RmaLock,
    /// An RMA window lock was released.
    RmaUnlock,
    /// An RMA exposure epoch was opened (target side).
    RmaPost,
    /// An RMA exposure epoch was closed (target side).
    RmaWait,
    /// An RMA access epoch was opened (origin side).
    RmaStart,
    /// An RMA access epoch was closed (origin side).
    RmaComplete,
    /// A thread team was forked.
    ThreadFork,
    /// A thread team was joined.
    ThreadJoin,
    /// A thread lock was acquired.
    ThreadAcquireLock,
    /// A thread lock was released.
    ThreadReleaseLock,
    /// An explicit task finished executing.
    TaskComplete,
}

impl EventKind {
    /// Returns true for kinds that ship or receive a peer buffer during forward replay.
    pub fn is_p2p(self) -> bool {
        matches!(
            self,
            Self::SendStart | Self::SendComplete | Self::RecvRequest | Self::RecvComplete
        )
    }
}

// EVENT PAYLOAD
// ================================================================================================

/// Which flavor of lock a `ThreadAcquireLock`/`ThreadReleaseLock` event refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LockParadigm {
    /// An OpenMP critical section.
    OmpCritical,
    /// An OpenMP lock-API lock (`omp_set_lock` and friends).
    OmpLockApi,
    /// A Pthread mutex.
    PthreadMutex,
    /// A Pthread condition variable.
    PthreadCondvar,
    /// A paradigm the engine does not know; lock detectors ignore these events.
    Unknown,
}

/// Type-dependent payload of an event record.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventPayload {
    /// No payload.
    None,
    /// Region entered or left.
    Region {
        /// The region being entered or left.
        region: RegionId,
    },
    /// Point-to-point message attributes.
    P2p {
        /// Rank of the communication partner within `comm`.
        peer: Rank,
        /// Communicator the message travels on.
        comm: CommId,
        /// Message tag.
        tag: MsgTag,
        /// Message size in bytes.
        bytes: u64,
        /// Pairing id for non-blocking operations; `None` for blocking ones.
        request: Option<RequestId>,
    },
    /// Collective operation attributes.
    Collective {
        /// Communicator the collective runs on.
        comm: CommId,
        /// Root rank for rooted collectives.
        root: Option<Rank>,
        /// Bytes sent by this location.
        bytes_out: u64,
        /// Bytes received by this location.
        bytes_in: u64,
    },
    /// RMA communication (put/get) attributes.
    RmaComm {
        /// Window the operation targets.
        window: WindowId,
        /// Target rank within the window's communicator.
        target: Rank,
        /// Transfer size in bytes.
        bytes: u64,
    },
    /// RMA epoch boundary (post/wait/start/complete) attributes.
    RmaEpoch {
        /// Window whose epoch is opened or closed.
        window: WindowId,
    },
    /// RMA lock/unlock attributes.
    RmaLock {
        /// Window whose lock is acquired or released.
        window: WindowId,
        /// Rank holding the lock's home window copy.
        target: Rank,
        /// True for an exclusive lock, false for a shared one.
        exclusive: bool,
    },
    /// Thread fork/join attributes.
    ThreadTeam {
        /// Thread-team communicator created by the fork.
        team: CommId,
    },
    /// Thread lock attributes.
    ThreadLock {
        /// The lock object.
        lock: LockId,
        /// Which locking paradigm the lock belongs to.
        paradigm: LockParadigm,
    },
}

// EVENT RECORD
// ================================================================================================

/// An immutable record in a per-location ordered event sequence.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventRecord {
    /// Time at which the event occurred, on the location's clock.
    pub time: Timestamp,
    /// What happened.
    pub kind: EventKind,
    /// Type-dependent attributes.
    pub payload: EventPayload,
}

impl EventRecord {
    /// Returns a new event record.
    pub fn new(time: Timestamp, kind: EventKind, payload: EventPayload) -> Self {
        Self { time, kind, payload }
    }

    /// Returns the region of an `Enter`/`Leave` record, if any.
    pub fn region(&self) -> Option<RegionId> {
        match self.payload {
            EventPayload::Region { region } => Some(region),
            _ => None,
        }
    }

    /// Returns the point-to-point attributes of the record, if any.
    pub fn p2p(&self) -> Option<(Rank, CommId, MsgTag, u64)> {
        match self.payload {
            EventPayload::P2p { peer, comm, tag, bytes, .. } => Some((peer, comm, tag, bytes)),
            _ => None,
        }
    }

    /// Returns the request id of a non-blocking point-to-point record, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self.payload {
            EventPayload::P2p { request, .. } => request,
            _ => None,
        }
    }

    /// Returns the communicator of a collective record, if any.
    pub fn collective_comm(&self) -> Option<CommId> {
        match self.payload {
            EventPayload::Collective { comm, .. } => Some(comm),
            _ => None,
        }
    }
}
