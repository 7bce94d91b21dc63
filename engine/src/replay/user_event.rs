// USER EVENT
// ================================================================================================

/// The closed enumeration of user-event tags dispatched during replay.
///
/// Three groups share this tag space:
///
/// - *built-in* tags computed by the dispatcher from the event record and region classification
///   (`Enter` through `RmaCollEnd`), including the synthetic `SweepBegin`/`SweepEnd` pair;
/// - *exchange hooks* fired by the dispatcher around peer exchanges (`PreSend` through
///   `PostInvRecv`);
/// - *notifications* raised by detectors for downstream consumers (`LateSender` onward).
///
/// Dispatch is a two-dimensional table lookup over `(ReplayPhase, UserEvent)`; there are no
/// runtime string lookups.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum UserEvent {
    // built-in tags ------------------------------------------------------------------------
    /// A region was entered.
    Enter,
    /// A region was left.
    Leave,
    /// A group region (multi-wait or parallel construct) was entered.
    GroupEnter,
    /// A group region was left.
    GroupLeave,
    /// A message left this location.
    SendStart,
    /// A non-blocking send completed.
    SendComplete,
    /// A non-blocking receive was posted.
    RecvRequest,
    /// A message arrived.
    RecvComplete,
    /// A collective began.
    CollBegin,
    /// A collective ended (generic; fired before the classified tag).
    CollEnd,
    /// RMA put issued.
    RmaPut,
    /// RMA get issued.
    RmaGet,
    /// RMA window lock acquired.
    RmaLock,
    /// RMA window lock released.
    RmaUnlock,
    /// RMA exposure epoch opened.
    RmaPost,
    /// RMA exposure epoch closed.
    RmaWait,
    /// RMA access epoch opened.
    RmaStart,
    /// RMA access epoch closed.
    RmaComplete,
    /// Thread team forked.
    ThreadFork,
    /// Thread team joined.
    ThreadJoin,
    /// Thread lock acquired.
    ThreadAcquireLock,
    /// Thread lock released.
    ThreadReleaseLock,
    /// Explicit task finished.
    TaskComplete,
    /// Fired once before the first event of every sweep.
    SweepBegin,
    /// Fired once after the last event of every sweep.
    SweepEnd,

    // classified collective ends -----------------------------------------------------------
    /// Collective end of a barrier.
    SyncColl,
    /// Collective end of a one-to-N collective.
    Coll12n,
    /// Collective end of an N-to-one collective.
    CollN21,
    /// Collective end of an N-to-N collective.
    CollN2n,
    /// Collective end of a prefix reduction.
    CollScan,
    /// Collective end of MPI initialization.
    InitEnd,
    /// Collective end of MPI finalization.
    FinalizeEnd,
    /// Collective end of an RMA window collective (create/free/fence).
    RmaCollEnd,

    // exchange hooks -----------------------------------------------------------------------
    /// About to ship the forward peer buffer; packers append sections.
    PreSend,
    /// The forward peer buffer was shipped.
    PostSend,
    /// About to receive the forward peer buffer.
    PreRecv,
    /// The forward peer buffer arrived; readers consume sections.
    PostRecv,
    /// About to ship the inverse (backward-replay) peer buffer.
    PreInvSend,
    /// The inverse peer buffer arrived.
    PostInvRecv,

    // wait-state notifications ---------------------------------------------------------------
    /// A late-sender wait state was detected.
    LateSender,
    /// A late-sender wait state caused by out-of-order message arrival.
    LateSenderWo,
    /// A late-receiver wait state was detected.
    LateReceiver,
    /// A wait-at-barrier wait state.
    WaitBarrier,
    /// A wait-at-N-to-N wait state.
    WaitNxn,
    /// An early-reduce wait state.
    EarlyReduce,
    /// An early-scan wait state.
    EarlyScan,
    /// A late-broadcast wait state.
    LateBcast,
    /// Barrier-completion idle time.
    BarrierCompl,
    /// N-to-N-completion idle time.
    NxnCompl,
    /// Init-completion idle time.
    InitCompl,
    /// Wait time in MPI finalization.
    FinalizeWait,
    /// Fork-side idleness of an OpenMP parallel region.
    OmpMgmtFork,
    /// Join-side idleness of an OpenMP parallel region.
    OmpMgmtJoin,
    /// Wait in an explicit OpenMP barrier.
    OmpEbarrierWait,
    /// Wait in an implicit OpenMP barrier.
    OmpIbarrierWait,
    /// Lock contention between threads.
    ThreadLockContention,
    /// Idle time in a collective RMA window creation.
    RmaWaitAtCreate,
    /// Idle time in a collective RMA window destruction.
    RmaWaitAtFree,
    /// Idle time in an RMA fence.
    RmaWaitAtFence,
    /// Target waited in Win_wait before origins completed.
    RmaEarlyWait,
    /// Origin waited in Win_complete for a late post.
    RmaLatePost,
    /// Portion of an early wait caused by a late Win_complete.
    RmaLateComplete,
    /// Lock contention between RMA lock epochs.
    RmaLockContention,
    /// A point-to-point clock-condition violation.
    CcvP2p,
    /// A collective clock-condition violation.
    CcvColl,
}

impl UserEvent {
    /// The number of user events; dimensions the dispatch table.
    pub const COUNT: usize = 65;

    /// Returns the table index of this user event.
    #[inline(always)]
    pub fn as_usize(self) -> usize {
        self as usize
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_matches_last_discriminant() {
        assert_eq!(UserEvent::CcvColl.as_usize() + 1, UserEvent::COUNT);
    }
}
