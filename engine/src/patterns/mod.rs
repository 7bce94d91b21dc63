use std::collections::BTreeMap;

use hindsight_core::{CallpathId, EventIdx};

use crate::{
    cbdata::CbData,
    errors::DetectorError,
    replay::{ReplayPhase, UserEvent},
    statistics::StatRecord,
};

mod base;
mod collective;
mod counts;
mod omp;
mod p2p;
mod pthread;
mod rma;

pub use base::{AsyncDriver, ClockViolationCounts, SynchpointRecorder, TimePattern, VisitsPattern};
pub use collective::CollectivePatterns;
pub use counts::CountPatterns;
pub use omp::OmpPatterns;
pub use p2p::{LateReceiver, LateSender, LateSenderWrongOrder};
pub use pthread::PthreadLockPatterns;
pub use rma::RmaPatterns;

// PATTERN IDS
// ================================================================================================

/// Stable numeric identifiers of the pattern taxonomy, used as parent links and report keys.
pub mod ids {
    /// Total time per call path.
    pub const TIME: u32 = 2;
    /// Visit counts per call path.
    pub const VISITS: u32 = 4;

    /// Synchronization-operation counts.
    pub const SYNCS: u32 = 10;
    /// Send-side synchronization counts.
    pub const SYNCS_SEND: u32 = 11;
    /// Receive-side synchronization counts.
    pub const SYNCS_RECV: u32 = 12;
    /// Collective synchronization counts.
    pub const SYNCS_COLL: u32 = 13;
    /// Communication-operation counts.
    pub const COMMS: u32 = 20;
    /// Send-side communication counts.
    pub const COMMS_SEND: u32 = 21;
    /// Receive-side communication counts.
    pub const COMMS_RECV: u32 = 22;
    /// Collective communication counts.
    pub const COMMS_COLL: u32 = 23;
    /// Bytes transferred.
    pub const BYTES: u32 = 30;
    /// Bytes sent.
    pub const BYTES_SENT: u32 = 31;
    /// Bytes received.
    pub const BYTES_RCVD: u32 = 32;
    /// Clock-condition violations observed during replay.
    pub const CLOCK_VIOLATIONS: u32 = 40;

    /// Late-sender waiting time.
    pub const MPI_LATESENDER: u32 = 100;
    /// Late-sender waiting time caused by wrong message order.
    pub const MPI_LATESENDER_WO: u32 = 101;
    /// Wrong-order waits, messages from a different source.
    pub const MPI_LSWO_DIFFERENT: u32 = 102;
    /// Wrong-order waits, messages from the same source.
    pub const MPI_LSWO_SAME: u32 = 103;
    /// Late-receiver waiting time.
    pub const MPI_LATERECEIVER: u32 = 104;

    /// Wait-at-barrier time.
    pub const MPI_WAIT_BARRIER: u32 = 110;
    /// Barrier-completion time.
    pub const MPI_BARRIER_COMPLETION: u32 = 111;
    /// Early-reduce waiting time.
    pub const MPI_EARLYREDUCE: u32 = 112;
    /// Early-scan waiting time.
    pub const MPI_EARLYSCAN: u32 = 113;
    /// Late-broadcast waiting time.
    pub const MPI_LATEBCAST: u32 = 114;
    /// Wait-at-N-to-N time.
    pub const MPI_WAIT_NXN: u32 = 115;
    /// N-to-N-completion time.
    pub const MPI_NXN_COMPLETION: u32 = 116;
    /// Wait time in MPI initialization.
    pub const MPI_INIT_EXIT: u32 = 117;
    /// Wait time in MPI finalization.
    pub const MPI_FINALIZE_WAIT: u32 = 118;

    /// Wait-at-window-create time.
    pub const MPI_RMA_WAIT_AT_CREATE: u32 = 130;
    /// Wait-at-window-free time.
    pub const MPI_RMA_WAIT_AT_FREE: u32 = 131;
    /// Wait-at-fence time.
    pub const MPI_RMA_WAIT_AT_FENCE: u32 = 132;
    /// Late-post waiting time.
    pub const MPI_RMA_LATE_POST: u32 = 133;
    /// Early-wait waiting time.
    pub const MPI_RMA_EARLY_WAIT: u32 = 134;
    /// Late-complete waiting time.
    pub const MPI_RMA_LATE_COMPLETE: u32 = 135;
    /// RMA lock contention time.
    pub const MPI_RMA_LOCK_CONTENTION: u32 = 136;

    /// OpenMP thread-management time.
    pub const OMP_MANAGEMENT: u32 = 150;
    /// OpenMP fork idleness.
    pub const OMP_FORK: u32 = 151;
    /// OpenMP join idleness.
    pub const OMP_JOIN: u32 = 152;
    /// Explicit OpenMP barrier waiting time.
    pub const OMP_EBARRIER_WAIT: u32 = 153;
    /// Implicit OpenMP barrier waiting time.
    pub const OMP_IBARRIER_WAIT: u32 = 154;
    /// OpenMP critical-section contention.
    pub const OMP_CRITICAL_CONTENTION: u32 = 155;
    /// OpenMP lock-API contention.
    pub const OMP_LOCK_API_CONTENTION: u32 = 156;

    /// Pthread mutex contention.
    pub const PTHREAD_MUTEX_CONTENTION: u32 = 161;
    /// Pthread condition-variable contention.
    pub const PTHREAD_CONDITION_CONTENTION: u32 = 162;

    /// Time on the global critical path.
    pub const CRITICAL_PATH: u32 = 200;
    /// Critical-path activity impact.
    pub const CRITICAL_PATH_ACTIVITIES: u32 = 201;
    /// Critical-path imbalance impact.
    pub const CRITICAL_IMBALANCE: u32 = 202;
    /// Inter-partition imbalance.
    pub const INTER_PARTITION_IMBALANCE: u32 = 203;
    /// Activity time off the critical path.
    pub const NON_CRITICAL_PATH_ACTIVITIES: u32 = 204;

    /// Short-term late-sender delay costs.
    pub const DELAY_LATESENDER: u32 = 301;
    /// Long-term late-sender delay costs.
    pub const DELAY_LATESENDER_LONGTERM: u32 = 302;
    /// Short-term late-receiver delay costs.
    pub const DELAY_LATERECEIVER: u32 = 303;
    /// Long-term late-receiver delay costs.
    pub const DELAY_LATERECEIVER_LONGTERM: u32 = 304;
    /// Short-term barrier delay costs.
    pub const DELAY_BARRIER: u32 = 305;
    /// Long-term barrier delay costs.
    pub const DELAY_BARRIER_LONGTERM: u32 = 306;
    /// Short-term N-to-N delay costs.
    pub const DELAY_N2N: u32 = 307;
    /// Long-term N-to-N delay costs.
    pub const DELAY_N2N_LONGTERM: u32 = 308;
    /// Short-term one-to-N delay costs.
    pub const DELAY_12N: u32 = 309;
    /// Long-term one-to-N delay costs.
    pub const DELAY_12N_LONGTERM: u32 = 310;
    /// Short-term N-to-one delay costs.
    pub const DELAY_N21: u32 = 311;
    /// Long-term N-to-one delay costs.
    pub const DELAY_N21_LONGTERM: u32 = 312;
    /// Short-term OpenMP barrier delay costs.
    pub const DELAY_OMPBARRIER: u32 = 313;
    /// Long-term OpenMP barrier delay costs.
    pub const DELAY_OMPBARRIER_LONGTERM: u32 = 314;
    /// Short-term OpenMP idleness delay costs.
    pub const DELAY_OMPIDLE: u32 = 315;
    /// Long-term OpenMP idleness delay costs.
    pub const DELAY_OMPIDLE_LONGTERM: u32 = 316;

    /// Waiting time that itself delays later synchpoints.
    pub const WAIT_PROPAGATING: u32 = 350;
    /// Waiting time caused indirectly through a chain of synchpoints.
    pub const WAIT_INDIRECT: u32 = 351;

    /// The hidden statistics collector.
    pub const STATISTICS: u32 = 900;
}

// PATTERN META
// ================================================================================================

/// Whether a pattern's stored severities already include their children's.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Stored values include time spent in child call paths.
    Inclusive,
    /// Stored values cover this call path only.
    Exclusive,
}

/// Static identity of a pattern, exposed to the report writer.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PatternMeta {
    /// Stable numeric id.
    pub id: u32,
    /// Id of the parent pattern in the output taxonomy, if any.
    pub parent: Option<u32>,
    /// Display name.
    pub name: &'static str,
    /// Stable unique name.
    pub unique_name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Unit of the severities ("sec", "occ" or "bytes").
    pub unit: &'static str,
    /// Aggregation mode of the stored severities.
    pub mode: Mode,
    /// Hidden patterns are internal plumbing and excluded from user-facing output.
    pub hidden: bool,
}

// SEVERITY MAP
// ================================================================================================

/// Accumulative `call path → severity` mapping with lazily created keys.
///
/// Increments pass through a positivity guard, so severities can never go negative no matter
/// what a detector's subtraction produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeverityMap {
    entries: BTreeMap<CallpathId, f64>,
}

impl SeverityMap {
    /// Returns a new, empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a severity increment; non-positive increments are dropped.
    pub fn add(&mut self, cp: CallpathId, value: f64) {
        if value > 0.0 {
            *self.entries.entry(cp).or_insert(0.0) += value;
        }
    }

    /// Returns the severity of the specified call path (zero if absent).
    pub fn get(&self, cp: CallpathId) -> f64 {
        self.entries.get(&cp).copied().unwrap_or(0.0)
    }

    /// Returns the sum over all call paths.
    pub fn total(&self) -> f64 {
        self.entries.values().sum()
    }

    /// Returns true if no severity was ever recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over `(call path, severity)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CallpathId, f64)> + '_ {
        self.entries.iter().map(|(&cp, &v)| (cp, v))
    }

    /// Consumes the map, returning its entries.
    pub fn into_inner(self) -> BTreeMap<CallpathId, f64> {
        self.entries
    }
}

// PATTERN
// ================================================================================================

/// A self-contained wait-state detector.
///
/// A pattern advertises its static identity, its `(sweep, user event)` subscriptions and the
/// user events it notifies; the engine drives it through [`Pattern::handle`] and collects its
/// severities after the last sweep. Patterns hold private state via composition; cross-pattern
/// communication goes exclusively through the [`CbData`] scratchpad and notified user events.
pub trait Pattern {
    /// Returns the pattern's static identity.
    fn meta(&self) -> PatternMeta;

    /// Returns the `(sweep, user event)` pairs this pattern subscribes to.
    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)>;

    /// Returns the user events this pattern may notify on the specified sweep.
    ///
    /// Used by the engine's registration-time acyclicity check.
    fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
        let _ = phase;
        &[]
    }

    /// Handles one dispatched user event.
    fn handle(
        &mut self,
        phase: ReplayPhase,
        user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError>;

    /// Invoked once after the last sweep, in registration order on every location.
    ///
    /// Patterns performing global reductions do them here; the call order is identical across
    /// locations, so matching collective calls line up.
    fn finish(&mut self, data: &mut CbData<'_>) -> Result<(), DetectorError> {
        let _ = data;
        Ok(())
    }

    /// Returns the severities accumulated under the pattern's primary metric.
    fn severities(&self) -> &SeverityMap;

    /// Returns `(identity, severities)` for every metric this pattern reports.
    ///
    /// Most patterns report exactly their primary metric; composite detectors (wrong-order
    /// sub-patterns, count families) override this.
    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        vec![(self.meta(), self.severities().clone())]
    }

    /// Returns the per-kind statistics records, if this pattern collects any.
    fn stat_records(&self) -> Option<Vec<StatRecord>> {
        None
    }
}
