//! The Hindsight pattern-detection engine.
//!
//! The engine replays per-location event streams recorded from a parallel program and turns
//! them into a call-path × metric severity cube of *wait-state patterns*: intervals in which a
//! location was blocked waiting for a peer to reach a matching communication or
//! synchronization event.
//!
//! The moving parts, in the order data flows through them:
//!
//! - [`replay::ReplayEngine`] drives named sweeps (forward analysis, backward synchronization,
//!   backward cost, forward counting) over one location's stream, dispatching closed-enum user
//!   events to registered [`Pattern`]s and performing the peer and collective exchanges that
//!   couple locations;
//! - [`CbData`] is the shared scratchpad each callback mutates in place;
//! - [`Exchange`] is the in-process transport standing in for the message-passing runtime:
//!   rendezvous queues for point-to-point buffers, rendezvous cells for collectives;
//! - [`CriticalPath`] and [`DelayAnalysis`] implement the backward critical-path tracer and
//!   the short-/long-term delay-cost attribution;
//! - [`StatisticsPattern`] collects per-kind quantile sketches and most-severe instances;
//! - [`run_analysis`] spawns one worker per location, runs all phases in lockstep and collates
//!   the [`AnalysisReport`].

mod am;
mod analyzer;
mod caches;
mod cbdata;
mod criticalpath;
mod delay;
mod errors;
mod exchange;
mod patterns;
mod report;
mod statistics;
mod synchpoints;

pub mod replay;

// RE-EXPORTS
// ================================================================================================

pub use am::{AmAttachment, AmRuntime, NoopAmRuntime};
pub use analyzer::{run_analysis, AnalyzerConfig};
pub use caches::{LockCache, LockEpoch, RmaEpochCache, RmaLockEpoch, TimeMapCache};
pub use cbdata::{
    add_scale, CbData, CollectiveInfo, CostKind, DelayCostMap, EventSet, RankTime, RemoteEvent,
    RemoteEventSet, Role, ScaleMap,
};
pub use criticalpath::{CriticalPath, CriticalPathImpact};
pub use delay::DelayAnalysis;
pub use errors::{AnalysisError, DetectorError};
pub use exchange::{peer_location, Channel, Exchange, ExchangeHandle};
pub use patterns::{
    ids, AsyncDriver, ClockViolationCounts, CollectivePatterns, CountPatterns, LateReceiver,
    LateSender, LateSenderWrongOrder, Mode, OmpPatterns, Pattern, PatternMeta,
    PthreadLockPatterns, RmaPatterns, SeverityMap, SynchpointRecorder, TimePattern,
    VisitsPattern,
};
pub use report::{AnalysisReport, PatternReport};
pub use statistics::{Instance, QuantileSketch, StatKind, StatRecord, StatisticsPattern,
    TopInstances};
pub use synchpoints::{Synchpoint, SynchpointHandler};
