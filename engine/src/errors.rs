//! # Error architecture
//!
//! Two tiers, mirroring the boundary between detectors and the sweep driver:
//!
//! - [`DetectorError`]: context-free errors produced inside pattern callbacks and the exchange
//!   layer. They carry the data of the failure (role, buffer section, lock state) but not where
//!   in the replay it happened.
//! - [`AnalysisError`]: user-facing errors produced at the sweep boundary. Wraps a
//!   `DetectorError` with the phase, location and event at which the sweep died, or represents
//!   analysis-level failures (malformed trace, poisoned transport).
//!
//! Recoverable conditions (clock violations, unknown paradigms, underflowing delay
//! denominators) never surface as errors: detectors handle them locally, per the failure
//! semantics in the component design.

use hindsight_core::{BufferError, EventIdx, LocationId, TraceError};

use crate::replay::{ReplayPhase, UserEvent};
use crate::Role;

// DETECTOR ERROR
// ================================================================================================

/// Context-free errors from pattern callbacks and the exchange layer.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// A requested role was absent from the local or remote event set. Indicates a programming
    /// error in pattern registration order.
    #[error("no event stored under role {role:?} (upstream detector missing or misordered)")]
    MissingRole {
        /// The role the detector asked for.
        role: Role,
    },
    /// A typed buffer access failed (wrong primitive kind, exhausted buffer, bad section).
    #[error("peer buffer mismatch")]
    Buffer(#[from] BufferError),
    /// The transport was poisoned because another location's sweep died.
    #[error("peer exchange aborted: {reason}")]
    ExchangePoisoned {
        /// Why the transport was poisoned.
        reason: String,
    },
    /// A collective exchange saw inconsistent membership.
    #[error("collective exchange on a communicator this location is not a member of")]
    NotACommMember,
    /// Writing the statistics side file failed.
    #[error("failed to write the statistics side file")]
    StatFile(#[source] std::io::Error),
}

// ANALYSIS ERROR
// ================================================================================================

/// User-facing errors with replay context, surfaced to the driver.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A detector failed during a sweep.
    #[error(
        "detector failed during {phase:?} sweep on location {location} \
         (user event {user_event:?} at event {event})"
    )]
    Detector {
        /// The sweep that was in flight.
        phase: ReplayPhase,
        /// The location whose sweep died.
        location: LocationId,
        /// The user event being dispatched.
        user_event: UserEvent,
        /// The event at which the sweep died.
        event: EventIdx,
        /// The underlying failure.
        #[source]
        source: DetectorError,
    },
    /// The input trace was malformed.
    #[error("malformed trace")]
    Trace(#[from] TraceError),
    /// The trace set does not cover the locations the definitions declare.
    #[error("expected one trace per location ({expected} locations, {found} traces)")]
    IncompleteTraceSet {
        /// Locations in the definitions.
        expected: usize,
        /// Traces supplied.
        found: usize,
    },
    /// The trace set is not ordered by location id.
    #[error("trace at position {position} belongs to location {location}, expected {position}")]
    MisplacedTrace {
        /// Index within the supplied trace set.
        position: usize,
        /// The location the trace actually belongs to.
        location: LocationId,
    },
    /// A pattern was registered to notify a user event it also subscribes to on the same sweep.
    #[error(
        "pattern '{pattern}' both notifies and subscribes to {user_event:?} on the {phase:?} \
         sweep (callback cycle)"
    )]
    CallbackCycle {
        /// The offending pattern's unique name.
        pattern: &'static str,
        /// The sweep on which the cycle would occur.
        phase: ReplayPhase,
        /// The user event closing the cycle.
        user_event: UserEvent,
    },
    /// A worker thread panicked; the analysis cannot produce a report.
    #[error("analysis worker for location {location} panicked")]
    WorkerPanicked {
        /// The location whose worker died.
        location: LocationId,
    },
    /// Writing the statistics side file failed.
    #[error("failed to write statistics file")]
    StatFile(#[from] std::io::Error),
}
