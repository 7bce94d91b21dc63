use crate::{EventIdx, LocationId};

// TRACE ERROR
// ================================================================================================

/// Errors raised while linking a location's event stream.
///
/// These indicate a malformed trace and are terminal: the engine refuses to analyze a stream it
/// cannot navigate.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// An event's timestamp precedes its predecessor's.
    #[error("event {event} on location {location} has a timestamp earlier than its predecessor")]
    NonMonotoneTimestamp {
        /// The location whose stream is malformed.
        location: LocationId,
        /// The offending event.
        event: EventIdx,
    },
    /// A leave event had no open region instance to close.
    #[error("leave event {event} on location {location} has no matching enter")]
    UnmatchedLeave {
        /// The location whose stream is malformed.
        location: LocationId,
        /// The offending event.
        event: EventIdx,
    },
    /// An enter event was never closed.
    #[error("enter event {event} on location {location} has no matching leave")]
    UnmatchedEnter {
        /// The location whose stream is malformed.
        location: LocationId,
        /// The offending event.
        event: EventIdx,
    },
    /// A collective end had no matching collective begin.
    #[error("collective-end event {event} on location {location} has no matching begin")]
    UnmatchedCollectiveEnd {
        /// The location whose stream is malformed.
        location: LocationId,
        /// The offending event.
        event: EventIdx,
    },
    /// Two open requests share the same request id.
    #[error("event {event} on location {location} reuses a request id that is still open")]
    DuplicateRequest {
        /// The location whose stream is malformed.
        location: LocationId,
        /// The offending event.
        event: EventIdx,
    },
    /// A completion event names a request id that was never started.
    #[error("completion event {event} on location {location} has no matching request")]
    UnmatchedCompletion {
        /// The location whose stream is malformed.
        location: LocationId,
        /// The offending event.
        event: EventIdx,
    },
}
