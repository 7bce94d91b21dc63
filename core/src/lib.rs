//! Core data model of the Hindsight wait-state analyzer: events and per-location traces,
//! regions and their syntactic classifiers, the calling-context tree, global definitions,
//! sparse per-call-path time maps, and the typed buffers peers exchange during replay.
//!
//! Everything in this crate is passive data; the replay machinery and the pattern detectors
//! live in `hindsight-engine`.

mod buffer;
mod callpath;
mod definitions;
mod errors;
mod event;
mod region;
mod time;
mod timemap;
mod trace;

// RE-EXPORTS
// ================================================================================================

pub use buffer::{Buffer, BufferError, BufferTag};
pub use callpath::{Callpath, CallpathId, CallpathTree};
pub use definitions::{CommId, CommKind, Communicator, GlobalDefs, Location, LocationId, Window};
pub use errors::TraceError;
pub use event::{
    EventIdx, EventKind, EventPayload, EventRecord, LockId, LockParadigm, MsgTag, Rank, RequestId,
    WindowId,
};
pub use region::{Paradigm, Region, RegionId};
pub use time::Timestamp;
pub use timemap::TimeMap;
pub use trace::{EventRef, LocalTrace};
