use std::collections::HashMap;

use crate::{
    EventIdx, EventKind, EventPayload, EventRecord, LocationId, RequestId, Timestamp, TraceError,
};

const NO_LINK: u32 = u32::MAX;

// LOCAL TRACE
// ================================================================================================

/// One location's complete, bounded event stream, with precomputed navigation links.
///
/// A trace is constructed from its raw event records and then linked exactly once; linking
/// validates the stream (monotone timestamps, matched enter/leave pairs, paired non-blocking
/// requests, matched collective begin/end) and precomputes the `enterptr`/`leaveptr`/`request`/
/// `completion`/`beginptr` tables every replay sweep navigates through. Trace-format errors are
/// terminal: the analysis refuses to start on a stream it cannot navigate.
#[derive(Clone, Debug)]
pub struct LocalTrace {
    location: LocationId,
    events: Vec<EventRecord>,
    // one entry per event; NO_LINK where the link does not apply
    enterptr: Vec<u32>,
    leaveptr: Vec<u32>,
    request: Vec<u32>,
    completion: Vec<u32>,
    beginptr: Vec<u32>,
}

impl LocalTrace {
    /// Builds and links a trace from raw event records.
    ///
    /// # Errors
    /// Returns a [`TraceError`] naming the offending event if the stream is malformed.
    pub fn link(location: LocationId, events: Vec<EventRecord>) -> Result<Self, TraceError> {
        let n = events.len();
        let mut enterptr = vec![NO_LINK; n];
        let mut leaveptr = vec![NO_LINK; n];
        let mut request = vec![NO_LINK; n];
        let mut completion = vec![NO_LINK; n];
        let mut beginptr = vec![NO_LINK; n];

        let mut region_stack: Vec<u32> = Vec::new();
        let mut coll_stack: Vec<u32> = Vec::new();
        let mut open_requests: HashMap<RequestId, u32> = HashMap::new();
        let mut prev_time = Timestamp::MIN;

        for (i, ev) in events.iter().enumerate() {
            let i = i as u32;
            if ev.time < prev_time {
                return Err(TraceError::NonMonotoneTimestamp { location, event: i.into() });
            }
            prev_time = ev.time;

            match ev.kind {
                EventKind::Enter => {
                    if let Some(&enclosing) = region_stack.last() {
                        enterptr[i as usize] = enclosing;
                    }
                    region_stack.push(i);
                },
                EventKind::Leave => {
                    let enter = region_stack
                        .pop()
                        .ok_or(TraceError::UnmatchedLeave { location, event: i.into() })?;
                    enterptr[i as usize] = enter;
                    leaveptr[enter as usize] = i;
                },
                EventKind::CollectiveBegin => {
                    coll_stack.push(i);
                    if let Some(&enclosing) = region_stack.last() {
                        enterptr[i as usize] = enclosing;
                    }
                },
                EventKind::CollectiveEnd => {
                    let begin = coll_stack
                        .pop()
                        .ok_or(TraceError::UnmatchedCollectiveEnd { location, event: i.into() })?;
                    beginptr[i as usize] = begin;
                    if let Some(&enclosing) = region_stack.last() {
                        enterptr[i as usize] = enclosing;
                    }
                },
                _ => {
                    if let Some(&enclosing) = region_stack.last() {
                        enterptr[i as usize] = enclosing;
                    }
                    // pair non-blocking requests with their completions
                    if let EventPayload::P2p { request: Some(req), .. } = ev.payload {
                        match ev.kind {
                            EventKind::SendStart | EventKind::RecvRequest => {
                                if open_requests.insert(req, i).is_some() {
                                    return Err(TraceError::DuplicateRequest {
                                        location,
                                        event: i.into(),
                                    });
                                }
                            },
                            EventKind::SendComplete | EventKind::RecvComplete => {
                                let start = open_requests.remove(&req).ok_or(
                                    TraceError::UnmatchedCompletion { location, event: i.into() },
                                )?;
                                request[i as usize] = start;
                                completion[start as usize] = i;
                            },
                            _ => {},
                        }
                    }
                },
            }
        }

        if let Some(&enter) = region_stack.last() {
            return Err(TraceError::UnmatchedEnter { location, event: enter.into() });
        }

        Ok(Self { location, events, enterptr, leaveptr, request, completion, beginptr })
    }

    /// Returns the location this trace belongs to.
    pub fn location(&self) -> LocationId {
        self.location
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the trace has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns a reference to the event at the specified index.
    ///
    /// # Panics
    /// Panics if the index is out of bounds.
    pub fn event(&self, idx: EventIdx) -> EventRef<'_> {
        assert!(idx.as_usize() < self.events.len(), "event index out of bounds");
        EventRef { trace: self, idx }
    }

    /// Returns the raw record at the specified index.
    pub fn record(&self, idx: EventIdx) -> &EventRecord {
        &self.events[idx.as_usize()]
    }

    /// Returns an iterator over all events in stream order.
    pub fn events(&self) -> impl DoubleEndedIterator<Item = EventRef<'_>> {
        (0..self.events.len() as u32).map(move |i| EventRef { trace: self, idx: i.into() })
    }

    /// Returns the timestamp of the last event, if any.
    pub fn end_time(&self) -> Option<Timestamp> {
        self.events.last().map(|e| e.time)
    }

    fn resolve(&self, link: u32) -> Option<EventIdx> {
        (link != NO_LINK).then(|| link.into())
    }
}

// EVENT REF
// ================================================================================================

/// A borrowed view of one event, carrying its trace for navigation.
#[derive(Clone, Copy)]
pub struct EventRef<'a> {
    trace: &'a LocalTrace,
    idx: EventIdx,
}

impl<'a> EventRef<'a> {
    /// Returns the position of this event within its stream.
    pub fn idx(&self) -> EventIdx {
        self.idx
    }

    /// Returns the underlying record.
    pub fn record(&self) -> &'a EventRecord {
        self.trace.record(self.idx)
    }

    /// Returns the event's timestamp.
    pub fn time(&self) -> Timestamp {
        self.record().time
    }

    /// Returns the event's kind.
    pub fn kind(&self) -> EventKind {
        self.record().kind
    }

    /// Returns the event's payload.
    pub fn payload(&self) -> &'a EventPayload {
        &self.record().payload
    }

    /// Returns the preceding event in the stream.
    pub fn prev(&self) -> Option<EventRef<'a>> {
        self.idx.as_u32().checked_sub(1).map(|i| self.trace.event(i.into()))
    }

    /// Returns the following event in the stream.
    pub fn next(&self) -> Option<EventRef<'a>> {
        let i = self.idx.as_u32() + 1;
        (i < self.trace.len() as u32).then(|| self.trace.event(i.into()))
    }

    /// Returns the matching enter: for a leave, the enter of its region instance; for anything
    /// else, the enter of the innermost enclosing region instance.
    pub fn enterptr(&self) -> Option<EventRef<'a>> {
        self.trace.resolve(self.trace.enterptr[self.idx.as_usize()]).map(|i| self.trace.event(i))
    }

    /// Returns the matching leave of an enter event.
    pub fn leaveptr(&self) -> Option<EventRef<'a>> {
        self.trace.resolve(self.trace.leaveptr[self.idx.as_usize()]).map(|i| self.trace.event(i))
    }

    /// Returns the request (start) event of a completion event.
    pub fn request(&self) -> Option<EventRef<'a>> {
        self.trace.resolve(self.trace.request[self.idx.as_usize()]).map(|i| self.trace.event(i))
    }

    /// Returns the completion event of a non-blocking start event.
    pub fn completion(&self) -> Option<EventRef<'a>> {
        self.trace.resolve(self.trace.completion[self.idx.as_usize()]).map(|i| self.trace.event(i))
    }

    /// Returns the matching collective-begin of a collective-end event.
    pub fn beginptr(&self) -> Option<EventRef<'a>> {
        self.trace.resolve(self.trace.beginptr[self.idx.as_usize()]).map(|i| self.trace.event(i))
    }

    /// Returns the timestamp of the enter of the innermost enclosing region instance, falling
    /// back to this event's own timestamp if there is none.
    pub fn enclosing_enter_time(&self) -> Timestamp {
        self.enterptr().map(|e| e.time()).unwrap_or_else(|| self.time())
    }
}

impl core::fmt::Debug for EventRef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventRef")
            .field("location", &self.trace.location)
            .field("idx", &self.idx)
            .field("record", self.record())
            .finish()
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::RegionId;

    fn enter(t: f64, region: u32) -> EventRecord {
        EventRecord::new(
            Timestamp::new(t),
            EventKind::Enter,
            EventPayload::Region { region: RegionId(region) },
        )
    }

    fn leave(t: f64, region: u32) -> EventRecord {
        EventRecord::new(
            Timestamp::new(t),
            EventKind::Leave,
            EventPayload::Region { region: RegionId(region) },
        )
    }

    #[test]
    fn enter_leave_links_resolve() {
        let trace = LocalTrace::link(
            LocationId(0),
            vec![enter(0.0, 0), enter(1.0, 1), leave(2.0, 1), leave(3.0, 0)],
        )
        .unwrap();

        let outer_enter = trace.event(EventIdx::new(0));
        let inner_enter = trace.event(EventIdx::new(1));
        let inner_leave = trace.event(EventIdx::new(2));

        assert_eq!(outer_enter.leaveptr().unwrap().idx(), EventIdx::new(3));
        assert_eq!(inner_leave.enterptr().unwrap().idx(), EventIdx::new(1));
        assert_eq!(inner_enter.enterptr().unwrap().idx(), EventIdx::new(0));
    }

    #[test]
    fn request_completion_links_pair_up() {
        let send = EventRecord::new(
            Timestamp::new(1.0),
            EventKind::SendStart,
            EventPayload::P2p {
                peer: 1,
                comm: crate::CommId(0),
                tag: 0,
                bytes: 8,
                request: Some(RequestId(5)),
            },
        );
        let complete = EventRecord::new(
            Timestamp::new(2.0),
            EventKind::SendComplete,
            EventPayload::P2p {
                peer: 1,
                comm: crate::CommId(0),
                tag: 0,
                bytes: 8,
                request: Some(RequestId(5)),
            },
        );
        let trace = LocalTrace::link(
            LocationId(0),
            vec![enter(0.0, 0), send, complete, leave(3.0, 0)],
        )
        .unwrap();

        assert_eq!(trace.event(EventIdx::new(2)).request().unwrap().idx(), EventIdx::new(1));
        assert_eq!(trace.event(EventIdx::new(1)).completion().unwrap().idx(), EventIdx::new(2));
    }

    #[test]
    fn non_monotone_timestamps_are_rejected() {
        let err = LocalTrace::link(LocationId(3), vec![enter(1.0, 0), leave(0.5, 0)]).unwrap_err();
        assert!(matches!(
            err,
            TraceError::NonMonotoneTimestamp { location: LocationId(3), event } if event == EventIdx::new(1)
        ));
    }

    #[test]
    fn unmatched_leave_is_rejected() {
        let err = LocalTrace::link(LocationId(0), vec![leave(0.0, 0)]).unwrap_err();
        assert!(matches!(err, TraceError::UnmatchedLeave { .. }));
    }

    #[test]
    fn empty_trace_links_fine() {
        let trace = LocalTrace::link(LocationId(0), Vec::new()).unwrap();
        assert!(trace.is_empty());
        assert_eq!(trace.end_time(), None);
    }
}
