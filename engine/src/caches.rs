use std::cell::RefCell;
use std::collections::HashMap;

use hindsight_core::{
    CallpathId, CallpathTree, EventIdx, EventKind, EventPayload, LocalTrace, LocationId, LockId,
    LockParadigm, TimeMap, Timestamp, WindowId,
};

// TIME MAP CACHE
// ================================================================================================

const TIMEMAP_MEMO_CAPACITY: usize = 256;

/// Computes (and memoizes) per-call-path time profiles over intervals of one location's stream.
///
/// The profile of `[from, to]` attributes the span between consecutive events to the call path
/// active after the earlier event; leaves hand the span to their parent path. The cache is
/// read-only during a sweep.
pub struct TimeMapCache<'a> {
    trace: &'a LocalTrace,
    cpaths: &'a [CallpathId],
    tree: &'a CallpathTree,
    memo: RefCell<HashMap<(EventIdx, EventIdx), TimeMap>>,
}

impl<'a> TimeMapCache<'a> {
    /// Returns a new cache over the specified stream.
    pub fn new(trace: &'a LocalTrace, cpaths: &'a [CallpathId], tree: &'a CallpathTree) -> Self {
        Self {
            trace,
            cpaths,
            tree,
            memo: RefCell::new(HashMap::new()),
        }
    }

    fn active_path_after(&self, idx: usize) -> CallpathId {
        let cp = self.cpaths[idx];
        match self.trace.record(EventIdx::from(idx)).kind {
            EventKind::Leave => self.tree.node(cp).parent().unwrap_or(CallpathId::ROOT),
            _ => cp,
        }
    }

    /// Returns the time profile of the interval `[from, to]`.
    ///
    /// An empty or inverted interval yields an empty map.
    pub fn time_map(&self, from: EventIdx, to: EventIdx) -> TimeMap {
        if from >= to {
            return TimeMap::new();
        }
        if let Some(cached) = self.memo.borrow().get(&(from, to)) {
            return cached.clone();
        }
        let mut map = TimeMap::new();
        for k in from.as_usize()..to.as_usize() {
            let span =
                self.trace.record(EventIdx::from(k + 1)).time - self.trace.record(EventIdx::from(k)).time;
            map.add(self.active_path_after(k), span);
        }
        let mut memo = self.memo.borrow_mut();
        if memo.len() >= TIMEMAP_MEMO_CAPACITY {
            memo.clear();
        }
        memo.insert((from, to), map.clone());
        map
    }

    /// Returns the time profile of the whole stream.
    pub fn full_profile(&self) -> TimeMap {
        if self.trace.is_empty() {
            return TimeMap::new();
        }
        self.time_map(EventIdx::new(0), EventIdx::from(self.trace.len() - 1))
    }
}

// LOCK CACHE
// ================================================================================================

/// One acquisition epoch of a thread lock.
#[derive(Clone, Copy, Debug)]
pub struct LockEpoch {
    /// The location that held the lock.
    pub location: LocationId,
    /// The lock's paradigm.
    pub paradigm: LockParadigm,
    /// When the acquiring region was entered.
    pub enter_acquire: Timestamp,
    /// When the lock was acquired.
    pub acquire: Timestamp,
    /// When the lock was released.
    pub release: Timestamp,
}

/// The cross-location lock-tracking cache.
///
/// Built once from all streams before replay starts, so contention lookups during replay are
/// pure reads regardless of which location's sweep asks first.
#[derive(Debug, Default)]
pub struct LockCache {
    epochs: HashMap<LockId, Vec<LockEpoch>>,
}

impl LockCache {
    /// Builds the cache from the full trace set.
    pub fn build(traces: &[LocalTrace]) -> Self {
        let mut epochs: HashMap<LockId, Vec<LockEpoch>> = HashMap::new();
        for trace in traces {
            let mut open: HashMap<LockId, (LockParadigm, Timestamp, Timestamp)> = HashMap::new();
            for ev in trace.events() {
                match ev.kind() {
                    EventKind::ThreadAcquireLock => {
                        if let EventPayload::ThreadLock { lock, paradigm } = *ev.payload() {
                            let enter = ev.enclosing_enter_time();
                            open.insert(lock, (paradigm, enter, ev.time()));
                        }
                    },
                    EventKind::ThreadReleaseLock => {
                        if let EventPayload::ThreadLock { lock, .. } = *ev.payload() {
                            if let Some((paradigm, enter_acquire, acquire)) = open.remove(&lock) {
                                epochs.entry(lock).or_default().push(LockEpoch {
                                    location: trace.location(),
                                    paradigm,
                                    enter_acquire,
                                    acquire,
                                    release: ev.time(),
                                });
                            }
                        }
                    },
                    _ => {},
                }
            }
        }
        for list in epochs.values_mut() {
            list.sort_by(|a, b| a.acquire.cmp_total(&b.acquire));
        }
        Self { epochs }
    }

    /// Returns the latest release of the specified lock by *another* location at or before the
    /// given acquisition time.
    pub fn last_release_before(
        &self,
        lock: LockId,
        me: LocationId,
        acquire: Timestamp,
    ) -> Option<Timestamp> {
        self.epochs
            .get(&lock)?
            .iter()
            .filter(|e| e.location != me && e.release <= acquire)
            .map(|e| e.release)
            .max_by(Timestamp::cmp_total)
    }
}

// RMA EPOCH CACHE
// ================================================================================================

/// One passive-target lock epoch on an RMA window.
#[derive(Clone, Copy, Debug)]
pub struct RmaLockEpoch {
    /// The location that held the window lock.
    pub location: LocationId,
    /// Whether the lock was exclusive.
    pub exclusive: bool,
    /// When the locking region was entered.
    pub enter_lock: Timestamp,
    /// When the lock was acquired.
    pub lock: Timestamp,
    /// When the lock was released.
    pub unlock: Timestamp,
}

#[derive(Debug, Default)]
struct WindowHistory {
    // (location, region enter, event time), sorted by event time
    posts: Vec<(LocationId, Timestamp, Timestamp)>,
    completes: Vec<(LocationId, Timestamp, Timestamp)>,
    comm_ops: Vec<(LocationId, Timestamp)>,
    lock_epochs: Vec<RmaLockEpoch>,
}

/// The cross-location RMA epoch cache: posts, completes, communication ops and passive lock
/// epochs per window, built once from all streams before replay.
///
/// This replaces raw `prev()` peeking at prior events with explicit per-window lookups, so the
/// engine does not depend on input-format-specific event adjacency.
#[derive(Debug, Default)]
pub struct RmaEpochCache {
    windows: HashMap<WindowId, WindowHistory>,
}

impl RmaEpochCache {
    /// Builds the cache from the full trace set.
    pub fn build(traces: &[LocalTrace]) -> Self {
        let mut windows: HashMap<WindowId, WindowHistory> = HashMap::new();
        for trace in traces {
            let me = trace.location();
            let mut open_locks: HashMap<WindowId, (bool, Timestamp, Timestamp)> = HashMap::new();
            for ev in trace.events() {
                match (ev.kind(), ev.payload()) {
                    (EventKind::RmaPost, &EventPayload::RmaEpoch { window }) => {
                        windows.entry(window).or_default().posts.push((
                            me,
                            ev.enclosing_enter_time(),
                            ev.time(),
                        ));
                    },
                    (EventKind::RmaComplete, &EventPayload::RmaEpoch { window }) => {
                        windows.entry(window).or_default().completes.push((
                            me,
                            ev.enclosing_enter_time(),
                            ev.time(),
                        ));
                    },
                    (
                        EventKind::RmaPut | EventKind::RmaGet,
                        &EventPayload::RmaComm { window, .. },
                    ) => {
                        windows.entry(window).or_default().comm_ops.push((me, ev.time()));
                    },
                    (EventKind::RmaLock, &EventPayload::RmaLock { window, exclusive, .. }) => {
                        open_locks
                            .insert(window, (exclusive, ev.enclosing_enter_time(), ev.time()));
                    },
                    (EventKind::RmaUnlock, &EventPayload::RmaLock { window, .. }) => {
                        if let Some((exclusive, enter_lock, lock)) = open_locks.remove(&window) {
                            windows.entry(window).or_default().lock_epochs.push(RmaLockEpoch {
                                location: me,
                                exclusive,
                                enter_lock,
                                lock,
                                unlock: ev.time(),
                            });
                        }
                    },
                    _ => {},
                }
            }
        }
        for history in windows.values_mut() {
            history.posts.sort_by(|a, b| a.2.cmp_total(&b.2));
            history.completes.sort_by(|a, b| a.2.cmp_total(&b.2));
            history.comm_ops.sort_by(|a, b| a.1.cmp_total(&b.1));
            history.lock_epochs.sort_by(|a, b| a.lock.cmp_total(&b.lock));
        }
        Self { windows }
    }

    /// Returns the latest post on the window at or before the specified time.
    pub fn last_post_before(&self, window: WindowId, t: Timestamp) -> Option<Timestamp> {
        self.windows
            .get(&window)?
            .posts
            .iter()
            .filter(|p| p.2 <= t)
            .map(|p| p.2)
            .max_by(Timestamp::cmp_total)
    }

    /// Returns the latest complete on the window at or before the specified time.
    pub fn last_complete_before(&self, window: WindowId, t: Timestamp) -> Option<Timestamp> {
        self.windows
            .get(&window)?
            .completes
            .iter()
            .filter(|c| c.2 <= t)
            .map(|c| c.2)
            .max_by(Timestamp::cmp_total)
    }

    /// Returns the latest put/get on the window at or before the specified time, optionally
    /// restricted to one location.
    pub fn last_comm_op_before(
        &self,
        window: WindowId,
        location: Option<LocationId>,
        t: Timestamp,
    ) -> Option<Timestamp> {
        self.windows
            .get(&window)?
            .comm_ops
            .iter()
            .filter(|(loc, time)| *time <= t && location.is_none_or(|l| *loc == l))
            .map(|(_, time)| *time)
            .max_by(Timestamp::cmp_total)
    }

    /// Returns the latest put/get issued by the specified location on any window at or before
    /// the given time.
    pub fn last_op_of_location_before(
        &self,
        location: LocationId,
        t: Timestamp,
    ) -> Option<Timestamp> {
        self.windows
            .values()
            .flat_map(|h| h.comm_ops.iter())
            .filter(|(loc, time)| *loc == location && *time <= t)
            .map(|(_, time)| *time)
            .max_by(Timestamp::cmp_total)
    }

    /// Returns this location's lock epoch on the window ending at the specified unlock time.
    pub fn own_epoch(
        &self,
        window: WindowId,
        me: LocationId,
        unlock: Timestamp,
    ) -> Option<RmaLockEpoch> {
        self.windows
            .get(&window)?
            .lock_epochs
            .iter()
            .find(|e| e.location == me && e.unlock == unlock)
            .copied()
    }

    /// Returns the lock epochs of other locations that overlap the given epoch, where at least
    /// one side holds an exclusive lock.
    pub fn contending_epochs(
        &self,
        window: WindowId,
        me: LocationId,
        my_enter: Timestamp,
        my_unlock: Timestamp,
        my_exclusive: bool,
    ) -> Vec<RmaLockEpoch> {
        let Some(history) = self.windows.get(&window) else {
            return Vec::new();
        };
        history
            .lock_epochs
            .iter()
            .filter(|e| {
                e.location != me
                    && (e.exclusive || my_exclusive)
                    && e.enter_lock < my_unlock
                    && my_enter < e.unlock
            })
            .copied()
            .collect()
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use hindsight_core::{EventRecord, RegionId};

    use super::*;

    fn simple_trace() -> (LocalTrace, Vec<CallpathId>, CallpathTree) {
        // root region 0 spanning [0, 10]; child region 1 spanning [2, 5]
        let events = vec![
            EventRecord::new(
                Timestamp::new(0.0),
                EventKind::Enter,
                EventPayload::Region { region: RegionId(0) },
            ),
            EventRecord::new(
                Timestamp::new(2.0),
                EventKind::Enter,
                EventPayload::Region { region: RegionId(1) },
            ),
            EventRecord::new(
                Timestamp::new(5.0),
                EventKind::Leave,
                EventPayload::Region { region: RegionId(1) },
            ),
            EventRecord::new(
                Timestamp::new(10.0),
                EventKind::Leave,
                EventPayload::Region { region: RegionId(0) },
            ),
        ];
        let trace = LocalTrace::link(LocationId(0), events).unwrap();
        let mut tree = CallpathTree::new();
        let outer = tree.intern(CallpathId::ROOT, RegionId(0));
        let inner = tree.intern(outer, RegionId(1));
        let cpaths = vec![outer, inner, inner, outer];
        (trace, cpaths, tree)
    }

    #[test]
    fn full_profile_attributes_exclusive_time() {
        let (trace, cpaths, tree) = simple_trace();
        let cache = TimeMapCache::new(&trace, &cpaths, &tree);
        let profile = cache.full_profile();

        let outer = cpaths[0];
        let inner = cpaths[1];
        // outer: [0,2] and [5,10] => 7; inner: [2,5] => 3
        assert_eq!(profile.get(outer), 7.0);
        assert_eq!(profile.get(inner), 3.0);
        assert_eq!(profile.sum(), 10.0);
    }

    #[test]
    fn inverted_interval_is_empty() {
        let (trace, cpaths, tree) = simple_trace();
        let cache = TimeMapCache::new(&trace, &cpaths, &tree);
        assert!(cache.time_map(EventIdx::new(3), EventIdx::new(1)).is_empty());
    }
}
