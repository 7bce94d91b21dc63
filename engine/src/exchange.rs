use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use hindsight_core::{Buffer, CommId, Communicator, GlobalDefs, LocationId, MsgTag, Rank};
use parking_lot::{Condvar, Mutex};

use crate::errors::DetectorError;

// CHANNEL
// ================================================================================================

/// Which replay direction a peer buffer travels in.
///
/// Forward exchanges follow the recorded communication (sender ships at its send event);
/// inverse exchanges run against it (the receiver ships at its receive event during backward
/// sweeps). Keeping the two in separate channels means a backward sweep can never consume a
/// buffer left over from a forward one.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Channel {
    /// Sender-to-receiver, used by forward sweeps.
    Forward,
    /// Receiver-to-sender, used by backward sweeps.
    Inverse,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct P2pKey {
    src: LocationId,
    dst: LocationId,
    comm: CommId,
    tag: MsgTag,
    channel: Channel,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum CollScope {
    Comm(CommId),
    World,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct CollKey {
    scope: CollScope,
    seq: u64,
}

struct CollCell {
    expected: u32,
    arrived: u32,
    taken: u32,
    contributions: Vec<Option<Vec<u8>>>,
}

// EXCHANGE HUB
// ================================================================================================

/// The in-process transport coupling the per-location replay workers.
///
/// Point-to-point buffers travel through per-`(src, dst, comm, tag, channel)` FIFO queues,
/// mirroring MPI's non-overtaking guarantee; collective exchanges rendezvous in per-communicator
/// cells keyed by a call sequence number. Sends never block; receives and collectives block
/// until the peer side arrives. A worker that dies poisons the hub, waking every blocked peer
/// with an error so the analysis can terminate instead of deadlocking.
pub struct Exchange {
    num_locations: u32,
    p2p: Mutex<HashMap<P2pKey, VecDeque<Vec<u8>>>>,
    p2p_cv: Condvar,
    colls: Mutex<HashMap<CollKey, CollCell>>,
    coll_cv: Condvar,
    barrier: Mutex<(u64, u32)>, // (generation, arrived)
    barrier_cv: Condvar,
    poisoned: Mutex<Option<String>>,
}

impl Exchange {
    /// Returns a new hub coupling the specified number of locations.
    pub fn new(num_locations: usize) -> Arc<Self> {
        Arc::new(Self {
            num_locations: num_locations as u32,
            p2p: Mutex::new(HashMap::new()),
            p2p_cv: Condvar::new(),
            colls: Mutex::new(HashMap::new()),
            coll_cv: Condvar::new(),
            barrier: Mutex::new((0, 0)),
            barrier_cv: Condvar::new(),
            poisoned: Mutex::new(None),
        })
    }

    /// Poisons the hub, waking every blocked worker with an error.
    pub fn poison(&self, reason: impl Into<String>) {
        let mut poisoned = self.poisoned.lock();
        if poisoned.is_none() {
            *poisoned = Some(reason.into());
        }
        drop(poisoned);
        self.p2p_cv.notify_all();
        self.coll_cv.notify_all();
        self.barrier_cv.notify_all();
    }

    fn check_poison(&self) -> Result<(), DetectorError> {
        match self.poisoned.lock().as_ref() {
            Some(reason) => Err(DetectorError::ExchangePoisoned { reason: reason.clone() }),
            None => Ok(()),
        }
    }

    /// Returns a per-location handle onto this hub.
    pub fn handle(self: &Arc<Self>, me: LocationId) -> ExchangeHandle {
        ExchangeHandle {
            hub: Arc::clone(self),
            me,
            seqs: Mutex::new(HashMap::new()),
        }
    }
}

// EXCHANGE HANDLE
// ================================================================================================

/// One location's view of the exchange hub.
///
/// The handle tracks a per-communicator collective sequence number: all members of a
/// communicator execute their collective events in the same order, so equal sequence numbers
/// rendezvous in the same cell without any global coordination.
pub struct ExchangeHandle {
    hub: Arc<Exchange>,
    me: LocationId,
    seqs: Mutex<HashMap<CollScope, u64>>,
}

impl ExchangeHandle {
    /// This location's id.
    pub fn location(&self) -> LocationId {
        self.me
    }

    /// Poisons the hub on behalf of this location.
    pub fn poison(&self, reason: impl Into<String>) {
        self.hub.poison(reason);
    }

    // POINT-TO-POINT
    // --------------------------------------------------------------------------------------------

    /// Ships a buffer to a peer location. Never blocks.
    pub fn send(&self, dst: LocationId, comm: CommId, tag: MsgTag, channel: Channel, buf: Buffer) {
        let key = P2pKey { src: self.me, dst, comm, tag, channel };
        self.hub.p2p.lock().entry(key).or_default().push_back(buf.into_bytes());
        self.hub.p2p_cv.notify_all();
    }

    /// Receives the next buffer from a peer location, blocking until it arrives.
    pub fn recv(
        &self,
        src: LocationId,
        comm: CommId,
        tag: MsgTag,
        channel: Channel,
    ) -> Result<Buffer, DetectorError> {
        let key = P2pKey { src, dst: self.me, comm, tag, channel };
        let mut queues = self.hub.p2p.lock();
        loop {
            self.hub.check_poison()?;
            if let Some(bytes) = queues.get_mut(&key).and_then(|q| q.pop_front()) {
                return Ok(Buffer::from_bytes(bytes));
            }
            self.hub.p2p_cv.wait(&mut queues);
        }
    }

    // COLLECTIVES
    // --------------------------------------------------------------------------------------------

    fn next_seq(&self, scope: CollScope) -> u64 {
        let mut seqs = self.seqs.lock();
        let seq = seqs.entry(scope).or_insert(0);
        let current = *seq;
        *seq += 1;
        current
    }

    fn rendezvous(
        &self,
        scope: CollScope,
        my_pos: u32,
        expected: u32,
        bytes: Vec<u8>,
    ) -> Result<Vec<Vec<u8>>, DetectorError> {
        let key = CollKey { scope, seq: self.next_seq(scope) };
        let mut cells = self.hub.colls.lock();
        {
            let cell = cells.entry(key).or_insert_with(|| CollCell {
                expected,
                arrived: 0,
                taken: 0,
                contributions: vec![None; expected as usize],
            });
            cell.contributions[my_pos as usize] = Some(bytes);
            cell.arrived += 1;
            if cell.arrived == cell.expected {
                self.hub.coll_cv.notify_all();
            }
        }
        loop {
            self.hub.check_poison()?;
            let cell = cells.get_mut(&key).expect("collective cell vanished mid-rendezvous");
            if cell.arrived == cell.expected {
                let result: Vec<Vec<u8>> = cell
                    .contributions
                    .iter()
                    .map(|c| c.clone().expect("missing collective contribution"))
                    .collect();
                cell.taken += 1;
                if cell.taken == cell.expected {
                    cells.remove(&key);
                }
                return Ok(result);
            }
            self.hub.coll_cv.wait(&mut cells);
        }
    }

    /// Gathers every member's bytes; each member receives the full rank-ordered list.
    pub fn allgather(
        &self,
        comm_id: CommId,
        comm: &Communicator,
        bytes: Vec<u8>,
    ) -> Result<Vec<(Rank, Vec<u8>)>, DetectorError> {
        let my_rank = comm.rank_of(self.me).ok_or(DetectorError::NotACommMember)?;
        let contributions =
            self.rendezvous(CollScope::Comm(comm_id), my_rank, comm.size(), bytes)?;
        Ok(contributions.into_iter().enumerate().map(|(r, b)| (r as Rank, b)).collect())
    }

    /// Gathers every location's bytes across the whole analysis; the result is indexed by
    /// location id.
    pub fn allgather_world(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, DetectorError> {
        self.rendezvous(CollScope::World, self.me.0, self.hub.num_locations, bytes)
    }

    /// Gathers every member's bytes at the specified root; other members receive `None`.
    pub fn gather(
        &self,
        comm_id: CommId,
        comm: &Communicator,
        root: Rank,
        bytes: Vec<u8>,
    ) -> Result<Option<Vec<(Rank, Vec<u8>)>>, DetectorError> {
        let my_rank = comm.rank_of(self.me).ok_or(DetectorError::NotACommMember)?;
        let all = self.allgather(comm_id, comm, bytes)?;
        Ok((my_rank == root).then_some(all))
    }

    /// Broadcasts the root's bytes to every member.
    pub fn broadcast(
        &self,
        comm_id: CommId,
        comm: &Communicator,
        root: Rank,
        bytes: Vec<u8>,
    ) -> Result<Vec<u8>, DetectorError> {
        let all = self.allgather(comm_id, comm, bytes)?;
        Ok(all[root as usize].1.clone())
    }

    /// Element-wise sum reduction of equal-length `f64` vectors across all locations.
    pub fn allreduce_sum_world(&self, values: &[f64]) -> Result<Vec<f64>, DetectorError> {
        let mut buf = Buffer::new();
        buf.put_u32(values.len() as u32);
        for &v in values {
            buf.put_f64(v);
        }
        let all = self.allgather_world(buf.into_bytes())?;
        let mut sums = vec![0.0; values.len()];
        for bytes in all {
            let mut buf = Buffer::from_bytes(bytes);
            let n = buf.get_u32()? as usize;
            for slot in sums.iter_mut().take(n) {
                *slot += buf.get_f64()?;
            }
        }
        Ok(sums)
    }

    /// Element-wise max reduction of equal-length `f64` vectors across all locations.
    pub fn allreduce_max_world(&self, values: &[f64]) -> Result<Vec<f64>, DetectorError> {
        let mut buf = Buffer::new();
        buf.put_u32(values.len() as u32);
        for &v in values {
            buf.put_f64(v);
        }
        let all = self.allgather_world(buf.into_bytes())?;
        let mut maxima = vec![f64::NEG_INFINITY; values.len()];
        for bytes in all {
            let mut buf = Buffer::from_bytes(bytes);
            let n = buf.get_u32()? as usize;
            for slot in maxima.iter_mut().take(n) {
                *slot = slot.max(buf.get_f64()?);
            }
        }
        Ok(maxima)
    }

    // BARRIER
    // --------------------------------------------------------------------------------------------

    /// Blocks until every location has arrived. Separates consecutive sweeps.
    pub fn barrier_all(&self) -> Result<(), DetectorError> {
        let mut state = self.hub.barrier.lock();
        let generation = state.0;
        state.1 += 1;
        if state.1 == self.hub.num_locations {
            state.0 += 1;
            state.1 = 0;
            self.hub.barrier_cv.notify_all();
            return Ok(());
        }
        loop {
            self.hub.check_poison()?;
            if state.0 != generation {
                return Ok(());
            }
            self.hub.barrier_cv.wait(&mut state);
        }
    }
}

// HELPERS
// ================================================================================================

/// Resolves a peer rank within a communicator to its location id.
pub fn peer_location(defs: &GlobalDefs, comm: CommId, peer: Rank) -> LocationId {
    defs.comm(comm).location_at(peer)
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use std::thread;

    use hindsight_core::{CommKind, Communicator};

    use super::*;

    #[test]
    fn p2p_queues_are_fifo_per_channel() {
        let hub = Exchange::new(2);
        let a = hub.handle(LocationId(0));
        let b = hub.handle(LocationId(1));

        let mut first = Buffer::new();
        first.put_u32(1);
        let mut second = Buffer::new();
        second.put_u32(2);
        a.send(LocationId(1), CommId(0), 0, Channel::Forward, first);
        a.send(LocationId(1), CommId(0), 0, Channel::Forward, second);

        let mut got = b.recv(LocationId(0), CommId(0), 0, Channel::Forward).unwrap();
        assert_eq!(got.get_u32().unwrap(), 1);
        let mut got = b.recv(LocationId(0), CommId(0), 0, Channel::Forward).unwrap();
        assert_eq!(got.get_u32().unwrap(), 2);
    }

    #[test]
    fn allgather_collects_rank_ordered_contributions() {
        let hub = Exchange::new(3);
        let comm = Communicator::new(
            CommKind::Mpi,
            vec![LocationId(0), LocationId(1), LocationId(2)],
        );

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..3u32)
                .map(|i| {
                    let handle = hub.handle(LocationId(i));
                    let comm = &comm;
                    s.spawn(move || {
                        let mut buf = Buffer::new();
                        buf.put_u32(i * 10);
                        handle.allgather(CommId(0), comm, buf.into_bytes()).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            let values: Vec<u32> = result
                .into_iter()
                .map(|(_, bytes)| Buffer::from_bytes(bytes).get_u32().unwrap())
                .collect();
            assert_eq!(values, vec![0, 10, 20]);
        }
    }

    #[test]
    fn poison_wakes_blocked_receivers() {
        let hub = Exchange::new(2);
        let b = hub.handle(LocationId(1));
        let hub2 = Arc::clone(&hub);
        let waiter = thread::spawn(move || {
            b.recv(LocationId(0), CommId(0), 0, Channel::Forward)
        });
        // give the receiver a moment to block, then poison
        thread::sleep(std::time::Duration::from_millis(20));
        hub2.poison("worker died");
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, DetectorError::ExchangePoisoned { .. }));
    }

    #[test]
    fn barrier_releases_all_waiters() {
        let hub = Exchange::new(4);
        thread::scope(|s| {
            for i in 0..4u32 {
                let handle = hub.handle(LocationId(i));
                s.spawn(move || handle.barrier_all().unwrap());
            }
        });
    }

    #[test]
    fn allreduce_sum_and_max() {
        let hub = Exchange::new(2);
        let (a, b) = (hub.handle(LocationId(0)), hub.handle(LocationId(1)));
        thread::scope(|s| {
            let t1 = s.spawn(move || {
                (
                    a.allreduce_sum_world(&[1.0, 2.0]).unwrap(),
                    a.allreduce_max_world(&[5.0, 0.0]).unwrap(),
                )
            });
            let t2 = s.spawn(move || {
                (
                    b.allreduce_sum_world(&[10.0, 20.0]).unwrap(),
                    b.allreduce_max_world(&[1.0, 7.0]).unwrap(),
                )
            });
            let (sum1, max1) = t1.join().unwrap();
            let (sum2, max2) = t2.join().unwrap();
            assert_eq!(sum1, vec![11.0, 22.0]);
            assert_eq!(sum1, sum2);
            assert_eq!(max1, vec![5.0, 7.0]);
            assert_eq!(max1, max2);
        });
    }
}
