use std::collections::BTreeMap;

use crate::{Buffer, BufferError, CallpathId};

// TIME MAP
// ================================================================================================

/// A sparse mapping from call-path id to a duration in seconds, summarizing the time spent in
/// every call path within an interval between two events.
///
/// Entries are created lazily; a missing key reads as zero. Negative entries never survive an
/// operation: subtraction clamps at zero, and `prune` drops exact zeros so maps stay sparse.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeMap {
    entries: BTreeMap<CallpathId, f64>,
}

impl TimeMap {
    /// Returns a new, empty time map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the duration recorded for the specified call path (zero if absent).
    pub fn get(&self, cp: CallpathId) -> f64 {
        self.entries.get(&cp).copied().unwrap_or(0.0)
    }

    /// Adds a duration to the specified call path.
    pub fn add(&mut self, cp: CallpathId, duration: f64) {
        if duration != 0.0 {
            *self.entries.entry(cp).or_insert(0.0) += duration;
        }
    }

    /// Adds every entry of `other` to this map.
    pub fn merge(&mut self, other: &TimeMap) {
        for (&cp, &d) in &other.entries {
            self.add(cp, d);
        }
    }

    /// Subtracts every entry of `other` from this map, clamping each entry at zero.
    pub fn subtract_clamped(&mut self, other: &TimeMap) {
        for (&cp, &d) in &other.entries {
            if let Some(entry) = self.entries.get_mut(&cp) {
                *entry = (*entry - d).max(0.0);
            }
        }
        self.prune();
    }

    /// Multiplies every entry by the specified factor.
    pub fn scale(&mut self, factor: f64) {
        for entry in self.entries.values_mut() {
            *entry *= factor;
        }
    }

    /// Returns the sum of all entries.
    pub fn sum(&self) -> f64 {
        self.entries.values().sum()
    }

    /// Returns true if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over `(call path, duration)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CallpathId, f64)> + '_ {
        self.entries.iter().map(|(&cp, &d)| (cp, d))
    }

    /// Drops entries that are exactly zero.
    pub fn prune(&mut self) {
        self.entries.retain(|_, d| *d != 0.0);
    }

    // WIRE FORMAT
    // --------------------------------------------------------------------------------------------

    /// Appends this map to a buffer as a count-prefixed sequence of `(u32 cnode-id, f64
    /// duration)` pairs.
    pub fn pack(&self, buf: &mut Buffer) {
        buf.put_u32(self.entries.len() as u32);
        for (&cp, &d) in &self.entries {
            buf.put_u32(cp.as_u32());
            buf.put_f64(d);
        }
    }

    /// Consumes a packed map from a buffer. Inverse of [`Self::pack`].
    pub fn unpack(buf: &mut Buffer) -> Result<Self, BufferError> {
        let count = buf.get_u32()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let cp = CallpathId::from(buf.get_u32()?);
            let d = buf.get_f64()?;
            entries.insert(cp, d);
        }
        Ok(Self { entries })
    }
}

impl FromIterator<(CallpathId, f64)> for TimeMap {
    fn from_iter<T: IntoIterator<Item = (CallpathId, f64)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (cp, d) in iter {
            map.add(cp, d);
        }
        map
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn cp(id: u32) -> CallpathId {
        CallpathId::from(id)
    }

    #[test]
    fn missing_keys_read_as_zero() {
        let map = TimeMap::new();
        assert_eq!(map.get(cp(3)), 0.0);
        assert_eq!(map.sum(), 0.0);
    }

    #[test]
    fn subtract_clamps_at_zero() {
        let mut a: TimeMap = [(cp(1), 2.0), (cp(2), 5.0)].into_iter().collect();
        let b: TimeMap = [(cp(1), 3.0), (cp(2), 1.0)].into_iter().collect();
        a.subtract_clamped(&b);
        assert_eq!(a.get(cp(1)), 0.0);
        assert_eq!(a.get(cp(2)), 4.0);
        // the clamped-to-zero entry is pruned
        assert_eq!(a.iter().count(), 1);
    }

    #[test]
    fn pack_unpack_is_identity() {
        let map: TimeMap = [(cp(0), 0.5), (cp(7), 1.25), (cp(42), 100.0)].into_iter().collect();
        let mut buf = Buffer::new();
        map.pack(&mut buf);
        let mut buf = Buffer::from_bytes(buf.into_bytes());
        let back = TimeMap::unpack(&mut buf).unwrap();
        assert_eq!(back, map);
        assert!(buf.is_exhausted());
    }

    proptest! {
        #[test]
        fn pack_unpack_round_trips(entries in proptest::collection::btree_map(
            0u32..1000,
            0.0f64..1e6,
            0..40,
        )) {
            let map: TimeMap =
                entries.into_iter().map(|(id, d)| (cp(id), d)).collect();
            let mut buf = Buffer::new();
            map.pack(&mut buf);
            let mut buf = Buffer::from_bytes(buf.into_bytes());
            prop_assert_eq!(TimeMap::unpack(&mut buf).unwrap(), map);
        }
    }
}
