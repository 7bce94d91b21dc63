use std::io::Write as _;
use std::path::PathBuf;

use hindsight_core::{Buffer, BufferError, CallpathId, EventIdx, LocationId, Paradigm, Timestamp};

use crate::{
    cbdata::CbData,
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
};

/// Number of coefficients (histogram bins) of a quantile sketch.
const SKETCH_BINS: usize = 60;

/// Number of most-severe instances kept per wait-state kind.
const TOP_K: usize = 5;

// STAT KIND
// ================================================================================================

/// The closed set of wait-state kinds the statistics collector tracks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatKind {
    /// Late-sender waits.
    LateSender,
    /// Wrong-order late-sender waits.
    LateSenderWo,
    /// Late-receiver waits.
    LateReceiver,
    /// Barrier waits.
    BarrierWait,
    /// Barrier completion time.
    BarrierCompletion,
    /// N-to-N collective waits.
    NxnWait,
    /// N-to-N completion time.
    NxnCompletion,
    /// Early-reduce waits.
    EarlyReduce,
    /// Early-scan waits.
    EarlyScan,
    /// Late-broadcast waits.
    LateBroadcast,
    /// Init/finalize completion time.
    InitFinalize,
    /// OpenMP fork/join idleness.
    OmpIdleness,
    /// OpenMP barrier waits.
    OmpBarrierWait,
    /// Thread lock contention.
    LockContention,
    /// RMA wait states.
    RmaWait,
}

impl StatKind {
    /// All kinds, in wire and report order.
    pub const ALL: [StatKind; 15] = [
        Self::LateSender,
        Self::LateSenderWo,
        Self::LateReceiver,
        Self::BarrierWait,
        Self::BarrierCompletion,
        Self::NxnWait,
        Self::NxnCompletion,
        Self::EarlyReduce,
        Self::EarlyScan,
        Self::LateBroadcast,
        Self::InitFinalize,
        Self::OmpIdleness,
        Self::OmpBarrierWait,
        Self::LockContention,
        Self::RmaWait,
    ];

    /// Stable report name.
    pub fn name(self) -> &'static str {
        match self {
            Self::LateSender => "mpi_latesender",
            Self::LateSenderWo => "mpi_latesender_wo",
            Self::LateReceiver => "mpi_latereceiver",
            Self::BarrierWait => "mpi_barrier_wait",
            Self::BarrierCompletion => "mpi_barrier_completion",
            Self::NxnWait => "mpi_nxn_wait",
            Self::NxnCompletion => "mpi_nxn_completion",
            Self::EarlyReduce => "mpi_earlyreduce",
            Self::EarlyScan => "mpi_earlyscan",
            Self::LateBroadcast => "mpi_latebroadcast",
            Self::InitFinalize => "mpi_init_finalize",
            Self::OmpIdleness => "omp_idleness",
            Self::OmpBarrierWait => "omp_barrier_wait",
            Self::LockContention => "lock_contention",
            Self::RmaWait => "mpi_rma_wait",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).expect("kind in ALL")
    }

    fn of(user_event: UserEvent) -> Option<(Self, bool)> {
        // (kind, value comes from the completion field rather than the idle field)
        match user_event {
            UserEvent::LateSender => Some((Self::LateSender, false)),
            UserEvent::LateSenderWo => Some((Self::LateSenderWo, false)),
            UserEvent::LateReceiver => Some((Self::LateReceiver, false)),
            UserEvent::WaitBarrier => Some((Self::BarrierWait, false)),
            UserEvent::BarrierCompl => Some((Self::BarrierCompletion, true)),
            UserEvent::WaitNxn => Some((Self::NxnWait, false)),
            UserEvent::NxnCompl => Some((Self::NxnCompletion, true)),
            UserEvent::EarlyReduce => Some((Self::EarlyReduce, false)),
            UserEvent::EarlyScan => Some((Self::EarlyScan, false)),
            UserEvent::LateBcast => Some((Self::LateBroadcast, false)),
            UserEvent::InitCompl | UserEvent::FinalizeWait => Some((Self::InitFinalize, true)),
            UserEvent::OmpMgmtFork | UserEvent::OmpMgmtJoin => Some((Self::OmpIdleness, false)),
            UserEvent::OmpEbarrierWait | UserEvent::OmpIbarrierWait => {
                Some((Self::OmpBarrierWait, false))
            },
            UserEvent::ThreadLockContention => Some((Self::LockContention, false)),
            UserEvent::RmaWaitAtCreate
            | UserEvent::RmaWaitAtFree
            | UserEvent::RmaWaitAtFence
            | UserEvent::RmaEarlyWait
            | UserEvent::RmaLatePost
            | UserEvent::RmaLockContention => Some((Self::RmaWait, false)),
            _ => None,
        }
    }
}

// QUANTILE SKETCH
// ================================================================================================

/// A bounded-coefficient quantile approximation, mergeable under a parallel reduction.
///
/// The coefficient vector is a fixed-width histogram over `[0, upper_bound]`; the bound comes
/// from the prepare sweep's global reduction, which is what makes sketches from different
/// locations merge bin-for-bin. Count, sum, sum of squares, minimum and maximum are exact.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantileSketch {
    upper_bound: f64,
    bins: Vec<u64>,
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl QuantileSketch {
    /// Returns a new sketch over `[0, upper_bound]`.
    pub fn new(upper_bound: f64) -> Self {
        Self {
            upper_bound: upper_bound.max(0.0),
            bins: vec![0; SKETCH_BINS],
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Feeds one duration into the sketch.
    pub fn add(&mut self, value: f64) {
        let bin = if self.upper_bound > 0.0 {
            (((value / self.upper_bound) * SKETCH_BINS as f64) as usize).min(SKETCH_BINS - 1)
        } else {
            0
        };
        self.bins[bin] += 1;
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Merges another sketch over the same bound into this one.
    pub fn merge(&mut self, other: &QuantileSketch) {
        debug_assert_eq!(self.upper_bound, other.upper_bound, "sketch bounds must match");
        for (a, b) in self.bins.iter_mut().zip(&other.bins) {
            *a += b;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Returns the number of samples.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the sum of all samples.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Returns the mean (zero if empty).
    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }

    /// Returns the population variance (zero if empty).
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0)
    }

    /// Returns the smallest sample (zero if empty).
    pub fn min(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.min }
    }

    /// Returns the largest sample (zero if empty).
    pub fn max(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.max }
    }

    /// Approximates the q-quantile (`0 ≤ q ≤ 1`) by linear interpolation over the bins.
    pub fn quantile(&self, q: f64) -> f64 {
        if self.count == 0 || self.upper_bound <= 0.0 {
            return self.min();
        }
        let target = q.clamp(0.0, 1.0) * self.count as f64;
        let width = self.upper_bound / SKETCH_BINS as f64;
        let mut seen = 0.0;
        for (i, &n) in self.bins.iter().enumerate() {
            let n = n as f64;
            if seen + n >= target && n > 0.0 {
                let within = ((target - seen) / n).clamp(0.0, 1.0);
                let estimate = (i as f64 + within) * width;
                return estimate.clamp(self.min(), self.max());
            }
            seen += n;
        }
        self.max()
    }

    fn pack(&self, buf: &mut Buffer) {
        buf.put_f64(self.upper_bound);
        buf.put_u64(self.count);
        buf.put_f64(self.sum);
        buf.put_f64(self.sum_sq);
        buf.put_f64(self.min);
        buf.put_f64(self.max);
        for &bin in &self.bins {
            buf.put_u64(bin);
        }
    }

    fn unpack(buf: &mut Buffer) -> Result<Self, BufferError> {
        let upper_bound = buf.get_f64()?;
        let count = buf.get_u64()?;
        let sum = buf.get_f64()?;
        let sum_sq = buf.get_f64()?;
        let min = buf.get_f64()?;
        let max = buf.get_f64()?;
        let mut bins = Vec::with_capacity(SKETCH_BINS);
        for _ in 0..SKETCH_BINS {
            bins.push(buf.get_u64()?);
        }
        Ok(Self { upper_bound, bins, count, sum, sum_sq, min, max })
    }
}

// MOST-SEVERE INSTANCES
// ================================================================================================

/// One occurrence of a wait state, kept in the per-kind top-K list.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instance {
    /// The wait duration.
    pub duration: f64,
    /// When the instance occurred.
    pub time: Timestamp,
    /// The call path it occurred on.
    pub callpath: CallpathId,
    /// The location it occurred on.
    pub location: LocationId,
}

/// The bounded list of most-severe instances of one wait-state kind.
///
/// A new candidate replaces the existing record of its call path if it is heavier, or
/// displaces the lightest record of a distinct call path once the list is full.
#[derive(Clone, Debug, Default)]
pub struct TopInstances {
    instances: Vec<Instance>,
}

impl TopInstances {
    /// Offers a candidate to the list.
    pub fn offer(&mut self, candidate: Instance) {
        if let Some(existing) =
            self.instances.iter_mut().find(|i| i.callpath == candidate.callpath)
        {
            if candidate.duration > existing.duration {
                *existing = candidate;
            }
            return;
        }
        if self.instances.len() < TOP_K {
            self.instances.push(candidate);
            return;
        }
        let lightest = self
            .instances
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.duration.total_cmp(&b.duration))
            .map(|(i, _)| i)
            .expect("non-empty list");
        if candidate.duration > self.instances[lightest].duration {
            self.instances[lightest] = candidate;
        }
    }

    /// Returns the instances, heaviest first.
    pub fn sorted(&self) -> Vec<Instance> {
        let mut out = self.instances.clone();
        out.sort_by(|a, b| b.duration.total_cmp(&a.duration));
        out
    }
}

// STAT RECORD
// ================================================================================================

/// The per-kind statistics record exposed to the report writer.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatRecord {
    /// The wait-state kind's stable name.
    pub kind: &'static str,
    /// Number of instances.
    pub count: u64,
    /// Mean duration.
    pub mean: f64,
    /// Approximated median duration.
    pub median: f64,
    /// Smallest duration.
    pub min: f64,
    /// Largest duration.
    pub max: f64,
    /// Total duration.
    pub sum: f64,
    /// Population variance of the durations.
    pub variance: f64,
    /// Approximated lower quartile.
    pub q1: f64,
    /// Approximated upper quartile.
    pub q3: f64,
    /// The most severe instances, heaviest first.
    pub instances: Vec<Instance>,
}

// STATISTICS PATTERN
// ================================================================================================

/// The hidden statistics collector.
///
/// The prepare sweep discovers per-kind upper-bound durations from region spans, reduces them
/// across all locations and publishes them as sketch bounds; the main sweep then feeds every
/// wait-state notification's idle duration into the matching sketch and top-K list; the finish
/// hook merges the sketches under a global reduction and optionally writes the `trace.stat`
/// side file.
pub struct StatisticsPattern {
    bounds: Vec<f64>,
    sketches: Vec<QuantileSketch>,
    instances: Vec<TopInstances>,
    archive_directory: Option<PathBuf>,
    records: Vec<StatRecord>,
    empty: SeverityMap,
}

impl StatisticsPattern {
    /// Returns a new collector; `archive_directory` is the optional destination of the
    /// `trace.stat` side file.
    pub fn new(archive_directory: Option<PathBuf>) -> Self {
        Self {
            bounds: vec![0.0; StatKind::ALL.len()],
            sketches: Vec::new(),
            instances: vec![TopInstances::default(); StatKind::ALL.len()],
            archive_directory,
            records: Vec::new(),
            empty: SeverityMap::new(),
        }
    }

    fn bound_candidates(&mut self, at: EventIdx, data: &CbData<'_>) {
        let leave = data.event(at);
        let Some(enter) = leave.enterptr() else {
            return;
        };
        let Some(region) = leave.record().region() else {
            return;
        };
        let duration = leave.time() - enter.time();
        if duration <= 0.0 {
            return;
        }
        let region = data.defs.region(region);

        let mut bump = |kind: StatKind| {
            let slot = &mut self.bounds[kind.index()];
            *slot = slot.max(duration);
        };
        if region.is_mpi_barrier() {
            bump(StatKind::BarrierWait);
            bump(StatKind::BarrierCompletion);
        } else if region.is_mpi_n2n() {
            bump(StatKind::NxnWait);
            bump(StatKind::NxnCompletion);
        } else if region.is_mpi_12n() {
            bump(StatKind::LateBroadcast);
        } else if region.is_mpi_n21() {
            bump(StatKind::EarlyReduce);
        } else if region.is_mpi_scan() {
            bump(StatKind::EarlyScan);
        } else if region.is_mpi_init() || region.is_mpi_finalize() {
            bump(StatKind::InitFinalize);
        } else if region.is_mpi_rma_sync() || region.is_mpi_rma_passive() {
            bump(StatKind::RmaWait);
        } else if region.is_omp_barrier() {
            bump(StatKind::OmpBarrierWait);
        } else if region.is_omp_parallel() {
            bump(StatKind::OmpIdleness);
        } else if region.paradigm() == Paradigm::Mpi {
            // remaining MPI regions are the point-to-point surface
            bump(StatKind::LateSender);
            bump(StatKind::LateSenderWo);
            bump(StatKind::LateReceiver);
        } else {
            bump(StatKind::LockContention);
        }
    }

    fn publish_bounds(&mut self, data: &mut CbData<'_>) -> Result<(), DetectorError> {
        self.bounds = data.exchange.allreduce_max_world(&self.bounds)?;
        self.sketches = self.bounds.iter().map(|&b| QuantileSketch::new(b)).collect();
        Ok(())
    }

    fn feed(&mut self, kind: StatKind, value: f64, at: EventIdx, data: &CbData<'_>) {
        if value <= 0.0 || self.sketches.is_empty() {
            return;
        }
        self.sketches[kind.index()].add(value);
        self.instances[kind.index()].offer(Instance {
            duration: value,
            time: data.event(at).time(),
            callpath: data.callpath_of(at),
            location: data.location(),
        });
    }

    fn write_stat_file(&self) -> std::io::Result<()> {
        let Some(dir) = &self.archive_directory else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        let mut file = std::fs::File::create(dir.join("trace.stat"))?;
        writeln!(file, "PatternName Count Mean Median Minimum Maximum Sum Variance Q1 Q3")?;
        for record in &self.records {
            writeln!(
                file,
                "{} {} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9}",
                record.kind,
                record.count,
                record.mean,
                record.median,
                record.min,
                record.max,
                record.sum,
                record.variance,
                record.q1,
                record.q3,
            )?;
            for instance in &record.instances {
                writeln!(
                    file,
                    "- instance location={} callpath={} time={} duration={:.9}",
                    instance.location,
                    instance.callpath,
                    instance.time,
                    instance.duration,
                )?;
            }
        }
        Ok(())
    }
}

impl Pattern for StatisticsPattern {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::STATISTICS,
            parent: None,
            name: "Statistics",
            unique_name: "statistics",
            description: "Distribution sketches and most-severe instances per wait-state kind",
            unit: "occ",
            mode: Mode::Exclusive,
            hidden: true,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        use UserEvent::*;
        let mut subs = vec![
            (ReplayPhase::Prepare, Leave),
            (ReplayPhase::Prepare, SweepEnd),
        ];
        subs.extend(
            [
                LateSender,
                LateSenderWo,
                LateReceiver,
                WaitBarrier,
                BarrierCompl,
                WaitNxn,
                NxnCompl,
                EarlyReduce,
                EarlyScan,
                LateBcast,
                InitCompl,
                FinalizeWait,
                OmpMgmtFork,
                OmpMgmtJoin,
                OmpEbarrierWait,
                OmpIbarrierWait,
                ThreadLockContention,
                RmaWaitAtCreate,
                RmaWaitAtFree,
                RmaWaitAtFence,
                RmaEarlyWait,
                RmaLatePost,
                RmaLockContention,
            ]
            .into_iter()
            .map(|ue| (ReplayPhase::MainForward, ue)),
        );
        subs
    }

    fn handle(
        &mut self,
        phase: ReplayPhase,
        user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        if phase == ReplayPhase::Prepare {
            match user_event {
                UserEvent::Leave => self.bound_candidates(at, data),
                UserEvent::SweepEnd => self.publish_bounds(data)?,
                _ => {},
            }
            return Ok(());
        }
        if let Some((kind, from_completion)) = StatKind::of(user_event) {
            let value = if from_completion { data.completion } else { data.idle };
            self.feed(kind, value, at, data);
        }
        Ok(())
    }

    fn finish(&mut self, data: &mut CbData<'_>) -> Result<(), DetectorError> {
        if self.sketches.is_empty() {
            self.sketches = self.bounds.iter().map(|&b| QuantileSketch::new(b)).collect();
        }

        // merge sketches and instance lists under a global reduction
        let mut buf = Buffer::new();
        for sketch in &self.sketches {
            sketch.pack(&mut buf);
        }
        for list in &self.instances {
            let sorted = list.sorted();
            buf.put_u32(sorted.len() as u32);
            for instance in sorted {
                buf.put_f64(instance.duration);
                buf.put_time(instance.time);
                buf.put_u32(instance.callpath.as_u32());
                buf.put_u32(instance.location.0);
            }
        }
        let all = data.exchange.allgather_world(buf.into_bytes())?;

        let mut merged_sketches: Vec<QuantileSketch> =
            self.bounds.iter().map(|&b| QuantileSketch::new(b)).collect();
        let mut merged_instances = vec![TopInstances::default(); StatKind::ALL.len()];
        for bytes in all {
            let mut buf = Buffer::from_bytes(bytes);
            for sketch in merged_sketches.iter_mut() {
                sketch.merge(&QuantileSketch::unpack(&mut buf)?);
            }
            for list in merged_instances.iter_mut() {
                let n = buf.get_u32()?;
                for _ in 0..n {
                    let duration = buf.get_f64()?;
                    let time = buf.get_time()?;
                    let callpath = CallpathId::from(buf.get_u32()?);
                    let location = LocationId(buf.get_u32()?);
                    list.offer(Instance { duration, time, callpath, location });
                }
            }
        }

        self.records = itertools::izip!(StatKind::ALL, &merged_sketches, &merged_instances)
            .filter(|(_, sketch, _)| sketch.count() > 0)
            .map(|(kind, sketch, instances)| StatRecord {
                kind: kind.name(),
                count: sketch.count(),
                mean: sketch.mean(),
                median: sketch.quantile(0.5),
                min: sketch.min(),
                max: sketch.max(),
                sum: sketch.sum(),
                variance: sketch.variance(),
                q1: sketch.quantile(0.25),
                q3: sketch.quantile(0.75),
                instances: instances.sorted(),
            })
            .collect();

        // one writer is enough; the merged records are identical everywhere
        if data.location() == LocationId(0) {
            self.write_stat_file().map_err(DetectorError::StatFile)?;
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.empty
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        Vec::new()
    }

    fn stat_records(&self) -> Option<Vec<StatRecord>> {
        Some(self.records.clone())
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sketch_tracks_exact_moments() {
        let mut sketch = QuantileSketch::new(10.0);
        for v in [1.0, 2.0, 3.0, 4.0] {
            sketch.add(v);
        }
        assert_eq!(sketch.count(), 4);
        assert_eq!(sketch.sum(), 10.0);
        assert_eq!(sketch.mean(), 2.5);
        assert_eq!(sketch.min(), 1.0);
        assert_eq!(sketch.max(), 4.0);
        assert!((sketch.variance() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn sketch_quantiles_are_monotone_and_bounded() {
        let mut sketch = QuantileSketch::new(100.0);
        for i in 0..1000 {
            sketch.add(i as f64 / 10.0);
        }
        let q1 = sketch.quantile(0.25);
        let median = sketch.quantile(0.5);
        let q3 = sketch.quantile(0.75);
        assert!(q1 <= median && median <= q3);
        assert!(sketch.min() <= q1);
        assert!(q3 <= sketch.max());
        // the uniform distribution's quartiles, within a bin width
        assert!((q1 - 25.0).abs() < 2.0, "q1 = {q1}");
        assert!((median - 50.0).abs() < 2.0, "median = {median}");
        assert!((q3 - 75.0).abs() < 2.0, "q3 = {q3}");
    }

    #[test]
    fn sketch_merge_equals_joint_accumulation() {
        let mut a = QuantileSketch::new(10.0);
        let mut b = QuantileSketch::new(10.0);
        let mut joint = QuantileSketch::new(10.0);
        for v in [1.0, 5.0, 9.0] {
            a.add(v);
            joint.add(v);
        }
        for v in [2.0, 4.0] {
            b.add(v);
            joint.add(v);
        }
        a.merge(&b);
        assert_eq!(a, joint);
    }

    #[test]
    fn sketch_pack_unpack_round_trips() {
        let mut sketch = QuantileSketch::new(42.0);
        sketch.add(1.5);
        sketch.add(40.0);
        let mut buf = Buffer::new();
        sketch.pack(&mut buf);
        let mut buf = Buffer::from_bytes(buf.into_bytes());
        assert_eq!(QuantileSketch::unpack(&mut buf).unwrap(), sketch);
    }

    proptest::proptest! {
        #[test]
        fn merging_split_halves_matches_joint_accumulation(
            values in proptest::collection::vec(0.0f64..100.0, 1..200),
            split in 0usize..200,
        ) {
            let split = split.min(values.len());
            let (a_vals, b_vals) = values.split_at(split);
            let mut a = QuantileSketch::new(100.0);
            let mut b = QuantileSketch::new(100.0);
            let mut joint = QuantileSketch::new(100.0);
            for &v in a_vals {
                a.add(v);
                joint.add(v);
            }
            for &v in b_vals {
                b.add(v);
                joint.add(v);
            }
            a.merge(&b);
            proptest::prop_assert_eq!(a.count(), joint.count());
            proptest::prop_assert_eq!(a.min(), joint.min());
            proptest::prop_assert_eq!(a.max(), joint.max());
            // sums may differ in the last ulp from the changed addition order
            proptest::prop_assert!((a.sum() - joint.sum()).abs() < 1e-6);
            proptest::prop_assert_eq!(a.quantile(0.5), joint.quantile(0.5));
        }
    }

    fn instance(duration: f64, callpath: u32) -> Instance {
        Instance {
            duration,
            time: Timestamp::ZERO,
            callpath: CallpathId::from(callpath),
            location: LocationId(0),
        }
    }

    #[test]
    fn top_instances_replace_same_callpath_only_when_heavier() {
        let mut top = TopInstances::default();
        top.offer(instance(5.0, 1));
        top.offer(instance(3.0, 1));
        assert_eq!(top.sorted().len(), 1);
        assert_eq!(top.sorted()[0].duration, 5.0);
        top.offer(instance(7.0, 1));
        assert_eq!(top.sorted()[0].duration, 7.0);
    }

    #[test]
    fn top_instances_displace_the_lightest_distinct_record() {
        let mut top = TopInstances::default();
        for (d, cp) in [(5.0, 1), (4.0, 2), (3.0, 3), (2.0, 4), (1.0, 5)] {
            top.offer(instance(d, cp));
        }
        // full; a lighter candidate bounces, a heavier one displaces callpath 5
        top.offer(instance(0.5, 6));
        assert!(top.sorted().iter().all(|i| i.callpath != CallpathId::from(6)));
        top.offer(instance(6.0, 7));
        let sorted = top.sorted();
        assert_eq!(sorted[0].duration, 6.0);
        assert!(sorted.iter().all(|i| i.callpath != CallpathId::from(5)));
    }
}
