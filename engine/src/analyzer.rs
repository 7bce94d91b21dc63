use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use hindsight_core::{CallpathId, EventIdx, EventKind, GlobalDefs, LocalTrace, LocationId};

use crate::{
    am::{AmAttachment, AmRuntime},
    caches::{LockCache, RmaEpochCache, TimeMapCache},
    cbdata::CbData,
    criticalpath::{CriticalPath, CriticalPathImpact},
    delay::DelayAnalysis,
    errors::{AnalysisError, DetectorError},
    exchange::{Exchange, ExchangeHandle},
    patterns::{
        AsyncDriver, ClockViolationCounts, CollectivePatterns, CountPatterns, LateReceiver,
        LateSender, LateSenderWrongOrder, OmpPatterns, PatternMeta, PthreadLockPatterns,
        RmaPatterns, SeverityMap, SynchpointRecorder, TimePattern, VisitsPattern,
    },
    replay::{ReplayEngine, ReplayPhase, UserEvent},
    report::{AnalysisReport, PatternReport},
    statistics::{StatRecord, StatisticsPattern},
    synchpoints::SynchpointHandler,
};

// ANALYZER CONFIG
// ================================================================================================

/// Configuration of one analysis run.
///
/// Defaults attach the full analysis (wait-state detection, statistics, critical path, delay
/// analysis) without asynchronous processing and without a statistics side file.
#[derive(Clone)]
pub struct AnalyzerConfig {
    enable_asynchronous: bool,
    enable_statistics: bool,
    enable_critical_path: bool,
    enable_delay_analysis: bool,
    archive_directory: Option<PathBuf>,
    am_runtime: Option<Arc<dyn AmRuntime>>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enable_asynchronous: false,
            enable_statistics: true,
            enable_critical_path: true,
            enable_delay_analysis: true,
            archive_directory: None,
            am_runtime: None,
        }
    }
}

impl AnalyzerConfig {
    /// Returns a new configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the asynchronous active-message driver.
    pub fn with_asynchronous(mut self, enabled: bool) -> Self {
        self.enable_asynchronous = enabled;
        self
    }

    /// Attaches the platform active-message runtime used when asynchronous processing is
    /// enabled.
    pub fn with_am_runtime(mut self, runtime: Arc<dyn AmRuntime>) -> Self {
        self.am_runtime = Some(runtime);
        self
    }

    /// Enables or disables the statistics collector.
    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.enable_statistics = enabled;
        self
    }

    /// Enables or disables critical-path analysis and its derived impact metrics.
    pub fn with_critical_path(mut self, enabled: bool) -> Self {
        self.enable_critical_path = enabled;
        self
    }

    /// Enables or disables the delay (root-cause) analysis.
    pub fn with_delay_analysis(mut self, enabled: bool) -> Self {
        self.enable_delay_analysis = enabled;
        self
    }

    /// Sets the destination directory of the `trace.stat` side file.
    pub fn with_archive_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_directory = Some(dir.into());
        self
    }
}

// CALL-PATH ANNOTATION
// ================================================================================================

/// Interns every event's call path into the shared tree, returning the per-event annotation.
///
/// The annotation is the call stack's leaf at each event: enters map to the path they open,
/// leaves to the path they close, and every other event to the innermost open path.
fn annotate_callpaths(defs: &mut GlobalDefs, trace: &LocalTrace) -> Vec<CallpathId> {
    let mut annotation = Vec::with_capacity(trace.len());
    let mut current = CallpathId::ROOT;
    for ev in trace.events() {
        match ev.kind() {
            EventKind::Enter => {
                if let Some(region) = ev.record().region() {
                    current = defs.callpaths.intern(current, region);
                }
                annotation.push(current);
            },
            EventKind::Leave => {
                annotation.push(current);
                current = defs.callpaths.node(current).parent().unwrap_or(CallpathId::ROOT);
            },
            _ => annotation.push(current),
        }
    }
    annotation
}

// WORKER
// ================================================================================================

struct WorkerOutput {
    location: LocationId,
    results: Vec<(PatternMeta, SeverityMap)>,
    stats: Vec<StatRecord>,
}

fn build_engine(
    config: &AnalyzerConfig,
) -> Result<ReplayEngine, AnalysisError> {
    let mut engine = ReplayEngine::new();
    engine.register(Box::new(VisitsPattern::default()))?;
    engine.register(Box::new(TimePattern::default()))?;
    engine.register(Box::new(ClockViolationCounts::default()))?;
    engine.register(Box::new(LateSender::default()))?;
    engine.register(Box::new(LateSenderWrongOrder::default()))?;
    engine.register(Box::new(LateReceiver::default()))?;
    engine.register(Box::new(CollectivePatterns::default()))?;
    engine.register(Box::new(RmaPatterns::default()))?;
    engine.register(Box::new(OmpPatterns::default()))?;
    engine.register(Box::new(PthreadLockPatterns::default()))?;
    engine.register(Box::new(CountPatterns::default()))?;
    if config.enable_critical_path {
        engine.register(Box::new(CriticalPath::default()))?;
        engine.register(Box::new(CriticalPathImpact::default()))?;
    }
    if config.enable_delay_analysis {
        engine.register(Box::new(DelayAnalysis::default()))?;
    }
    if config.enable_statistics {
        engine.register(Box::new(StatisticsPattern::new(config.archive_directory.clone())))?;
    }
    if config.enable_asynchronous {
        if let Some(runtime) = &config.am_runtime {
            engine.register(Box::new(AsyncDriver::new(Arc::clone(runtime))))?;
        }
    }
    // the recorder runs after every detector on a tag, so it sees their idle annotations
    engine.register(Box::new(SynchpointRecorder::default()))?;
    Ok(engine)
}

fn phase_enabled(phase: ReplayPhase, config: &AnalyzerConfig) -> bool {
    match phase {
        // the backward cost sweep only serves the delay analysis
        ReplayPhase::BackwardCost => config.enable_delay_analysis,
        _ => true,
    }
}

fn barrier_err(location: LocationId, source: DetectorError) -> AnalysisError {
    AnalysisError::Detector {
        phase: ReplayPhase::MainForward,
        location,
        user_event: UserEvent::SweepEnd,
        event: EventIdx::new(0),
        source,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    defs: &GlobalDefs,
    trace: &LocalTrace,
    cpaths: &[CallpathId],
    exchange: ExchangeHandle,
    locks: &LockCache,
    rma: &RmaEpochCache,
    config: &AnalyzerConfig,
) -> Result<WorkerOutput, AnalysisError> {
    let engine = build_engine(config)?;
    let timemaps = TimeMapCache::new(trace, cpaths, &defs.callpaths);
    let mut synch = SynchpointHandler::new();
    let location = trace.location();

    for phase in ReplayPhase::ALL {
        if phase_enabled(phase, config) {
            let mut data =
                CbData::new(defs, trace, cpaths, &exchange, &timemaps, &mut synch, locks, rma);
            engine.run_phase(phase, &mut data)?;
        }
        // sweeps never overlap across locations
        exchange.barrier_all().map_err(|e| barrier_err(location, e))?;
    }

    let mut data = CbData::new(defs, trace, cpaths, &exchange, &timemaps, &mut synch, locks, rma);
    engine.finish(&mut data)?;

    Ok(WorkerOutput {
        location,
        results: engine.results(),
        stats: engine.stat_records(),
    })
}

// ANALYSIS DRIVER
// ================================================================================================

/// Runs the full analysis: one worker thread per location, replaying all phases in lockstep,
/// then collates the per-location severities into the report.
///
/// This is the stand-in for the out-of-scope command-line driver; the inputs are the already
/// loaded definitions and linked traces (one per location, in location order).
#[tracing::instrument(skip_all, fields(locations = traces.len()))]
pub fn run_analysis(
    mut defs: GlobalDefs,
    traces: Vec<LocalTrace>,
    config: &AnalyzerConfig,
) -> Result<AnalysisReport, AnalysisError> {
    if traces.len() != defs.num_locations() {
        return Err(AnalysisError::IncompleteTraceSet {
            expected: defs.num_locations(),
            found: traces.len(),
        });
    }
    for (position, trace) in traces.iter().enumerate() {
        if trace.location() != LocationId(position as u32) {
            return Err(AnalysisError::MisplacedTrace { position, location: trace.location() });
        }
    }

    let cpaths: Vec<Vec<CallpathId>> =
        traces.iter().map(|t| annotate_callpaths(&mut defs, t)).collect();
    let locks = LockCache::build(&traces);
    let rma = RmaEpochCache::build(&traces);
    let hub = Exchange::new(traces.len());

    let _am = config
        .am_runtime
        .as_ref()
        .filter(|_| config.enable_asynchronous)
        .map(|rt| AmAttachment::new(Arc::clone(rt)));

    let outputs: Vec<Result<WorkerOutput, AnalysisError>> = std::thread::scope(|scope| {
        let hub = &hub;
        let handles: Vec<_> = traces
            .iter()
            .zip(&cpaths)
            .map(|(trace, cpaths)| {
                let exchange = hub.handle(trace.location());
                let defs = &defs;
                let locks = &locks;
                let rma = &rma;
                scope.spawn(move || {
                    let result = run_worker(defs, trace, cpaths, exchange, locks, rma, config);
                    if let Err(e) = &result {
                        // unblock every peer still waiting in a rendezvous
                        hub.poison(e.to_string());
                    }
                    result
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(&traces)
            .map(|(handle, trace)| {
                handle.join().unwrap_or(Err(AnalysisError::WorkerPanicked {
                    location: trace.location(),
                }))
            })
            .collect()
    });

    let mut worker_outputs = Vec::with_capacity(outputs.len());
    for output in outputs {
        worker_outputs.push(output?);
    }
    Ok(collate(defs, worker_outputs))
}

fn collate(defs: GlobalDefs, outputs: Vec<WorkerOutput>) -> AnalysisReport {
    let mut patterns: BTreeMap<u32, PatternReport> = BTreeMap::new();
    let mut statistics = Vec::new();

    for output in outputs {
        if statistics.is_empty() {
            // merged under a global reduction; identical on every location
            statistics = output.stats;
        }
        for (meta, severities) in output.results {
            if meta.hidden {
                continue;
            }
            let report = patterns.entry(meta.id).or_insert_with(|| PatternReport {
                meta,
                severities: BTreeMap::new(),
            });
            let slot = report.severities.entry(output.location).or_default();
            for (cp, v) in severities.iter() {
                *slot.entry(cp).or_insert(0.0) += v;
            }
        }
    }

    AnalysisReport {
        defs,
        patterns: patterns.into_values().collect(),
        statistics,
    }
}
