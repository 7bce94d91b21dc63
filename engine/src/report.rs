use std::collections::BTreeMap;

use hindsight_core::{CallpathId, GlobalDefs, LocationId};

use crate::{patterns::PatternMeta, statistics::StatRecord};

// PATTERN REPORT
// ================================================================================================

/// One pattern's slice of the severity cube: its identity plus the per-location
/// `call path → severity` maps.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PatternReport {
    /// The pattern's static identity.
    pub meta: PatternMeta,
    /// Severities per location and call path.
    pub severities: BTreeMap<LocationId, BTreeMap<CallpathId, f64>>,
}

impl PatternReport {
    /// Returns the severity of `(location, call path)`, zero if absent.
    pub fn severity(&self, location: LocationId, cp: CallpathId) -> f64 {
        self.severities
            .get(&location)
            .and_then(|m| m.get(&cp))
            .copied()
            .unwrap_or(0.0)
    }

    /// Returns the severities collapsed over locations.
    pub fn by_callpath(&self) -> BTreeMap<CallpathId, f64> {
        let mut out = BTreeMap::new();
        for map in self.severities.values() {
            for (&cp, &v) in map {
                *out.entry(cp).or_insert(0.0) += v;
            }
        }
        out
    }

    /// Returns the sum over all locations and call paths.
    pub fn total(&self) -> f64 {
        self.severities.values().flat_map(|m| m.values()).sum()
    }

    /// Returns the sum over all call paths on one location.
    pub fn total_on(&self, location: LocationId) -> f64 {
        self.severities.get(&location).map(|m| m.values().sum()).unwrap_or(0.0)
    }
}

// ANALYSIS REPORT
// ================================================================================================

/// The analyzer's output: the call-path × metric severity cube plus the optional per-kind
/// statistics records.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnalysisReport {
    /// The global definitions, including the calling-context tree the cube is keyed by.
    pub defs: GlobalDefs,
    /// Per-pattern severity slices, ordered by pattern id.
    pub patterns: Vec<PatternReport>,
    /// Per-kind statistics records, if the statistics collector was attached.
    pub statistics: Vec<StatRecord>,
}

impl AnalysisReport {
    /// Returns the report of the pattern with the specified id.
    pub fn pattern(&self, id: u32) -> Option<&PatternReport> {
        self.patterns.iter().find(|p| p.meta.id == id)
    }

    /// Returns the severity of `(pattern, location, call path)`, zero if the pattern is absent.
    pub fn severity(&self, pattern: u32, location: LocationId, cp: CallpathId) -> f64 {
        self.pattern(pattern).map(|p| p.severity(location, cp)).unwrap_or(0.0)
    }

    /// Returns the total severity of a pattern across the whole cube.
    pub fn total(&self, pattern: u32) -> f64 {
        self.pattern(pattern).map(|p| p.total()).unwrap_or(0.0)
    }
}
