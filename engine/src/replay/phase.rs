// REPLAY PHASE
// ================================================================================================

/// Direction of a sweep over a location's event stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// Oldest event first.
    Forward,
    /// Newest event first.
    Backward,
}

/// The closed enumeration of replay sweeps.
///
/// Sweeps run strictly sequentially in the order of this enum; all locations pass a global
/// barrier between consecutive sweeps. Pattern finalization ("finished") is not a sweep: it is a
/// per-pattern hook invoked after the last sweep.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum ReplayPhase {
    /// One-shot forward pass publishing per-kind duration bounds before the main analysis.
    Prepare = 0,
    /// The main forward analysis sweep (the unnamed sweep of the original design).
    MainForward = 1,
    /// Backward sweep carrying the critical-path flag ("bws").
    BackwardSync = 2,
    /// Backward sweep attributing delay costs ("bwc").
    BackwardCost = 3,
    /// Forward sweep accumulating count metrics ("fwc").
    ForwardCount = 4,
}

impl ReplayPhase {
    /// The number of phases; dimensions the dispatch table.
    pub const COUNT: usize = 5;

    /// All phases, in execution order.
    pub const ALL: [ReplayPhase; Self::COUNT] = [
        Self::Prepare,
        Self::MainForward,
        Self::BackwardSync,
        Self::BackwardCost,
        Self::ForwardCount,
    ];

    /// Returns the sweep direction of this phase.
    pub fn direction(self) -> Direction {
        match self {
            Self::Prepare | Self::MainForward | Self::ForwardCount => Direction::Forward,
            Self::BackwardSync | Self::BackwardCost => Direction::Backward,
        }
    }

    /// Returns the historical short name of the sweep.
    pub fn name(self) -> &'static str {
        match self {
            Self::Prepare => "pre",
            Self::MainForward => "",
            Self::BackwardSync => "bws",
            Self::BackwardCost => "bwc",
            Self::ForwardCount => "fwc",
        }
    }

    /// Returns the table index of this phase.
    #[inline(always)]
    pub fn as_usize(self) -> usize {
        self as usize
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn all_covers_every_phase_in_order() {
        for (i, phase) in ReplayPhase::ALL.iter().enumerate() {
            assert_eq!(phase.as_usize(), i);
        }
    }

    #[rstest]
    #[case(ReplayPhase::Prepare, Direction::Forward, "pre")]
    #[case(ReplayPhase::MainForward, Direction::Forward, "")]
    #[case(ReplayPhase::BackwardSync, Direction::Backward, "bws")]
    #[case(ReplayPhase::BackwardCost, Direction::Backward, "bwc")]
    #[case(ReplayPhase::ForwardCount, Direction::Forward, "fwc")]
    fn directions_and_names(
        #[case] phase: ReplayPhase,
        #[case] direction: Direction,
        #[case] name: &str,
    ) {
        assert_eq!(phase.direction(), direction);
        assert_eq!(phase.name(), name);
    }
}
