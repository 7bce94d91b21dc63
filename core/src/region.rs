use core::fmt::{self, Display};

// REGION ID
// ================================================================================================

/// Stable identifier of a region in the global definitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionId(pub u32);

impl Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

// PARADIGM
// ================================================================================================

/// Programming paradigm a region belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Paradigm {
    /// MPI library routines.
    Mpi,
    /// OpenMP constructs and API routines.
    OpenMp,
    /// Pthread API routines.
    Pthread,
    /// Anything else (user code, unknown libraries).
    User,
}

// REGION
// ================================================================================================

/// A source-code region referenced by call paths and enter/leave events.
///
/// Classification is purely syntactic on the lowercased region name and the paradigm; no
/// semantic information beyond the name is consulted.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    name: String,
    canonical: String,
    paradigm: Paradigm,
}

impl Region {
    /// Returns a new region with the specified display name and paradigm.
    pub fn new(name: impl Into<String>, paradigm: Paradigm) -> Self {
        let name = name.into();
        let canonical = name.to_ascii_lowercase();
        Self { name, canonical, paradigm }
    }

    /// Returns the region's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the region's paradigm.
    pub fn paradigm(&self) -> Paradigm {
        self.paradigm
    }

    // MPI CLASSIFIERS
    // --------------------------------------------------------------------------------------------

    fn is_mpi(&self, suffixes: &[&str]) -> bool {
        self.paradigm == Paradigm::Mpi && suffixes.iter().any(|s| self.canonical == *s)
    }

    /// An MPI barrier.
    pub fn is_mpi_barrier(&self) -> bool {
        self.is_mpi(&["mpi_barrier"])
    }

    /// A rooted one-to-N collective (broadcast-like).
    pub fn is_mpi_12n(&self) -> bool {
        self.is_mpi(&["mpi_bcast", "mpi_scatter", "mpi_scatterv"])
    }

    /// A rooted N-to-one collective (reduce-like).
    pub fn is_mpi_n21(&self) -> bool {
        self.is_mpi(&["mpi_reduce", "mpi_gather", "mpi_gatherv"])
    }

    /// An unrooted N-to-N collective.
    pub fn is_mpi_n2n(&self) -> bool {
        self.is_mpi(&[
            "mpi_allreduce",
            "mpi_alltoall",
            "mpi_alltoallv",
            "mpi_alltoallw",
            "mpi_allgather",
            "mpi_allgatherv",
            "mpi_reduce_scatter",
            "mpi_reduce_scatter_block",
        ])
    }

    /// A prefix-reduction collective.
    pub fn is_mpi_scan(&self) -> bool {
        self.is_mpi(&["mpi_scan", "mpi_exscan"])
    }

    /// A send mode that may block until the receiver arrives.
    pub fn is_mpi_block_send(&self) -> bool {
        self.is_mpi(&["mpi_send", "mpi_ssend", "mpi_sendrecv", "mpi_sendrecv_replace"])
    }

    /// A single-request completion call.
    pub fn is_mpi_wait_single(&self) -> bool {
        self.is_mpi(&["mpi_wait", "mpi_waitany"])
    }

    /// A multi-request completion call.
    pub fn is_mpi_wait_multi(&self) -> bool {
        self.is_mpi(&["mpi_waitall", "mpi_waitsome"])
    }

    /// A test-style (non-blocking) completion call.
    pub fn is_mpi_testx(&self) -> bool {
        self.is_mpi(&["mpi_test", "mpi_testany", "mpi_testall", "mpi_testsome"])
    }

    /// MPI initialization.
    pub fn is_mpi_init(&self) -> bool {
        self.is_mpi(&["mpi_init", "mpi_init_thread"])
    }

    /// MPI finalization.
    pub fn is_mpi_finalize(&self) -> bool {
        self.is_mpi(&["mpi_finalize"])
    }

    // MPI RMA CLASSIFIERS
    // --------------------------------------------------------------------------------------------

    /// An RMA fence synchronization.
    pub fn is_mpi_rma_fence(&self) -> bool {
        self.is_mpi(&["mpi_win_fence"])
    }

    /// An RMA window creation.
    pub fn is_mpi_rma_create(&self) -> bool {
        self.is_mpi(&["mpi_win_create", "mpi_win_allocate"])
    }

    /// An RMA window destruction.
    pub fn is_mpi_rma_free(&self) -> bool {
        self.is_mpi(&["mpi_win_free"])
    }

    /// Opening of a GATS access epoch.
    pub fn is_mpi_rma_start(&self) -> bool {
        self.is_mpi(&["mpi_win_start"])
    }

    /// Closing of a GATS exposure epoch.
    pub fn is_mpi_rma_wait(&self) -> bool {
        self.is_mpi(&["mpi_win_wait", "mpi_win_test"])
    }

    /// Closing of a GATS access epoch.
    pub fn is_mpi_rma_complete(&self) -> bool {
        self.is_mpi(&["mpi_win_complete"])
    }

    /// Opening of a GATS exposure epoch.
    pub fn is_mpi_rma_post(&self) -> bool {
        self.is_mpi(&["mpi_win_post"])
    }

    /// Any active-target RMA synchronization call.
    pub fn is_mpi_rma_sync(&self) -> bool {
        self.is_mpi_rma_fence()
            || self.is_mpi_rma_start()
            || self.is_mpi_rma_wait()
            || self.is_mpi_rma_complete()
            || self.is_mpi_rma_post()
    }

    /// An RMA communication call (put/get/accumulate).
    pub fn is_mpi_rma_comm(&self) -> bool {
        self.is_mpi(&["mpi_put", "mpi_get", "mpi_accumulate"])
    }

    /// A passive-target RMA synchronization call.
    pub fn is_mpi_rma_passive(&self) -> bool {
        self.is_mpi(&["mpi_win_lock", "mpi_win_unlock"])
    }

    // OPENMP CLASSIFIERS
    // --------------------------------------------------------------------------------------------

    /// An OpenMP parallel region.
    pub fn is_omp_parallel(&self) -> bool {
        self.paradigm == Paradigm::OpenMp && self.canonical.contains("parallel")
    }

    /// Any OpenMP barrier (explicit or implicit).
    pub fn is_omp_barrier(&self) -> bool {
        self.paradigm == Paradigm::OpenMp && self.canonical.contains("barrier")
    }

    /// An implicit OpenMP barrier (at the end of a worksharing construct or parallel region).
    pub fn is_omp_ibarrier(&self) -> bool {
        self.is_omp_barrier() && self.canonical.contains("implicit")
    }

    /// An explicit OpenMP barrier (`!$omp barrier`).
    pub fn is_omp_ebarrier(&self) -> bool {
        self.is_omp_barrier() && !self.canonical.contains("implicit")
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("MPI_Barrier", true, false, false, false)]
    #[case("MPI_Bcast", false, true, false, false)]
    #[case("MPI_Reduce", false, false, true, false)]
    #[case("MPI_Allreduce", false, false, false, true)]
    #[case("MPI_Alltoallv", false, false, false, true)]
    fn collective_classification(
        #[case] name: &str,
        #[case] barrier: bool,
        #[case] one2n: bool,
        #[case] n2one: bool,
        #[case] n2n: bool,
    ) {
        let r = Region::new(name, Paradigm::Mpi);
        assert_eq!(r.is_mpi_barrier(), barrier);
        assert_eq!(r.is_mpi_12n(), one2n);
        assert_eq!(r.is_mpi_n21(), n2one);
        assert_eq!(r.is_mpi_n2n(), n2n);
    }

    #[test]
    fn classification_requires_mpi_paradigm() {
        let r = Region::new("MPI_Barrier", Paradigm::User);
        assert!(!r.is_mpi_barrier());
    }

    #[test]
    fn waitx_and_testx_are_distinct() {
        let wait = Region::new("MPI_Waitall", Paradigm::Mpi);
        assert!(wait.is_mpi_wait_multi());
        assert!(!wait.is_mpi_wait_single());
        assert!(!wait.is_mpi_testx());

        let test = Region::new("MPI_Testany", Paradigm::Mpi);
        assert!(test.is_mpi_testx());
        assert!(!test.is_mpi_wait_single());
    }

    #[test]
    fn omp_barrier_flavors() {
        let explicit = Region::new("!$omp barrier @file.c:10", Paradigm::OpenMp);
        assert!(explicit.is_omp_ebarrier());
        assert!(!explicit.is_omp_ibarrier());

        let implicit = Region::new("!$omp implicit barrier @file.c:20", Paradigm::OpenMp);
        assert!(implicit.is_omp_ibarrier());
        assert!(!implicit.is_omp_ebarrier());

        let parallel = Region::new("!$omp parallel @file.c:5", Paradigm::OpenMp);
        assert!(parallel.is_omp_parallel());
        assert!(!parallel.is_omp_barrier());
    }

    #[test]
    fn rma_sync_covers_gats_and_fence() {
        for name in ["MPI_Win_fence", "MPI_Win_start", "MPI_Win_complete", "MPI_Win_post"] {
            assert!(Region::new(name, Paradigm::Mpi).is_mpi_rma_sync(), "{name}");
        }
        assert!(!Region::new("MPI_Put", Paradigm::Mpi).is_mpi_rma_sync());
        assert!(Region::new("MPI_Put", Paradigm::Mpi).is_mpi_rma_comm());
    }
}
