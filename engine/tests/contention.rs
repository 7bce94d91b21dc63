//! RMA epoch checks and lock-contention detection.

use hindsight_core::{LockParadigm, Paradigm};
use hindsight_engine::{ids, AnalyzerConfig};
use hindsight_test_utils::{assert_close, callpath, init_tracing, WorldBuilder};

#[test]
fn rma_late_post_and_early_wait() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(2);
    let win = world.window();

    // origin: opens its access epoch, transfers, then blocks in Win_complete until the
    // target's exposure epoch finally opens
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Win_start", Paradigm::Mpi)
        .rma_start(0.1, win)
        .leave(0.1)
        .enter(0.2, "MPI_Put", Paradigm::Mpi)
        .rma_put(0.3, win, 1, 64)
        .leave(0.3)
        .enter(0.5, "MPI_Win_complete", Paradigm::Mpi)
        .rma_complete(1.2, win)
        .leave(1.2)
        .leave(7.0);
    // target: posts late, then waits for the origin's completion
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.9, "MPI_Win_post", Paradigm::Mpi)
        .rma_post(1.0, win)
        .leave(1.0)
        .enter(1.0, "MPI_Win_wait", Paradigm::Mpi)
        .rma_wait(1.3, win)
        .leave(1.3)
        .leave(7.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();

    // the origin entered Win_complete at 0.5 but the exposure epoch only opened at 1.0
    let complete_cp = callpath(&report.defs, &["main", "MPI_Win_complete"]).unwrap();
    assert_close!(report.severity(ids::MPI_RMA_LATE_POST, 0.into(), complete_cp), 0.5);

    // the target entered Win_wait at 1.0 but the last complete landed at 1.2
    let wait_cp = callpath(&report.defs, &["main", "MPI_Win_wait"]).unwrap();
    assert_close!(report.severity(ids::MPI_RMA_EARLY_WAIT, 1.into(), wait_cp), 0.2);
    // all of it sits between the last transfer and the completion
    assert_close!(report.severity(ids::MPI_RMA_LATE_COMPLETE, 1.into(), wait_cp), 0.2);
}

#[test]
fn rma_lock_contention_counts_the_overlap() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(2);
    let win = world.window();

    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Win_lock", Paradigm::Mpi)
        .rma_lock(0.1, win, 0, true)
        .leave(0.2)
        .enter(1.9, "MPI_Win_unlock", Paradigm::Mpi)
        .rma_unlock(2.0, win, 0)
        .leave(2.0)
        .leave(4.0);
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(1.0, "MPI_Win_lock", Paradigm::Mpi)
        .rma_lock(2.0, win, 0, true)
        .leave(2.1)
        .enter(2.9, "MPI_Win_unlock", Paradigm::Mpi)
        .rma_unlock(3.0, win, 0)
        .leave(3.0)
        .leave(4.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();

    // rank 1 wanted the lock at 1.0 but rank 0 held it until 2.0
    let unlock_cp = callpath(&report.defs, &["main", "MPI_Win_unlock"]).unwrap();
    assert_close!(report.severity(ids::MPI_RMA_LOCK_CONTENTION, 1.into(), unlock_cp), 1.0);
    assert_close!(report.total(ids::MPI_RMA_LOCK_CONTENTION), 1.0);
}

#[test]
fn omp_critical_contention() {
    init_tracing();
    let mut world = WorldBuilder::with_threads(2);

    world
        .on(0)
        .enter(0.0, "!$omp critical @sum.c:12", Paradigm::OpenMp)
        .acquire_lock(0.1, 0, LockParadigm::OmpCritical)
        .release_lock(2.0, 0, LockParadigm::OmpCritical)
        .leave(2.1);
    world
        .on(1)
        .enter(0.5, "!$omp critical @sum.c:12", Paradigm::OpenMp)
        .acquire_lock(2.0, 0, LockParadigm::OmpCritical)
        .release_lock(3.0, 0, LockParadigm::OmpCritical)
        .leave(3.1);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();

    let critical_cp = callpath(&report.defs, &["!$omp critical @sum.c:12"]).unwrap();
    assert_close!(
        report.severity(ids::OMP_CRITICAL_CONTENTION, 1.into(), critical_cp),
        1.5
    );
    // the first acquirer never waited
    assert_close!(report.total(ids::OMP_CRITICAL_CONTENTION), 1.5);
    // and the lock API metric stays untouched
    assert_close!(report.total(ids::OMP_LOCK_API_CONTENTION), 0.0);
}

#[test]
fn pthread_mutex_contention() {
    init_tracing();
    let mut world = WorldBuilder::with_threads(2);

    world
        .on(0)
        .enter(0.0, "pthread_mutex_lock", Paradigm::Pthread)
        .acquire_lock(0.1, 7, LockParadigm::PthreadMutex)
        .leave(0.2)
        .enter(4.0, "pthread_mutex_unlock", Paradigm::Pthread)
        .release_lock(4.1, 7, LockParadigm::PthreadMutex)
        .leave(4.2);
    world
        .on(1)
        .enter(1.0, "pthread_mutex_lock", Paradigm::Pthread)
        .acquire_lock(4.1, 7, LockParadigm::PthreadMutex)
        .leave(4.2)
        .enter(5.0, "pthread_mutex_unlock", Paradigm::Pthread)
        .release_lock(5.1, 7, LockParadigm::PthreadMutex)
        .leave(5.2);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();

    let lock_cp = callpath(&report.defs, &["pthread_mutex_lock"]).unwrap();
    assert_close!(
        report.severity(ids::PTHREAD_MUTEX_CONTENTION, 1.into(), lock_cp),
        3.1
    );
    assert_close!(report.total(ids::PTHREAD_CONDITION_CONTENTION), 0.0);
}
