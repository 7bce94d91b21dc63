//! End-to-end analysis scenarios: small hand-built traces with exactly known severities.

use hindsight_core::Paradigm;
use hindsight_engine::{ids, AnalyzerConfig};
use hindsight_test_utils::{assert_close, callpath, init_tracing, WorldBuilder};

#[test]
fn two_process_late_sender() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(2);

    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Recv", Paradigm::Mpi)
        .recv(5.0, 1, 0, 8)
        .leave(5.0)
        .leave(6.0);
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(5.0, "MPI_Send", Paradigm::Mpi)
        .send(5.0, 0, 0, 8)
        .leave(5.0)
        .leave(6.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();

    let recv_cp = callpath(&report.defs, &["main", "MPI_Recv"]).unwrap();
    let sender_main = callpath(&report.defs, &["main"]).unwrap();

    // rank 0 waited 5 seconds for the late sender
    assert_close!(report.severity(ids::MPI_LATESENDER, 0.into(), recv_cp), 5.0);
    assert_close!(report.total(ids::MPI_LATESENDER), 5.0);

    // exactly one late-sender instance was recorded
    let ls_stats = report
        .statistics
        .iter()
        .find(|r| r.kind == "mpi_latesender")
        .expect("late-sender statistics");
    assert_eq!(ls_stats.count, 1);
    assert_close!(ls_stats.max, 5.0);

    // the delay analysis pins the full wait on the sender's computation interval
    assert_close!(report.severity(ids::DELAY_LATESENDER, 1.into(), sender_main), 5.0);
    // nothing upstream of the sender, so no long-term costs anywhere
    assert_close!(report.total(ids::DELAY_LATESENDER_LONGTERM), 0.0);
}

#[test]
fn four_process_barrier() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(4);

    for rank in 0..4u32 {
        let begin = rank as f64;
        world
            .on(rank)
            .enter(0.0, "main", Paradigm::User)
            .enter(begin, "MPI_Barrier", Paradigm::Mpi)
            .coll_begin(begin)
            .coll_end(3.0, None, 0, 0)
            .leave(3.0)
            .leave(4.0);
    }

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();
    let barrier_cp = callpath(&report.defs, &["main", "MPI_Barrier"]).unwrap();

    for rank in 0..4u32 {
        let expected = 3.0 - rank as f64;
        assert_close!(
            report.severity(ids::MPI_WAIT_BARRIER, rank.into(), barrier_cp),
            expected
        );
        assert_close!(report.severity(ids::MPI_BARRIER_COMPLETION, rank.into(), barrier_cp), 0.0);
    }

    // every rank's collective end counts once
    assert_close!(report.total(ids::SYNCS_COLL), 4.0);
}

#[test]
fn critical_path_chain() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(3);

    // P0 works 10, then sends; P1 waits for it, works 10, sends; P2 waits, works 10
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "work", Paradigm::User)
        .leave(10.0)
        .enter(10.0, "MPI_Send", Paradigm::Mpi)
        .send(10.0, 1, 0, 8)
        .leave(10.0)
        .leave(10.0);
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Recv", Paradigm::Mpi)
        .recv(10.0, 0, 0, 8)
        .leave(10.0)
        .enter(10.0, "work", Paradigm::User)
        .leave(20.0)
        .enter(20.0, "MPI_Send", Paradigm::Mpi)
        .send(20.0, 2, 0, 8)
        .leave(20.0)
        .leave(20.0);
    world
        .on(2)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Recv", Paradigm::Mpi)
        .recv(20.0, 1, 0, 8)
        .leave(20.0)
        .enter(20.0, "work", Paradigm::User)
        .leave(30.0)
        .leave(30.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();
    let work_cp = callpath(&report.defs, &["main", "work"]).unwrap();

    // the whole makespan lies on the critical path, 10 units of work per rank
    assert_close!(report.total(ids::CRITICAL_PATH), 30.0);
    for rank in 0..3u32 {
        assert_close!(report.severity(ids::CRITICAL_PATH, rank.into(), work_cp), 10.0);
        assert_close!(
            report.severity(ids::CRITICAL_PATH_ACTIVITIES, rank.into(), work_cp),
            10.0
        );
    }
    // a perfectly balanced chain has no critical imbalance
    assert_close!(report.total(ids::CRITICAL_IMBALANCE), 0.0);

    // delay costs follow the chain: P1's wait pins P0's work directly, and the share of P2's
    // wait that P1 could not absorb flows through to P0 as a long-term cost
    assert_close!(report.severity(ids::DELAY_LATESENDER, 0.into(), work_cp), 10.0);
    assert_close!(report.severity(ids::DELAY_LATESENDER, 1.into(), work_cp), 10.0);
    assert_close!(report.severity(ids::DELAY_LATESENDER_LONGTERM, 0.into(), work_cp), 10.0);
    // P1's receive wait propagated into P2's wait
    let recv_cp = callpath(&report.defs, &["main", "MPI_Recv"]).unwrap();
    assert_close!(report.severity(ids::WAIT_PROPAGATING, 1.into(), recv_cp), 10.0);
}

#[test]
fn wrong_order_sender() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(3);

    // the receiver posts two non-blocking receives, then completes them in a waitall; the
    // message posted first was sent last (send times 7 and 3)
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(1.0, "MPI_Irecv", Paradigm::Mpi)
        .recv_request(1.0, 1, 0, 8, 1)
        .leave(1.2)
        .enter(1.5, "MPI_Irecv", Paradigm::Mpi)
        .recv_request(1.5, 2, 0, 8, 2)
        .leave(1.7)
        .enter(5.0, "MPI_Waitall", Paradigm::Mpi)
        .recv_complete(7.0, 1, 0, 8, 1)
        .recv_complete(7.5, 2, 0, 8, 2)
        .leave(7.5)
        .leave(8.0);
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(7.0, "MPI_Send", Paradigm::Mpi)
        .send(7.0, 0, 0, 8)
        .leave(7.0)
        .leave(8.0);
    world
        .on(2)
        .enter(0.0, "main", Paradigm::User)
        .enter(3.0, "MPI_Send", Paradigm::Mpi)
        .send(3.0, 0, 0, 8)
        .leave(3.0)
        .leave(8.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();
    let waitall_cp = callpath(&report.defs, &["main", "MPI_Waitall"]).unwrap();

    // one late-sender instance: the waitall blocked 2 seconds for the late first message
    assert_close!(report.severity(ids::MPI_LATESENDER, 0.into(), waitall_cp), 2.0);
    let ls_stats = report
        .statistics
        .iter()
        .find(|r| r.kind == "mpi_latesender")
        .expect("late-sender statistics");
    assert_eq!(ls_stats.count, 1);

    // that wait was avoidable: the other message had long arrived
    assert_close!(report.severity(ids::MPI_LATESENDER_WO, 0.into(), waitall_cp), 2.0);
    assert_close!(report.total(ids::MPI_LSWO_DIFFERENT), 2.0);
    assert_close!(report.total(ids::MPI_LSWO_SAME), 0.0);
}

#[test]
fn omp_fork_imbalance() {
    init_tracing();
    let mut world = WorldBuilder::with_threads(4);

    // fork at t=0; threads enter the parallel region at {1, 1, 1, 3} and leave together
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .thread_fork(0.0)
        .enter(1.0, "!$omp parallel @jacobi.c:64", Paradigm::OpenMp)
        .leave(10.0)
        .thread_join(10.5)
        .leave(11.0);
    for thread in 1..4u32 {
        let begin = if thread == 3 { 3.0 } else { 1.0 };
        world
            .on(thread)
            .enter(begin, "!$omp parallel @jacobi.c:64", Paradigm::OpenMp)
            .leave(10.0);
    }

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();
    let master_parallel_cp =
        callpath(&report.defs, &["main", "!$omp parallel @jacobi.c:64"]).unwrap();

    // the master's fork call path pays until the last worker entered
    assert_close!(report.severity(ids::OMP_FORK, 0.into(), master_parallel_cp), 3.0);
    // coincident leaves: no join idleness, no barrier waits
    assert_close!(report.total(ids::OMP_JOIN), 0.0);
    assert_close!(report.total(ids::OMP_EBARRIER_WAIT), 0.0);
    assert_close!(report.total(ids::OMP_IBARRIER_WAIT), 0.0);
}

#[test]
fn collective_delay_propagation() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(3);

    // rank 0 spends 4 units in a send before the barrier; ranks 1 and 2 wait there
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Send", Paradigm::Mpi)
        .send(0.0, 1, 0, 8)
        .leave(4.0)
        .enter(4.0, "MPI_Barrier", Paradigm::Mpi)
        .coll_begin(4.0)
        .coll_end(4.5, None, 0, 0)
        .leave(4.5)
        .leave(5.0);
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Recv", Paradigm::Mpi)
        .recv(0.0, 0, 0, 8)
        .leave(0.5)
        .enter(0.5, "MPI_Barrier", Paradigm::Mpi)
        .coll_begin(0.5)
        .coll_end(4.5, None, 0, 0)
        .leave(4.5)
        .leave(5.0);
    world
        .on(2)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.5, "MPI_Barrier", Paradigm::Mpi)
        .coll_begin(0.5)
        .coll_end(4.5, None, 0, 0)
        .leave(4.5)
        .leave(5.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();
    let barrier_cp = callpath(&report.defs, &["main", "MPI_Barrier"]).unwrap();
    let send_cp = callpath(&report.defs, &["main", "MPI_Send"]).unwrap();

    // ranks 1 and 2 waited 3.5 each for rank 0
    assert_close!(report.severity(ids::MPI_WAIT_BARRIER, 1.into(), barrier_cp), 3.5);
    assert_close!(report.severity(ids::MPI_WAIT_BARRIER, 2.into(), barrier_cp), 3.5);

    // the short-term barrier delay pins rank 0's send interval
    assert_close!(report.severity(ids::DELAY_BARRIER, 0.into(), send_cp), 4.0);
    // delay costs never exceed the waiting time they explain
    assert!(report.total(ids::DELAY_BARRIER) <= 7.0 + 1e-9);
}
