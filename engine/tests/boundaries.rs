//! Boundary behavior: degenerate traces, disabled analysis stages, output invariants.

use hindsight_core::Paradigm;
use hindsight_engine::{ids, AnalyzerConfig};
use hindsight_test_utils::{assert_close, callpath, init_tracing, WorldBuilder};

#[test]
fn empty_trace_produces_empty_severities() {
    init_tracing();
    let world = WorldBuilder::with_ranks(1);
    let report = world.analyze(&AnalyzerConfig::default()).unwrap();

    for pattern in &report.patterns {
        assert_close!(pattern.total(), 0.0);
    }
    assert!(report.statistics.is_empty());
}

#[test]
fn single_event_trace_is_harmless() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(1);
    world.on(0).task_complete(0.0);
    let report = world.analyze(&AnalyzerConfig::default()).unwrap();
    for pattern in &report.patterns {
        assert_close!(pattern.total(), 0.0);
    }
}

#[test]
fn minimal_trace_yields_only_visits_and_time() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(1);
    world.on(0).enter(0.0, "main", Paradigm::User).leave(2.5);
    // a one-region trace trivially *is* its own critical path; disable the derived stages so
    // the only remaining output is the base metrics
    let config = AnalyzerConfig::default()
        .with_statistics(false)
        .with_critical_path(false)
        .with_delay_analysis(false);
    let report = world.analyze(&config).unwrap();

    let main_cp = callpath(&report.defs, &["main"]).unwrap();
    assert_close!(report.severity(ids::VISITS, 0.into(), main_cp), 1.0);
    assert_close!(report.severity(ids::TIME, 0.into(), main_cp), 2.5);
    for pattern in &report.patterns {
        if pattern.meta.id != ids::VISITS && pattern.meta.id != ids::TIME {
            assert_close!(pattern.total(), 0.0);
        }
    }
}

#[test]
fn identical_timestamps_never_go_negative() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(2);
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Recv", Paradigm::Mpi)
        .recv(0.0, 1, 0, 4)
        .leave(0.0)
        .enter(0.0, "MPI_Barrier", Paradigm::Mpi)
        .coll_begin(0.0)
        .coll_end(0.0, None, 0, 0)
        .leave(0.0)
        .leave(0.0);
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Send", Paradigm::Mpi)
        .send(0.0, 0, 0, 4)
        .leave(0.0)
        .enter(0.0, "MPI_Barrier", Paradigm::Mpi)
        .coll_begin(0.0)
        .coll_end(0.0, None, 0, 0)
        .leave(0.0)
        .leave(0.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();

    // every difference reduces to exactly zero and nothing dips below it
    for pattern in &report.patterns {
        for map in pattern.severities.values() {
            for &v in map.values() {
                assert!(v >= 0.0, "{} went negative: {v}", pattern.meta.unique_name);
            }
        }
    }
    assert_close!(report.total(ids::MPI_LATESENDER), 0.0);
    assert_close!(report.total(ids::MPI_WAIT_BARRIER), 0.0);
}

#[test]
fn clock_violation_is_reported_not_propagated() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(2);
    // the sender's clock claims the message left after it arrived
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Recv", Paradigm::Mpi)
        .recv(1.0, 1, 0, 4)
        .leave(1.0)
        .leave(2.0);
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(0.0, "MPI_Send", Paradigm::Mpi)
        .send(2.0, 0, 0, 4)
        .leave(2.0)
        .leave(2.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();
    assert_close!(report.total(ids::CLOCK_VIOLATIONS), 1.0);
    // best-effort severities survive, clamped at the receive region's bounds
    for pattern in &report.patterns {
        for map in pattern.severities.values() {
            for &v in map.values() {
                assert!(v >= 0.0);
            }
        }
    }
}

#[test]
fn disabled_stages_leave_no_patterns_behind() {
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

    let config = AnalyzerConfig::default()
        .with_statistics(false)
        .with_critical_path(false)
        .with_delay_analysis(false);
    let report = world.analyze(&config).unwrap();

    assert!(report.pattern(ids::CRITICAL_PATH).is_none());
    assert!(report.pattern(ids::DELAY_LATESENDER).is_none());
    assert!(report.statistics.is_empty());
    // the core wait-state detection still runs
    let recv_cp = callpath(&report.defs, &["main", "MPI_Recv"]).unwrap();
    assert_close!(report.severity(ids::MPI_LATESENDER, 0.into(), recv_cp), 5.0);
}

#[test]
fn stat_file_lands_in_the_archive_directory() {
    init_tracing();
    let dir = std::env::temp_dir().join(format!("hindsight-stat-test-{}", std::process::id()));

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

    let config = AnalyzerConfig::default().with_archive_directory(&dir);
    world.analyze(&config).unwrap();

    let contents = std::fs::read_to_string(dir.join("trace.stat")).unwrap();
    assert!(contents.starts_with("PatternName"));
    assert!(contents.contains("mpi_latesender"));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn sum_of_waits_bounds_delay_costs() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(2);
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(1.0, "MPI_Recv", Paradigm::Mpi)
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
    let total_wait = report.total(ids::MPI_LATESENDER);
    assert!(report.total(ids::DELAY_LATESENDER) <= total_wait + 1e-9);
}

#[test]
fn perfectly_synchronized_run_yields_zero_wait_states() {
    init_tracing();
    let mut world = WorldBuilder::with_ranks(2);
    // real work, but every rendezvous lines up exactly: nothing ever waits
    world
        .on(0)
        .enter(0.0, "main", Paradigm::User)
        .enter(2.0, "MPI_Send", Paradigm::Mpi)
        .send(2.0, 1, 0, 8)
        .leave(2.5)
        .enter(3.0, "MPI_Barrier", Paradigm::Mpi)
        .coll_begin(3.0)
        .coll_end(3.5, None, 0, 0)
        .leave(3.5)
        .leave(5.0);
    world
        .on(1)
        .enter(0.0, "main", Paradigm::User)
        .enter(2.0, "MPI_Recv", Paradigm::Mpi)
        .recv(2.0, 0, 0, 8)
        .leave(2.5)
        .enter(3.0, "MPI_Barrier", Paradigm::Mpi)
        .coll_begin(3.0)
        .coll_end(3.5, None, 0, 0)
        .leave(3.5)
        .leave(5.0);

    let report = world.analyze(&AnalyzerConfig::default()).unwrap();

    for id in [
        ids::MPI_LATESENDER,
        ids::MPI_LATESENDER_WO,
        ids::MPI_LATERECEIVER,
        ids::MPI_WAIT_BARRIER,
        ids::MPI_BARRIER_COMPLETION,
        ids::DELAY_LATESENDER,
        ids::DELAY_BARRIER,
        ids::WAIT_PROPAGATING,
        ids::WAIT_INDIRECT,
    ] {
        assert_close!(report.total(id), 0.0);
    }
    // the base metrics still see the work
    let main_cp = callpath(&report.defs, &["main"]).unwrap();
    assert_close!(report.severity(ids::TIME, 0.into(), main_cp), 5.0);
}
