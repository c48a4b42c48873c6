//! End-to-end scenarios exercised against the library's public
//! modules directly rather than spawning the full `metasys` binary
//! (which blocks on a ~1s tick loop).

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use metasys::config;
use metasys::launch;
use metasys::process_table::{ChildRecord, ChildState, ProcessTable};
use metasys::sequencer::{self, CohortKind};
use metasys::terminate;

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

/// Scenario 1: a child that dies immediately is scheduled for the
/// 100x-penalized restart, and exactly one reap increments
/// `restart_count` by one.
#[test]
fn scenario_1_quick_death_uses_100x_backoff() {
    let t0 = now();
    let mut rec = ChildRecord::new_pending("A".into(), "/bin/true".into(), None, t0);
    rec.mark_running(1, t0);
    // "exits immediately": lived 0s, well under restart_delay=1
    rec.schedule_restart(t0, 1);
    assert_eq!(rec.restart_count, 1);
    assert_eq!(rec.scheduled_start, t0 + 100);
    assert_eq!(rec.state(), ChildState::PendingLaunch);
}

/// Scenario 3: ungrouped A plus groups Grp2/X and Grp1/Y launches in
/// `[A, Y, X]` order (group-name sort), and shuts down in the exact
/// reverse.
#[test]
fn scenario_3_group_sort_order_launch_and_shutdown() {
    let (cfg, errors) = {
        let f = write_config(
            "Process A /bin/true\n\
             ProcessGrp2 X /bin/true\n\
             ProcessGrp1 Y /bin/true\n",
        );
        config::parse(f.path(), true, None)
    };
    assert!(errors.is_empty());
    assert_eq!(cfg.launch_order(), vec!["A", "Y", "X"]);
    assert_eq!(
        sequencer::shutdown_order(&cfg.launch_order()),
        vec!["X", "Y", "A"]
    );

    let mut table = ProcessTable::new();
    let t0 = now();
    config::reconcile(&cfg, &mut table, t0);
    let plan = sequencer::build_launch_plan(&cfg, &table, t0);
    assert_eq!(plan.len(), 3);
    assert_eq!(plan[0].kind, CohortKind::Ungrouped);
    assert_eq!(plan[1].kind, CohortKind::Group("Grp1".to_string()));
    assert_eq!(plan[2].kind, CohortKind::Group("Grp2".to_string()));
}

/// Scenario 4: when a running child's command changes on reparse, the
/// reconciler forces an immediate restart by setting `scheduled_start
/// = now` without touching the live pid directly — the terminate phase
/// is responsible for stopping the old process before relaunch.
#[test]
fn scenario_4_command_change_forces_restart() {
    let mut table = ProcessTable::new();
    let t0 = now();
    let mut rec = ChildRecord::new_pending("A".into(), "/bin/old".into(), None, t0);
    rec.mark_running(4242, t0);
    table.insert(rec);

    let f = write_config("Process A /bin/new --flag\n");
    let (cfg, errors) = config::parse(f.path(), true, None);
    assert!(errors.is_empty());

    let t1 = t0 + 5;
    config::reconcile(&cfg, &mut table, t1);

    let updated = table.get("A").unwrap();
    assert_eq!(updated.command, "/bin/new --flag");
    assert_eq!(updated.scheduled_start, t1);
    assert_eq!(updated.pid, Some(4242), "old pid stays until terminate phase reaps it");
}

/// Scenario 6: a status of 139 is a segfault-with-core-dump: exit
/// value 0, term_signal 11, core_dumped true.
#[test]
fn scenario_6_core_dump_status_is_classified() {
    let report = terminate::classify_status(139);
    assert!(report.core_dumped);
    assert_eq!(report.exit_value, 0);
    assert_eq!(report.term_signal, Some(11));
}

/// Reparsing an unchanged file produces no new errors and an
/// identical declared launch order.
#[test]
fn reparsing_an_unchanged_file_is_a_no_op() {
    let f = write_config("Process A /bin/true\nStartDelay 5\n");
    let (cfg1, errors1) = config::parse(f.path(), true, None);
    let (cfg2, errors2) = config::parse(f.path(), false, Some(&cfg1.log_dir));
    assert!(errors1.is_empty());
    assert!(errors2.is_empty());
    assert_eq!(cfg1.launch_order(), cfg2.launch_order());
    assert_eq!(cfg1.start_delay, cfg2.start_delay);
}

/// A real (if trivial) spawn/reap round trip through the launch and
/// terminate primitives together, independent of the control loop.
#[test]
fn launch_then_reap_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let search = launch::augmented_search_path();
    let pid = launch::spawn("echoer", "/bin/echo hi", dir.path(), &search).unwrap();

    let mut report = None;
    for _ in 0..20 {
        if let Some(r) = terminate::try_reap(pid).unwrap() {
            report = Some(r);
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    let report = report.expect("child should have exited within 1s");
    assert_eq!(report.exit_value, 0);
    assert!(!report.core_dumped);
}
