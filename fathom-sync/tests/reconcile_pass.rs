//! Reconciliation pass behaviour, driven tick by tick.

mod common;

use common::{run_pass, Harness};
use fathom_core::{AssetIdentity, AssetKind, AuditConfig};
use std::sync::Arc;

use fathom_core::StaleCheckEntry;
use fathom_renderer::Renderer;
use fathom_sync::{
    compute_fingerprint, read_stored_fingerprint, AuditStore, Executor, InFlightTracker,
    KindFilter, ReconcileContext, Reconciler, ReconciliationPhase, TickResult, WriteDispatcher,
};
use rstest::rstest;

fn add_assets(host: &common::FakeHost, count: usize) -> Vec<AssetIdentity> {
    (0..count)
        .map(|i| {
            host.add(
                &format!("/Game/Props/BP_Prop{i:02}"),
                AssetKind::Blueprint,
                format!("prop {i} v1").as_bytes(),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scenario: 12 candidates, 3 stale, batch size 5
// ---------------------------------------------------------------------------

#[test]
fn twelve_candidates_three_stale_phase_sequence() {
    let h = Harness::new();
    let host = h.host();
    let ids = add_assets(&host, 12);
    let mut sub = h.start(host, AuditConfig::default());

    // Startup pass audits everything.
    run_pass(&mut sub, &h.executor);
    assert_eq!(sub.last_pass().map(|p| p.re_audited), Some(12));

    // Two sources change, one document disappears.
    sub.host().write_source(&ids[1], b"prop 1 v2");
    sub.host().write_source(&ids[7], b"prop 7 v2");
    std::fs::remove_file(sub.store().path_for(&ids[11])).unwrap();

    sub.host().loading.set(true);
    assert!(sub.trigger_reconciliation_pass());
    assert_eq!(sub.phase(), ReconciliationPhase::WaitingForStore);

    assert_eq!(sub.tick(), TickResult::Continue);
    assert_eq!(sub.phase(), ReconciliationPhase::WaitingForStore, "host still loading");

    sub.host().loading.set(false);
    assert_eq!(sub.tick(), TickResult::Continue);
    assert_eq!(sub.phase(), ReconciliationPhase::BuildingList);

    assert_eq!(sub.tick(), TickResult::Continue);
    assert_eq!(sub.phase(), ReconciliationPhase::BackgroundHash);

    // Hash job not run yet: the tick returns without blocking.
    assert_eq!(sub.tick(), TickResult::Continue);
    assert_eq!(sub.phase(), ReconciliationPhase::BackgroundHash);

    h.executor.run_all();
    assert_eq!(sub.tick(), TickResult::Continue);
    assert_eq!(sub.phase(), ReconciliationPhase::ProcessingStale);

    // One batch of 3 drains the stale set.
    assert_eq!(sub.tick(), TickResult::Continue);
    assert_eq!(sub.phase(), ReconciliationPhase::Done);

    assert_eq!(sub.tick(), TickResult::Unregister);
    assert_eq!(sub.phase(), ReconciliationPhase::Idle);
    assert!(!sub.is_ticking());

    let summary = sub.last_pass().expect("summary").clone();
    assert_eq!(summary.scanned, 12);
    assert_eq!(summary.stale, 3);
    assert_eq!(summary.re_audited, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.swept, 0);
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[test]
fn second_pass_without_changes_finds_nothing_stale() {
    let h = Harness::new();
    let host = h.host();
    add_assets(&host, 8);
    let mut sub = h.start(host, AuditConfig::default());

    run_pass(&mut sub, &h.executor);
    assert_eq!(sub.last_pass().unwrap().stale, 8);

    assert!(sub.trigger_reconciliation_pass());
    run_pass(&mut sub, &h.executor);
    let second = sub.last_pass().unwrap();
    assert_eq!(second.scanned, 8);
    assert_eq!(second.stale, 0);
    assert_eq!(second.re_audited, 0);
}

#[test]
fn touching_mtime_alone_is_not_stale() {
    let h = Harness::new();
    let host = h.host();
    let ids = add_assets(&host, 2);
    let source = host.source_path(&ids[0]);
    let mut sub = h.start(host, AuditConfig::default());
    run_pass(&mut sub, &h.executor);

    filetime::set_file_mtime(&source, filetime::FileTime::from_unix_time(2_000_000_000, 0))
        .unwrap();

    sub.trigger_reconciliation_pass();
    run_pass(&mut sub, &h.executor);
    assert_eq!(sub.last_pass().unwrap().stale, 0);
}

// ---------------------------------------------------------------------------
// Batch completeness
// ---------------------------------------------------------------------------

#[rstest]
#[case(3, 5, 0, 1)]
#[case(5, 5, 0, 1)]
#[case(6, 5, 0, 2)]
#[case(12, 5, 2, 3)]
#[case(7, 2, 1, 4)]
#[case(1, 1, 1, 1)]
fn stale_set_drains_in_ceil_k_over_b_ticks(
    #[case] stale: usize,
    #[case] batch_size: usize,
    #[case] failing: usize,
    #[case] expected_ticks: usize,
) {
    let h = Harness::new();
    let host = h.host();
    let ids = add_assets(&host, stale);
    for id in ids.iter().take(failing) {
        host.fail_load.borrow_mut().insert(id.clone());
    }
    let config = AuditConfig {
        batch_size,
        ..AuditConfig::default()
    };
    let mut sub = h.start(host, config);

    let mut processing_ticks = 0;
    loop {
        let before = sub.phase();
        let result = sub.tick();
        h.executor.run_all();
        if before == ReconciliationPhase::ProcessingStale {
            processing_ticks += 1;
        }
        if result == TickResult::Unregister {
            break;
        }
    }

    let summary = sub.last_pass().unwrap();
    assert_eq!(processing_ticks, expected_ticks);
    assert_eq!(summary.re_audited + summary.failed, stale);
    assert_eq!(summary.failed, failing);
}

#[test]
fn garbage_collected_every_interval() {
    let h = Harness::new();
    let host = h.host();
    add_assets(&host, 5);
    let config = AuditConfig {
        gc_interval: 2,
        ..AuditConfig::default()
    };
    let mut sub = h.start(host, config);
    run_pass(&mut sub, &h.executor);
    assert_eq!(sub.host().gc_calls.get(), 2);
}

// ---------------------------------------------------------------------------
// Orphan sweep
// ---------------------------------------------------------------------------

#[test]
fn sweep_removes_only_documents_without_live_assets() {
    let h = Harness::new();
    let host = h.host();
    let ids = add_assets(&host, 3);
    let mut sub = h.start(host, AuditConfig::default());
    run_pass(&mut sub, &h.executor);

    let store = AuditStore::new(h.project.path(), 10);
    let gone = AssetIdentity::from("/Game/Old/Deep/BP_Gone");
    store.write(&store.path_for(&gone), "# BP_Gone\nHash: 00\n").unwrap();

    // An asset removed from the host without a delete notification.
    let live_doc = store.path_for(&ids[0]);
    let before = std::fs::read(&live_doc).unwrap();
    sub.host().remove(&ids[2]);

    sub.trigger_reconciliation_pass();
    run_pass(&mut sub, &h.executor);

    assert_eq!(sub.last_pass().unwrap().swept, 2);
    assert!(!store.path_for(&gone).exists());
    assert!(!store.path_for(&ids[2]).exists());
    assert_eq!(std::fs::read(&live_doc).unwrap(), before, "live document untouched");
    assert!(store.path_for(&ids[1]).exists());
}

#[test]
fn sweep_enumerates_the_host_once_per_pass() {
    let h = Harness::new();
    let host = h.host();
    add_assets(&host, 3);
    let mut sub = h.start(host, AuditConfig::default());
    run_pass(&mut sub, &h.executor);

    let store = AuditStore::new(h.project.path(), 10);
    for i in 0..5 {
        let orphan = AssetIdentity::from(format!("/Game/Old/BP_Gone{i}").as_str());
        store.write(&store.path_for(&orphan), "# gone\nHash: 00\n").unwrap();
    }
    sub.host().enumerations.set(0);

    sub.trigger_reconciliation_pass();
    run_pass(&mut sub, &h.executor);

    assert_eq!(sub.last_pass().unwrap().swept, 5);
    assert_eq!(
        sub.host().enumerations.get(),
        2,
        "one enumeration to build the list and one for the sweep"
    );
}

// ---------------------------------------------------------------------------
// Background hash failure
// ---------------------------------------------------------------------------

fn panicking_check(_entries: &[StaleCheckEntry]) -> Vec<StaleCheckEntry> {
    panic!("fingerprint read failed")
}

#[test]
fn panicking_hash_task_still_finishes_the_pass() {
    let h = Harness::new();
    let host = h.host();
    let ids = add_assets(&host, 3);

    let executor: Arc<dyn Executor> = h.executor.clone();
    let store = Arc::new(AuditStore::new(h.project.path(), 10));
    let renderer = Arc::new(Renderer::with_overrides(10, None).unwrap());
    let mut dispatcher = WriteDispatcher::new(
        Arc::clone(&executor),
        Arc::clone(&store),
        renderer,
        Arc::new(InFlightTracker::new()),
    );
    let filter = KindFilter::new("/Game/", AssetKind::all().to_vec());
    let mut reconciler = Reconciler::new(5, 0).with_stale_check(panicking_check);
    assert!(reconciler.trigger());

    let mut phases = Vec::new();
    let mut ticks = 0;
    loop {
        ticks += 1;
        assert!(ticks < 100, "pass did not finish");
        let mut ctx = ReconcileContext {
            host: &host,
            store: &store,
            dispatcher: &mut dispatcher,
            executor: executor.as_ref(),
            filter: &filter,
        };
        let result = reconciler.step(&mut ctx);
        phases.push(reconciler.phase());
        h.executor.run_all();
        if result == TickResult::Unregister {
            break;
        }
    }

    assert!(phases.contains(&ReconciliationPhase::Done));
    assert!(!phases.contains(&ReconciliationPhase::ProcessingStale));
    assert_eq!(reconciler.phase(), ReconciliationPhase::Idle);
    let summary = reconciler.last_pass().expect("summary");
    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.stale, 0);
    assert_eq!(summary.re_audited, 0);
    assert_eq!(dispatcher.pending(), 0);
    assert!(!store.path_for(&ids[0]).exists());
}

// ---------------------------------------------------------------------------
// Fingerprint round-trip
// ---------------------------------------------------------------------------

#[test]
fn written_document_carries_source_fingerprint() {
    let h = Harness::new();
    let host = h.host();
    let id = host.add("/Game/Data/DT_Loot", AssetKind::DataTable, b"rows");
    let source = host.source_path(&id);
    let mut sub = h.start(host, AuditConfig::default());
    run_pass(&mut sub, &h.executor);

    let stored = read_stored_fingerprint(&sub.store().path_for(&id)).expect("stored hash");
    assert_eq!(stored, compute_fingerprint(&source).unwrap());
}

// ---------------------------------------------------------------------------
// Schema isolation
// ---------------------------------------------------------------------------

#[test]
fn new_schema_version_reaudits_everything_and_leaves_old_root() {
    let h = Harness::new();
    let host = h.host();
    let ids = add_assets(&host, 4);
    let mut v10 = h.start(host, AuditConfig::default());
    run_pass(&mut v10, &h.executor);
    let old_doc = v10.store().path_for(&ids[0]);
    let old_bytes = std::fs::read(&old_doc).unwrap();
    v10.shutdown();

    let host = h.host();
    add_assets(&host, 4);
    let config = AuditConfig {
        schema_version: 11,
        ..AuditConfig::default()
    };
    let mut v11 = h.start(host, config);
    run_pass(&mut v11, &h.executor);

    let summary = v11.last_pass().unwrap();
    assert_eq!(summary.stale, 4, "every document absent under v11");
    assert_eq!(summary.swept, 0);
    assert_eq!(std::fs::read(&old_doc).unwrap(), old_bytes);
    assert!(v11.store().path_for(&ids[0]).starts_with(h.project.path().join("Saved/Fathom/Audit/v11")));
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

#[test]
fn disabled_kinds_are_not_scanned() {
    let h = Harness::new();
    let host = h.host();
    host.add("/Game/BP_A", AssetKind::Blueprint, b"a");
    host.add("/Game/DT_B", AssetKind::DataTable, b"b");
    let config = AuditConfig {
        kinds: vec![AssetKind::DataTable],
        ..AuditConfig::default()
    };
    let mut sub = h.start(host, config);
    run_pass(&mut sub, &h.executor);
    assert_eq!(sub.last_pass().unwrap().scanned, 1);
}

#[test]
fn empty_project_finishes_cleanly() {
    let h = Harness::new();
    let mut sub = h.start(h.host(), AuditConfig::default());
    run_pass(&mut sub, &h.executor);
    let summary = sub.last_pass().unwrap();
    assert_eq!((summary.scanned, summary.stale, summary.swept), (0, 0, 0));
}
