//! End-to-end commit and rollback scenarios.

use std::sync::Arc;
use txcoord_core::{CoordinatorError, EndFlag, ResourceHandle, StartFlag, Status, XaErrorCode};
use txcoord_testkit::prelude::*;

#[test]
fn single_delisted_resource_commits_in_one_phase() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    assert_eq!(tx.status(), Status::Active);

    let r1 = tc.resource("r1").into_handle();
    let handle: ResourceHandle = r1.clone();
    tx.enlist_resource(handle.clone()).unwrap();
    tx.delist_resource(&handle, EndFlag::Success).unwrap();
    tc.commit().unwrap();

    assert_eq!(tx.status(), Status::Committed);
    assert_eq!(tc.status(), Status::NoTransaction);
    assert_eq!(
        r1.calls(),
        vec![
            XaCall::Start(StartFlag::NoFlags),
            XaCall::End(EndFlag::Success),
            XaCall::Commit { one_phase: true },
        ]
    );
}

#[test]
fn two_healthy_resources_prepare_then_commit() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let r1 = tc.resource("r1").into_handle();
    let r2 = tc.resource("r2").into_handle();
    r1.watch(&tx);
    r2.watch(&tx);
    let (h1, h2): (ResourceHandle, ResourceHandle) = (r1.clone(), r2.clone());
    tx.enlist_resource(h1.clone()).unwrap();
    tx.enlist_resource(h2.clone()).unwrap();
    tx.delist_resource(&h1, EndFlag::Success).unwrap();
    tx.delist_resource(&h2, EndFlag::Success).unwrap();

    tc.commit().unwrap();
    assert_eq!(tx.status(), Status::Committed);

    let last_prepare = tc.log.position("r2:prepare").unwrap();
    let first_commit = tc.log.position("r1:commit").unwrap();
    assert!(last_prepare < first_commit);
    assert!(tc.log.position("r1:prepare").unwrap() < last_prepare);

    assert!(tc
        .log
        .statuses_seen_by("r1")
        .contains(&(XaCall::Prepare, Status::Preparing)));
    assert!(tc
        .log
        .statuses_seen_by("r2")
        .contains(&(XaCall::Commit { one_phase: false }, Status::Committing)));
}

#[test]
fn two_phase_only_prepares_a_single_resource() {
    let tc = TestCoordinator::two_phase();
    let tx = tc.begin().unwrap();
    let r1 = tc.resource("r1").into_handle();
    tx.enlist_resource(r1.clone()).unwrap();

    tc.commit().unwrap();
    assert!(r1.was_prepared());
    assert!(r1.received(XaCall::Commit { one_phase: false }));
}

#[test]
fn rollback_vote_means_nobody_commits() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let resources: Vec<_> = ["r1", "r2", "r3"]
        .into_iter()
        .map(|name| {
            let builder = tc.resource(name);
            if name == "r2" {
                builder.fail_prepare(XaErrorCode::RbDeadlock).into_handle()
            } else {
                builder.into_handle()
            }
        })
        .collect();
    for r in &resources {
        tx.enlist_resource(r.clone()).unwrap();
    }

    let err = tc.commit().unwrap_err();
    assert!(err.is_rolled_back());
    for r in &resources {
        assert!(!r.was_committed(), "{}", r.name());
        assert!(r.was_rolled_back(), "{}", r.name());
    }
    assert!(!resources[2].was_prepared());
}

#[test]
fn read_only_voters_leave_the_protocol() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let reader = tc.resource("reader").read_only().into_handle();
    let writer = tc.resource("writer").into_handle();
    tx.enlist_resource(reader.clone()).unwrap();
    tx.enlist_resource(writer.clone()).unwrap();

    tc.commit().unwrap();
    assert!(reader.was_prepared());
    assert!(!reader.was_committed());
    assert!(writer.received(XaCall::Commit { one_phase: false }));
}

#[test]
fn read_only_voters_are_not_rolled_back() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let reader = tc.resource("reader").read_only().into_handle();
    let failing = tc
        .resource("failing")
        .fail_prepare(XaErrorCode::RbIntegrity)
        .into_handle();
    tx.enlist_resource(reader.clone()).unwrap();
    tx.enlist_resource(failing.clone()).unwrap();

    assert!(tc.commit().unwrap_err().is_rolled_back());
    assert!(!reader.was_rolled_back());
    assert!(failing.was_rolled_back());
}

#[test]
fn all_read_only_commits_without_second_phase() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let a = tc.resource("a").read_only().into_handle();
    let b = tc.resource("b").read_only().into_handle();
    tx.enlist_resource(a.clone()).unwrap();
    tx.enlist_resource(b.clone()).unwrap();

    tc.commit().unwrap();
    assert_eq!(tx.status(), Status::Committed);
    assert!(!a.was_committed() && !b.was_committed());
}

#[test]
fn same_resource_manager_is_one_participant() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let a = tc.resource("a").resource_manager("db").into_handle();
    let b = tc.resource("b").resource_manager("db").into_handle();
    tx.enlist_resource(a.clone()).unwrap();
    tx.enlist_resource(b.clone()).unwrap();
    assert_eq!(tx.resource_count(), 1);
    assert_eq!(b.calls(), vec![XaCall::Start(StartFlag::Join)]);

    tc.commit().unwrap();
    assert!(a.received(XaCall::Commit { one_phase: true }));
    assert!(b.received(XaCall::End(EndFlag::Success)));
    assert!(!b.was_committed());
}

#[test]
fn rollback_reaches_every_resource() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let r1 = tc.resource("r1").into_handle();
    let r2 = tc.resource("r2").into_handle();
    r1.watch(&tx);
    tx.enlist_resource(r1.clone()).unwrap();
    tx.enlist_resource(r2.clone()).unwrap();

    tc.rollback().unwrap();
    assert_eq!(tx.status(), Status::RolledBack);
    assert_eq!(tc.status(), Status::NoTransaction);
    assert!(r1.received(XaCall::End(EndFlag::Fail)));
    assert!(r1.was_rolled_back() && r2.was_rolled_back());
    assert!(!r1.was_prepared());
    assert!(tc
        .log
        .statuses_seen_by("r1")
        .contains(&(XaCall::Rollback, Status::RollingBack)));
}

#[test]
fn rollback_only_blocks_enlistment() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    tc.set_rollback_only().unwrap();

    let r1 = tc.resource("r1").into_handle();
    let err = tx.enlist_resource(r1.clone()).unwrap_err();
    assert!(err.is_rolled_back());
    assert_eq!(tx.status(), Status::MarkedRollback);
    assert_eq!(tx.resource_count(), 0);
    assert!(r1.calls().is_empty());
}

#[test]
fn completed_transaction_is_inert() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    tc.commit().unwrap();

    let handle: ResourceHandle = tc.resource("late").into_handle();
    let sync = tc.synchronization("late").into_handle();
    let invalid = |r: Result<(), CoordinatorError>| matches!(r, Err(CoordinatorError::InvalidState { .. }));
    assert!(invalid(tx.commit()));
    assert!(invalid(tx.rollback()));
    assert!(invalid(tx.set_rollback_only()));
    assert!(invalid(tx.enlist_resource(handle.clone())));
    assert!(invalid(tx.delist_resource(&handle, EndFlag::Success)));
    assert!(invalid(tx.register_synchronization(sync.clone())));
    assert!(invalid(tx.register_interposed_synchronization(sync)));
}

#[test]
fn timed_out_transaction_rolls_back_on_commit() {
    let tc = TestCoordinator::new();
    let ut = tc.user_transaction();
    ut.set_transaction_timeout(1);
    ut.begin().unwrap();
    let tx = tc.transaction().unwrap();
    let r1 = tc.resource("r1").into_handle();
    tx.enlist_resource(r1.clone()).unwrap();
    let sync = tc.synchronization("s").into_handle();
    tx.register_synchronization(sync.clone()).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(1100));
    assert!(tx.is_timed_out());

    let err = ut.commit().unwrap_err();
    assert!(err.is_rolled_back());
    assert!(r1.was_rolled_back());
    assert!(!r1.was_committed());
    assert_eq!(sync.before_count(), 0);
    assert_eq!(sync.after_statuses(), vec![Status::RolledBack]);
}

#[test]
fn enlistment_listener_is_notified() {
    let tc = TestCoordinator::new();
    let listener = Arc::new(CountingListener::new());
    tc.set_enlistment_listener(Some(listener.clone()));

    let tx = tc.begin().unwrap();
    tx.enlist_resource(tc.resource("r1").into_handle()).unwrap();
    let _ = tx.enlist_resource(
        tc.resource("bad")
            .fail_start(XaErrorCode::RmFail)
            .into_handle(),
    );
    tc.commit().unwrap();

    assert_eq!(listener.count(), 1);
    assert_eq!(listener.transactions(), vec![tx.id()]);
}

#[test]
fn end_failure_forces_rollback() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let r1 = tc
        .resource("r1")
        .fail_end(XaErrorCode::RbCommFail)
        .into_handle();
    tx.enlist_resource(r1.clone()).unwrap();

    assert!(tc.commit().unwrap_err().is_rolled_back());
    assert!(!r1.was_committed());
    assert!(r1.was_rolled_back());
}

#[test]
fn branches_report_outcomes() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    tx.enlist_resource(tc.resource("r1").into_handle()).unwrap();
    tx.enlist_resource(tc.resource("r2").into_handle()).unwrap();
    tc.commit().unwrap();

    let branches = tx.branches();
    assert_eq!(branches.len(), 2);
    assert!(branches[0].xid.same_global(&branches[1].xid));
    assert_ne!(branches[0].xid, branches[1].xid);
    assert!(branches
        .iter()
        .all(|b| b.outcome == Some(txcoord_core::Outcome::Completed) && !b.forgotten));
}
