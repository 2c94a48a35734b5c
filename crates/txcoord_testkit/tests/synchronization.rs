//! Ordering and failure handling of completion callbacks.

use std::sync::Arc;
use txcoord_core::{Status, XaErrorCode};
use txcoord_testkit::prelude::*;

#[test]
fn interposed_wrap_regular_around_the_protocol() {
    let tc = TestCoordinator::new();
    let registry = tc.registry();
    let tx = tc.begin().unwrap();

    tx.register_synchronization(tc.synchronization("app").into_handle())
        .unwrap();
    registry
        .register_interposed_synchronization(tc.synchronization("container").into_handle())
        .unwrap();
    tx.enlist_resource(tc.resource("r1").into_handle()).unwrap();

    tc.commit().unwrap();
    assert_eq!(
        tc.log.labels(),
        vec![
            "r1:start(NoFlags)",
            "container:before",
            "app:before",
            "r1:end(Success)",
            "r1:commit(1pc)",
            "app:after(Committed)",
            "container:after(Committed)",
        ]
    );
}

#[test]
fn raising_before_completion_rolls_back_with_cause() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let r1 = tc.resource("r1").into_handle();
    tx.enlist_resource(r1.clone()).unwrap();
    let failing = tc.synchronization("failing").raising("flush failed").into_handle();
    tx.register_synchronization(failing.clone()).unwrap();

    let err = tc.commit().unwrap_err();
    assert!(err.is_rolled_back());
    assert_eq!(err.rollback_cause().map(|c| c.message()), Some("flush failed"));
    assert_eq!(failing.after_statuses(), vec![Status::RolledBack]);
    assert!(r1.was_rolled_back());
    assert!(!r1.was_committed());
    assert_eq!(tc.status(), Status::NoTransaction);
}

#[test]
fn raise_skips_the_rest_of_its_list_only() {
    let tc = TestCoordinator::new();
    let registry = tc.registry();
    let tx = tc.begin().unwrap();

    let i1 = tc.synchronization("i1").raising("boom").into_handle();
    let i2 = tc.synchronization("i2").into_handle();
    let r1 = tc.synchronization("r1").into_handle();
    registry.register_interposed_synchronization(i1.clone()).unwrap();
    registry.register_interposed_synchronization(i2.clone()).unwrap();
    tx.register_synchronization(r1.clone()).unwrap();

    let err = tc.commit().unwrap_err();
    assert_eq!(err.rollback_cause().map(|c| c.message()), Some("boom"));
    assert_eq!(i1.before_count(), 1);
    assert_eq!(i2.before_count(), 0);
    assert_eq!(r1.before_count(), 1);
    for sync in [&i1, &i2, &r1] {
        assert_eq!(sync.after_statuses(), vec![Status::RolledBack]);
    }
}

#[test]
fn rollback_only_request_does_not_stop_the_round() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let marker = tc
        .synchronization("marker")
        .acting_on(&tx, SyncBehavior::SetRollbackOnly)
        .into_handle();
    let later = tc.synchronization("later").into_handle();
    tx.register_synchronization(marker.clone()).unwrap();
    tx.register_synchronization(later.clone()).unwrap();

    let err = tc.commit().unwrap_err();
    assert!(err.is_rolled_back());
    assert!(err.rollback_cause().is_none());
    assert_eq!(later.before_count(), 1);
    assert_eq!(later.after_statuses(), vec![Status::RolledBack]);
}

#[test]
fn after_completion_runs_once_even_when_commit_fails() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    tx.enlist_resource(
        tc.resource("r1")
            .fail_commit(XaErrorCode::HeurMix)
            .into_handle(),
    )
    .unwrap();
    let sync = tc.synchronization("s").into_handle();
    tx.register_synchronization(sync.clone()).unwrap();

    assert!(tc.commit().unwrap_err().is_heuristic());
    assert_eq!(sync.before_count(), 1);
    assert_eq!(sync.after_statuses(), vec![Status::Unknown]);
}

#[test]
fn rollback_skips_before_completion() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let sync = tc.synchronization("s").into_handle();
    tx.register_synchronization(sync.clone()).unwrap();

    tc.rollback().unwrap();
    assert_eq!(sync.before_count(), 0);
    assert_eq!(sync.after_statuses(), vec![Status::RolledBack]);
}

#[test]
fn before_completion_may_enlist_and_register() {
    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let late_resource = tc.resource("late").into_handle();
    let late_sync = tc.synchronization("late-sync").into_handle();

    tx.register_synchronization(
        tc.synchronization("enlister")
            .acting_on(&tx, SyncBehavior::Enlist(late_resource.clone()))
            .into_handle(),
    )
    .unwrap();
    tx.register_synchronization(
        tc.synchronization("registrar")
            .acting_on(&tx, SyncBehavior::Register(late_sync.clone()))
            .into_handle(),
    )
    .unwrap();

    tc.commit().unwrap();
    assert!(late_resource.received(XaCall::Commit { one_phase: true }));
    assert_eq!(late_sync.before_count(), 1);
    assert_eq!(late_sync.after_statuses(), vec![Status::Committed]);
}

#[test]
fn callbacks_observe_the_transaction_status() {
    struct StatusWatcher {
        tx: std::sync::Weak<txcoord_core::Transaction>,
        seen: parking_lot::Mutex<Vec<Status>>,
    }

    impl txcoord_core::Synchronization for StatusWatcher {
        fn before_completion(&self) -> Result<(), txcoord_core::SynchronizationError> {
            if let Some(tx) = self.tx.upgrade() {
                self.seen.lock().push(tx.status());
            }
            Ok(())
        }

        fn after_completion(&self, _status: Status) {
            if let Some(tx) = self.tx.upgrade() {
                self.seen.lock().push(tx.status());
            }
        }
    }

    let tc = TestCoordinator::new();
    let tx = tc.begin().unwrap();
    let watcher = Arc::new(StatusWatcher {
        tx: Arc::downgrade(&tx),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    tx.register_synchronization(watcher.clone()).unwrap();
    tc.commit().unwrap();

    assert_eq!(*watcher.seen.lock(), vec![Status::Active, Status::Committed]);
}
