//! Worker pool intake, pausing and rejection as seen by scopes.

use parking_lot::Mutex;
use scopeline::runtime::{Dispatcher, PoolDispatcher, PoolListener, WorkerPool};
use scopeline::test_utils::{init_test_logging, wait_until};
use scopeline::{
    assert_with_log, test_complete, test_phase, CancelKind, Error, JobState, PoolConfig,
    RejectReason, Scope,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn single_slot_pool(name: &str) -> Arc<PoolDispatcher> {
    let pool = WorkerPool::new(
        name,
        PoolConfig::default()
            .with_core_size(1)
            .with_max_size(1)
            .with_queue_capacity(1),
    )
    .expect("valid config");
    Arc::new(PoolDispatcher::new(pool))
}

#[test]
fn full_pool_fails_the_job_with_rejected() {
    init_test_logging();
    test_phase!("full_pool_fails_the_job_with_rejected");
    let dispatcher = single_slot_pool("tiny");
    let pool = dispatcher.pool();
    pool.pause();
    let scope = Scope::with_dispatcher(Arc::clone(&dispatcher) as Arc<dyn Dispatcher>);

    let ran = Arc::new(AtomicUsize::new(0));
    let launch = || {
        let ran = Arc::clone(&ran);
        scope
            .launch(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("launch never fails synchronously")
    };
    let running = launch();
    let queued = launch();
    let refused = launch();

    assert_eq!(refused.state(), JobState::Failed);
    let err = refused.wait().expect_err("rejected");
    assert_with_log!(
        matches!(err, Error::Rejected(RejectReason::QueueFull)),
        "a full pool refuses new work",
        "Rejected(QueueFull)",
        err
    );
    assert_eq!(pool.stats().rejected, 1);

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(running.state(), JobState::Pending);

    pool.resume();
    running.wait().expect("runs after resume");
    queued.wait().expect("runs after resume");
    assert_eq!(ran.load(Ordering::SeqCst), 2);
    pool.shutdown(Duration::from_secs(1));
    test_complete!("full_pool_fails_the_job_with_rejected");
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl PoolListener for Recorder {
    fn on_paused(&self, pool: &str) {
        self.events.lock().push(format!("{pool}: paused"));
    }

    fn on_resumed(&self, pool: &str) {
        self.events.lock().push(format!("{pool}: resumed"));
    }

    fn on_shutdown(&self, pool: &str) {
        self.events.lock().push(format!("{pool}: shutdown"));
    }
}

#[test]
fn listeners_follow_the_lifecycle_until_unsubscribed() {
    init_test_logging();
    let dispatcher = single_slot_pool("observed");
    let pool = dispatcher.pool();
    let kept = Arc::new(Recorder::default());
    let dropped = Arc::new(Recorder::default());
    pool.subscribe(Arc::clone(&kept) as Arc<dyn PoolListener>);
    let id = pool.subscribe(Arc::clone(&dropped) as Arc<dyn PoolListener>);

    assert!(pool.pause());
    assert!(!pool.pause());
    assert!(pool.unsubscribe(id));
    assert!(pool.resume());
    let report = pool.shutdown(Duration::from_millis(100));
    assert_eq!(report.abandoned, 0);
    assert_eq!(pool.listener_count(), 0);

    assert_eq!(
        *kept.events.lock(),
        vec!["observed: paused", "observed: resumed", "observed: shutdown"]
    );
    assert_eq!(*dropped.events.lock(), vec!["observed: paused"]);
}

#[test]
fn shutdown_refuses_new_work_and_cancels_abandoned_jobs() {
    init_test_logging();
    let dispatcher = single_slot_pool("closing");
    let pool = dispatcher.pool();
    let scope = Scope::with_dispatcher(Arc::clone(&dispatcher) as Arc<dyn Dispatcher>);

    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let busy = scope
        .launch(move |_| {
            let _ = release_rx.recv();
            Ok(())
        })
        .expect("launch");
    assert!(wait_until(Duration::from_secs(2), || busy.state() == JobState::Running));
    let waiting = scope.launch(|_| Ok(())).expect("launch");

    let report = pool.shutdown(Duration::from_millis(30));
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.interrupted, 1);
    assert!(waiting.is_cancelled());
    assert!(busy.is_cancelled());

    let late = scope.launch(|_| Ok(())).expect("launch");
    assert!(matches!(
        late.wait(),
        Err(Error::Rejected(RejectReason::Shutdown))
    ));

    // The body ignores cancellation; its late success is discarded.
    release_tx.send(()).expect("busy job waiting");
    let err = busy.wait().expect_err("cancelled by shutdown");
    assert_eq!(
        err.cancel_reason().map(|reason| reason.kind()),
        Some(CancelKind::Shutdown)
    );
}
