//! Flow laziness, restartability and buffering.

use parking_lot::Mutex;
use proptest::prelude::*;
use scopeline::runtime::{Inline, ThreadPerTask};
use scopeline::test_utils::init_test_logging;
use scopeline::{test_complete, test_phase, Error, Flow, Scope};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn inline() -> Scope {
    Scope::with_dispatcher(Arc::new(Inline::new()))
}

#[test]
fn nothing_runs_until_collected_and_each_collection_reruns_the_source() {
    init_test_logging();
    test_phase!("nothing_runs_until_collected_and_each_collection_reruns_the_source");
    let pulls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulls);
    let flow = Flow::new(move |_cx, out| {
        for value in 1..=4 {
            counter.fetch_add(1, Ordering::SeqCst);
            out.emit(value)?;
        }
        Ok(())
    })
    .map(|x| x * 10)
    .filter(|x| *x != 20);
    assert_eq!(pulls.load(Ordering::SeqCst), 0);

    let scope = inline();
    let first = flow.to_list(&scope).expect("collect").join().expect("list");
    let second = flow.to_list(&scope).expect("collect").join().expect("list");
    assert_eq!(first, vec![10, 30, 40]);
    assert_eq!(first, second);
    assert_eq!(pulls.load(Ordering::SeqCst), 8);
    test_complete!("nothing_runs_until_collected_and_each_collection_reruns_the_source");
}

#[test]
fn buffered_flow_preserves_order_across_threads() {
    init_test_logging();
    let scope = Scope::with_dispatcher(Arc::new(ThreadPerTask::new()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let job = Flow::range(0, 200)
        .buffer(8)
        .on_each(move |x| sink.lock().push(*x))
        .fold(&scope, 0i64, |acc, x| acc + x)
        .expect("collect");
    assert_eq!(job.join().expect("sum"), (0..200).sum::<i64>());
    assert_eq!(*seen.lock(), (0..200).collect::<Vec<_>>());
    assert_eq!(scope.live_jobs(), 0);
}

#[test]
fn upstream_failure_fails_the_collecting_job() {
    init_test_logging();
    let flow: Flow<u8> = Flow::new(|_cx, out| {
        out.emit(1)?;
        Err(Error::msg("source dried up"))
    });
    let scope = inline();
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let job = flow
        .collect(&scope, move |x| {
            sink.lock().push(x);
            Ok(())
        })
        .expect("collect");
    let err = job.wait().expect_err("fails");
    assert_eq!(err.to_string(), "source dried up");
    assert_eq!(*collected.lock(), vec![1]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn collecting_twice_yields_identical_output(
        values in proptest::collection::vec(0u16..50, 0..40),
        take in 0usize..50,
    ) {
        let flow = Flow::of(values)
            .map(|x| x / 3)
            .distinct_until_changed()
            .filter(|x| x % 2 == 0)
            .take(take);
        let scope = inline();
        let first = flow.to_list(&scope).expect("collect").join().expect("list");
        let second = flow.to_list(&scope).expect("collect").join().expect("list");
        prop_assert!(first.len() <= take);
        prop_assert_eq!(first, second);
    }
}
