//! Run many bodies at once and gather their results in input order.

use crate::channel::Channel;
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::scope::Scope;

/// Runs every body as a child of one collecting job and returns their values
/// in input order.
///
/// The first failure in input order becomes the job's failure; the scope's
/// handler sees it once, from the failing child. Siblings already running are
/// not stopped by it; cancel the returned job to stop them.
pub fn parallel<T, F, I>(scope: &Scope, bodies: I) -> Result<Job<Vec<T>>>
where
    T: Send + 'static,
    F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let bodies: Vec<F> = bodies.into_iter().collect();
    scope.spawn(move |cx| {
        let jobs = bodies
            .into_iter()
            .map(|body| cx.spawn_child(body))
            .collect::<Result<Vec<_>>>()?;
        cx.relay(jobs.into_iter().map(Job::join).collect())
    })
}

/// Like [`parallel`], but with at most `max_concurrent` bodies running at a
/// time.
///
/// Workers pull bodies off a shared channel, so a slow body never holds up
/// the rest of the queue.
pub fn parallel_limited<T, F, I>(scope: &Scope, bodies: I, max_concurrent: usize) -> Result<Job<Vec<T>>>
where
    T: Send + 'static,
    F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let bodies: Vec<F> = bodies.into_iter().collect();
    scope.spawn(move |cx| {
        let total = bodies.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let queue = Channel::unbounded();
        for entry in bodies.into_iter().enumerate() {
            queue.send(entry).map_err(Error::from)?;
        }
        queue.close();

        let results: Channel<(usize, Result<T>)> = Channel::unbounded();
        for _ in 0..max_concurrent.clamp(1, total) {
            let queue = queue.clone();
            let results = results.clone();
            cx.launch_child(move |cx| {
                for (index, body) in &queue {
                    cx.checkpoint()?;
                    let outcome = body(cx);
                    results.send((index, outcome)).map_err(Error::from)?;
                }
                Ok(())
            })?;
        }

        let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
        for _ in 0..total {
            let (index, outcome) = results.receive()?;
            slots[index] = Some(outcome);
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(Error::IllegalState("missing parallel result"))))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ThreadPerTask;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    type Body = Box<dyn FnOnce(&Cx) -> Result<u64> + Send>;

    fn scope() -> Scope {
        Scope::with_dispatcher(Arc::new(ThreadPerTask::new()))
    }

    fn staggered(n: u64) -> Vec<Body> {
        (0..n)
            .map(|i| {
                Box::new(move |cx: &Cx| {
                    cx.sleep(Duration::from_millis((n - i) * 5))?;
                    Ok(i * i)
                }) as Body
            })
            .collect()
    }

    #[test]
    fn results_follow_input_order() {
        init_test_logging();
        let scope = scope();
        let out = parallel(&scope, staggered(6)).expect("spawn").join().expect("all succeed");
        assert_eq!(out, vec![0, 1, 4, 9, 16, 25]);
    }

    #[test]
    fn first_failure_in_order_is_reported() {
        let scope = scope();
        let bodies: Vec<Body> = vec![
            Box::new(|_cx: &Cx| Ok(1)),
            Box::new(|cx: &Cx| {
                cx.sleep(Duration::from_millis(30))?;
                Err(Error::msg("second failed"))
            }),
            Box::new(|_cx: &Cx| Err(Error::msg("third failed"))),
        ];
        let err = parallel(&scope, bodies).expect("spawn").join().expect_err("fails");
        assert_eq!(err.to_string(), "second failed");
    }

    #[test]
    fn child_failures_are_handled_once_each() {
        init_test_logging();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let scope = Scope::new(
            crate::scope::Context::new()
                .with_dispatcher(Arc::new(ThreadPerTask::new()))
                .with_exception_handler(move |err| sink.lock().push(err.to_string())),
        );
        let bodies: Vec<Body> = vec![
            Box::new(|_cx: &Cx| Ok(1)),
            Box::new(|_cx: &Cx| Err(Error::msg("b"))),
            Box::new(|_cx: &Cx| Err(Error::msg("c"))),
        ];
        let err = parallel(&scope, bodies).expect("spawn").join().expect_err("fails");
        assert_eq!(err.to_string(), "b");

        let mut seen = seen.lock().clone();
        seen.sort();
        crate::assert_with_log!(
            seen == vec!["b".to_string(), "c".to_string()],
            "each child failure is delivered once",
            vec!["b", "c"],
            seen
        );
    }

    #[test]
    fn limited_respects_concurrency_and_order() {
        let scope = scope();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let bodies: Vec<Body> = (0..10u64)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                Box::new(move |cx: &Cx| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let slept = cx.sleep(Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                    slept.map(|()| i)
                }) as Body
            })
            .collect();
        let out = parallel_limited(&scope, bodies, 3).expect("spawn").join().expect("all succeed");
        assert_eq!(out, (0..10).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn limited_with_no_bodies() {
        let scope = scope();
        let out = parallel_limited(&scope, Vec::<Body>::new(), 4).expect("spawn").join().expect("empty");
        assert!(out.is_empty());
    }
}
