//! First-to-finish racing.
//!
//! Every contender runs as its own job in the scope. The first one to finish,
//! successfully or not, settles the race; the others keep running and their
//! outcomes are discarded. Cancelling the race job itself cancels every
//! contender with [`CancelKind::RaceLost`](crate::types::CancelKind::RaceLost).

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::job::{Job, JobHandle, JobState};
use crate::scope::Scope;
use crate::types::CancelReason;

/// Races `bodies`; the job settles with whichever finishes first.
///
/// Fails immediately with [`Error::IllegalState`] if `bodies` is empty.
pub fn race<T, F, I>(scope: &Scope, bodies: I) -> Result<Job<T>>
where
    T: Send + 'static,
    F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let bodies: Vec<F> = bodies.into_iter().collect();
    if bodies.is_empty() {
        return Err(Error::IllegalState("race needs at least one contender"));
    }
    let (completer, job) = scope.completable::<T>()?;

    let mut contenders: Vec<JobHandle> = Vec::with_capacity(bodies.len());
    for body in bodies {
        let settler = completer.clone();
        let launched = scope.launch(move |cx| {
            let outcome = body(cx);
            settler.settle(outcome);
            Ok(())
        });
        match launched {
            Ok(handle) => contenders.push(handle),
            Err(err) => {
                completer.fail(err.clone());
                for contender in &contenders {
                    contender.cancel_with(CancelReason::race_lost());
                }
                return Err(err);
            }
        }
    }

    let race = job.handle();
    job.core().add_done_hook(Box::new(move || {
        if race.state() == JobState::Cancelled {
            for contender in &contenders {
                contender.cancel_with(CancelReason::race_lost());
            }
        }
    }));
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ThreadPerTask;
    use crate::test_utils::{init_test_logging, wait_until};
    use crate::types::CancelKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    type Contender = Box<dyn FnOnce(&Cx) -> Result<&'static str> + Send>;

    fn scope() -> Scope {
        Scope::with_dispatcher(Arc::new(ThreadPerTask::new()))
    }

    #[test]
    fn fastest_wins_and_losers_finish() {
        init_test_logging();
        let scope = scope();
        let finished = Arc::new(AtomicUsize::new(0));
        let slow_done = Arc::clone(&finished);
        let contenders: Vec<Contender> = vec![
            Box::new(move |cx: &Cx| {
                cx.sleep(Duration::from_millis(60))?;
                slow_done.fetch_add(1, Ordering::SeqCst);
                Ok("slow")
            }),
            Box::new(|_cx: &Cx| Ok("fast")),
        ];
        let job = race(&scope, contenders).expect("race");
        assert_eq!(job.join().expect("winner"), "fast");
        assert!(wait_until(Duration::from_secs(2), || finished.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn first_failure_settles_the_race() {
        let scope = scope();
        let contenders: Vec<Contender> = vec![
            Box::new(|_cx: &Cx| Err(Error::msg("quick failure"))),
            Box::new(|cx: &Cx| cx.sleep(Duration::from_millis(200)).map(|()| "late")),
        ];
        let err = race(&scope, contenders).expect("race").join().expect_err("fails");
        assert_eq!(err.to_string(), "quick failure");
    }

    #[test]
    fn cancelling_race_cancels_contenders() {
        let scope = scope();
        let (tx, rx) = std::sync::mpsc::channel();
        let contenders: Vec<Contender> = (0..3)
            .map(|_| {
                let tx = tx.clone();
                Box::new(move |cx: &Cx| {
                    let slept = cx.sleep(Duration::from_secs(10));
                    let _ = tx.send(cx.cancel_reason().map(|r| r.kind()));
                    slept.map(|()| "never")
                }) as Contender
            })
            .collect();
        let job = race(&scope, contenders).expect("race");
        std::thread::sleep(Duration::from_millis(20));
        job.cancel();
        for _ in 0..3 {
            let kind = rx.recv_timeout(Duration::from_secs(2)).expect("contender stopped");
            assert_eq!(kind, Some(CancelKind::RaceLost));
        }
    }

    #[test]
    fn empty_race_is_rejected() {
        let scope = scope();
        let err = race(&scope, Vec::<Contender>::new()).expect_err("empty");
        assert!(matches!(err, Error::IllegalState(_)));
    }
}
