//! Lazy, restartable value pipelines.
//!
//! A [`Flow`] describes how to produce a sequence; nothing runs until a
//! terminal operator drives it. Every collection re-runs the whole pipeline
//! from the source, so a flow can be collected any number of times and
//! per-collection operator state (such as [`Flow::distinct_until_changed`]'s
//! last value) never leaks between runs.
//!
//! Stages run in pull order on the collecting unit, except [`Flow::buffer`],
//! which moves the upstream onto a child job feeding a [`Channel`].
//!
//! ```ignore
//! let squares = Flow::range(1, 5).map(|n| n * n).filter(|n| n % 2 == 1);
//! assert_eq!(squares.to_list(&scope)?.join()?, vec![1, 9, 25]);
//! ```

use crate::channel::Channel;
use crate::cx::Cx;
use crate::error::{Error, RecvError, Result};
use crate::job::{Job, JobHandle};
use crate::runtime::Dispatcher;
use crate::scope::Scope;
use crate::types::CancelReason;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// The downstream end handed to a flow's source and to each stage.
pub struct Emitter<'a, T> {
    sink: &'a mut (dyn FnMut(T) -> Result<()> + 'a),
}

impl<'a, T> Emitter<'a, T> {
    fn new(sink: &'a mut (dyn FnMut(T) -> Result<()> + 'a)) -> Self {
        Self { sink }
    }

    /// Pushes a value downstream.
    ///
    /// An error means the collection is over, either failed or stopped
    /// early by a downstream stage; sources must return it unchanged.
    pub fn emit(&mut self, value: T) -> Result<()> {
        (self.sink)(value)
    }
}

impl<T> fmt::Debug for Emitter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

type Source<T> = Arc<dyn Fn(&Cx, &mut Emitter<'_, T>) -> Result<()> + Send + Sync>;

/// A cold, restartable sequence of `T`.
pub struct Flow<T> {
    source: Source<T>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T> fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Flow<T> {
    /// A flow driven by `source`, which pushes values into the emitter.
    pub fn new<F>(source: F) -> Self
    where
        F: Fn(&Cx, &mut Emitter<'_, T>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(source),
        }
    }

    /// Emits each item of `items`. The collection is cloned per run.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    {
        Self::new(move |cx, out| {
            for item in items.clone() {
                cx.checkpoint()?;
                out.emit(item)?;
            }
            Ok(())
        })
    }

    /// Emits the given values in order.
    pub fn of(values: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_iter(values)
    }

    /// Emits nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(|_cx, _out| Ok(()))
    }

    /// Transforms each value.
    pub fn map<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let upstream = self.source;
        Flow::new(move |cx, out| {
            upstream(cx, &mut Emitter::new(&mut |value: T| out.emit(f(value))))
        })
    }

    /// Keeps the values matching `predicate`.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let upstream = self.source;
        Self::new(move |cx, out| {
            upstream(
                cx,
                &mut Emitter::new(&mut |value: T| {
                    if predicate(&value) {
                        out.emit(value)
                    } else {
                        Ok(())
                    }
                }),
            )
        })
    }

    /// Runs `action` on each value before passing it on.
    pub fn on_each<F>(self, action: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let upstream = self.source;
        Self::new(move |cx, out| {
            upstream(
                cx,
                &mut Emitter::new(&mut |value: T| {
                    action(&value);
                    out.emit(value)
                }),
            )
        })
    }

    /// Drops values equal to the one emitted just before.
    #[must_use]
    pub fn distinct_until_changed(self) -> Self
    where
        T: PartialEq + Clone,
    {
        let upstream = self.source;
        Self::new(move |cx, out| {
            let mut last: Option<T> = None;
            upstream(
                cx,
                &mut Emitter::new(&mut |value: T| {
                    if last.as_ref() == Some(&value) {
                        return Ok(());
                    }
                    last = Some(value.clone());
                    out.emit(value)
                }),
            )
        })
    }

    /// Emits at most `n` values, then stops the upstream.
    #[must_use]
    pub fn take(self, n: usize) -> Self {
        let upstream = self.source;
        Self::new(move |cx, out| {
            if n == 0 {
                return Ok(());
            }
            let mut remaining = n;
            let mut stopped_here = false;
            let result = upstream(
                cx,
                &mut Emitter::new(&mut |value: T| {
                    out.emit(value)?;
                    remaining -= 1;
                    if remaining == 0 {
                        stopped_here = true;
                        return Err(Error::FlowAborted);
                    }
                    Ok(())
                }),
            );
            match result {
                Err(Error::FlowAborted) if stopped_here => Ok(()),
                other => other,
            }
        })
    }

    /// Runs the upstream concurrently on a child job, passing values through
    /// a channel of `capacity`.
    ///
    /// The upstream's failure is raised after every value it produced has
    /// been emitted. Stopping the collection early cancels the producer.
    ///
    /// The collecting scope's dispatcher must run the producer beside the
    /// collector. On [`Inline`](crate::runtime::Inline), or on a
    /// [`SingleThreadDispatcher`](crate::runtime::SingleThreadDispatcher)
    /// collected from its own thread, the collection fails with
    /// [`Error::IllegalState`] instead of deadlocking.
    #[must_use]
    pub fn buffer(self, capacity: usize) -> Self {
        let upstream = self.source;
        Self::new(move |cx, out| {
            if !cx.scope().dispatcher()?.runs_beside_caller() {
                return Err(Error::IllegalState(
                    "buffer needs a dispatcher that runs the producer beside the collector",
                ));
            }
            let channel = Channel::bounded(capacity);
            let failure: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

            let producer = {
                let closer = CloseOnDrop(channel.clone());
                let failure = Arc::clone(&failure);
                let upstream = Arc::clone(&upstream);
                cx.launch_child(move |cx| {
                    let tx = &closer.0;
                    let result = upstream(
                        cx,
                        &mut Emitter::new(&mut |value: T| tx.send(value).map_err(Error::from)),
                    );
                    // The failure must be visible before the collector sees the close.
                    let outcome = match result {
                        Ok(()) | Err(Error::ChannelClosed) => Ok(()),
                        Err(Error::Cancelled(reason)) => Err(Error::Cancelled(reason)),
                        Err(err) => {
                            *failure.lock() = Some(err);
                            Ok(())
                        }
                    };
                    drop(closer);
                    outcome
                })?
            };
            let mut guard = StopProducer {
                producer,
                channel: channel.clone(),
                armed: true,
            };

            loop {
                match channel.receive() {
                    Ok(value) => out.emit(value)?,
                    Err(RecvError::Closed) => break,
                    Err(err) => return Err(err.into()),
                }
            }

            if let Some(err) = failure.lock().take() {
                return Err(err);
            }
            guard.producer.wait_unit()?;
            guard.armed = false;
            Ok(())
        })
    }

    /// Drives the flow on the current unit, handing each value to `visitor`.
    pub fn collect_in<F>(&self, cx: &Cx, mut visitor: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        (self.source)(cx, &mut Emitter::new(&mut visitor))
    }

    /// Launches a job on `scope` that drives the flow into `visitor`.
    pub fn collect<F>(&self, scope: &Scope, mut visitor: F) -> Result<JobHandle>
    where
        F: FnMut(T) -> Result<()> + Send + 'static,
    {
        let flow = self.clone();
        scope.launch(move |cx| flow.collect_in(cx, &mut visitor))
    }

    /// Collects every value into a `Vec`.
    pub fn to_list(&self, scope: &Scope) -> Result<Job<Vec<T>>> {
        let flow = self.clone();
        scope.spawn(move |cx| {
            let mut items = Vec::new();
            flow.collect_in(cx, |value| {
                items.push(value);
                Ok(())
            })?;
            Ok(items)
        })
    }

    /// Folds every value into an accumulator.
    pub fn fold<A, F>(&self, scope: &Scope, init: A, mut f: F) -> Result<Job<A>>
    where
        A: Send + 'static,
        F: FnMut(A, T) -> A + Send + 'static,
    {
        let flow = self.clone();
        scope.spawn(move |cx| {
            let mut acc = Some(init);
            flow.collect_in(cx, |value| {
                if let Some(current) = acc.take() {
                    acc = Some(f(current, value));
                }
                Ok(())
            })?;
            acc.ok_or(Error::IllegalState("fold accumulator lost"))
        })
    }

    /// Counts the values.
    pub fn count(&self, scope: &Scope) -> Result<Job<usize>> {
        self.fold(scope, 0, |n, _| n + 1)
    }

    /// The first value, if any. The upstream stops after it.
    pub fn first(&self, scope: &Scope) -> Result<Job<Option<T>>> {
        let flow = self.clone().take(1);
        scope.spawn(move |cx| {
            let mut first = None;
            flow.collect_in(cx, |value| {
                first = Some(value);
                Ok(())
            })?;
            Ok(first)
        })
    }
}

impl Flow<i64> {
    /// Emits `count` consecutive integers starting at `start`.
    #[must_use]
    pub fn range(start: i64, count: usize) -> Self {
        Self::new(move |cx, out| {
            let mut value = start;
            for _ in 0..count {
                cx.checkpoint()?;
                out.emit(value)?;
                value += 1;
            }
            Ok(())
        })
    }
}

/// Closes the channel when the producer body ends or is dropped unrun.
struct CloseOnDrop<T>(Channel<T>);

impl<T> Drop for CloseOnDrop<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Cancels the producer if the collector leaves early.
struct StopProducer<T> {
    producer: JobHandle,
    channel: Channel<T>,
    armed: bool,
}

impl<T> Drop for StopProducer<T> {
    fn drop(&mut self) {
        if self.armed {
            self.producer.cancel_with(
                CancelReason::parent_cancelled().with_message("flow collection stopped"),
            );
            self.channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Inline, ThreadPerTask};
    use crate::test_utils::{init_test_logging, wait_until};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn inline_scope() -> Scope {
        Scope::with_dispatcher(Arc::new(Inline::new()))
    }

    fn threaded_scope() -> Scope {
        Scope::with_dispatcher(Arc::new(ThreadPerTask::new()))
    }

    #[test]
    fn operators_compose_lazily() {
        init_test_logging();
        crate::test_phase!("operators_compose_lazily");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let flow = Flow::range(1, 10)
            .on_each(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .filter(|n| n % 2 == 0)
            .map(|n| n * 10);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        let scope = inline_scope();
        let out = flow.to_list(&scope).expect("spawn").join().expect("collect");
        crate::assert_with_log!(
            out == vec![20, 40, 60, 80, 100],
            "even values scaled",
            vec![20, 40, 60, 80, 100],
            out
        );
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        crate::test_complete!("operators_compose_lazily");
    }

    #[test]
    fn distinct_state_is_per_collection() {
        let scope = inline_scope();
        let flow = Flow::of(vec![1, 1, 2, 2, 2, 3, 1, 1]).distinct_until_changed();
        let first = flow.to_list(&scope).expect("spawn").join().expect("first");
        let second = flow.to_list(&scope).expect("spawn").join().expect("second");
        assert_eq!(first, vec![1, 2, 3, 1]);
        assert_eq!(first, second);
    }

    #[test]
    fn take_stops_upstream_and_nests() {
        let scope = inline_scope();
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let flow = Flow::range(0, 1_000)
            .on_each(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .take(5)
            .take(3);
        let out = flow.to_list(&scope).expect("spawn").join().expect("collect");
        assert_eq!(out, vec![0, 1, 2]);
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
        assert_eq!(flow.take(0).count(&scope).expect("spawn").join().expect("count"), 0);
    }

    #[test]
    fn terminal_operators() {
        let scope = inline_scope();
        let flow = Flow::range(1, 4);
        assert_eq!(flow.count(&scope).expect("spawn").join().expect("count"), 4);
        assert_eq!(
            flow.fold(&scope, 0, |acc, n| acc + n).expect("spawn").join().expect("fold"),
            10
        );
        assert_eq!(flow.first(&scope).expect("spawn").join().expect("first"), Some(1));
        assert_eq!(
            Flow::<i64>::empty().first(&scope).expect("spawn").join().expect("first"),
            None
        );
    }

    #[test]
    fn source_failure_fails_the_collecting_job() {
        let scope = inline_scope();
        let flow = Flow::new(|_cx, out: &mut Emitter<'_, u32>| {
            out.emit(1)?;
            Err(Error::msg("source broke"))
        });
        let err = flow.to_list(&scope).expect("spawn").join().expect_err("fails");
        assert_eq!(err.to_string(), "source broke");
    }

    #[test]
    fn buffer_preserves_order() {
        init_test_logging();
        let scope = threaded_scope();
        let out = Flow::range(0, 200)
            .buffer(4)
            .map(|n| n + 1)
            .to_list(&scope)
            .expect("spawn")
            .join()
            .expect("collect");
        assert_eq!(out, (1..=200).collect::<Vec<_>>());
    }

    #[test]
    fn buffer_reraises_upstream_failure_after_drain() {
        let scope = threaded_scope();
        let flow = Flow::new(|_cx, out: &mut Emitter<'_, u32>| {
            for i in 0..3 {
                out.emit(i)?;
            }
            Err(Error::msg("producer broke"))
        })
        .buffer(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let job = flow
            .collect(&scope, move |value| {
                sink.lock().push(value);
                Ok(())
            })
            .expect("launch");
        let err = job.wait().expect_err("upstream failure");
        assert_eq!(err.to_string(), "producer broke");
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn buffer_refuses_a_dispatcher_that_would_deadlock() {
        init_test_logging();
        let flow = Flow::range(0, 100).buffer(2);
        let err = flow
            .to_list(&inline_scope())
            .expect("spawn")
            .join()
            .expect_err("inline cannot run the producer beside the collector");
        assert!(matches!(err, Error::IllegalState(_)));

        let single = Arc::new(crate::runtime::SingleThreadDispatcher::new("flow-main").expect("thread"));
        let scope = Scope::with_dispatcher(Arc::clone(&single) as Arc<dyn Dispatcher>);
        let err = flow.to_list(&scope).expect("spawn").join().expect_err("same thread");
        assert!(matches!(err, Error::IllegalState(_)));
        single.shutdown();
    }

    #[test]
    fn buffered_failure_is_never_lost_to_the_close() {
        init_test_logging();
        let scope = threaded_scope();
        let flow = Flow::new(|_cx, out: &mut Emitter<'_, u32>| {
            out.emit(1)?;
            Err(Error::msg("producer broke"))
        })
        .buffer(4);
        for round in 0..300 {
            let outcome = flow.to_list(&scope).expect("spawn").join();
            crate::assert_with_log!(
                matches!(&outcome, Err(err) if err.to_string() == "producer broke"),
                "upstream failure reaches the collector",
                round,
                outcome
            );
        }
    }

    #[test]
    fn cancelling_collection_cancels_producer() {
        init_test_logging();
        let scope = threaded_scope();
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let flow = Flow::new(move |cx, out: &mut Emitter<'_, usize>| loop {
            cx.checkpoint()?;
            out.emit(counter.fetch_add(1, Ordering::SeqCst))?;
        })
        .buffer(2);
        let job = flow
            .collect(&scope, |_| {
                std::thread::sleep(Duration::from_millis(5));
                Ok(())
            })
            .expect("launch");
        std::thread::sleep(Duration::from_millis(30));
        job.cancel();
        assert!(job.wait().expect_err("cancelled").is_cancelled());
        assert!(job.children().is_empty());
        let settled = produced.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(produced.load(Ordering::SeqCst), settled);
        assert!(wait_until(Duration::from_secs(1), || scope.live_jobs() == 0));
    }
}
