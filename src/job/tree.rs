//! The job tree.
//!
//! Parent/child links between jobs live in an arena keyed by [`JobId`]; a node
//! stores its parent as an id, never as an owning pointer. A node stays in the
//! arena until its job is *done* (own unit finished and no live children);
//! removal detaches it from its parent, which may in turn become done.
//!
//! Lock order: the tree lock may be held while taking a job's state lock,
//! never the other way round. Completion callbacks and cancel hooks always run
//! after the tree lock is released.

use super::shared::JobCore;
use super::ExceptionHandler;
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::tracing_compat::trace;
use crate::types::{CancelReason, JobId};
use crate::util::Arena;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

struct JobNode {
    parent: Option<JobId>,
    children: SmallVec<[JobId; 4]>,
    /// The job's own unit reached a terminal state.
    finished: bool,
    /// Cancellation has started; no new children may attach.
    cancelling: bool,
    core: Arc<JobCore>,
}

/// Arena of live jobs for one scope tree.
pub(crate) struct JobTree {
    nodes: Mutex<Arena<JobNode>>,
}

struct CancelTarget {
    core: Arc<JobCore>,
    root: bool,
}

impl JobTree {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(Arena::new()),
        })
    }

    /// Number of jobs that are not yet done.
    pub(crate) fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Returns the ids of `id`'s live children.
    pub(crate) fn children(&self, id: JobId) -> Vec<JobId> {
        self.nodes
            .lock()
            .get(id.arena_index())
            .map(|node| node.children.to_vec())
            .unwrap_or_default()
    }

    /// Creates a job node, optionally linked under `parent`.
    ///
    /// A child inherits its parent's exception handler; a root job inherits
    /// `fallback` (the scope's handler).
    pub(crate) fn create(
        self: &Arc<Self>,
        parent: Option<JobId>,
        scope: Scope,
        fallback: Option<ExceptionHandler>,
    ) -> Result<Arc<JobCore>> {
        let mut nodes = self.nodes.lock();
        let inherited = match parent {
            Some(parent_id) => {
                let node = nodes
                    .get(parent_id.arena_index())
                    .filter(|node| !node.cancelling)
                    .ok_or(Error::IllegalState("parent job is cancelling or done"))?;
                node.core.effective_handler().or(fallback)
            }
            None => fallback,
        };

        let tree = Arc::clone(self);
        let index = nodes.insert_with(|index| JobNode {
            parent,
            children: SmallVec::new(),
            finished: false,
            cancelling: false,
            core: Arc::new(JobCore::new(JobId::from_arena(index), tree, scope, inherited)),
        });
        let id = JobId::from_arena(index);
        if let Some(parent_node) = parent.and_then(|p| nodes.get_mut(p.arena_index())) {
            parent_node.children.push(id);
        }
        let core = nodes
            .get(index)
            .map(|node| Arc::clone(&node.core))
            .ok_or(Error::IllegalState("job node vanished during creation"))?;
        trace!(job = %id, parent = ?parent, "job created");
        Ok(core)
    }

    /// Records that `id`'s own unit has finished and completes every job that
    /// became done as a result.
    pub(crate) fn mark_finished(&self, id: JobId) {
        let done = {
            let mut nodes = self.nodes.lock();
            if let Some(node) = nodes.get_mut(id.arena_index()) {
                node.finished = true;
            }
            let mut done = Vec::new();
            Self::collect_done(&mut nodes, id, &mut done);
            done
        };
        for core in done {
            core.mark_done();
        }
    }

    /// Cancels `id` and its subtree.
    ///
    /// Children are cancelled first (depth-first), then the job detaches from
    /// its parent, then its own execution is cancelled. Descendants receive
    /// [`CancelReason::parent_cancelled`]; the job itself receives `reason`.
    pub(crate) fn cancel(&self, id: JobId, reason: &CancelReason) {
        self.cancel_many(&[id], reason);
    }

    /// Cancels several subtrees as one step.
    ///
    /// The tree lock is taken once, and every affected token is flagged before
    /// any waiter is woken or any completion runs, so no unit in the batch can
    /// finish its work after the first one observed the cancellation.
    pub(crate) fn cancel_many(&self, roots: &[JobId], reason: &CancelReason) {
        let (targets, done) = {
            let mut nodes = self.nodes.lock();
            let mut targets = Vec::new();
            let mut done = Vec::new();
            for &id in roots {
                Self::cancel_subtree(&mut nodes, id, true, &mut targets, &mut done);
            }
            (targets, done)
        };
        if targets.is_empty() {
            return;
        }
        trace!(
            roots = roots.len(),
            reason = %reason,
            subtree = targets.len(),
            "cancelling job subtrees"
        );

        let flagged: Vec<(Arc<JobCore>, bool)> = targets
            .into_iter()
            .filter_map(|target| {
                let own_reason = if target.root {
                    reason.clone()
                } else {
                    CancelReason::parent_cancelled()
                };
                let claimed = target.core.request_cancel(own_reason)?;
                Some((target.core, claimed))
            })
            .collect();

        for (core, claimed) in &flagged {
            core.token().wake();
            if *claimed {
                // The unit never started; cancelling it finished it.
                self.mark_finished(core.id());
            }
        }
        for core in done {
            core.mark_done();
        }
    }

    fn cancel_subtree(
        nodes: &mut Arena<JobNode>,
        id: JobId,
        root: bool,
        targets: &mut Vec<CancelTarget>,
        done: &mut Vec<Arc<JobCore>>,
    ) {
        let children = match nodes.get_mut(id.arena_index()) {
            Some(node) if !node.cancelling => {
                node.cancelling = true;
                node.children.clone()
            }
            _ => return,
        };

        for child in children {
            Self::cancel_subtree(nodes, child, false, targets, done);
        }

        // Detaching the last child may already have completed this node.
        let Some(node) = nodes.get_mut(id.arena_index()) else {
            return;
        };
        let parent = node.parent.take();
        targets.push(CancelTarget {
            core: Arc::clone(&node.core),
            root,
        });

        Self::collect_done(nodes, id, done);
        if let Some(parent) = parent {
            if let Some(parent_node) = nodes.get_mut(parent.arena_index()) {
                parent_node.children.retain(|child| *child != id);
            }
            Self::collect_done(nodes, parent, done);
        }
    }

    /// Removes `id` if it is done, cascading to ancestors that become done.
    fn collect_done(nodes: &mut Arena<JobNode>, mut id: JobId, done: &mut Vec<Arc<JobCore>>) {
        loop {
            match nodes.get(id.arena_index()) {
                Some(node) if node.finished && node.children.is_empty() => {}
                _ => return,
            }
            let Some(node) = nodes.remove(id.arena_index()) else {
                return;
            };
            done.push(node.core);
            let Some(parent) = node.parent else {
                return;
            };
            if let Some(parent_node) = nodes.get_mut(parent.arena_index()) {
                parent_node.children.retain(|child| *child != id);
            }
            id = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::runtime::Inline;
    use crate::scope::{Context, Scope};
    use crate::test_utils::init_test_logging;

    fn scope() -> Scope {
        Scope::new(Context::new().with_dispatcher(Arc::new(Inline::new())))
    }

    #[test]
    fn parent_done_only_after_children() {
        init_test_logging();
        crate::test_phase!("parent_done_only_after_children");
        let scope = scope();
        let tree = JobTree::new();
        let parent = tree.create(None, scope.clone(), None).expect("parent");
        let child = tree
            .create(Some(parent.id()), scope.clone(), None)
            .expect("child");
        assert_eq!(tree.children(parent.id()), vec![child.id()]);

        assert!(parent.start());
        parent.settle(Ok(()));
        crate::assert_with_log!(!parent.is_done(), "parent waits for child", false, parent.is_done());
        assert_eq!(parent.phase(), JobState::Completed);

        assert!(child.start());
        child.settle(Ok(()));
        assert!(child.is_done());
        assert!(parent.is_done());
        assert_eq!(tree.len(), 0);
        crate::test_complete!("parent_done_only_after_children");
    }

    #[test]
    fn cancel_detaches_and_refuses_new_children() {
        init_test_logging();
        let scope = scope();
        let tree = JobTree::new();
        let root = tree.create(None, scope.clone(), None).expect("root");
        let mid = tree.create(Some(root.id()), scope.clone(), None).expect("mid");
        let leaf = tree.create(Some(mid.id()), scope.clone(), None).expect("leaf");

        tree.cancel(mid.id(), &CancelReason::user("stop"));

        assert_eq!(leaf.phase(), JobState::Cancelled);
        assert_eq!(
            leaf.cancel_reason().map(|r| r.kind()),
            Some(crate::types::CancelKind::ParentCancelled)
        );
        assert_eq!(mid.phase(), JobState::Cancelled);
        assert!(tree.children(root.id()).is_empty());
        assert!(mid.is_done() && leaf.is_done());
        assert!(!root.is_done());

        let err = tree
            .create(Some(mid.id()), scope, None)
            .err()
            .expect("cancelled parent refuses children");
        assert!(matches!(err, Error::IllegalState(_)));
    }

    #[test]
    fn cancelling_finished_parent_completes_it() {
        init_test_logging();
        let scope = scope();
        let tree = JobTree::new();
        let parent = tree.create(None, scope.clone(), None).expect("parent");
        let child = tree.create(Some(parent.id()), scope, None).expect("child");
        assert!(parent.start());
        parent.settle(Ok(()));
        assert!(child.start());

        tree.cancel(parent.id(), &CancelReason::user("stop"));
        assert!(parent.is_done());
        assert_eq!(parent.phase(), JobState::Completed);
        assert_eq!(child.phase(), JobState::Cancelled);
        assert!(!child.is_done());

        child.settle(Ok(()));
        assert!(child.is_done());
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn batch_cancel_flags_every_job_before_waking_any() {
        init_test_logging();
        crate::test_phase!("batch_cancel_flags_every_job_before_waking_any");
        let scope = scope();
        let tree = JobTree::new();
        let jobs: Vec<_> = (0..3)
            .map(|_| tree.create(None, scope.clone(), None).expect("job"))
            .collect();
        for job in &jobs {
            assert!(job.start());
        }
        let pending = tree.create(None, scope.clone(), None).expect("pending");

        let tokens: Vec<_> = jobs.iter().map(|job| job.token().clone()).collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _guards: Vec<_> = tokens
            .iter()
            .map(|token| {
                let all = tokens.clone();
                let seen = Arc::clone(&seen);
                token.on_cancel(move || {
                    let flagged = all.iter().filter(|t| t.is_cancelled()).count();
                    seen.lock().push(flagged);
                })
            })
            .collect();

        let mut ids: Vec<_> = jobs.iter().map(|job| job.id()).collect();
        ids.push(pending.id());
        tree.cancel_many(&ids, &CancelReason::shutdown());

        crate::assert_with_log!(
            *seen.lock() == vec![3, 3, 3],
            "each hook sees every token already flagged",
            vec![3, 3, 3],
            seen.lock().clone()
        );
        assert!(pending.is_done());
        assert_eq!(
            pending.cancel_reason().map(|r| r.kind()),
            Some(crate::types::CancelKind::Shutdown)
        );
        for job in &jobs {
            assert_eq!(job.phase(), JobState::Cancelled);
            assert!(!job.is_done());
            job.settle(Ok(()));
        }
        assert_eq!(tree.len(), 0);
        crate::test_complete!("batch_cancel_flags_every_job_before_waking_any");
    }
}
