/*!
 * Logical Execution Context
 *
 * Scope state is attached to a logical execution context rather than to a
 * worker thread:
 *
 * - Inside [`scope`] (and tasks started with [`spawn`]) the context is a tokio
 *   task-local frame. It follows the future across `.await` points and worker
 *   migrations.
 * - In any other tokio task the context is a frame keyed by the task id. It
 *   starts empty and is discarded once the task's chains are empty.
 * - Anywhere else the context is the current OS thread. A new thread starts
 *   with an empty frame.
 *
 * Entering a context always copies the caller's frame (copy-on-branch).
 * Mutations made inside never flow back to the caller, and the caller's later
 * mutations are never seen inside. A bare `tokio::spawn` does not inherit
 * anything, but it never shares a frame with its parent or its worker thread.
 */

use super::node::ScopeNode;
use super::stack::StackId;
use ahash::RandomState;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use tokio::task::{self, JoinHandle};

/// Snapshot of the top scope of every stack in one context
///
/// Frames are cheap to clone: they only hold reference-counted nodes.
#[derive(Clone, Default)]
pub struct Frame {
    tops: HashMap<StackId, Arc<ScopeNode>, RandomState>,
}

impl Frame {
    pub(crate) fn top(&self, stack: StackId) -> Option<&Arc<ScopeNode>> {
        self.tops.get(&stack)
    }

    pub(crate) fn set_top(&mut self, stack: StackId, node: Option<Arc<ScopeNode>>) -> Option<Arc<ScopeNode>> {
        match node {
            Some(node) => self.tops.insert(stack, node),
            None => self.tops.remove(&stack),
        }
    }

    /// Number of stacks with an active scope in this frame
    pub fn len(&self) -> usize {
        self.tops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tops.is_empty()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.tops.iter().map(|(id, node)| (id, node.depth())))
            .finish()
    }
}

tokio::task_local! {
    static TASK_FRAME: RefCell<Frame>;
}

thread_local! {
    static THREAD_FRAME: RefCell<Frame> = RefCell::new(Frame::default());
}

/// Frames of tokio tasks spawned without a task-local frame
static SPAWNED_FRAMES: LazyLock<Mutex<HashMap<task::Id, Frame, RandomState>>> =
    LazyLock::new(|| Mutex::new(HashMap::with_hasher(RandomState::new())));

/// Run `f` against the current context's frame
///
/// `f` must not re-enter the context; nodes it removes should be returned
/// and dropped by the caller.
pub(crate) fn with_frame<R>(f: impl FnOnce(&mut Frame) -> R) -> R {
    if in_task_context() {
        return TASK_FRAME.with(|cell| f(&mut cell.borrow_mut()));
    }

    if let Some(id) = task::try_id() {
        let mut frames = SPAWNED_FRAMES.lock();
        let frame = frames.entry(id).or_default();
        let result = f(frame);
        if frame.is_empty() {
            frames.remove(&id);
        }
        return result;
    }

    match THREAD_FRAME.try_with(|_| ()) {
        Ok(()) => THREAD_FRAME.with(|cell| f(&mut cell.borrow_mut())),
        // Thread teardown already destroyed the frame: nothing is on it.
        Err(_) => f(&mut Frame::default()),
    }
}

#[cfg(test)]
pub(crate) fn has_spawned_frame(id: task::Id) -> bool {
    SPAWNED_FRAMES.lock().contains_key(&id)
}

/// Whether the caller runs inside a task-local context
pub fn in_task_context() -> bool {
    TASK_FRAME.try_with(|_| ()).is_ok()
}

/// Copy of the current context's frame
pub fn snapshot() -> Frame {
    with_frame(|frame| frame.clone())
}

/// Run `future` in a new context forked from the caller's
///
/// The fork happens when `scope` is called, not when the future is first
/// polled.
pub fn scope<F>(future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    scope_with(snapshot(), future)
}

/// Run `future` in a context seeded with `frame`
pub fn scope_with<F>(frame: Frame, future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    TASK_FRAME.scope(RefCell::new(frame), future)
}

/// Run `f` synchronously in a context seeded with `frame`
///
/// Useful to carry scopes onto a freshly spawned thread:
///
/// ```ignore
/// let frame = context::snapshot();
/// std::thread::spawn(move || context::run_with(frame, || work(&provider)));
/// ```
pub fn run_with<R>(frame: Frame, f: impl FnOnce() -> R) -> R {
    TASK_FRAME.sync_scope(RefCell::new(frame), f)
}

/// Spawn a task that inherits a copy of the caller's context
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(scope(future))
}
