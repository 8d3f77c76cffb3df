/*!
 * Scope Stack
 *
 * Per-context chain of scope nodes for one provider. The stack itself is only
 * an id; the chain lives in the current context's frame, so pushing in one
 * context is invisible to every other context.
 *
 * ## Disposal
 *
 * Disposing a node walks the chain from the current top. If the node is
 * found, the top becomes the node's parent: the node *and everything above
 * it* is unlinked, disposed or not. If it is not found (already unlinked, or
 * entered in another context) the chain is left alone. Either way the node's
 * own composite is released, at most once.
 */

use super::composer::Composition;
use super::context::with_frame;
use super::guard::ScopeGuard;
use super::node::ScopeNode;
use crate::signal::CancelSignal;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique stack identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackId(u64);

impl StackId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack-{}", self.0)
    }
}

/// Handle to a context-local scope chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeStack {
    id: StackId,
}

impl ScopeStack {
    /// Allocate a new, empty stack
    pub fn new() -> Self {
        Self {
            id: StackId(NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn id(&self) -> StackId {
        self.id
    }

    /// Current top node in this context
    pub fn top(&self) -> Option<Arc<ScopeNode>> {
        with_frame(|frame| frame.top(self.id).cloned())
    }

    /// Signal of the current top node in this context
    pub fn current_signal(&self) -> Option<CancelSignal> {
        with_frame(|frame| frame.top(self.id).map(|node| node.signal().clone()))
    }

    /// Number of nodes in this context's chain
    pub fn depth(&self) -> usize {
        with_frame(|frame| frame.top(self.id).map_or(0, |node| node.depth()))
    }

    /// Install a composed signal as the new top
    ///
    /// An unchanged composition creates no node and yields a no-op guard.
    pub fn push(&self, composition: Composition) -> ScopeGuard {
        let ownership = composition.ownership();
        let (signal, owned) = match composition {
            Composition::Unchanged => {
                trace!(stack = self.id.0, "scope entry optimized away");
                return ScopeGuard::noop();
            }
            Composition::Reused(signal) => (signal, None),
            Composition::Composite(composite) => (composite.signal(), Some(composite)),
        };

        let node = with_frame(|frame| {
            let previous = frame.top(self.id).cloned();
            let node = Arc::new(ScopeNode::new(*self, signal, owned, ownership, previous));
            frame.set_top(self.id, Some(Arc::clone(&node)));
            node
        });

        trace!(
            stack = self.id.0,
            depth = node.depth(),
            ownership = ownership.as_str(),
            "scope entered"
        );
        ScopeGuard::active(node)
    }

    /// Unlink `node` (and anything above it) and release its composite
    pub(crate) fn dispose(&self, node: &Arc<ScopeNode>) {
        let unlinked = with_frame(|frame| {
            let top = frame.top(self.id).cloned()?;

            let mut discarded = 0usize;
            let mut cursor = Some(&top);
            while let Some(current) = cursor {
                if Arc::ptr_eq(current, node) {
                    let displaced = frame.set_top(self.id, node.previous().cloned());
                    return Some((discarded, displaced));
                }
                discarded += 1;
                cursor = current.previous();
            }
            None
        });

        match &unlinked {
            Some((0, _)) => trace!(stack = self.id.0, depth = node.depth(), "scope disposed"),
            Some((discarded, _)) => debug!(
                stack = self.id.0,
                depth = node.depth(),
                discarded,
                "scope disposed out of order, discarding scopes above it"
            ),
            None => trace!(
                stack = self.id.0,
                depth = node.depth(),
                "disposed scope not on current chain"
            ),
        }

        // Nodes displaced from the frame are dropped here, outside the frame borrow.
        drop(unlinked);

        if node.release() {
            trace!(stack = self.id.0, ownership = node.ownership().as_str(), "scope resource released");
        }
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}
