/*!
 * Scope Nodes
 * Immutable links of a context's scope chain
 */

use super::stack::ScopeStack;
use super::types::Ownership;
use crate::signal::{CancelSignal, CompositeSource};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// One active scope
///
/// Everything except the owned composite is fixed at creation. The composite
/// is taken out exactly once, on the first release.
pub struct ScopeNode {
    signal: CancelSignal,
    previous: Option<Arc<ScopeNode>>,
    owned: Mutex<Option<CompositeSource>>,
    ownership: Ownership,
    stack: ScopeStack,
    depth: usize,
}

impl ScopeNode {
    pub(crate) fn new(
        stack: ScopeStack,
        signal: CancelSignal,
        owned: Option<CompositeSource>,
        ownership: Ownership,
        previous: Option<Arc<ScopeNode>>,
    ) -> Self {
        let depth = previous.as_ref().map_or(1, |p| p.depth + 1);
        Self {
            signal,
            previous,
            owned: Mutex::new(owned),
            ownership,
            stack,
            depth,
        }
    }

    /// Signal in effect while this scope is on top
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    /// Scope that was on top when this one was entered
    pub fn previous(&self) -> Option<&Arc<ScopeNode>> {
        self.previous.as_ref()
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Stack this node was pushed onto
    pub fn stack(&self) -> ScopeStack {
        self.stack
    }

    /// Position in the chain, 1 for the outermost scope
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Release the owned composite
    ///
    /// Returns `true` only for the call that actually released something.
    pub(crate) fn release(&self) -> bool {
        let owned = self.owned.lock().take();
        owned.is_some()
    }

    /// Whether the node still holds an owned composite
    pub fn holds_resource(&self) -> bool {
        self.owned.lock().is_some()
    }
}

impl Drop for ScopeNode {
    // Unlink iteratively so long abandoned chains do not recurse on drop.
    fn drop(&mut self) {
        let mut next = self.previous.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.previous.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for ScopeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeNode")
            .field("stack", &self.stack.id())
            .field("depth", &self.depth)
            .field("ownership", &self.ownership)
            .field("signal", &self.signal)
            .field("holds_resource", &self.holds_resource())
            .finish()
    }
}
