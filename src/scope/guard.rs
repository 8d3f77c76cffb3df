/*!
 * Scope Guards
 *
 * RAII handle returned by scope entry. Callers only ever release it; whether
 * a node was created behind it is an implementation detail.
 *
 * ## Example
 *
 * ```ignore
 * let mut guard = provider.begin_timeout_scope(Duration::from_secs(5))?;
 * do_work(provider.effective_signal());
 * guard.dispose(); // Or let it drop
 * ```
 */

use super::node::ScopeNode;
use super::types::Ownership;
use crate::signal::CancelSignal;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

enum GuardState {
    NoOp,
    Active {
        node: Arc<ScopeNode>,
        created: Instant,
        disposed: bool,
    },
}

/// Disposable handle for an entered scope
///
/// Disposal is idempotent and tolerant of misuse: disposing out of nesting
/// order discards the scopes above, disposing twice does nothing, and a
/// detached guard simply never unlinks its scope.
#[must_use = "dropping a ScopeGuard immediately exits the scope"]
pub struct ScopeGuard {
    state: GuardState,
}

impl ScopeGuard {
    pub(crate) fn noop() -> Self {
        Self {
            state: GuardState::NoOp,
        }
    }

    pub(crate) fn active(node: Arc<ScopeNode>) -> Self {
        Self {
            state: GuardState::Active {
                node,
                created: Instant::now(),
                disposed: false,
            },
        }
    }

    /// Whether scope entry was optimized away
    pub fn is_noop(&self) -> bool {
        matches!(self.state, GuardState::NoOp)
    }

    /// Whether the guard still has to be disposed
    pub fn is_active(&self) -> bool {
        matches!(self.state, GuardState::Active { disposed: false, .. })
    }

    /// Signal installed by this scope, `None` for a no-op guard
    pub fn signal(&self) -> Option<&CancelSignal> {
        match &self.state {
            GuardState::NoOp => None,
            GuardState::Active { node, .. } => Some(node.signal()),
        }
    }

    pub fn ownership(&self) -> Ownership {
        match &self.state {
            GuardState::NoOp => Ownership::Unowned,
            GuardState::Active { node, .. } => node.ownership(),
        }
    }

    /// Time since the scope was entered
    pub fn lifetime(&self) -> Duration {
        match &self.state {
            GuardState::NoOp => Duration::ZERO,
            GuardState::Active { created, .. } => created.elapsed(),
        }
    }

    /// Exit the scope
    pub fn dispose(&mut self) {
        if let GuardState::Active { node, disposed, .. } = &mut self.state {
            if !*disposed {
                *disposed = true;
                node.stack().dispose(node);
            }
        }
    }

    /// Drop the guard without exiting the scope
    ///
    /// The scope stays on its context's chain until something below it is
    /// disposed; its composite is released when the node is finally dropped.
    pub fn detach(mut self) {
        if let GuardState::Active { disposed, .. } = &mut self.state {
            *disposed = true;
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            GuardState::NoOp => f.write_str("ScopeGuard(noop)"),
            GuardState::Active { node, disposed, .. } => f
                .debug_struct("ScopeGuard")
                .field("node", node)
                .field("disposed", disposed)
                .finish(),
        }
    }
}
