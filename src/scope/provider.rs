/*!
 * Signal Provider
 *
 * Ambient cancellation signal with scoped overrides. Components read the
 * current signal from a shared provider instead of threading it through
 * every call; callers narrow, widen, suppress or time-bound it for a nested
 * region of execution.
 *
 * ## Example
 *
 * ```ignore
 * let provider = SignalProvider::new(shutdown.signal());
 *
 * let _scope = provider.begin_scope(
 *     ScopeOptions::new()
 *         .with_signal(request.signal())
 *         .with_timeout(Duration::from_secs(30)),
 * )?;
 * // Fires on shutdown, request abort, or after 30s
 * let signal = provider.effective_signal();
 *
 * {
 *     // Commit must not be interrupted by shutdown
 *     let _clean = provider.begin_clean_scope()?;
 *     commit(provider.effective_signal())?;
 * }
 * ```
 */

use super::composer::SignalComposer;
use super::guard::ScopeGuard;
use super::stack::ScopeStack;
use super::types::{ProviderConfig, ScopeOptions};
use crate::errors::ScopeResult;
use crate::signal::{CancelSignal, Clock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Source of the current cancellation signal
///
/// Clones share the same scope stack.
#[derive(Clone)]
pub struct SignalProvider {
    root: CancelSignal,
    stack: ScopeStack,
    clock: Arc<dyn Clock>,
}

impl SignalProvider {
    /// Create a provider falling back to `root` when no scope is active
    pub fn new(root: CancelSignal) -> Self {
        Self::with_config(ProviderConfig::new().with_root_signal(root))
    }

    pub fn with_config(config: ProviderConfig) -> Self {
        Self {
            root: config.root_signal,
            stack: ScopeStack::new(),
            clock: config.clock,
        }
    }

    /// Signal observed when no scope is active
    pub fn root_signal(&self) -> &CancelSignal {
        &self.root
    }

    /// Signal in effect for the current context
    pub fn effective_signal(&self) -> CancelSignal {
        self.stack
            .current_signal()
            .unwrap_or_else(|| self.root.clone())
    }

    /// Number of active scopes in the current context
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn stack(&self) -> ScopeStack {
        self.stack
    }

    /// Enter a scope
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::ResourceExhausted` if a timer could not be armed.
    #[instrument(level = "trace", skip(self), fields(stack = self.stack.id().as_u64()))]
    pub fn begin_scope(&self, options: ScopeOptions) -> ScopeResult<ScopeGuard> {
        let incoming = self.effective_signal();
        let clock = options.clock.as_deref().unwrap_or(&*self.clock);

        let composition = SignalComposer::compose(
            &incoming,
            &options.signals,
            options.clean,
            options.timeout,
            clock,
        )?;

        Ok(self.stack.push(composition))
    }

    /// Enter a scope that ignores the enclosing signal
    pub fn begin_clean_scope(&self) -> ScopeResult<ScopeGuard> {
        self.begin_scope(ScopeOptions::new().clean())
    }

    /// Enter a scope that also observes `signal`
    pub fn begin_linked_scope(&self, signal: CancelSignal) -> ScopeResult<ScopeGuard> {
        self.begin_scope(ScopeOptions::new().with_signal(signal))
    }

    /// Enter a scope that fires after `timeout`
    pub fn begin_timeout_scope(&self, timeout: Duration) -> ScopeResult<ScopeGuard> {
        self.begin_scope(ScopeOptions::new().with_timeout(timeout))
    }
}

impl Default for SignalProvider {
    fn default() -> Self {
        Self::with_config(ProviderConfig::default())
    }
}

impl fmt::Debug for SignalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalProvider")
            .field("stack", &self.stack.id())
            .field("root", &self.root)
            .field("system_clock", &self.clock.is_system())
            .finish()
    }
}
