/*!
 * Scope Types
 * Options for entering a scope and provider configuration
 */

use crate::signal::{CancelSignal, Clock, SystemClock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How the signal installed by a scope is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// No scope node was created
    Unowned,
    /// An existing signal is reused and never released by the scope
    Reused,
    /// The scope owns a linked composite
    Linked,
    /// The scope owns a clock-driven composite
    Timed,
}

impl Ownership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unowned => "unowned",
            Self::Reused => "reused",
            Self::Linked => "linked",
            Self::Timed => "timed",
        }
    }

    /// Whether the scope holds a resource it must release
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Linked | Self::Timed)
    }
}

/// Parameters for entering a scope
///
/// # Example
///
/// ```ignore
/// let guard = provider.begin_scope(
///     ScopeOptions::new()
///         .with_signal(request.signal())
///         .with_timeout(Duration::from_secs(30)),
/// )?;
/// ```
#[derive(Clone, Default)]
pub struct ScopeOptions {
    pub(crate) signals: Vec<CancelSignal>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) clock: Option<Arc<dyn Clock>>,
    pub(crate) clean: bool,
}

impl ScopeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signal the scope should also observe
    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signals.push(signal);
        self
    }

    /// Fire the scope's signal once `timeout` elapses
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Measure the timeout on `clock` instead of the provider's clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Ignore the enclosing signal for the lifetime of the scope
    pub fn clean(mut self) -> Self {
        self.clean = true;
        self
    }

    pub fn signals(&self) -> &[CancelSignal] {
        &self.signals
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_clean(&self) -> bool {
        self.clean
    }
}

impl fmt::Debug for ScopeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeOptions")
            .field("signals", &self.signals)
            .field("timeout", &self.timeout)
            .field("custom_clock", &self.clock.is_some())
            .field("clean", &self.clean)
            .finish()
    }
}

/// Provider configuration
#[derive(Clone)]
pub struct ProviderConfig {
    /// Signal observed when no scope is active
    pub root_signal: CancelSignal,
    /// Clock for timeout scopes that do not name one
    pub clock: Arc<dyn Clock>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            root_signal: CancelSignal::never(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root signal
    pub fn with_root_signal(mut self, signal: CancelSignal) -> Self {
        self.root_signal = signal;
        self
    }

    /// Set the default clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("root_signal", &self.root_signal)
            .field("system_clock", &self.clock.is_system())
            .finish()
    }
}
