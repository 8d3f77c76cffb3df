/*!
 * Scoped Cancel Library
 * Ambient cancellation signals with composable, context-local scopes
 */

pub mod errors;
pub mod scope;
pub mod signal;

// Re-exports
pub use errors::{ScopeError, ScopeResult};
pub use scope::{
    context, Composition, Ownership, ProviderConfig, ScopeGuard, ScopeOptions, ScopeStack,
    SignalComposer, SignalProvider,
};
pub use signal::{
    cached_fired_signal, CancelSignal, CancelSource, Clock, ManualClock, Registration,
    SystemClock, TimerHandle,
};
