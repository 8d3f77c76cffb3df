/*!
 * Scope Module
 *
 * Context-local stack of cancellation scopes.
 *
 * ## Flow
 *
 * 1. `SignalProvider::begin_scope` reads the effective signal of the current
 *    context
 * 2. `SignalComposer` decides the cheapest equivalent signal (reuse, cached
 *    fired signal, or a new composite)
 * 3. `ScopeStack::push` links a `ScopeNode` on top, or returns a no-op guard
 * 4. Dropping the `ScopeGuard` unwinds the stack and releases the composite
 */

mod composer;
pub mod context;
mod guard;
mod node;
mod provider;
mod stack;
mod types;

pub use composer::{Composition, SignalComposer};
pub use context::Frame;
pub use guard::ScopeGuard;
pub use node::ScopeNode;
pub use provider::SignalProvider;
pub use stack::{ScopeStack, StackId};
pub use types::{Ownership, ProviderConfig, ScopeOptions};
