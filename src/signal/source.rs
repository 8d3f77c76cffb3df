/*!
 * Cancel Sources and Signals
 *
 * Monotone cancellation flag with at-most-once callback delivery
 */

use ahash::RandomState;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// Callback invoked when a signal fires
pub type CallbackFn = Box<dyn FnOnce() + Send>;

/// Shared state behind a source and all of its signals
pub(crate) struct SignalState {
    fired: AtomicBool,
    callbacks: Mutex<HashMap<u64, CallbackFn, RandomState>>,
    next_id: AtomicU64,
    notify: Notify,
}

impl SignalState {
    fn new(fired: bool) -> Self {
        Self {
            fired: AtomicBool::new(fired),
            callbacks: Mutex::new(HashMap::with_hasher(RandomState::new())),
            next_id: AtomicU64::new(1),
            notify: Notify::new(),
        }
    }

    #[inline]
    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Callbacks run without the lock held; they may fire other sources.
        let callbacks: Vec<_> = self.callbacks.lock().drain().map(|(_, cb)| cb).collect();
        debug!("Signal fired, running {} callbacks", callbacks.len());
        for callback in callbacks {
            callback();
        }

        self.notify.notify_waiters();
        true
    }
}

/// Owner side of a cancellation signal
///
/// Cloning a source shares the same underlying state.
#[derive(Clone)]
pub struct CancelSource {
    state: Arc<SignalState>,
}

impl CancelSource {
    /// Create a new pending source
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new(false)),
        }
    }

    /// Create a source that is already fired
    pub(crate) fn fired() -> Self {
        Self {
            state: Arc::new(SignalState::new(true)),
        }
    }

    pub(crate) fn state(&self) -> &Arc<SignalState> {
        &self.state
    }

    /// Get an observer signal for this source
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            state: Some(Arc::clone(&self.state)),
        }
    }

    /// Fire the source
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn fire(&self) -> bool {
        self.state.fire()
    }

    /// Check if the source has fired
    #[inline]
    pub fn is_fired(&self) -> bool {
        self.state.is_fired()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSource")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Observer side of a cancellation signal
///
/// A signal either belongs to a source or is the permanently pending
/// [`CancelSignal::never`] signal, which owns no state at all.
#[derive(Clone, Default)]
pub struct CancelSignal {
    state: Option<Arc<SignalState>>,
}

impl CancelSignal {
    /// A signal that can never fire
    #[inline]
    pub const fn never() -> Self {
        Self { state: None }
    }

    pub(crate) fn from_state(state: Arc<SignalState>) -> Self {
        Self { state: Some(state) }
    }

    /// Whether this signal can ever fire
    #[inline]
    pub fn can_fire(&self) -> bool {
        self.state.is_some()
    }

    /// Whether this signal has fired
    #[inline]
    pub fn is_fired(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_fired())
    }

    /// Identity comparison: both handles observe the same underlying state
    pub fn same_as(&self, other: &CancelSignal) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Register a callback to run once when the signal fires
    ///
    /// If the signal has already fired the callback runs inline before this
    /// returns and the returned registration is inert.
    pub fn register<F>(&self, callback: F) -> Registration
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(state) = &self.state else {
            return Registration::inert();
        };

        let mut callbacks = state.callbacks.lock();
        if state.is_fired() {
            drop(callbacks);
            callback();
            return Registration::inert();
        }

        let id = state.next_id.fetch_add(1, Ordering::Relaxed);
        callbacks.insert(id, Box::new(callback));
        trace!("Registered cancel callback {}", id);

        Registration {
            state: Arc::downgrade(state),
            id,
        }
    }

    /// Wait until the signal fires
    ///
    /// Pends forever on a signal that cannot fire.
    pub async fn fired(&self) {
        let Some(state) = &self.state else {
            return std::future::pending().await;
        };

        loop {
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if state.is_fired() {
                return;
            }
            notified.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.callbacks.lock().len())
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            None => f.write_str("CancelSignal(never)"),
            Some(state) => f
                .debug_struct("CancelSignal")
                .field("fired", &state.is_fired())
                .finish(),
        }
    }
}

/// RAII callback registration
///
/// Dropping the registration removes the callback if it has not run yet.
#[must_use = "dropping a Registration unregisters its callback"]
pub struct Registration {
    state: Weak<SignalState>,
    id: u64,
}

impl Registration {
    fn inert() -> Self {
        Self {
            state: Weak::new(),
            id: 0,
        }
    }

    /// Remove the callback
    ///
    /// Returns `true` if the callback was still pending.
    pub fn unregister(mut self) -> bool {
        self.remove()
    }

    fn remove(&mut self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        self.state = Weak::new();

        let removed = state.callbacks.lock().remove(&self.id).is_some();
        if removed {
            trace!("Unregistered cancel callback {}", self.id);
        }
        removed
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}
