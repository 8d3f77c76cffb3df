/*!
 * Clocks
 *
 * Pluggable time source for duration-based signals
 */

use crate::errors::{ScopeError, ScopeResult};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deferred action scheduled on a clock
pub type TimerAction = Box<dyn FnOnce() + Send>;

/// Time source able to run an action after a delay
///
/// Implementations must never run an action whose [`TimerHandle`] was
/// dropped or disarmed before the action became due.
pub trait Clock: Send + Sync {
    /// Current instant as seen by this clock
    fn now(&self) -> Instant;

    /// Run `action` once `delay` has elapsed on this clock
    fn schedule(&self, delay: Duration, action: TimerAction) -> ScopeResult<TimerHandle>;

    /// Whether this is the process default clock
    fn is_system(&self) -> bool {
        false
    }
}

/// RAII handle for a scheduled action
///
/// Dropping the handle disarms the action if it has not run yet.
#[must_use = "dropping a TimerHandle disarms the timer"]
pub struct TimerHandle {
    disarm: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    /// Create a handle that runs `disarm` when released
    pub fn new<F>(disarm: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            disarm: Some(Box::new(disarm)),
        }
    }

    /// Disarm the timer now
    pub fn disarm(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(disarm) = self.disarm.take() {
            disarm();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.disarm.is_some())
            .finish()
    }
}

/// Wall clock backed by tokio timers, or a shared timer thread elsewhere
///
/// The tokio path is only taken when the current runtime has its time driver
/// enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, action: TimerAction) -> ScopeResult<TimerHandle> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return TIMER_QUEUE.schedule(delay, action);
        };

        // Creating a `Sleep` panics when the runtime was built without timers.
        let sleep = match std::panic::catch_unwind(|| tokio::time::sleep(delay)) {
            Ok(sleep) => sleep,
            Err(_) => {
                debug!("Runtime has no time driver, using the timer thread");
                return TIMER_QUEUE.schedule(delay, action);
            }
        };

        let task = handle.spawn(async move {
            sleep.await;
            action();
        });
        Ok(TimerHandle::new(move || task.abort()))
    }

    fn is_system(&self) -> bool {
        true
    }
}

struct TimerQueueState {
    pending: BTreeMap<(Instant, u64), TimerAction>,
    next_id: u64,
    worker_started: bool,
}

/// Deadline queue served by one lazily started thread
struct TimerQueue {
    state: Mutex<TimerQueueState>,
    wakeup: Condvar,
}

static TIMER_QUEUE: TimerQueue = TimerQueue {
    state: parking_lot::const_mutex(TimerQueueState {
        pending: BTreeMap::new(),
        next_id: 1,
        worker_started: false,
    }),
    wakeup: Condvar::new(),
};

impl TimerQueue {
    fn schedule(&'static self, delay: Duration, action: TimerAction) -> ScopeResult<TimerHandle> {
        // Delays past the representable range never elapse.
        let Some(deadline) = Instant::now().checked_add(delay) else {
            return Ok(TimerHandle::new(|| {}));
        };

        let mut state = self.state.lock();
        if !state.worker_started {
            std::thread::Builder::new()
                .name("scoped-timer".into())
                .spawn(move || self.run())
                .map_err(|e| {
                    warn!("Failed to spawn timer thread: {}", e);
                    ScopeError::ResourceExhausted {
                        resource: "timer thread",
                        reason: e.to_string(),
                    }
                })?;
            state.worker_started = true;
            debug!("Started shared timer thread");
        }

        let key = (deadline, state.next_id);
        state.next_id += 1;
        let earliest = state.pending.first_key_value().map_or(true, |(first, _)| key < *first);
        state.pending.insert(key, action);
        drop(state);

        if earliest {
            self.wakeup.notify_one();
        }

        Ok(TimerHandle::new(move || {
            self.state.lock().pending.remove(&key);
        }))
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            let now = Instant::now();
            let mut due = Vec::new();
            while let Some(entry) = state.pending.first_entry() {
                if entry.key().0 > now {
                    break;
                }
                due.push(entry.remove());
            }

            if !due.is_empty() {
                MutexGuard::unlocked(&mut state, || {
                    for action in due {
                        if std::panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                            warn!("Timer action panicked");
                        }
                    }
                });
                continue;
            }

            match state.pending.first_key_value().map(|((deadline, _), _)| *deadline) {
                Some(deadline) => {
                    self.wakeup.wait_until(&mut state, deadline);
                }
                None => self.wakeup.wait(&mut state),
            }
        }
    }

    #[cfg(test)]
    fn is_armed(&self, deadline_after: Instant) -> bool {
        self.state.lock().pending.keys().any(|(deadline, _)| *deadline >= deadline_after)
    }
}

struct ManualState {
    elapsed: Duration,
    pending: BTreeMap<(Duration, u64), TimerAction>,
}

/// Deterministic clock that only moves when told to
///
/// # Example
///
/// ```ignore
/// let clock = Arc::new(ManualClock::new());
/// let guard = provider.begin_scope(
///     ScopeOptions::new()
///         .with_timeout(Duration::from_secs(5))
///         .with_clock(clock.clone()),
/// )?;
/// clock.advance(Duration::from_secs(5));
/// assert!(provider.effective_signal().is_fired());
/// ```
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
    next_id: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                pending: BTreeMap::new(),
            })),
            next_id: AtomicU64::new(1),
        }
    }

    /// Move time forward, running every action that becomes due
    ///
    /// Actions run in deadline order, outside the clock's lock.
    pub fn advance(&self, by: Duration) {
        let due: Vec<TimerAction> = {
            let mut state = self.state.lock();
            state.elapsed = state.elapsed.saturating_add(by);
            let now = state.elapsed;

            let mut due = Vec::new();
            while let Some(entry) = state.pending.first_entry() {
                if entry.key().0 > now {
                    break;
                }
                due.push(entry.remove());
            }
            due
        };

        if !due.is_empty() {
            debug!("Manual clock advanced, running {} timers", due.len());
        }
        for action in due {
            action();
        }
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }

    fn schedule(&self, delay: Duration, action: TimerAction) -> ScopeResult<TimerHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = {
            let mut state = self.state.lock();
            let key = (state.elapsed.saturating_add(delay), id);
            state.pending.insert(key, action);
            key
        };

        let state = Arc::clone(&self.state);
        Ok(TimerHandle::new(move || {
            state.lock().pending.remove(&key);
        }))
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualClock")
            .field("elapsed", &state.elapsed)
            .field("pending", &state.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[test]
    fn test_manual_clock_runs_due_actions() {
        let clock = ManualClock::new();
        let ran = Arc::new(AtomicBool::new(false));

        let r = ran.clone();
        let _handle = clock
            .schedule(Duration::from_secs(2), Box::new(move || r.store(true, Ordering::SeqCst)))
            .unwrap();

        clock.advance(Duration::from_secs(1));
        assert!(!ran.load(Ordering::SeqCst));
        clock.advance(Duration::from_secs(1));
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_manual_clock_disarm() {
        let clock = ManualClock::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let handle = clock
            .schedule(Duration::from_millis(5), Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(clock.pending(), 1);

        handle.disarm();
        assert_eq!(clock.pending(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_clock_now_tracks_advance() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }

    #[test]
    fn test_system_clock_thread_timer() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let _handle = SystemClock
            .schedule(Duration::from_millis(10), Box::new(move || r.store(true, Ordering::SeqCst)))
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_system_clock_thread_timer_disarm() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let handle = SystemClock
            .schedule(Duration::from_millis(30), Box::new(move || r.store(true, Ordering::SeqCst)))
            .unwrap();
        drop(handle);

        std::thread::sleep(Duration::from_millis(80));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_system_clock_tokio_timer() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let _handle = SystemClock
            .schedule(Duration::from_millis(10), Box::new(move || r.store(true, Ordering::SeqCst)))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_timer_queue_disarm_removes_entry() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let far = Duration::from_secs(9 * 24 * 3600);
        let handle = SystemClock
            .schedule(far, Box::new(move || r.store(true, Ordering::SeqCst)))
            .unwrap();

        let threshold = Instant::now() + far - Duration::from_secs(60);
        assert!(TIMER_QUEUE.is_armed(threshold));
        drop(handle);
        assert!(!TIMER_QUEUE.is_armed(threshold));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_timer_queue_runs_in_deadline_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (order.clone(), order.clone());
        let _late = SystemClock
            .schedule(Duration::from_millis(40), Box::new(move || first.lock().push("late")))
            .unwrap();
        let _early = SystemClock
            .schedule(Duration::from_millis(10), Box::new(move || second.lock().push("early")))
            .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(*order.lock(), vec!["early", "late"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timer_queue_uses_one_thread() {
        let handles: Vec<_> = (0..32)
            .map(|i| {
                SystemClock
                    .schedule(Duration::from_secs(3600 + i), Box::new(|| {}))
                    .unwrap()
            })
            .collect();

        let timer_threads = std::fs::read_dir("/proc/self/task")
            .unwrap()
            .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path().join("comm")).ok())
            .filter(|name| name.trim() == "scoped-timer")
            .count();
        assert_eq!(timer_threads, 1);
        drop(handles);
    }

    #[test]
    fn test_system_clock_without_time_driver() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let r = ran.clone();
        let _handle = runtime
            .block_on(async {
                SystemClock.schedule(Duration::from_millis(10), Box::new(move || r.store(true, Ordering::SeqCst)))
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        assert!(ran.load(Ordering::SeqCst));
    }
}
