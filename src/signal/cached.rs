/*!
 * Cached Fired Signal
 * Process-wide, already-fired signal shared by every immediate-fire scope
 */

use super::source::{CancelSignal, CancelSource, SignalState};
use arc_swap::ArcSwapOption;
use log::trace;
use std::sync::Arc;

static CACHED_FIRED: ArcSwapOption<SignalState> = ArcSwapOption::const_empty();

/// Get the shared already-fired signal
///
/// Constructed at most once: concurrent first callers race with a
/// compare-and-swap and the losers drop their instance unobserved. A fired
/// source owns no callbacks or timers, so a lost instance holds nothing.
pub fn cached_fired_signal() -> CancelSignal {
    if let Some(state) = CACHED_FIRED.load_full() {
        return CancelSignal::from_state(state);
    }

    let fresh = Arc::clone(CancelSource::fired().state());
    let previous = CACHED_FIRED.compare_and_swap(&None::<Arc<SignalState>>, Some(Arc::clone(&fresh)));

    match &*previous {
        Some(winner) => {
            trace!("Lost cached fired signal race, discarding duplicate");
            CancelSignal::from_state(Arc::clone(winner))
        }
        None => CancelSignal::from_state(fresh),
    }
}
