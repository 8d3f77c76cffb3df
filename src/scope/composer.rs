/*!
 * Signal Composer
 *
 * Picks the cheapest signal observably equivalent to "the enclosing signal
 * (unless clean) OR any new signal OR the timeout". Rules are evaluated in
 * order and the first match wins:
 *
 * 1. An enclosing signal that cannot fire makes `clean` moot; otherwise a
 *    clean scope replaces it with a never-firing signal.
 * 2. An already fired, non-clean enclosing signal is kept as-is.
 * 3. Nothing fireable added, no timeout, not clean: nothing changes.
 * 4. Zero timeout or an already fired input: the shared fired signal.
 * 5. At most one fireable input and no timeout: that input, reused.
 * 6. Timeout on a non-system clock: a dedicated timed composite.
 * 7. Otherwise: a linked composite, armed on the system clock if timed.
 */

use super::types::Ownership;
use crate::errors::ScopeResult;
use crate::signal::{cached_fired_signal, CancelSignal, Clock, CompositeKind, CompositeSource};
use std::time::Duration;

/// Outcome of composing a scope's signal
#[derive(Debug)]
pub enum Composition {
    /// The enclosing state already is the answer; no scope node is needed
    Unchanged,
    /// An existing signal is the answer; the scope must not release it
    Reused(CancelSignal),
    /// A freshly built composite, owned by the scope
    Composite(CompositeSource),
}

impl Composition {
    pub fn ownership(&self) -> Ownership {
        match self {
            Self::Unchanged => Ownership::Unowned,
            Self::Reused(_) => Ownership::Reused,
            Self::Composite(c) => match c.kind() {
                CompositeKind::Linked => Ownership::Linked,
                CompositeKind::Timed => Ownership::Timed,
            },
        }
    }

    /// Signal the scope would install, if any
    pub fn signal(&self) -> Option<CancelSignal> {
        match self {
            Self::Unchanged => None,
            Self::Reused(signal) => Some(signal.clone()),
            Self::Composite(c) => Some(c.signal()),
        }
    }
}

/// Stateless decision table mapping scope inputs to a [`Composition`]
pub struct SignalComposer;

impl SignalComposer {
    /// Compose the signal for a new scope
    ///
    /// `clock` is the clock the timeout would be measured on; it only
    /// matters when `timeout` is set.
    ///
    /// # Errors
    ///
    /// Propagates clock failures while arming a timer.
    pub fn compose(
        incoming: &CancelSignal,
        signals: &[CancelSignal],
        clean: bool,
        timeout: Option<Duration>,
        clock: &dyn Clock,
    ) -> ScopeResult<Composition> {
        let never = CancelSignal::never();

        let (incoming, clean) = if !incoming.can_fire() {
            (incoming, false)
        } else if clean {
            (&never, true)
        } else {
            (incoming, false)
        };

        if incoming.is_fired() && !clean {
            return Ok(Composition::Unchanged);
        }

        let any_new_fireable = signals.iter().any(CancelSignal::can_fire);
        if !any_new_fireable && timeout.is_none() && !clean {
            return Ok(Composition::Unchanged);
        }

        if timeout == Some(Duration::ZERO) || signals.iter().any(CancelSignal::is_fired) {
            return Ok(Composition::Reused(cached_fired_signal()));
        }

        let fireable: Vec<&CancelSignal> = std::iter::once(incoming)
            .chain(signals.iter())
            .filter(|s| s.can_fire())
            .collect();

        let Some(duration) = timeout else {
            if fireable.len() <= 1 {
                let reused = fireable.first().map_or_else(CancelSignal::never, |s| (*s).clone());
                return Ok(Composition::Reused(reused));
            }
            return Ok(Composition::Composite(CompositeSource::linked(&fireable, None, clock)?));
        };

        if !clock.is_system() {
            return Ok(Composition::Composite(CompositeSource::timed(duration, clock, &fireable)?));
        }

        Ok(Composition::Composite(CompositeSource::linked(&fireable, Some(duration), clock)?))
    }
}
