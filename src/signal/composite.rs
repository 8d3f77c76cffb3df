/*!
 * Composite Sources
 *
 * Signals derived from other signals and from clocks. A composite owns the
 * registrations it made on its inputs and the timer it armed; dropping the
 * composite releases both without firing it.
 */

use super::clock::{Clock, TimerHandle};
use super::source::{CancelSignal, CancelSource, Registration};
use crate::errors::ScopeResult;
use log::debug;
use std::fmt;
use std::time::Duration;

/// How a composite was built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeKind {
    /// Fires when any input fires, optionally after a default-clock timeout
    Linked,
    /// Driven by a caller-supplied clock, inputs forward into it
    Timed,
}

impl CompositeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::Timed => "timed",
        }
    }
}

/// Privately constructed signal plus everything keeping it wired up
pub struct CompositeSource {
    kind: CompositeKind,
    source: CancelSource,
    registrations: Vec<Registration>,
    timer: Option<TimerHandle>,
}

impl CompositeSource {
    /// Build a signal that fires when any fireable input fires
    ///
    /// With `timeout` set, the source is additionally armed on `clock`.
    pub fn linked(
        inputs: &[&CancelSignal],
        timeout: Option<Duration>,
        clock: &dyn Clock,
    ) -> ScopeResult<Self> {
        let source = CancelSource::new();
        let timer = match timeout {
            Some(delay) => Some(Self::arm(&source, delay, clock)?),
            None => None,
        };

        let mut composite = Self {
            kind: CompositeKind::Linked,
            source,
            registrations: Vec::with_capacity(inputs.len()),
            timer,
        };
        composite.forward_from(inputs);

        debug!(
            "Created linked source over {} inputs (timeout: {:?})",
            composite.registrations.len(),
            timeout
        );
        Ok(composite)
    }

    /// Build a dedicated duration-based source on `clock`
    ///
    /// Every fireable input is forwarded into the source.
    pub fn timed(duration: Duration, clock: &dyn Clock, inputs: &[&CancelSignal]) -> ScopeResult<Self> {
        let source = CancelSource::new();
        let timer = Self::arm(&source, duration, clock)?;

        let mut composite = Self {
            kind: CompositeKind::Timed,
            source,
            registrations: Vec::with_capacity(inputs.len()),
            timer: Some(timer),
        };
        composite.forward_from(inputs);

        debug!(
            "Created timed source for {:?} with {} forwarded inputs",
            duration,
            composite.registrations.len()
        );
        Ok(composite)
    }

    fn arm(source: &CancelSource, delay: Duration, clock: &dyn Clock) -> ScopeResult<TimerHandle> {
        let target = source.clone();
        clock.schedule(
            delay,
            Box::new(move || {
                target.fire();
            }),
        )
    }

    fn forward_from(&mut self, inputs: &[&CancelSignal]) {
        for input in inputs.iter().filter(|s| s.can_fire()) {
            let target = self.source.clone();
            self.registrations.push(input.register(move || {
                target.fire();
            }));
        }
    }

    /// Signal observers of this composite see
    pub fn signal(&self) -> CancelSignal {
        self.source.signal()
    }

    pub fn kind(&self) -> CompositeKind {
        self.kind
    }

    /// Number of inputs this composite listens to
    pub fn input_count(&self) -> usize {
        self.registrations.len()
    }

    /// Whether a timer is armed
    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }
}

impl fmt::Debug for CompositeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSource")
            .field("kind", &self.kind)
            .field("inputs", &self.registrations.len())
            .field("timer", &self.timer.is_some())
            .field("fired", &self.source.is_fired())
            .finish()
    }
}
