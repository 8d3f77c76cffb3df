/*!
 * Signal Module
 * Cancellation signal primitives the scope engine composes
 *
 * ## Pieces
 *
 * - **CancelSource / CancelSignal**: monotone flag, owner and observer halves
 * - **Registration**: RAII callback registration on a signal
 * - **Clock**: pluggable time source (`SystemClock`, `ManualClock`)
 * - **CompositeSource**: linked and duration-based derived signals
 * - **cached_fired_signal**: shared already-fired signal
 */

mod cached;
mod clock;
mod composite;
mod source;

pub use cached::cached_fired_signal;
pub use clock::{Clock, ManualClock, SystemClock, TimerAction, TimerHandle};
pub use composite::{CompositeKind, CompositeSource};
pub use source::{CallbackFn, CancelSignal, CancelSource, Registration};
