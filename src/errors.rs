/*!
 * Error Types
 * Failures that can escape scope entry
 */

use miette::Diagnostic;
use thiserror::Error;

/// Result type for scope operations
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Errors raised while entering a scope
///
/// Misuse of scope handles (double disposal, out-of-order disposal, never
/// disposing) is not an error and never produces one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ScopeError {
    #[error("Resource exhausted while creating {resource}: {reason}")]
    #[diagnostic(
        code(scope::resource_exhausted),
        help("The environment could not provide a timer or composite signal. Check thread and memory limits.")
    )]
    ResourceExhausted {
        resource: &'static str,
        reason: String,
    },
}
