//! Error taxonomy for the engine itself.
//!
//! Resolution and execution are fallible by design (cycles, missing tags,
//! timeouts, user factories that can fail), so the taxonomy is modeled as
//! `thiserror`-derived enums.
//!
//! Every variant is `Clone`: a single in-flight `resolve` may be awaited by
//! several concurrent callers (coalesced onto one `futures::future::Shared`),
//! and a journaled error must be handed back verbatim to every caller that
//! repeats the same key. Both require `E: Clone`.

use std::fmt;
use std::rc::Rc;

/// A type-erased user error, shared so it can be replayed without re-running
/// the operation that produced it.
pub type AnyError = Rc<dyn std::error::Error>;

pub(crate) fn any_error(e: impl std::error::Error + 'static) -> AnyError {
    Rc::new(e)
}

/// Errors raised while resolving an [`Atom`](crate::atom::Atom) in a
/// [`Scope`](crate::scope::Scope).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// The atom's dependency graph requires itself, directly or transitively,
    /// while it is still being resolved. Names every atom on the cycle.
    #[error("cycle detected while resolving: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// A required tag dependency had no value in the scope's tag store and no
    /// default on the tag itself.
    #[error("missing required tag `{0}`")]
    MissingTag(&'static str),

    /// The atom's factory returned an error.
    #[error("factory failed: {0}")]
    Factory(AnyError),
}

/// Errors raised by [`ExecutionContext`](crate::execution::ExecutionContext)
/// operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    /// The context (or an ancestor) has already been closed.
    #[error("execution context is closed")]
    ContextClosed,

    /// The context (or an ancestor) has been cancelled.
    #[error("execution was cancelled")]
    Cancelled,

    /// A per-`exec` timeout elapsed before the operation completed.
    #[error("execution timed out")]
    Timeout,

    /// A flow declared a required tag dependency the context could not
    /// satisfy.
    #[error("missing required tag `{0}`")]
    MissingTag(&'static str),

    /// Resolving one of the flow's atom dependencies failed.
    #[error(transparent)]
    Resolve(ResolveError),

    /// The flow body or direct function raised an error. Carried verbatim:
    /// the engine does not wrap user errors beyond this single
    /// enum-discriminant boundary, so `Display`/the underlying cause are
    /// exactly what the user code raised.
    #[error("{0}")]
    User(AnyError),
}

impl From<ResolveError> for ExecError {
    fn from(e: ResolveError) -> Self {
        ExecError::Resolve(e)
    }
}

/// Raised by [`Accessor::get`](crate::accessor::Accessor::get) when the
/// underlying atom has not been resolved in its scope.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("accessor's atom has not been resolved in this scope")]
pub struct NotResolvedError;

/// Aggregate of every cleanup failure observed during
/// [`Scope::dispose`](crate::scope::Scope::dispose), or every `on_close`
/// handler failure observed during
/// [`ExecutionContext::close`](crate::execution::ExecutionContext::close).
#[derive(Debug, Clone, thiserror::Error)]
pub struct DisposalError {
    pub causes: Vec<AnyError>,
}

impl fmt::Display for DisposalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cleanup(s) failed during disposal", self.causes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_joins_the_whole_chain() {
        let err = ResolveError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "cycle detected while resolving: a -> b -> a");
    }

    #[test]
    fn resolve_error_converts_into_exec_error() {
        let resolve_err = ResolveError::MissingTag("name");
        let exec_err: ExecError = resolve_err.into();
        assert!(matches!(exec_err, ExecError::Resolve(ResolveError::MissingTag("name"))));
    }

    #[test]
    fn user_error_display_is_the_underlying_causes_display() {
        let cause = any_error(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let err = ExecError::User(cause);
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn disposal_error_counts_its_causes() {
        let err = DisposalError {
            causes: vec![
                any_error(std::io::Error::new(std::io::ErrorKind::Other, "one")),
                any_error(std::io::Error::new(std::io::ErrorKind::Other, "two")),
            ],
        };
        assert_eq!(err.to_string(), "2 cleanup(s) failed during disposal");
    }
}
