//! A dependency-injection and effect-orchestration core for single-threaded,
//! cooperative Rust programs.
//!
//! Two kinds of descriptor anchor the system:
//!
//! - [`Atom<T>`](atom::Atom): a memoized, dependency-carrying recipe for a
//!   value. Resolving the same atom twice in the same [`Scope`](scope::Scope)
//!   runs its factory once; concurrent resolutions of the same atom coalesce
//!   onto that one invocation.
//! - [`Flow<I, T>`](flow::Flow): an orchestrated operation that takes an
//!   explicit input and is never cached by itself. Running it through an
//!   [`ExecutionContext`](execution::ExecutionContext) is what adds
//!   journaled de-duplication, cancellation, and tag scoping on top.
//!
//! A [`Scope`](scope::Scope) owns the atom cache, [`Preset`](preset::Preset)
//! overrides, and the [`Extension`](extension::Extension) chain that every
//! resolve and execution passes through. [`Tag<T>`](tag::Tag) is the typed
//! key used for both an atom's declared dependencies and an execution
//! context's ambient configuration.
//!
//! This crate intentionally stays `!Send`: every shared value is an `Rc`,
//! every mutable cell a `RefCell` or `Cell`, matching a single-threaded
//! event-loop model rather than a work-stealing one.

mod accessor;
mod atom;
mod error;
mod execution;
mod extension;
mod flow;
mod ids;
mod preset;
mod scope;
mod tag;

pub use accessor::Accessor;
pub use atom::{atom, lazy, Atom, AtomBuilder, DepKind, Deps};
pub use error::{AnyError, DisposalError, ExecError, NotResolvedError, ResolveError};
pub use execution::{ExecutionContext, ExecutionOptions, RunOptions};
pub use extension::{Extension, ExecutionTarget, Operation, ParallelMode, ResolveKind};
pub use flow::{flow, Flow, FlowBuilder};
pub use ids::{AtomId, FlowId, TagId};
pub use preset::Preset;
pub use scope::{ResolveContext, Scope, ScopeOptions};
pub use tag::{tags, Tag, TagStore, Tagged};
