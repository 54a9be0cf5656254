//! The middleware chain that wraps every resolve/exec/journal/parallel
//! operation.
//!
//! Implemented as a fold over the extension list producing a closure chain,
//! allocated fresh per operation. `next` is a boxed `FnOnce` continuation,
//! folded right-to-left so `extensions[0]` ends up outermost.

use std::any::Any;
use std::rc::Rc;

use crate::error::AnyError;
use crate::ids::{AtomId, FlowId};
use crate::scope::Scope;

pub(crate) type LocalBoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + 'a>>;
pub(crate) type AnyResult = Result<Rc<dyn Any>, AnyError>;
pub(crate) type NextFn = Box<dyn FnOnce() -> LocalBoxFuture<'static, AnyResult>>;

/// Whether a resolve operation is a first-time resolution or an update of an
/// already-cached value. This engine only ever produces `Resolve` (nothing
/// here re-evaluates a cached atom), so `Update` is unused today but kept so
/// an `Extension` written against the full operation shape still type-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    Resolve,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    All,
    Settle,
}

/// What kind of execution is being intercepted.
#[derive(Debug, Clone)]
pub enum ExecutionTarget {
    Flow { flow: FlowId },
    Fn,
    Parallel { mode: ParallelMode, count: usize },
}

/// The operation record presented to an [`Extension`]'s `wrap` hook.
#[derive(Debug, Clone)]
pub enum Operation {
    Resolve {
        atom: AtomId,
        kind: ResolveKind,
    },
    Execution {
        target: ExecutionTarget,
        key: Option<String>,
    },
}

/// Middleware that observes (but must not alter) every
/// resolve/exec/journal/parallel operation, and participates in scope
/// init/dispose.
pub trait Extension {
    fn name(&self) -> &str;

    /// Runs once, in registration order, the first time the scope resolves
    /// an atom. Construction (`Scope::new`) is synchronous and `init` is
    /// not, so it cannot run any earlier than this.
    fn init(&self, _scope: &Scope) -> LocalBoxFuture<'static, ()> {
        Box::pin(async {})
    }

    /// Runs once, in registration order, during `Scope::dispose`.
    fn dispose(&self, _scope: &Scope) -> LocalBoxFuture<'static, ()> {
        Box::pin(async {})
    }

    /// Wraps the next link in the chain. The default forwards unchanged,
    /// so an extension that only needs `init`/`dispose` can skip this.
    fn wrap(&self, _scope: Scope, _op: Operation, next: NextFn) -> LocalBoxFuture<'static, AnyResult> {
        next()
    }
}

/// Folds `extensions` around `innermost`, outermost-first, and runs the
/// resulting chain.
pub(crate) async fn run_chain(
    extensions: Vec<Rc<dyn Extension>>,
    scope: Scope,
    op: Operation,
    innermost: NextFn,
) -> AnyResult {
    let mut chain = innermost;
    for ext in extensions.into_iter().rev() {
        let scope = scope.clone();
        let op = op.clone();
        let prev = chain;
        chain = Box::new(move || ext.wrap(scope, op, prev));
    }
    chain().await
}
