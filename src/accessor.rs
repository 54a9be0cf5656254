//! Scope-bound handles to a (possibly not-yet-resolved) atom value.
//!
//! An `Accessor` is a cheap-to-clone handle a consumer can hold without
//! forcing evaluation. `get` returns a `Result` rather than panicking: an
//! `Accessor` is produced wherever a dependency is declared `lazy`, and the
//! depending factory may legitimately run before anyone has called
//! `resolve` on it.

use std::rc::Rc;

use crate::atom::Atom;
use crate::error::{NotResolvedError, ResolveError};
use crate::scope::Scope;

/// A handle bound to one `Atom<T>` in one `Scope`. Cloning an `Accessor` is
/// cheap and shares the same underlying cache slot.
pub struct Accessor<T> {
    scope: Scope,
    atom: Atom<T>,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Accessor {
            scope: self.scope.clone(),
            atom: self.atom.clone(),
        }
    }
}

impl<T: 'static> Accessor<T> {
    pub(crate) fn new(scope: Scope, atom: Atom<T>) -> Self {
        Accessor { scope, atom }
    }

    /// Returns the already-resolved value, or [`NotResolvedError`] if the
    /// atom has never been resolved (or was [`release`](Self::release)d) in
    /// this scope. Never triggers resolution itself.
    pub fn get(&self) -> Result<Rc<T>, NotResolvedError> {
        self.scope.peek(&self.atom).ok_or(NotResolvedError)
    }

    /// Resolves the underlying atom, exactly as `scope.resolve(atom)` would.
    pub async fn resolve(&self) -> Result<Rc<T>, ResolveError> {
        self.scope.resolve(&self.atom).await
    }

    /// Runs the atom's own cleanups and drops its cached value, so a later
    /// `resolve`/`get` starts fresh.
    pub async fn release(&self) -> Result<(), crate::error::DisposalError> {
        self.scope.release(self.atom.id()).await
    }
}

#[cfg(test)]
mod tests {
    use crate::atom::atom;
    use crate::scope::Scope;

    #[tokio::test(flavor = "current_thread")]
    async fn get_fails_before_the_atom_has_ever_been_resolved() {
        let scope = Scope::new();
        let counter = atom::<u32>().build(|_ctx, _deps| async { Ok(1) });
        let accessor = scope.accessor(&counter);
        assert!(accessor.get().is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn get_succeeds_once_resolve_has_run() {
        let scope = Scope::new();
        let counter = atom::<u32>().build(|_ctx, _deps| async { Ok(42) });
        let accessor = scope.accessor(&counter);

        accessor.resolve().await.unwrap();
        assert_eq!(*accessor.get().unwrap(), 42);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn release_clears_the_cached_value() {
        let scope = Scope::new();
        let counter = atom::<u32>().build(|_ctx, _deps| async { Ok(7) });
        let accessor = scope.accessor(&counter);

        accessor.resolve().await.unwrap();
        accessor.release().await.unwrap();
        assert!(accessor.get().is_err());
    }
}
