//! The resolver: caches resolved atoms, applies presets, detects cycles,
//! and runs disposal.
//!
//! A `Scope` is a cheaply-`Clone`-able handle (an `Rc` clone) around shared,
//! interior-mutable state: one atom cache, one preset map, and one global
//! cleanup ledger. There is no scope tree; a single `Scope` owns its whole
//! cache rather than children inheriting from parents.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, Shared};

use crate::atom::{AnyAtom, Atom, Deps};
use crate::error::{AnyError, DisposalError, ResolveError};
use crate::execution::{ExecutionContext, ExecutionOptions};
use crate::extension::{self, Extension, Operation, ResolveKind};
use crate::ids::AtomId;
use crate::preset::{Preset, PresetTarget};
use crate::tag::TagStore;

pub(crate) type LocalBoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + 'a>>;
type SharedResolve = Shared<LocalBoxFuture<'static, Result<Rc<dyn Any>, ResolveError>>>;
type CleanupFn = Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<(), AnyError>>>;

#[derive(Clone)]
enum Slot {
    Value(Rc<dyn Any>),
    InFlight(SharedResolve),
}

/// A ledger entry: which atom it belongs to, which resolution attempt
/// registered it (so a failed attempt's entries can be discarded without
/// disturbing any other atom's), and the cleanup itself.
struct LedgerEntry {
    atom: AtomId,
    attempt: u64,
    cleanup: CleanupFn,
}

struct ScopeInner {
    cache: RefCell<HashMap<AtomId, Slot>>,
    presets: HashMap<AtomId, Preset>,
    cleanup_ledger: RefCell<Vec<LedgerEntry>>,
    next_attempt: Cell<u64>,
    extensions: Vec<Rc<dyn Extension>>,
    extensions_initialized: Cell<bool>,
    tags: TagStore,
    disposed: Cell<bool>,
}

/// Construction options for [`Scope::with_options`].
#[derive(Default)]
pub struct ScopeOptions {
    pub tags: TagStore,
    pub presets: Vec<Preset>,
    pub extensions: Vec<Rc<dyn Extension>>,
}

/// A resolver and its cache. Cloning a `Scope` is an `Rc` clone: every
/// clone shares the same cache, presets and cleanup ledger.
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Scope {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope::with_options(ScopeOptions::default())
    }

    pub fn with_options(options: ScopeOptions) -> Self {
        let presets = options
            .presets
            .into_iter()
            .map(|p| (p.atom_id, p))
            .collect();
        Scope {
            inner: Rc::new(ScopeInner {
                cache: RefCell::new(HashMap::new()),
                presets,
                cleanup_ledger: RefCell::new(Vec::new()),
                next_attempt: Cell::new(0),
                extensions: options.extensions,
                extensions_initialized: Cell::new(false),
                tags: options.tags,
                disposed: Cell::new(false),
            }),
        }
    }

    pub(crate) fn tags(&self) -> &TagStore {
        &self.inner.tags
    }

    pub(crate) fn extensions(&self) -> Vec<Rc<dyn Extension>> {
        self.inner.extensions.clone()
    }

    async fn ensure_initialized(&self) {
        if self.inner.extensions_initialized.replace(true) {
            return;
        }
        for ext in &self.inner.extensions {
            ext.init(self).await;
        }
    }

    fn preset_for(&self, id: AtomId) -> Option<Preset> {
        self.inner.presets.get(&id).cloned()
    }

    fn cache_get(&self, id: AtomId) -> Option<Slot> {
        self.inner.cache.borrow().get(&id).cloned()
    }

    fn cache_install_inflight(&self, id: AtomId, shared: SharedResolve) {
        self.inner.cache.borrow_mut().insert(id, Slot::InFlight(shared));
    }

    fn cache_finalize(&self, id: AtomId, value: Rc<dyn Any>) {
        self.inner.cache.borrow_mut().insert(id, Slot::Value(value));
    }

    fn cache_clear_inflight(&self, id: AtomId) {
        let is_inflight = matches!(self.inner.cache.borrow().get(&id), Some(Slot::InFlight(_)));
        if is_inflight {
            self.inner.cache.borrow_mut().remove(&id);
        }
    }

    /// Claims a fresh attempt id for one resolution attempt of one atom.
    /// Every cleanup registered during that attempt is tagged with it, so a
    /// failed attempt's entries can be found and discarded without touching
    /// any other atom's (or any other attempt's) entries.
    fn next_attempt(&self) -> u64 {
        let id = self.inner.next_attempt.get();
        self.inner.next_attempt.set(id + 1);
        id
    }

    /// Pushes one cleanup directly into the global ledger. Called at the
    /// moment `ResolveContext::cleanup`/`cleanup_async`/`try_cleanup` is
    /// invoked, not batched until the factory returns, so the ledger's order
    /// is always true registration order even when two atoms' resolutions
    /// interleave.
    fn push_cleanup(&self, atom: AtomId, attempt: u64, cleanup: CleanupFn) {
        self.inner.cleanup_ledger.borrow_mut().push(LedgerEntry { atom, attempt, cleanup });
    }

    /// Discards every cleanup registered under `attempt`, used when the
    /// factory that registered them ultimately failed.
    fn discard_attempt(&self, attempt: u64) {
        self.inner.cleanup_ledger.borrow_mut().retain(|e| e.attempt != attempt);
    }

    /// Resolves `atom`, memoizing the result for the lifetime of this
    /// scope. Concurrent resolutions of the same atom coalesce onto one
    /// factory invocation.
    #[tracing::instrument(level = "trace", skip_all, fields(atom = atom.id().0))]
    pub async fn resolve<T: 'static>(&self, atom: &Atom<T>) -> Result<Rc<T>, ResolveError> {
        let erased = resolve_atom(self, atom, Vec::new()).await?;
        Ok(erased
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("atom cache entry had an unexpected type")))
    }

    /// Returns the already-cached value for `atom`, if any, without
    /// triggering resolution.
    pub(crate) fn peek<T: 'static>(&self, atom: &Atom<T>) -> Option<Rc<T>> {
        match self.cache_get(atom.id())? {
            Slot::Value(v) => v.downcast::<T>().ok(),
            Slot::InFlight(_) => None,
        }
    }

    /// Builds an [`crate::accessor::Accessor`] bound to `atom` in this
    /// scope, without resolving it.
    pub fn accessor<T: 'static>(&self, atom: &Atom<T>) -> crate::accessor::Accessor<T> {
        crate::accessor::Accessor::new(self.clone(), atom.clone())
    }

    /// Opens a new [`ExecutionContext`] rooted at this scope. Synchronous:
    /// unlike `resolve`, nothing about creating an execution context
    /// requires running a factory or an extension's `init` hook.
    pub fn create_execution(&self, options: ExecutionOptions) -> ExecutionContext {
        ExecutionContext::new(self.clone(), options)
    }

    /// Runs this atom's own registered cleanups (in reverse registration
    /// order) and drops its cached value, so a later `resolve` starts
    /// fresh. Does not affect any other atom's cache entry.
    pub(crate) async fn release(&self, id: AtomId) -> Result<(), DisposalError> {
        let mine = {
            let mut ledger = self.inner.cleanup_ledger.borrow_mut();
            let mut mine = Vec::new();
            let mut remaining = Vec::new();
            for entry in ledger.drain(..) {
                if entry.atom == id {
                    mine.push(entry.cleanup);
                } else {
                    remaining.push(entry);
                }
            }
            *ledger = remaining;
            mine
        };
        self.inner.cache.borrow_mut().remove(&id);

        let mut causes = Vec::new();
        for cleanup in mine.into_iter().rev() {
            if let Err(e) = cleanup().await {
                causes.push(e);
            }
        }
        if causes.is_empty() {
            Ok(())
        } else {
            tracing::error!(count = causes.len(), "cleanup failures while releasing atom");
            Err(DisposalError { causes })
        }
    }

    /// Disposes the scope: runs every extension's `dispose` hook in
    /// registration order, then every registered cleanup across every atom
    /// in reverse global registration order, then drops the cache.
    /// Idempotent; a second call is a no-op.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn dispose(&self) -> Result<(), DisposalError> {
        if self.inner.disposed.replace(true) {
            return Ok(());
        }

        for ext in &self.inner.extensions {
            ext.dispose(self).await;
        }

        let ledger = self.inner.cleanup_ledger.take();
        let mut causes = Vec::new();
        for entry in ledger.into_iter().rev() {
            if let Err(e) = (entry.cleanup)().await {
                causes.push(e);
            }
        }

        if causes.is_empty() {
            self.inner.cache.borrow_mut().clear();
            Ok(())
        } else {
            tracing::error!(count = causes.len(), "cleanup failures during scope disposal");
            self.inner.cache.borrow_mut().clear();
            Err(DisposalError { causes })
        }
    }
}

/// Passed to an atom's factory. Exposes the owning scope (read-only) and
/// lets the factory register cleanups that run when the atom is released or
/// the scope is disposed. Each cleanup is pushed into the scope's global
/// ledger as soon as it is registered, so the ledger's order always matches
/// true call order, even across two atoms whose resolutions interleave.
pub struct ResolveContext {
    scope: Scope,
    atom_id: AtomId,
    attempt: u64,
}

impl ResolveContext {
    fn new(scope: Scope, atom_id: AtomId, attempt: u64) -> Self {
        ResolveContext { scope, atom_id, attempt }
    }

    /// The scope this atom is being resolved in.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Registers an infallible, synchronous cleanup.
    pub fn cleanup(&self, f: impl FnOnce() + 'static) {
        self.push(Box::new(move || {
            f();
            Box::pin(async { Ok(()) })
        }));
    }

    /// Registers an infallible cleanup that itself needs to await something.
    pub fn cleanup_async<F>(&self, f: impl FnOnce() -> F + 'static)
    where
        F: Future<Output = ()> + 'static,
    {
        self.push(Box::new(move || {
            Box::pin(async move {
                f().await;
                Ok(())
            })
        }));
    }

    /// Registers a cleanup that may fail; its error is aggregated into the
    /// [`DisposalError`] returned by [`Scope::dispose`] or
    /// [`Scope::release`](crate::scope::Scope::release).
    pub fn try_cleanup<F>(&self, f: impl FnOnce() -> F + 'static)
    where
        F: Future<Output = Result<(), AnyError>> + 'static,
    {
        self.push(Box::new(move || Box::pin(f())));
    }

    fn push(&self, cleanup: CleanupFn) {
        self.scope.push_cleanup(self.atom_id, self.attempt, cleanup);
    }
}

/// Walks `atom`'s dependency graph, resolving it and memoizing the result in
/// `scope`'s cache.
///
/// `path` is the chain of atom identities currently being resolved as
/// ancestors of this call, not a scope-wide "currently resolving" set. That
/// distinction is what lets two independent, concurrent `resolve(A)` calls
/// coalesce onto one factory invocation (neither call's `path` contains `A`
/// when it starts), while a genuine cycle (`A` requiring itself, directly or
/// transitively, through its own dependency chain) is still caught before it
/// deadlocks awaiting its own in-flight future (the recursive call's `path`
/// does contain `A`).
pub(crate) async fn resolve_atom<T: 'static>(
    scope: &Scope,
    atom: &Atom<T>,
    path: Vec<AtomId>,
) -> Result<Rc<dyn Any>, ResolveError> {
    scope.ensure_initialized().await;

    let id = atom.id();

    if path.contains(&id) {
        let mut chain: Vec<String> = path.iter().map(|a| format!("atom#{}", a.0)).collect();
        chain.push(format!("atom#{}", id.0));
        tracing::warn!(chain = ?chain, "cycle detected while resolving atom");
        return Err(ResolveError::Cycle(chain));
    }

    if let Some(preset) = scope.preset_for(id) {
        return match preset.target {
            PresetTarget::Value(v) => Ok(v),
            PresetTarget::Redirect(replacement) => replacement.resolve_erased(scope.clone(), path).await,
        };
    }

    if let Some(slot) = scope.cache_get(id) {
        return match slot {
            Slot::Value(v) => Ok(v),
            Slot::InFlight(shared) => shared.await,
        };
    }

    let mut child_path = path;
    child_path.push(id);

    let fut: LocalBoxFuture<'static, Result<Rc<dyn Any>, ResolveError>> =
        Box::pin(run_factory(scope.clone(), atom.clone(), child_path));
    let shared = fut.shared();
    scope.cache_install_inflight(id, shared.clone());

    let result = shared.await;
    match &result {
        Ok(value) => scope.cache_finalize(id, value.clone()),
        Err(_) => scope.cache_clear_inflight(id),
    }
    result
}

async fn run_factory<T: 'static>(
    scope: Scope,
    atom: Atom<T>,
    child_path: Vec<AtomId>,
) -> Result<Rc<dyn Any>, ResolveError> {
    let deps = build_deps(&scope, atom.deps(), &child_path).await?;

    let id = atom.id();
    let attempt = scope.next_attempt();
    let ctx = ResolveContext::new(scope.clone(), id, attempt);

    let op = Operation::Resolve {
        atom: id,
        kind: ResolveKind::Resolve,
    };
    let extensions = scope.inner.extensions.clone();
    let innermost: extension::NextFn = Box::new(move || {
        Box::pin(async move { atom.factory(ctx, deps).await.map(|v| Rc::new(v) as Rc<dyn Any>) })
    });

    match extension::run_chain(extensions, scope.clone(), op, innermost).await {
        Ok(value) => Ok(value),
        Err(e) => {
            scope.discard_attempt(attempt);
            Err(ResolveError::Factory(e))
        }
    }
}

async fn build_deps(
    scope: &Scope,
    deps: &[(&'static str, crate::atom::DepKind)],
    path: &[AtomId],
) -> Result<Deps, ResolveError> {
    use crate::atom::{AnyTagBinding as _, DepKind};

    let mut map = Deps::new();
    for (name, kind) in deps {
        let value: Rc<dyn Any> = match kind {
            DepKind::Atom(inner) => inner.clone().resolve_erased(scope.clone(), path.to_vec()).await?,
            DepKind::Lazy(inner) => inner.make_accessor(scope.clone()),
            DepKind::TagRequired(binding) => binding
                .extract(scope.tags())
                .map_err(ResolveError::MissingTag)?,
            DepKind::TagOptional(binding) => binding.read(scope.tags()),
            DepKind::TagAll(binding) => binding.collect(scope.tags()),
        };
        map.0.insert(name, value);
    }
    Ok(map)
}
