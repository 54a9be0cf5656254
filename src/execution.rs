//! Hierarchical, cancellable execution envelopes that run [`Flow`]s (or a
//! bare function) and journal their outcomes.
//!
//! An [`ExecutionContext`] is opened from a [`Scope`] via
//! [`Scope::create_execution`](crate::scope::Scope::create_execution).
//! Running a flow through it opens a child context for that flow body, so
//! tag lookups, cancellation and closing all propagate down the resulting
//! tree without the caller having to thread a context through manually.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::atom::{AnyAtom, Deps};
use crate::error::{AnyError, DisposalError, ExecError};
use crate::extension::{self, ExecutionTarget, Operation, ParallelMode};
use crate::flow::{Flow, LocalBoxFuture};
use crate::scope::Scope;
use crate::tag::{Tag, TagStore, Tagged};

type CloseFn = Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<(), AnyError>>>;

#[derive(Clone)]
struct JournalEntry {
    #[allow(dead_code)]
    params: Option<Rc<dyn Any>>,
    outcome: Result<Rc<dyn Any>, ExecError>,
    #[allow(dead_code)]
    started_at: Instant,
    #[allow(dead_code)]
    completed_at: Instant,
}

/// Construction options for [`Scope::create_execution`](crate::scope::Scope::create_execution).
#[derive(Default)]
pub struct ExecutionOptions {
    pub tags: TagStore,
    pub parent: Option<ExecutionContext>,
}

/// Per-call overrides accepted by [`ExecutionContext::exec_with_options`] and
/// [`ExecutionContext::exec_fn_with_options`].
///
/// `tags` are merged into the child context's own local tag store before the
/// flow or function runs, which makes them the highest-precedence source any
/// tag lookup inside that run will see. `timeout`, if set, races the run
/// against a timer; on expiry the child context is cancelled and the call
/// fails with [`ExecError::Timeout`].
#[derive(Default, Clone)]
pub struct RunOptions {
    pub key: Option<String>,
    pub tags: TagStore,
    pub timeout: Option<Duration>,
}

struct ExecutionInner {
    scope: Scope,
    parent: Option<ExecutionContext>,
    tags: RefCell<TagStore>,
    definition_tags: TagStore,
    journal: RefCell<IndexMap<String, JournalEntry>>,
    close_handlers: RefCell<Vec<CloseFn>>,
    cancelled: Cell<bool>,
    closed: Cell<bool>,
}

/// A hierarchical, cancellable envelope for running [`Flow`]s and direct
/// functions. Cloning is an `Rc` clone: clones of the same `ExecutionContext`
/// share one journal, one local tag store and one close ledger. A *child*
/// produced internally while running a nested flow is a distinct context
/// with its own journal and local store, linked to its parent for tag
/// lookup and cancellation/closed propagation.
pub struct ExecutionContext {
    inner: Rc<ExecutionInner>,
}

impl Clone for ExecutionContext {
    fn clone(&self) -> Self {
        ExecutionContext {
            inner: self.inner.clone(),
        }
    }
}

impl ExecutionContext {
    pub(crate) fn new(scope: Scope, options: ExecutionOptions) -> Self {
        ExecutionContext {
            inner: Rc::new(ExecutionInner {
                scope,
                parent: options.parent,
                tags: RefCell::new(options.tags),
                definition_tags: TagStore::new(),
                journal: RefCell::new(IndexMap::new()),
                close_handlers: RefCell::new(Vec::new()),
                cancelled: Cell::new(false),
                closed: Cell::new(false),
            }),
        }
    }

    fn child_for_flow(&self, definition_tags: TagStore, overrides: TagStore) -> ExecutionContext {
        ExecutionContext {
            inner: Rc::new(ExecutionInner {
                scope: self.inner.scope.clone(),
                parent: Some(self.clone()),
                tags: RefCell::new(overrides),
                definition_tags,
                journal: RefCell::new(IndexMap::new()),
                close_handlers: RefCell::new(Vec::new()),
                cancelled: Cell::new(false),
                closed: Cell::new(false),
            }),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn parent(&self) -> Option<&ExecutionContext> {
        self.inner.parent.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get() || self.inner.parent.as_ref().is_some_and(|p| p.is_closed())
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get() || self.inner.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed() && !self.is_cancelled()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.set(true);
    }

    /// Returns an error if this context, or any ancestor, is closed or
    /// cancelled. Flow bodies are expected to call this between awaits in
    /// long-running loops.
    pub fn throw_if_cancelled(&self) -> Result<(), ExecError> {
        if self.is_closed() {
            return Err(ExecError::ContextClosed);
        }
        if self.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        Ok(())
    }

    /// A flattened view of every tag source visible from this context,
    /// lowest precedence first: the owning scope's tags, the currently
    /// running flow's own declared tags (empty outside a flow body),
    /// ancestor contexts' local stores from the root down, and finally this
    /// context's own local store (which is where per-exec overrides land,
    /// making them the highest-precedence source).
    fn effective_tags(&self) -> TagStore {
        let mut entries: Vec<Tagged> = Vec::new();
        entries.extend(self.inner.scope.tags().to_vec());
        entries.extend(self.inner.definition_tags.to_vec());
        self.collect_local_chain(&mut entries);
        TagStore::from_tagged(entries)
    }

    fn collect_local_chain(&self, out: &mut Vec<Tagged>) {
        if let Some(parent) = &self.inner.parent {
            parent.collect_local_chain(out);
        }
        out.extend(self.inner.tags.borrow().to_vec());
    }

    /// Sets a tag value local to this context.
    pub fn set<T: Clone + 'static>(&self, tag: &Tag<T>, value: T) {
        self.inner.tags.borrow_mut().set(tag, value);
    }

    /// Raw lookup, ignoring the tag's own default.
    pub fn get<T: Clone + 'static>(&self, tag: &Tag<T>) -> Option<T> {
        self.effective_tags().get::<T>(tag.id())
    }

    /// Required lookup: falls back to the tag's own default, fails if
    /// neither is present.
    pub fn extract<T: Clone + 'static>(&self, tag: &Tag<T>) -> Result<T, ExecError> {
        tag.extract_from(&self.effective_tags()).map_err(ExecError::MissingTag)
    }

    /// Like [`extract`](Self::extract) but panics instead of failing, for
    /// tags a caller considers always present by construction.
    pub fn find<T: Clone + 'static>(&self, tag: &Tag<T>) -> T {
        tag.read_from(&self.effective_tags())
    }

    /// Every matching value visible from this context, lowest precedence
    /// first.
    pub fn all<T: Clone + 'static>(&self, tag: &Tag<T>) -> Vec<T> {
        tag.collect_from(&self.effective_tags())
    }

    /// Runs `flow` with `input`, without journaling.
    pub async fn exec<I: Clone + 'static, T: 'static>(
        &self,
        flow: &Flow<I, T>,
        input: I,
    ) -> Result<Rc<T>, ExecError> {
        self.exec_with_options(flow, input, RunOptions::default()).await
    }

    /// Runs `flow` with `input`, recording the outcome under `key`. A
    /// second call with the same key returns the recorded outcome (success
    /// or failure) without running the flow body again.
    pub async fn exec_with_key<I: Clone + 'static, T: 'static>(
        &self,
        flow: &Flow<I, T>,
        input: I,
        key: Option<String>,
    ) -> Result<Rc<T>, ExecError> {
        self.exec_with_options(
            flow,
            input,
            RunOptions {
                key,
                ..RunOptions::default()
            },
        )
        .await
    }

    /// Runs `flow` with `input` under a fresh child context, applying every
    /// [`RunOptions`] override: `key`-based journaling, a `tags` override
    /// merged into the child's local store ahead of the flow-definition and
    /// scope tags, and an optional `timeout` raced against the flow.
    #[tracing::instrument(level = "trace", skip_all, fields(flow = flow.id().0, key = ?options.key))]
    pub async fn exec_with_options<I: Clone + 'static, T: 'static>(
        &self,
        flow: &Flow<I, T>,
        input: I,
        options: RunOptions,
    ) -> Result<Rc<T>, ExecError> {
        self.throw_if_cancelled()?;

        if let Some(k) = &options.key {
            if let Some(entry) = self.inner.journal.borrow().get(k).cloned() {
                return entry.outcome.map(downcast_exec::<T>);
            }
        }

        let child = self.child_for_flow(flow.tags().clone(), options.tags);
        let effective = child.effective_tags();
        let deps = build_flow_deps(&self.inner.scope, flow.deps(), &effective).await?;

        let op = Operation::Execution {
            target: ExecutionTarget::Flow { flow: flow.id() },
            key: options.key.clone(),
        };
        let extensions = self.inner.scope.extensions();
        let flow = flow.clone();
        let params = input.clone();
        let run_child = child.clone();
        let innermost: extension::NextFn = Box::new(move || {
            Box::pin(async move { flow.run(run_child, input, deps).await.map(|v| Rc::new(v) as Rc<dyn Any>) })
        });

        let started_at = Instant::now();
        let run = extension::run_chain(extensions, self.inner.scope.clone(), op, innermost);
        let outcome = match options.timeout {
            Some(duration) => race_timeout(duration, run, &child).await,
            None => run.await,
        };
        let result = outcome.map_err(exec_error_from_any);

        if let Some(k) = options.key {
            self.inner.journal.borrow_mut().insert(
                k,
                JournalEntry {
                    params: Some(Rc::new(params) as Rc<dyn Any>),
                    outcome: result.clone(),
                    started_at,
                    completed_at: Instant::now(),
                },
            );
        }

        result.map(downcast_exec::<T>)
    }

    /// Runs `f` as a direct function under a fresh child context, recording
    /// `{ key, params, result | error }` in the journal. A second call with
    /// the same key returns the recorded outcome without invoking `f` again.
    /// Unlike [`exec`](Self::exec), no [`Flow`] descriptor is required: this
    /// is the entry point for journaling a one-off operation that has no
    /// declared dependencies of its own.
    pub async fn exec_fn<P, T, F, Fut>(&self, key: String, params: P, f: F) -> Result<Rc<T>, ExecError>
    where
        P: Clone + 'static,
        T: 'static,
        F: FnOnce(ExecutionContext, P) -> Fut + 'static,
        Fut: std::future::Future<Output = Result<T, AnyError>> + 'static,
    {
        self.exec_fn_with_options(key, params, RunOptions::default(), f).await
    }

    /// Like [`exec_fn`](Self::exec_fn), applying a `tags` override and an
    /// optional `timeout` from [`RunOptions`]. `options.key`, if set, is
    /// ignored in favor of the `key` argument, since journaling a direct
    /// function call always requires a key.
    #[tracing::instrument(level = "trace", skip_all, fields(key = %key))]
    pub async fn exec_fn_with_options<P, T, F, Fut>(
        &self,
        key: String,
        params: P,
        options: RunOptions,
        f: F,
    ) -> Result<Rc<T>, ExecError>
    where
        P: Clone + 'static,
        T: 'static,
        F: FnOnce(ExecutionContext, P) -> Fut + 'static,
        Fut: std::future::Future<Output = Result<T, AnyError>> + 'static,
    {
        self.throw_if_cancelled()?;

        if let Some(entry) = self.inner.journal.borrow().get(&key).cloned() {
            return entry.outcome.map(downcast_exec::<T>);
        }

        let child = self.child_for_flow(TagStore::new(), options.tags);
        let op = Operation::Execution {
            target: ExecutionTarget::Fn,
            key: Some(key.clone()),
        };
        let extensions = self.inner.scope.extensions();
        let journaled_params = params.clone();
        let run_child = child.clone();
        let innermost: extension::NextFn = Box::new(move || {
            Box::pin(async move { f(run_child, params).await.map(|v| Rc::new(v) as Rc<dyn Any>) })
        });

        let started_at = Instant::now();
        let run = extension::run_chain(extensions, self.inner.scope.clone(), op, innermost);
        let outcome = match options.timeout {
            Some(duration) => race_timeout(duration, run, &child).await,
            None => run.await,
        };
        let result = outcome.map_err(exec_error_from_any);

        self.inner.journal.borrow_mut().insert(
            key,
            JournalEntry {
                params: Some(Rc::new(journaled_params) as Rc<dyn Any>),
                outcome: result.clone(),
                started_at,
                completed_at: Instant::now(),
            },
        );

        result.map(downcast_exec::<T>)
    }

    /// Runs `flow` once per input, concurrently, failing as soon as any one
    /// fails. Results preserve input order.
    #[tracing::instrument(level = "trace", skip_all, fields(flow = flow.id().0, count = inputs.len()))]
    pub async fn parallel<I: Clone + 'static, T: 'static>(
        &self,
        flow: &Flow<I, T>,
        inputs: Vec<I>,
    ) -> Result<Vec<Rc<T>>, ExecError> {
        self.throw_if_cancelled()?;
        let count = inputs.len();
        let op = Operation::Execution {
            target: ExecutionTarget::Parallel {
                mode: ParallelMode::All,
                count,
            },
            key: None,
        };
        let extensions = self.inner.scope.extensions();
        let this = self.clone();
        let flow = flow.clone();
        let innermost: extension::NextFn = Box::new(move || {
            Box::pin(async move {
                let futs = inputs.into_iter().map(|input| this.exec(&flow, input));
                let results: Vec<Result<Rc<T>, ExecError>> = futures::future::join_all(futs).await;
                let collected: Result<Vec<Rc<T>>, ExecError> = results.into_iter().collect();
                collected
                    .map(|v| Rc::new(v) as Rc<dyn Any>)
                    .map_err(any_error_from_exec)
            })
        });
        let result = extension::run_chain(extensions, self.inner.scope.clone(), op, innermost)
            .await
            .map_err(exec_error_from_any)?;
        let boxed = result
            .downcast::<Vec<Rc<T>>>()
            .unwrap_or_else(|_| panic!("parallel result had an unexpected type"));
        Ok(Rc::try_unwrap(boxed).unwrap_or_else(|_| panic!("parallel result was unexpectedly shared")))
    }

    /// Runs `flow` once per input, concurrently, collecting every outcome
    /// (success or failure) instead of short-circuiting. Results preserve
    /// input order.
    pub async fn parallel_settled<I: Clone + 'static, T: 'static>(
        &self,
        flow: &Flow<I, T>,
        inputs: Vec<I>,
    ) -> Vec<Result<Rc<T>, ExecError>> {
        let futs: Vec<_> = inputs.into_iter().map(|input| self.exec(flow, input)).collect();
        futures::future::join_all(futs).await
    }

    /// Drops every journal entry, or only those whose key contains
    /// `pattern`.
    pub fn reset_journal(&self, pattern: Option<&str>) {
        match pattern {
            None => self.inner.journal.borrow_mut().clear(),
            Some(p) => self.inner.journal.borrow_mut().retain(|k, _| !k.contains(p)),
        }
    }

    /// Registers an infallible close handler, run in LIFO order when this
    /// context closes.
    pub fn on_close(&self, f: impl FnOnce() + 'static) {
        self.push_close(Box::new(move || {
            f();
            Box::pin(async { Ok(()) })
        }));
    }

    /// Registers a close handler that may fail; its error is aggregated
    /// into the [`DisposalError`] returned by [`close`](Self::close).
    pub fn try_on_close<F>(&self, f: impl FnOnce() -> F + 'static)
    where
        F: std::future::Future<Output = Result<(), AnyError>> + 'static,
    {
        self.push_close(Box::new(move || Box::pin(f())));
    }

    fn push_close(&self, f: CloseFn) {
        self.inner.close_handlers.borrow_mut().push(f);
    }

    /// Closes this context: runs every registered close handler in reverse
    /// registration order. Idempotent; a second call is a no-op. Closing a
    /// context does not close its children: `is_closed` on a child still
    /// observes a closed ancestor through the parent chain.
    pub async fn close(&self) -> Result<(), DisposalError> {
        if self.inner.closed.replace(true) {
            return Ok(());
        }
        let handlers = self.inner.close_handlers.take();
        let mut causes = Vec::new();
        for h in handlers.into_iter().rev() {
            if let Err(e) = h().await {
                causes.push(e);
            }
        }
        if causes.is_empty() {
            Ok(())
        } else {
            tracing::error!(count = causes.len(), "close handler failures during context close");
            Err(DisposalError { causes })
        }
    }
}

/// Races `run` against `duration`. On expiry, cancels `child` (so any
/// cooperative `throw_if_cancelled` check downstream observes it) and
/// resolves to [`ExecError::Timeout`]; the timed-out future itself is
/// dropped rather than forcibly torn down, matching the "not hard-killed"
/// contract for in-flight sub-work.
async fn race_timeout(
    duration: Duration,
    run: impl std::future::Future<Output = extension::AnyResult>,
    child: &ExecutionContext,
) -> extension::AnyResult {
    match tokio::time::timeout(duration, run).await {
        Ok(outcome) => outcome,
        Err(_) => {
            child.cancel();
            Err(any_error_from_exec(ExecError::Timeout))
        }
    }
}

fn downcast_exec<T: 'static>(v: Rc<dyn Any>) -> Rc<T> {
    v.downcast::<T>()
        .unwrap_or_else(|_| panic!("flow returned an unexpected type"))
}

fn any_error_from_exec(e: ExecError) -> AnyError {
    Rc::new(e)
}

fn exec_error_from_any(e: AnyError) -> ExecError {
    match e.downcast_ref::<ExecError>() {
        Some(ee) => ee.clone(),
        None => ExecError::User(e),
    }
}

async fn build_flow_deps(
    scope: &Scope,
    deps: &[(&'static str, crate::atom::DepKind)],
    tags: &TagStore,
) -> Result<Deps, ExecError> {
    use crate::atom::{AnyTagBinding as _, DepKind};

    let mut map = Deps::new();
    for (name, kind) in deps {
        let value: Rc<dyn Any> = match kind {
            DepKind::Atom(inner) => inner
                .clone()
                .resolve_erased(scope.clone(), Vec::new())
                .await
                .map_err(ExecError::from)?,
            DepKind::Lazy(inner) => inner.make_accessor(scope.clone()),
            DepKind::TagRequired(binding) => binding.extract(tags).map_err(ExecError::MissingTag)?,
            DepKind::TagOptional(binding) => binding.read(tags),
            DepKind::TagAll(binding) => binding.collect(tags),
        };
        map.0.insert(name, value);
    }
    Ok(map)
}
