//! Immutable descriptors of computed resources.
//!
//! An [`Atom<T>`] is a long-lived, cheaply `Clone`-able handle, but it
//! describes a recipe rather than a live value: the recipe only produces a
//! value once it is handed to a [`Scope`](crate::scope::Scope). Heterogeneous
//! dependency declarations are represented as a tagged-variant `DepKind`
//! rather than trait-object polymorphism, and cross-type storage uses the
//! `Box<dyn Any>`/`Rc<dyn Any>` erase-and-downcast idiom used throughout this
//! crate.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::accessor::Accessor;
use crate::error::{AnyError, ResolveError};
use crate::ids::AtomId;
use crate::scope::{ResolveContext, Scope};
use crate::tag::{Tag, TagStore, Tagged};

pub(crate) type LocalBoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + 'a>>;

/// A heterogeneous dependency declaration: another atom (resolved eagerly),
/// a `lazy`-wrapped atom (bound as an [`Accessor`] instead), or one of the
/// three tag bindings (`required`/`optional`/`all`).
pub enum DepKind {
    Atom(Rc<dyn AnyAtom>),
    Lazy(Rc<dyn AnyAtom>),
    TagRequired(Box<dyn AnyTagBinding>),
    TagOptional(Box<dyn AnyTagBinding>),
    TagAll(Box<dyn AnyTagBinding>),
}

impl<T: 'static> From<Atom<T>> for DepKind {
    fn from(atom: Atom<T>) -> Self {
        DepKind::Atom(Rc::new(atom))
    }
}

/// Wraps an [`Atom`] so the depending node receives a deferred
/// [`Accessor`](crate::accessor::Accessor) instead of an eagerly-resolved
/// value.
pub fn lazy<T: 'static>(atom: Atom<T>) -> DepKind {
    DepKind::Lazy(Rc::new(atom))
}

/// Type-erased tag binding, implemented for every `Tag<T>` so `DepKind` can
/// hold bindings over arbitrary value types in one `Vec`.
pub(crate) trait AnyTagBinding {
    fn label(&self) -> &'static str;
    fn extract(&self, store: &TagStore) -> Result<Rc<dyn Any>, &'static str>;
    fn read(&self, store: &TagStore) -> Rc<dyn Any>;
    fn collect(&self, store: &TagStore) -> Rc<dyn Any>;
}

impl<T: Clone + 'static> AnyTagBinding for Tag<T> {
    fn label(&self) -> &'static str {
        Tag::label(self)
    }

    fn extract(&self, store: &TagStore) -> Result<Rc<dyn Any>, &'static str> {
        self.extract_from(store).map(|v| Rc::new(v) as Rc<dyn Any>)
    }

    fn read(&self, store: &TagStore) -> Rc<dyn Any> {
        Rc::new(self.read_from(store)) as Rc<dyn Any>
    }

    fn collect(&self, store: &TagStore) -> Rc<dyn Any> {
        Rc::new(self.collect_from(store)) as Rc<dyn Any>
    }
}

/// Normalized, resolved dependency map handed to a factory or flow body.
#[derive(Default)]
pub struct Deps(pub(crate) HashMap<&'static str, Rc<dyn Any>>);

impl Deps {
    pub(crate) fn new() -> Self {
        Deps(HashMap::new())
    }

    /// Reads a resolved dependency by name.
    ///
    /// # Panics
    /// Panics if `name` was not declared or was declared with a different
    /// type than `T` (both are construction-time mistakes, not resolution
    /// failures).
    pub fn get<T: 'static>(&self, name: &str) -> &T {
        self.0
            .get(name)
            .unwrap_or_else(|| panic!("no dependency named `{name}` was declared"))
            .downcast_ref::<T>()
            .unwrap_or_else(|| panic!("dependency `{name}` was not of the expected type"))
    }

    /// Reads a `lazy`-bound dependency as an [`Accessor<T>`].
    pub fn accessor<T: 'static>(&self, name: &str) -> &Accessor<T> {
        self.get::<Accessor<T>>(name)
    }
}

/// Type-erased view of an [`Atom`], used to walk dependency graphs and the
/// cache without knowing every atom's output type up front.
///
/// `resolve_erased` takes `self: Rc<Self>` rather than `&self` so the
/// produced future can be `'static`: it has to outlive the borrow of
/// whichever `DepKind::Atom`/`DepKind::Lazy` entry it came from, since it is
/// stored in the scope's cache as an in-flight `futures::future::Shared` and
/// awaited later by unrelated callers.
pub(crate) trait AnyAtom {
    fn id(&self) -> AtomId;
    fn deps(&self) -> &[(&'static str, DepKind)];
    #[allow(dead_code)]
    fn tags(&self) -> &TagStore;
    fn resolve_erased(
        self: Rc<Self>,
        scope: Scope,
        path: Vec<AtomId>,
    ) -> LocalBoxFuture<'static, Result<Rc<dyn Any>, ResolveError>>;
    fn make_accessor(&self, scope: Scope) -> Rc<dyn Any>;
}

struct AtomInner<T> {
    id: AtomId,
    #[allow(dead_code)]
    label: Option<&'static str>,
    deps: Vec<(&'static str, DepKind)>,
    tags: TagStore,
    factory: Box<dyn Fn(ResolveContext, Deps) -> LocalBoxFuture<'static, Result<T, AnyError>>>,
}

/// An immutable descriptor of a computed resource: its dependencies and the
/// factory that produces it. Cloning an `Atom` is cheap (`Rc` clone) and
/// shares identity; the same `Atom` resolved in two different scopes
/// produces two independent, scope-local values.
pub struct Atom<T> {
    pub(crate) inner: Rc<AtomInner<T>>,
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Atom {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Atom<T> {
    pub fn id(&self) -> AtomId {
        self.inner.id
    }
}

impl<T: 'static> AnyAtom for Atom<T> {
    fn id(&self) -> AtomId {
        self.inner.id
    }

    fn deps(&self) -> &[(&'static str, DepKind)] {
        &self.inner.deps
    }

    fn tags(&self) -> &TagStore {
        &self.inner.tags
    }

    fn resolve_erased(
        self: Rc<Self>,
        scope: Scope,
        path: Vec<AtomId>,
    ) -> LocalBoxFuture<'static, Result<Rc<dyn Any>, ResolveError>> {
        Box::pin(async move {
            let value = crate::scope::resolve_atom(&scope, &self, path).await?;
            Ok(value)
        })
    }

    fn make_accessor(&self, scope: Scope) -> Rc<dyn Any> {
        Rc::new(Accessor::<T>::new(scope, self.clone())) as Rc<dyn Any>
    }
}

impl<T: 'static> Atom<T> {
    pub(crate) fn factory(
        &self,
        ctx: ResolveContext,
        deps: Deps,
    ) -> LocalBoxFuture<'static, Result<T, AnyError>> {
        (self.inner.factory)(ctx, deps)
    }
}

/// Builds an [`Atom`]. Mirrors a `deps`/`factory`/`tags` object-literal
/// builder from languages with structural records; the core only ever sees
/// the normalized `Vec`/`Deps` form this builder produces, never a
/// positional-vs-named factory-signature choice.
pub struct AtomBuilder<T> {
    label: Option<&'static str>,
    deps: Vec<(&'static str, DepKind)>,
    tags: TagStore,
    _marker: PhantomData<T>,
}

impl<T: 'static> Default for AtomBuilder<T> {
    fn default() -> Self {
        AtomBuilder {
            label: None,
            deps: Vec::new(),
            tags: TagStore::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> AtomBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn dep(mut self, name: &'static str, kind: impl Into<DepKind>) -> Self {
        self.deps.push((name, kind.into()));
        self
    }

    pub fn tag(mut self, tagged: Tagged) -> Self {
        self.tags.push(tagged);
        self
    }

    pub fn build<F, Fut>(self, factory: F) -> Atom<T>
    where
        F: Fn(ResolveContext, Deps) -> Fut + 'static,
        Fut: Future<Output = Result<T, AnyError>> + 'static,
    {
        Atom {
            inner: Rc::new(AtomInner {
                id: AtomId::fresh(),
                label: self.label,
                deps: self.deps,
                tags: self.tags,
                factory: Box::new(move |ctx, deps| Box::pin(factory(ctx, deps))),
            }),
        }
    }
}

/// Shorthand for [`AtomBuilder::new`].
pub fn atom<T: 'static>() -> AtomBuilder<T> {
    AtomBuilder::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Tag;

    #[test]
    fn each_build_call_mints_a_fresh_identity() {
        let a = atom::<u32>().build(|_ctx, _deps| async { Ok(1) });
        let b = atom::<u32>().build(|_ctx, _deps| async { Ok(1) });
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn dep_preserves_declaration_order_and_names() {
        let base: Atom<u32> = atom().build(|_ctx, _deps| async { Ok(1) });
        let derived = atom::<u32>()
            .dep("base", base.clone())
            .dep("also_base", lazy(base))
            .build(|_ctx, _deps| async { Ok(2) });

        let names: Vec<&'static str> = derived.deps().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["base", "also_base"]);
    }

    #[test]
    fn tag_attaches_to_the_atoms_own_tag_store() {
        let env: Tag<&'static str> = Tag::new("env");
        let built = atom::<u32>().tag(env.value("prod")).build(|_ctx, _deps| async { Ok(1) });
        assert_eq!(env.extract_from(built.tags()), Ok("prod"));
    }
}
