//! Descriptors of orchestrated operations: input-taking, never cached,
//! always run through an [`ExecutionContext`](crate::execution::ExecutionContext).
//!
//! Shares its dependency-declaration shape with [`Atom`](crate::atom::Atom)
//! (the same `DepKind` list, walked the same way), but a `Flow` additionally
//! takes an explicit input value and its own execution context. Unlike an
//! atom, it is never memoized: calling `exec` on the same flow with the same
//! input runs the body again, every time. Journaled de-duplication is the
//! execution context's concern, not the flow's.

use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::atom::DepKind;
use crate::error::AnyError;
use crate::execution::ExecutionContext;
use crate::ids::FlowId;
use crate::tag::{TagStore, Tagged};

pub(crate) type LocalBoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + 'a>>;

struct FlowInner<I, T> {
    id: FlowId,
    #[allow(dead_code)]
    label: Option<&'static str>,
    deps: Vec<(&'static str, DepKind)>,
    tags: TagStore,
    body: Box<dyn Fn(ExecutionContext, I, crate::atom::Deps) -> LocalBoxFuture<'static, Result<T, AnyError>>>,
}

/// An immutable descriptor of an orchestrated operation.
pub struct Flow<I, T> {
    inner: Rc<FlowInner<I, T>>,
}

impl<I, T> Clone for Flow<I, T> {
    fn clone(&self) -> Self {
        Flow {
            inner: self.inner.clone(),
        }
    }
}

impl<I: 'static, T: 'static> Flow<I, T> {
    pub fn id(&self) -> FlowId {
        self.inner.id
    }

    pub(crate) fn deps(&self) -> &[(&'static str, DepKind)] {
        &self.inner.deps
    }

    pub(crate) fn tags(&self) -> &TagStore {
        &self.inner.tags
    }

    pub(crate) fn run(
        &self,
        ctx: ExecutionContext,
        input: I,
        deps: crate::atom::Deps,
    ) -> LocalBoxFuture<'static, Result<T, AnyError>> {
        (self.inner.body)(ctx, input, deps)
    }
}

/// Builds a [`Flow`].
pub struct FlowBuilder<I, T> {
    label: Option<&'static str>,
    deps: Vec<(&'static str, DepKind)>,
    tags: TagStore,
    _marker: PhantomData<(I, T)>,
}

impl<I: 'static, T: 'static> Default for FlowBuilder<I, T> {
    fn default() -> Self {
        FlowBuilder {
            label: None,
            deps: Vec::new(),
            tags: TagStore::new(),
            _marker: PhantomData,
        }
    }
}

impl<I: 'static, T: 'static> FlowBuilder<I, T> {
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

    pub fn build<F, Fut>(self, body: F) -> Flow<I, T>
    where
        F: Fn(ExecutionContext, I, crate::atom::Deps) -> Fut + 'static,
        Fut: Future<Output = Result<T, AnyError>> + 'static,
    {
        Flow {
            inner: Rc::new(FlowInner {
                id: FlowId::fresh(),
                label: self.label,
                deps: self.deps,
                tags: self.tags,
                body: Box::new(move |ctx, input, deps| Box::pin(body(ctx, input, deps))),
            }),
        }
    }
}

/// Shorthand for [`FlowBuilder::new`].
pub fn flow<I: 'static, T: 'static>() -> FlowBuilder<I, T> {
    FlowBuilder::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::atom;
    use crate::tag::Tag;

    #[test]
    fn each_build_call_mints_a_fresh_identity() {
        let a = flow::<u32, u32>().build(|_ctx, input, _deps| async move { Ok(input) });
        let b = flow::<u32, u32>().build(|_ctx, input, _deps| async move { Ok(input) });
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn dep_preserves_declaration_order_and_names() {
        let base = atom::<u32>().build(|_ctx, _deps| async { Ok(1) });
        let derived = flow::<(), u32>()
            .dep("base", base)
            .build(|_ctx, _input, _deps| async { Ok(1) });

        let names: Vec<&'static str> = derived.deps().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["base"]);
    }

    #[test]
    fn tag_attaches_to_the_flows_own_tag_store() {
        let region: Tag<&'static str> = Tag::new("region");
        let built = flow::<(), u32>()
            .tag(region.value("eu"))
            .build(|_ctx, _input, _deps| async { Ok(1) });
        assert_eq!(region.extract_from(built.tags()), Ok("eu"));
    }
}
