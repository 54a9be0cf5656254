//! Typed metadata keys.
//!
//! A [`Tag<T>`] is looked up by its own stable identity, not `TypeId`, since
//! two different tags may share the same value type. Reads walk a chain of
//! [`TagStore`]s from lowest to highest precedence; the caller assembles
//! that chain explicitly (see `ExecutionContext::effective_tags` in
//! `execution.rs`) rather than relying on an implicit owner tree.

use std::rc::Rc;

use crate::ids::TagId;

/// A typed metadata key.
///
/// Reads require `T: Clone` because a [`TagStore`] is shared and reads must
/// not move a value out of it.
pub struct Tag<T> {
    inner: Rc<TagInner<T>>,
}

struct TagInner<T> {
    id: TagId,
    label: &'static str,
    default: Option<T>,
}

impl<T> Clone for Tag<T> {
    fn clone(&self) -> Self {
        Tag {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Tag<T> {
    /// Declares a new tag with no default value. Such a tag cannot be used as
    /// an optional dependency binding, only as required or multi.
    pub fn new(label: &'static str) -> Self {
        Tag {
            inner: Rc::new(TagInner {
                id: TagId::fresh(),
                label,
                default: None,
            }),
        }
    }

    /// Declares a new tag with a default value, usable in any binding
    /// position.
    pub fn with_default(label: &'static str, default: T) -> Self {
        Tag {
            inner: Rc::new(TagInner {
                id: TagId::fresh(),
                label,
                default: Some(default),
            }),
        }
    }

    /// This tag's stable identity.
    pub fn id(&self) -> TagId {
        self.inner.id
    }

    /// This tag's human-readable label.
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Produces a `(key, value)` pair ready to be written into a
    /// [`TagStore`].
    pub fn value(&self, value: T) -> Tagged {
        Tagged {
            id: self.inner.id,
            label: self.inner.label,
            value: Rc::new(value),
        }
    }

    /// Reads this tag's value from `store`, falling back to its default.
    /// Fails if the store has no value and the tag has no default.
    pub fn extract_from(&self, store: &TagStore) -> Result<T, &'static str> {
        if let Some(v) = store.get::<T>(self.inner.id) {
            return Ok(v);
        }
        self.inner.default.clone().ok_or(self.inner.label)
    }

    /// Reads this tag's value from `store`, falling back to its default.
    ///
    /// # Panics
    /// Panics if the tag has no default: construction-time misuse, not a
    /// resolution-time condition.
    pub fn read_from(&self, store: &TagStore) -> T {
        store.get::<T>(self.inner.id).unwrap_or_else(|| {
            self.inner
                .default
                .clone()
                .unwrap_or_else(|| panic!("tag `{}` has no default to read", self.inner.label))
        })
    }

    /// Every matching value in `store`, oldest write first.
    pub fn collect_from(&self, store: &TagStore) -> Vec<T> {
        store.get_all::<T>(self.inner.id)
    }

    pub(crate) fn has_default(&self) -> bool {
        self.inner.default.is_some()
    }
}

/// A validated `(key, value)` pair produced by [`Tag::value`], ready to be
/// written into a [`TagStore`].
#[derive(Clone)]
pub struct Tagged {
    pub(crate) id: TagId,
    pub(crate) label: &'static str,
    pub(crate) value: Rc<dyn std::any::Any>,
}

/// An ordered, append-only collection of [`Tagged`] values.
///
/// Single-value reads (`get`) take the most recently written matching entry,
/// so `set` after `set` behaves like a map overwrite; multi-value reads
/// (`get_all`) return every matching entry in write order, which is what
/// backs `tags::all`/`collect_from`. This single structure serves scope-level
/// tags, flow-definition tags, and an `ExecutionContext`'s local store.
#[derive(Default, Clone)]
pub struct TagStore {
    entries: Vec<Tagged>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tagged(entries: impl IntoIterator<Item = Tagged>) -> Self {
        TagStore {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn set<T: 'static>(&mut self, tag: &Tag<T>, value: T)
    where
        T: Clone,
    {
        self.entries.push(tag.value(value));
    }

    pub fn push(&mut self, tagged: Tagged) {
        self.entries.push(tagged);
    }

    pub fn extend(&mut self, other: TagStore) {
        self.entries.extend(other.entries);
    }

    pub(crate) fn get<T: Clone + 'static>(&self, id: TagId) -> Option<T> {
        self.entries
            .iter()
            .rev()
            .find(|t| t.id == id)
            .map(|t| {
                t.value
                    .downcast_ref::<T>()
                    .cloned()
                    .expect("tag value type mismatch for matching tag id")
            })
    }

    pub(crate) fn get_all<T: Clone + 'static>(&self, id: TagId) -> Vec<T> {
        self.entries
            .iter()
            .filter(|t| t.id == id)
            .map(|t| {
                t.value
                    .downcast_ref::<T>()
                    .cloned()
                    .expect("tag value type mismatch for matching tag id")
            })
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn to_vec(&self) -> Vec<Tagged> {
        self.entries.clone()
    }
}

/// Dependency-binding helpers mirroring `tags.required`/`tags.optional`/
/// `tags.all` from the source API.
pub mod tags {
    use super::Tag;
    use crate::atom::DepKind;

    /// A required tag dependency: resolution fails with `MissingTagError` if
    /// absent and the tag has no default.
    pub fn required<T: Clone + 'static>(tag: Tag<T>) -> DepKind {
        DepKind::TagRequired(Box::new(tag))
    }

    /// An optional tag dependency. The tag must have been constructed with a
    /// default; this is checked when the atom is built.
    pub fn optional<T: Clone + 'static>(tag: Tag<T>) -> DepKind {
        assert!(
            tag.has_default(),
            "tags::optional(\"{}\") requires a tag constructed with a default value",
            tag.label()
        );
        DepKind::TagOptional(Box::new(tag))
    }

    /// A multi-value tag dependency: collects every matching value from the
    /// scope's tag store.
    pub fn all<T: Clone + 'static>(tag: Tag<T>) -> DepKind {
        DepKind::TagAll(Box::new(tag))
    }
}
