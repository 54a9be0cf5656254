//! Process-wide identity for [`Atom`](crate::atom::Atom), [`Flow`](crate::flow::Flow)
//! and [`Tag`](crate::tag::Tag) instances.
//!
//! Each descriptor is stamped with a fresh identity at construction time: a
//! monotonic counter, not an index into any owning collection, since atoms,
//! flows and tags are plain values a caller may hand to more than one scope.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

macro_rules! identity_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            pub(crate) fn fresh() -> Self {
                Self(crate::ids::next_id())
            }
        }
    };
}

identity_type!(
    /// Stable identity of an [`Atom`](crate::atom::Atom), independent of its
    /// output type.
    AtomId
);
identity_type!(
    /// Stable identity of a [`Flow`](crate::flow::Flow).
    FlowId
);
identity_type!(
    /// Stable identity of a [`Tag`](crate::tag::Tag), independent of its value
    /// type.
    TagId
);
