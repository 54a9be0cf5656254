//! Scope-level overrides for an atom's normal resolution path.
//!
//! Built on the same `Rc<dyn Any>`/downcast erasure idiom used throughout
//! this crate, applied to two possible override shapes: a fixed value, or a
//! redirect to a different atom's own resolution (itself cached and
//! memoized under the replacement atom's identity, not the preset's).

use std::any::Any;
use std::rc::Rc;

use crate::atom::{AnyAtom, Atom};
use crate::ids::AtomId;

#[derive(Clone)]
pub(crate) enum PresetTarget {
    Value(Rc<dyn Any>),
    Redirect(Rc<dyn AnyAtom>),
}

/// A single override, binding one atom's identity to either a concrete
/// value or another atom to resolve in its place.
#[derive(Clone)]
pub struct Preset {
    pub(crate) atom_id: AtomId,
    pub(crate) target: PresetTarget,
}

impl Preset {
    /// Whenever `atom` would be resolved, use `value` instead without
    /// running `atom`'s factory at all.
    pub fn value<T: 'static>(atom: &Atom<T>, value: T) -> Self {
        Preset {
            atom_id: atom.id(),
            target: PresetTarget::Value(Rc::new(value)),
        }
    }

    /// Whenever `atom` would be resolved, resolve `replacement` instead.
    /// `replacement` is memoized under its own identity, not `atom`'s;
    /// resolving `replacement` directly elsewhere in the same scope shares
    /// the cached value.
    pub fn redirect<T: 'static>(atom: &Atom<T>, replacement: Atom<T>) -> Self {
        Preset {
            atom_id: atom.id(),
            target: PresetTarget::Redirect(Rc::new(replacement)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::atom;

    #[test]
    fn value_preset_binds_to_the_overridden_atoms_identity() {
        let real = atom::<u32>().build(|_ctx, _deps| async { Ok(1) });
        let preset = Preset::value(&real, 99);
        assert_eq!(preset.atom_id, real.id());
        assert!(matches!(preset.target, PresetTarget::Value(_)));
    }

    #[test]
    fn redirect_preset_binds_to_the_overridden_atoms_identity_not_the_replacements() {
        let real = atom::<u32>().build(|_ctx, _deps| async { Ok(1) });
        let replacement = atom::<u32>().build(|_ctx, _deps| async { Ok(2) });
        let replacement_id = replacement.id();

        let preset = Preset::redirect(&real, replacement);
        assert_eq!(preset.atom_id, real.id());
        assert_ne!(preset.atom_id, replacement_id);
        assert!(matches!(preset.target, PresetTarget::Redirect(_)));
    }
}
