//! Archetype signatures.
//!
//! A [`Definition`] is the identity of an archetype: three bit masks over the
//! schema's component, array, and tag namespaces. Two entities live in the
//! same chunk iff their definitions are equal, and the world's chunk index is
//! keyed by definition content.

use serde::{Deserialize, Serialize};

use crate::mask::BitMask;
use crate::schema::{ArrayType, ComponentType, TagType};

/// The `(components, arrays, tags)` triple identifying one archetype.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize, Deserialize)]
pub struct Definition {
    components: BitMask,
    arrays: BitMask,
    tags: BitMask,
}

impl Definition {
    /// The no-components archetype every entity is born into.
    pub const EMPTY: Definition = Definition {
        components: BitMask::EMPTY,
        arrays: BitMask::EMPTY,
        tags: BitMask::EMPTY,
    };

    /// Create an empty definition.
    pub fn new() -> Self {
        Self::EMPTY
    }

    // -- single-index edits (by value, for cheap "definition + bit" math) ---

    /// This definition with the component bit set.
    #[must_use]
    pub fn with_component(mut self, index: ComponentType) -> Self {
        self.components.set(index.index());
        self
    }

    /// This definition with the component bit cleared.
    #[must_use]
    pub fn without_component(mut self, index: ComponentType) -> Self {
        self.components.clear(index.index());
        self
    }

    /// This definition with the array bit set.
    #[must_use]
    pub fn with_array(mut self, index: ArrayType) -> Self {
        self.arrays.set(index.index());
        self
    }

    /// This definition with the array bit cleared.
    #[must_use]
    pub fn without_array(mut self, index: ArrayType) -> Self {
        self.arrays.clear(index.index());
        self
    }

    /// This definition with the tag bit set.
    #[must_use]
    pub fn with_tag(mut self, index: TagType) -> Self {
        self.tags.set(index.index());
        self
    }

    /// This definition with the tag bit cleared.
    #[must_use]
    pub fn without_tag(mut self, index: TagType) -> Self {
        self.tags.clear(index.index());
        self
    }

    /// Merge every bit of `other` into `self`.
    pub fn union_with(&mut self, other: &Definition) {
        self.components.union_with(&other.components);
        self.arrays.union_with(&other.arrays);
        self.tags.union_with(&other.tags);
    }

    // -- queries ------------------------------------------------------------

    /// Whether the component bit is set.
    #[inline]
    pub fn has_component(&self, index: ComponentType) -> bool {
        self.components.contains(index.index())
    }

    /// Whether the array bit is set.
    #[inline]
    pub fn has_array(&self, index: ArrayType) -> bool {
        self.arrays.contains(index.index())
    }

    /// Whether the tag bit is set.
    #[inline]
    pub fn has_tag(&self, index: TagType) -> bool {
        self.tags.contains(index.index())
    }

    /// Whether every bit of `other` is present in `self`.
    pub fn contains(&self, other: &Definition) -> bool {
        self.components.is_superset(&other.components)
            && self.arrays.is_superset(&other.arrays)
            && self.tags.is_superset(&other.tags)
    }

    /// Whether `self` and `other` share no bit in any namespace.
    pub fn is_disjoint(&self, other: &Definition) -> bool {
        self.components.is_disjoint(&other.components)
            && self.arrays.is_disjoint(&other.arrays)
            && self.tags.is_disjoint(&other.tags)
    }

    /// Whether no bit is set in any namespace.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.arrays.is_empty() && self.tags.is_empty()
    }

    /// The component mask.
    #[inline]
    pub fn components(&self) -> &BitMask {
        &self.components
    }

    /// The array mask.
    #[inline]
    pub fn arrays(&self) -> &BitMask {
        &self.arrays
    }

    /// The tag mask.
    #[inline]
    pub fn tags(&self) -> &BitMask {
        &self.tags
    }

    // -- sorted copy-out ----------------------------------------------------

    /// Component indices in ascending order.
    pub fn component_indices(&self) -> Vec<ComponentType> {
        self.components.iter().map(|i| ComponentType(i as u16)).collect()
    }

    /// Array indices in ascending order.
    pub fn array_indices(&self) -> Vec<ArrayType> {
        self.arrays.iter().map(|i| ArrayType(i as u16)).collect()
    }

    /// Tag indices in ascending order.
    pub fn tag_indices(&self) -> Vec<TagType> {
        self.tags.iter().map(|i| TagType(i as u16)).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn add_then_remove_restores_original() {
        let base = Definition::new().with_component(ComponentType(3));
        let roundtrip = base
            .with_component(ComponentType(9))
            .without_component(ComponentType(9));
        assert_eq!(base, roundtrip);
    }

    #[test]
    fn namespaces_do_not_bleed() {
        let def = Definition::new()
            .with_component(ComponentType(0))
            .with_array(ArrayType(0))
            .with_tag(TagType(0));
        assert!(def.has_component(ComponentType(0)));
        assert!(def.has_array(ArrayType(0)));
        assert!(def.has_tag(TagType(0)));

        let only_component = Definition::new().with_component(ComponentType(0));
        assert!(def.contains(&only_component));
        assert!(!only_component.contains(&def));
    }

    #[test]
    fn usable_as_map_key() {
        let mut map = HashMap::new();
        let a = Definition::new().with_component(ComponentType(1));
        let b = Definition::new().with_component(ComponentType(1));
        map.insert(a, 7u32);
        assert_eq!(map.get(&b), Some(&7));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn sorted_copy_out() {
        let def = Definition::new()
            .with_component(ComponentType(200))
            .with_component(ComponentType(4))
            .with_component(ComponentType(77));
        let indices: Vec<usize> = def.component_indices().iter().map(|c| c.index()).collect();
        assert_eq!(indices, vec![4, 77, 200]);
    }

    #[test]
    fn empty_is_empty() {
        assert!(Definition::EMPTY.is_empty());
        assert!(!Definition::new().with_tag(TagType(0)).is_empty());
        assert!(Definition::EMPTY.contains(&Definition::EMPTY));
    }
}
