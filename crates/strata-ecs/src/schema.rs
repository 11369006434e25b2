//! The schema: a compile-once registry of component, array, and tag types.
//!
//! Every type used with a world must be registered first. Registration
//! assigns a stable small index per namespace and, for components, a byte
//! size and an offset into the row layout shared by every chunk. Offsets are
//! packed greedily in registration order; `row_size` is the running sum of
//! component sizes. Arrays and tags contribute nothing to the row: arrays
//! live in per-entity side buffers (the schema records their element size)
//! and tags are pure presence bits.
//!
//! Registration is append-only and idempotent per Rust type. A namespace
//! holds at most [`mask::CAPACITY`] entries; registering past that is a
//! [`WorldError::SchemaFull`].

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use bytemuck::Pod;

use crate::mask;
use crate::WorldError;

// ---------------------------------------------------------------------------
// Type indices
// ---------------------------------------------------------------------------

/// Stable index of a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ComponentType(pub(crate) u16);

/// Stable index of a registered array-attachment type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ArrayType(pub(crate) u16);

/// Stable index of a registered tag type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TagType(pub(crate) u16);

macro_rules! index_impls {
    ($ty:ident, $label:literal) => {
        impl $ty {
            /// The index as a usize (for mask operations).
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

index_impls!(ComponentType, "ComponentType");
index_impls!(ArrayType, "ArrayType");
index_impls!(TagType, "TagType");

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct ComponentEntry {
    size: usize,
    offset: usize,
}

#[derive(Clone, Debug)]
struct ArrayEntry {
    element_size: usize,
}

/// Append-only registry of component/array/tag types.
///
/// The three namespaces are disjoint: the same Rust type may be registered
/// as a component and as an array attachment and receive unrelated indices.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    components: Vec<ComponentEntry>,
    arrays: Vec<ArrayEntry>,
    tag_count: u16,

    by_component_type: HashMap<TypeId, ComponentType>,
    by_array_type: HashMap<TypeId, ArrayType>,
    by_tag_type: HashMap<TypeId, TagType>,

    row_size: usize,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    // -- registration -------------------------------------------------------

    /// Register `T` as a component type. Idempotent: re-registering the same
    /// Rust type returns the existing index.
    ///
    /// The `Pod` bound is the contract that components are plain fixed-size
    /// value records with no owning pointers, so chunk storage can copy them
    /// byte-wise.
    pub fn register_component<T: Pod + 'static>(&mut self) -> Result<ComponentType, WorldError> {
        if let Some(&existing) = self.by_component_type.get(&TypeId::of::<T>()) {
            return Ok(existing);
        }
        let index = self.register_component_dynamic(std::mem::size_of::<T>())?;
        self.by_component_type.insert(TypeId::of::<T>(), index);
        Ok(index)
    }

    /// Register a component slot by size alone, without a backing Rust type.
    /// Always appends a fresh index.
    pub fn register_component_dynamic(&mut self, size: usize) -> Result<ComponentType, WorldError> {
        if self.components.len() >= mask::CAPACITY {
            return Err(WorldError::SchemaFull {
                namespace: "component",
            });
        }
        let index = ComponentType(self.components.len() as u16);
        self.components.push(ComponentEntry {
            size,
            offset: self.row_size,
        });
        self.row_size += size;
        Ok(index)
    }

    /// Register `T` as an array-attachment element type. Idempotent.
    pub fn register_array<T: Pod + 'static>(&mut self) -> Result<ArrayType, WorldError> {
        if let Some(&existing) = self.by_array_type.get(&TypeId::of::<T>()) {
            return Ok(existing);
        }
        let index = self.register_array_dynamic(std::mem::size_of::<T>())?;
        self.by_array_type.insert(TypeId::of::<T>(), index);
        Ok(index)
    }

    /// Register an array-attachment slot by element size alone.
    pub fn register_array_dynamic(&mut self, element_size: usize) -> Result<ArrayType, WorldError> {
        if self.arrays.len() >= mask::CAPACITY {
            return Err(WorldError::SchemaFull { namespace: "array" });
        }
        let index = ArrayType(self.arrays.len() as u16);
        self.arrays.push(ArrayEntry { element_size });
        Ok(index)
    }

    /// Register `T` as a tag type. Idempotent. Tags are zero-size presence
    /// markers and contribute nothing to the row layout.
    pub fn register_tag<T: 'static>(&mut self) -> Result<TagType, WorldError> {
        if let Some(&existing) = self.by_tag_type.get(&TypeId::of::<T>()) {
            return Ok(existing);
        }
        let index = self.register_tag_dynamic()?;
        self.by_tag_type.insert(TypeId::of::<T>(), index);
        Ok(index)
    }

    /// Register an anonymous tag slot.
    pub fn register_tag_dynamic(&mut self) -> Result<TagType, WorldError> {
        if self.tag_count as usize >= mask::CAPACITY {
            return Err(WorldError::SchemaFull { namespace: "tag" });
        }
        let index = TagType(self.tag_count);
        self.tag_count += 1;
        Ok(index)
    }

    // -- lookup -------------------------------------------------------------

    /// Look up the component index registered for `T`.
    pub fn lookup_component<T: 'static>(&self) -> Option<ComponentType> {
        self.by_component_type.get(&TypeId::of::<T>()).copied()
    }

    /// Look up the array index registered for `T`.
    pub fn lookup_array<T: 'static>(&self) -> Option<ArrayType> {
        self.by_array_type.get(&TypeId::of::<T>()).copied()
    }

    /// Look up the tag index registered for `T`.
    pub fn lookup_tag<T: 'static>(&self) -> Option<TagType> {
        self.by_tag_type.get(&TypeId::of::<T>()).copied()
    }

    // -- layout -------------------------------------------------------------

    /// Byte size of one full component row.
    #[inline]
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Byte size of the component at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the index was not produced by this schema.
    #[inline]
    pub fn component_size(&self, index: ComponentType) -> usize {
        self.components[index.index()].size
    }

    /// Byte offset of the component at `index` within a row.
    ///
    /// # Panics
    ///
    /// Panics if the index was not produced by this schema.
    #[inline]
    pub fn component_offset(&self, index: ComponentType) -> usize {
        self.components[index.index()].offset
    }

    /// Element byte size of the array attachment at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the index was not produced by this schema.
    #[inline]
    pub fn array_element_size(&self, index: ArrayType) -> usize {
        self.arrays[index.index()].element_size
    }

    /// Number of registered component types.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Number of registered array-attachment types.
    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    /// Number of registered tag types.
    pub fn tag_count(&self) -> usize {
        self.tag_count as usize
    }

    // -- validation ---------------------------------------------------------

    /// Error with `TypeMissing` unless `index` is a registered component.
    pub fn check_component(&self, index: ComponentType) -> Result<(), WorldError> {
        if index.index() < self.components.len() {
            Ok(())
        } else {
            Err(WorldError::TypeMissing {
                namespace: "component",
                index: index.0,
            })
        }
    }

    /// Error with `TypeMissing` unless `index` is a registered array type.
    pub fn check_array(&self, index: ArrayType) -> Result<(), WorldError> {
        if index.index() < self.arrays.len() {
            Ok(())
        } else {
            Err(WorldError::TypeMissing {
                namespace: "array",
                index: index.0,
            })
        }
    }

    /// Error with `TypeMissing` unless `index` is a registered tag.
    pub fn check_tag(&self, index: TagType) -> Result<(), WorldError> {
        if index.index() < self.tag_count as usize {
            Ok(())
        } else {
            Err(WorldError::TypeMissing {
                namespace: "tag",
                index: index.0,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Pos {
        x: u32,
        y: u32,
    }

    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Vel {
        vx: i32,
    }

    struct Frozen;

    #[test]
    fn offsets_are_packed_greedily() {
        let mut schema = Schema::new();
        let p = schema.register_component::<Pos>().unwrap();
        let v = schema.register_component::<Vel>().unwrap();

        assert_eq!(p.index(), 0);
        assert_eq!(v.index(), 1);
        assert_eq!(schema.component_offset(p), 0);
        assert_eq!(schema.component_size(p), 8);
        assert_eq!(schema.component_offset(v), 8);
        assert_eq!(schema.component_size(v), 4);
        assert_eq!(schema.row_size(), 12);
    }

    #[test]
    fn registration_is_idempotent() {
        let mut schema = Schema::new();
        let a = schema.register_component::<Pos>().unwrap();
        let b = schema.register_component::<Pos>().unwrap();
        assert_eq!(a, b);
        assert_eq!(schema.component_count(), 1);
        assert_eq!(schema.row_size(), 8);
    }

    #[test]
    fn namespaces_are_disjoint() {
        let mut schema = Schema::new();
        let c = schema.register_component::<Pos>().unwrap();
        let a = schema.register_array::<Pos>().unwrap();
        let t = schema.register_tag::<Frozen>().unwrap();

        assert_eq!(c.index(), 0);
        assert_eq!(a.index(), 0);
        assert_eq!(t.index(), 0);
        assert_eq!(schema.array_element_size(a), 8);
        // Arrays and tags never contribute to the row.
        assert_eq!(schema.row_size(), 8);
    }

    #[test]
    fn overflow_fails_cleanly() {
        let mut schema = Schema::new();
        for _ in 0..crate::mask::CAPACITY {
            schema.register_component_dynamic(4).unwrap();
        }
        let err = schema.register_component_dynamic(4).unwrap_err();
        assert!(matches!(err, WorldError::SchemaFull { namespace: "component" }));
        // The failed registration left the schema unchanged.
        assert_eq!(schema.component_count(), crate::mask::CAPACITY);
        assert_eq!(schema.row_size(), crate::mask::CAPACITY * 4);
    }

    #[test]
    fn check_rejects_foreign_indices() {
        let mut schema = Schema::new();
        let c = schema.register_component::<Pos>().unwrap();
        assert!(schema.check_component(c).is_ok());
        assert!(matches!(
            schema.check_component(ComponentType(7)),
            Err(WorldError::TypeMissing { namespace: "component", index: 7 })
        ));
        assert!(schema.check_array(ArrayType(0)).is_err());
        assert!(schema.check_tag(TagType(0)).is_err());
    }
}
