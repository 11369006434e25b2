//! strata-ecs -- an archetype-based entity world.
//!
//! Entities carry a dynamic mixture of fixed-layout components, variable
//! length array attachments, zero-size tags, parent/child relations, and
//! named cross-entity reference slots. Entities sharing a signature are
//! grouped into [`chunk::Chunk`]s -- columnar tables queries iterate without
//! per-entity indirection. A [`schema::Schema`] assigns every type a stable
//! small index, size, and byte offset once; every structural mutation is a
//! migration between chunks keyed by [`definition::Definition`].
//!
//! The [`operation::OperationBuffer`] records structural edits as a packed
//! instruction stream and replays them deterministically against a world.
//!
//! # Quick start
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Position { x: u32, y: u32 }
//!
//! #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Velocity { dx: i32, dy: i32 }
//!
//! let mut schema = Schema::new();
//! let position = schema.register_component::<Position>().unwrap();
//! schema.register_component::<Velocity>().unwrap();
//! let mut world = World::new(schema);
//!
//! let e = world.create_entity();
//! world.add_component(e, Position { x: 7, y: 9 }).unwrap();
//! world.add_component(e, Velocity { dx: -1, dy: 0 }).unwrap();
//!
//! let mut movers = Query::new().require(position);
//! for chunk in movers.chunks(&world) {
//!     for value in chunk.component_column::<Position>(position) {
//!         assert_eq!((value.x, value.y), (7, 9));
//!     }
//! }
//! ```
//!
//! # Threading
//!
//! A world is a non-shared resource: all mutation is synchronous and
//! single-threaded, and borrows into chunk storage are invalidated by any
//! mutating call. Cross-thread use requires external synchronization.

#![deny(unsafe_code)]

pub mod chunk;
pub mod definition;
pub mod entity;
pub mod mask;
pub mod operation;
pub mod query;
pub mod schema;
pub mod snapshot;
pub mod world;

use entity::Entity;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced by world, schema, and operation-buffer calls.
///
/// Every failure surfaces synchronously and leaves the world unchanged.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The id is zero, out of range, or refers to a freed slot.
    #[error("entity {0} not found")]
    EntityNotFound(Entity),

    /// The component/array/tag is not present on the entity (or the index
    /// was never registered).
    #[error("{namespace} index {index} is not present")]
    TypeMissing {
        namespace: &'static str,
        index: u16,
    },

    /// A strict add found the component/array/tag already present.
    #[error("{namespace} index {index} is already present")]
    TypeAlreadyPresent {
        namespace: &'static str,
        index: u16,
    },

    /// A Rust type was used through a typed API without being registered.
    #[error("{namespace} type `{type_name}` is not registered in the schema")]
    UnregisteredType {
        namespace: &'static str,
        type_name: &'static str,
    },

    /// Registration past the bit-mask capacity of a schema namespace.
    #[error("schema {namespace} namespace is full ({capacity} entries)", capacity = crate::mask::CAPACITY)]
    SchemaFull { namespace: &'static str },

    /// `set_parent` would make an entity its own ancestor.
    #[error("parenting {child} under {parent} would create a cycle")]
    CycleDetected { child: Entity, parent: Entity },

    /// An operation-buffer instruction needed a selection but none was
    /// active.
    #[error("operation requires a selection but none is active")]
    NoSelection,

    /// The operation stream held an unknown opcode or a truncated payload.
    #[error("corrupted operation stream at byte {offset}")]
    CorruptedStream { offset: usize },

    /// A reference, array, or byte-length index fell outside its range.
    #[error("index {index} out of range (length {len})")]
    OutOfRange { index: usize, len: usize },
}

impl WorldError {
    pub(crate) fn unregistered(namespace: &'static str, type_name: &'static str) -> Self {
        WorldError::UnregisteredType {
            namespace,
            type_name,
        }
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::chunk::{Chunk, ChunkId, ChunkIndex};
    pub use crate::definition::Definition;
    pub use crate::entity::{Entity, SlotState};
    pub use crate::mask::BitMask;
    pub use crate::operation::OperationBuffer;
    pub use crate::query::Query;
    pub use crate::schema::{ArrayType, ComponentType, Schema, TagType};
    pub use crate::snapshot::WorldSnapshot;
    pub use crate::world::{World, WorldConfig};
    pub use crate::WorldError;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[derive(Clone, Copy, PartialEq, Debug, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Position {
        x: u32,
        y: u32,
    }

    #[derive(Clone, Copy, PartialEq, Debug, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Velocity {
        dx: i32,
        dy: i32,
    }

    struct Frozen;

    fn setup() -> World {
        let mut schema = Schema::new();
        schema.register_component::<Position>().unwrap();
        schema.register_component::<Velocity>().unwrap();
        schema.register_array::<u32>().unwrap();
        schema.register_tag::<Frozen>().unwrap();
        World::new(schema)
    }

    #[test]
    fn full_lifecycle_with_queries() {
        let mut world = setup();

        let mut movers = Vec::new();
        for i in 0..8u32 {
            let e = world.create_entity();
            world.add_component(e, Position { x: i, y: 0 }).unwrap();
            if i % 2 == 0 {
                world.add_component(e, Velocity { dx: 1, dy: 1 }).unwrap();
                movers.push(e);
            }
        }

        let mut moving = Query::new()
            .with::<Position>(world.schema())
            .unwrap()
            .with::<Velocity>(world.schema())
            .unwrap();
        assert_eq!(moving.count(&world), 4);

        // Integrate one step through the columnar view, writing back through
        // the world (column views are read views).
        let position = world.schema().lookup_component::<Position>().unwrap();
        let velocity = world.schema().lookup_component::<Velocity>().unwrap();
        let mut updates = Vec::new();
        for chunk in moving.chunks(&world) {
            let positions = chunk.component_column::<Position>(position);
            let velocities = chunk.component_column::<Velocity>(velocity);
            for ((entity, p), v) in chunk.entities().iter().zip(positions).zip(velocities) {
                updates.push((
                    *entity,
                    Position {
                        x: p.x.wrapping_add(v.dx as u32),
                        y: p.y.wrapping_add(v.dy as u32),
                    },
                ));
            }
        }
        for (entity, value) in updates {
            world.set_component(entity, value).unwrap();
        }
        for &e in &movers {
            assert_eq!(world.get_component::<Position>(e).unwrap().y, 1);
        }

        for &e in &movers {
            world.destroy_entity(e).unwrap();
        }
        assert_eq!(moving.count(&world), 0);
        assert_eq!(world.entity_count(), 4);
    }

    #[test]
    fn operation_buffer_drives_the_world() {
        let mut world = setup();
        let mut op = OperationBuffer::new();

        op.create_and_select();
        op.add_component(world.schema(), Position { x: 10, y: 20 }).unwrap();
        op.create_and_select();
        op.set_parent_to_previously_created(1);
        op.perform(&mut world).unwrap();

        let parent = Entity::from_raw(1);
        let child = Entity::from_raw(2);
        assert_eq!(
            world.get_component::<Position>(parent).unwrap(),
            Position { x: 10, y: 20 }
        );
        assert_eq!(world.parent(child).unwrap(), parent);
    }

    #[test]
    fn replayed_streams_hash_equal() {
        let record = |world: &World| {
            let mut op = OperationBuffer::new();
            op.create_many_and_select(4);
            op.add_component(world.schema(), Position { x: 1, y: 1 }).unwrap();
            op.select_previously_created(0);
            op.add_component(world.schema(), Velocity { dx: 2, dy: 2 }).unwrap();
            op.select_previously_created(3);
            op.destroy_selected();
            op
        };

        let mut w1 = setup();
        let mut w2 = setup();
        record(&w1).perform(&mut w1).unwrap();
        record(&w2).perform(&mut w2).unwrap();
        assert_eq!(w1.state_hash(), w2.state_hash());
    }

    #[test]
    fn disabled_subtrees_and_tags_coexist_with_storage() {
        let mut world = setup();
        let root = world.create_entity();
        let leaf = world.create_entity();
        world.set_parent(leaf, root).unwrap();
        world.add_tag::<Frozen>(leaf).unwrap();
        world.set_enabled(root, false).unwrap();

        assert_eq!(world.entity_state(leaf), SlotState::DisabledInherited);
        assert!(world.has_tag::<Frozen>(leaf));

        // Tag migration while disabled keeps the enable state.
        world.remove_tag::<Frozen>(leaf).unwrap();
        assert_eq!(world.entity_state(leaf), SlotState::DisabledInherited);
    }
}
