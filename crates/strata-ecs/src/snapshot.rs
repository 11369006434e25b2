//! World snapshots: a serializable chunk-by-chunk dump of world state.
//!
//! The layout follows the world's persistence contract: each chunk is dumped
//! as its definition, its entity-id column, and its live component rows;
//! per-entity records (parent, state, reference slots, array attachments)
//! follow. A [`WorldSnapshot`] serializes to JSON for external loaders;
//! on-disk compatibility with other implementations is explicitly not
//! promised.
//!
//! [`World::state_hash`] digests the same canonical dump with blake3. Two
//! worlds with byte-equal slot tables, entity columns, and component columns
//! hash equal, which is what the replay-determinism tests pin.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, SlotState};
use crate::schema::{ArrayType, ComponentType, TagType};
use crate::world::World;

// ---------------------------------------------------------------------------
// Snapshot records
// ---------------------------------------------------------------------------

/// One chunk's dump: definition, entity column, live rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Component indices in the chunk's definition, ascending.
    pub components: Vec<ComponentType>,
    /// Array indices in the chunk's definition, ascending.
    pub arrays: Vec<ArrayType>,
    /// Tag indices in the chunk's definition, ascending.
    pub tags: Vec<TagType>,
    /// Entity-id column, row order (the sentinel row is not dumped).
    pub entities: Vec<Entity>,
    /// Live component rows, concatenated (`entities.len() * row_size` bytes).
    pub rows: Vec<u8>,
}

/// One entity's slot dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// The entity id.
    pub entity: Entity,
    /// Slot state (never `Free`; only live entities are dumped).
    pub state: SlotState,
    /// Parent id (`Entity::NONE` if unparented).
    pub parent: Entity,
    /// Reference slots in rint order, tombstones included.
    pub references: Vec<Entity>,
    /// Array attachments as `(type, bytes)` pairs, ascending by type.
    pub arrays: Vec<(ArrayType, Vec<u8>)>,
}

/// A complete, serializable dump of world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// The schema's row size at capture time.
    pub row_size: usize,
    /// Every chunk, in chunk-id order (empty chunks included: the chunk set
    /// is part of the world's state).
    pub chunks: Vec<ChunkRecord>,
    /// Every live entity, ascending by id.
    pub entities: Vec<EntityRecord>,
    /// The recyclable-id stack, bottom to top.
    pub free_ids: Vec<u32>,
}

impl WorldSnapshot {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> serde_json::Result<WorldSnapshot> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

impl World {
    /// Capture a complete snapshot of the world state.
    pub fn capture_snapshot(&self) -> WorldSnapshot {
        let row_size = self.schema().row_size();

        let mut chunks = Vec::with_capacity(self.chunk_index().len());
        for (_, chunk) in self.chunk_index().iter() {
            let definition = chunk.definition();
            let mut rows = Vec::with_capacity(chunk.count() * row_size);
            for row in 1..=chunk.count() {
                rows.extend_from_slice(chunk.row_bytes(row));
            }
            chunks.push(ChunkRecord {
                components: definition.component_indices(),
                arrays: definition.array_indices(),
                tags: definition.tag_indices(),
                entities: chunk.entities().to_vec(),
                rows,
            });
        }

        // Live entities, ascending by id; the chunks already hold exactly the
        // live set.
        let mut live: Vec<Entity> = chunks
            .iter()
            .flat_map(|record| record.entities.iter().copied())
            .collect();
        live.sort();

        let entities = live
            .into_iter()
            .map(|entity| {
                let reference_count = self.reference_count(entity).unwrap_or(0);
                let references = (1..=reference_count as u32)
                    .map(|rint| self.get_reference(entity, rint).unwrap_or(Entity::NONE))
                    .collect();
                let arrays = self
                    .entity_definition(entity)
                    .map(|definition| {
                        definition
                            .array_indices()
                            .into_iter()
                            .map(|index| {
                                let bytes = self
                                    .get_array_raw(entity, index)
                                    .map(<[u8]>::to_vec)
                                    .unwrap_or_default();
                                (index, bytes)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                EntityRecord {
                    entity,
                    state: self.entity_state(entity),
                    parent: self.parent(entity).unwrap_or(Entity::NONE),
                    references,
                    arrays,
                }
            })
            .collect();

        WorldSnapshot {
            row_size,
            chunks,
            entities,
            free_ids: self.free_id_stack().to_vec(),
        }
    }

    /// blake3 digest of the canonical state dump. Equal digests mean
    /// byte-equal chunk columns and slot state.
    pub fn state_hash(&self) -> blake3::Hash {
        let snapshot = self.capture_snapshot();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(snapshot.row_size as u64).to_le_bytes());

        for chunk in &snapshot.chunks {
            for index in &chunk.components {
                hasher.update(&(index.index() as u16).to_le_bytes());
            }
            hasher.update(b"|");
            for index in &chunk.arrays {
                hasher.update(&(index.index() as u16).to_le_bytes());
            }
            hasher.update(b"|");
            for index in &chunk.tags {
                hasher.update(&(index.index() as u16).to_le_bytes());
            }
            hasher.update(b"|");
            for entity in &chunk.entities {
                hasher.update(&entity.to_raw().to_le_bytes());
            }
            hasher.update(&chunk.rows);
            hasher.update(b";");
        }

        for record in &snapshot.entities {
            hasher.update(&record.entity.to_raw().to_le_bytes());
            hasher.update(&[state_byte(record.state)]);
            hasher.update(&record.parent.to_raw().to_le_bytes());
            for reference in &record.references {
                hasher.update(&reference.to_raw().to_le_bytes());
            }
            hasher.update(b"|");
            for (index, bytes) in &record.arrays {
                hasher.update(&(index.index() as u16).to_le_bytes());
                hasher.update(&(bytes.len() as u64).to_le_bytes());
                hasher.update(bytes);
            }
            hasher.update(b";");
        }

        for id in &snapshot.free_ids {
            hasher.update(&id.to_le_bytes());
        }
        hasher.finalize()
    }
}

fn state_byte(state: SlotState) -> u8 {
    match state {
        SlotState::Free => 0,
        SlotState::Enabled => 1,
        SlotState::Disabled => 2,
        SlotState::DisabledInherited => 3,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    #[derive(Clone, Copy, PartialEq, Debug, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Pos {
        x: u32,
        y: u32,
    }

    fn setup() -> World {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        schema.register_array::<u32>().unwrap();
        World::new(schema)
    }

    #[test]
    fn snapshot_captures_chunks_and_slots() {
        let mut world = setup();
        let parent = world.create_entity();
        let child = world.create_entity();
        world.add_component(child, Pos { x: 3, y: 4 }).unwrap();
        world.set_parent(child, parent).unwrap();
        world.create_array::<u32>(child, 2).unwrap();
        world.set_array_element(child, 0, 11u32).unwrap();
        let rint = world.add_reference(parent, child).unwrap();

        let snapshot = world.capture_snapshot();
        assert_eq!(snapshot.row_size, 8);
        assert_eq!(snapshot.entities.len(), 2);

        let child_record = snapshot
            .entities
            .iter()
            .find(|r| r.entity == child)
            .unwrap();
        assert_eq!(child_record.parent, parent);
        assert_eq!(child_record.arrays.len(), 1);
        assert_eq!(child_record.arrays[0].1.len(), 8);

        let parent_record = snapshot
            .entities
            .iter()
            .find(|r| r.entity == parent)
            .unwrap();
        assert_eq!(parent_record.references[(rint - 1) as usize], child);

        // The child's chunk dump holds its component bytes.
        let chunk = snapshot
            .chunks
            .iter()
            .find(|c| c.entities.contains(&child))
            .unwrap();
        assert_eq!(chunk.components.len(), 1);
        assert_eq!(chunk.rows.len(), snapshot.row_size);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut world = setup();
        let e = world.create_entity();
        world.add_component(e, Pos { x: 1, y: 2 }).unwrap();

        let snapshot = world.capture_snapshot();
        let json = snapshot.to_json().unwrap();
        let back = WorldSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, back);
    }

    #[test]
    fn state_hash_tracks_mutations() {
        let mut world = setup();
        let e = world.create_entity();
        world.add_component(e, Pos { x: 1, y: 2 }).unwrap();
        let before = world.state_hash();

        // Identical state hashes identically.
        assert_eq!(before, world.state_hash());

        world.set_component(e, Pos { x: 9, y: 9 }).unwrap();
        assert_ne!(before, world.state_hash());
    }

    #[test]
    fn equal_histories_hash_equal() {
        let build = || {
            let mut world = setup();
            let a = world.create_entity();
            let b = world.create_entity();
            world.add_component(a, Pos { x: 1, y: 1 }).unwrap();
            world.destroy_entity(b).unwrap();
            world
        };
        assert_eq!(build().state_hash(), build().state_hash());
    }
}
