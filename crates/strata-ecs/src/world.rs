//! The [`World`]: entity allocator, slot table, and all structural mutation.
//!
//! The world owns the chunk index and a dense slot table indexed by entity
//! id. Every structural mutation (component/array/tag add or remove) computes
//! the entity's new definition, finds or creates the destination chunk, and
//! migrates the entity's row. Swap-removal means any mutation can relocate an
//! unrelated entity, so `(chunk, row)` pairs must never be held across a
//! mutating call; the slot table is the single source of truth.
//!
//! Beyond chunk storage the world tracks, per slot: the parent/child graph
//! (owned child lists, cycle-checked), the enable state with downward
//! propagation, per-entity array attachments, and ordered reference-slot
//! lists addressed by 1-based `rint` indices.
//!
//! The world is single-threaded by contract: no interior mutability, no
//! thread-local state; callers needing cross-thread access synchronize
//! externally.

#[cfg(debug_assertions)]
use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use smallvec::SmallVec;
use tracing::trace;

use crate::chunk::{Chunk, ChunkId, ChunkIndex};
use crate::definition::Definition;
use crate::entity::{Entity, SlotState};
use crate::schema::{ArrayType, ComponentType, Schema, TagType};
use crate::WorldError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Callback invoked after a component is added to / removed from an entity.
/// Hooks run after the slot and chunk state is committed, so anything they
/// observe through captured handles sees the post-mutation world.
pub type ComponentHook = Box<dyn FnMut(Entity, ComponentType)>;

/// World construction options.
pub struct WorldConfig {
    /// Pre-sized slot table capacity.
    pub initial_slot_capacity: usize,
    /// Capture a stack trace at entity creation (debug builds only; the
    /// capture compiles out entirely in release builds).
    pub enable_creation_trace: bool,
    on_component_added: Option<ComponentHook>,
    on_component_removed: Option<ComponentHook>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            initial_slot_capacity: 64,
            enable_creation_trace: false,
            on_component_added: None,
            on_component_removed: None,
        }
    }
}

impl WorldConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the slot table.
    #[must_use]
    pub fn initial_slot_capacity(mut self, capacity: usize) -> Self {
        self.initial_slot_capacity = capacity;
        self
    }

    /// Enable debug-build creation traces.
    #[must_use]
    pub fn enable_creation_trace(mut self, enable: bool) -> Self {
        self.enable_creation_trace = enable;
        self
    }

    /// Install the component-added hook.
    #[must_use]
    pub fn on_component_added(mut self, hook: impl FnMut(Entity, ComponentType) + 'static) -> Self {
        self.on_component_added = Some(Box::new(hook));
        self
    }

    /// Install the component-removed hook.
    #[must_use]
    pub fn on_component_removed(
        mut self,
        hook: impl FnMut(Entity, ComponentType) + 'static,
    ) -> Self {
        self.on_component_removed = Some(Box::new(hook));
        self
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// Per-entity record in the dense slot table.
#[derive(Debug)]
struct Slot {
    state: SlotState,
    chunk: ChunkId,
    row: u32,
    parent: Entity,
    children: SmallVec<[Entity; 4]>,
    /// Ordered reference slots, addressed by 1-based rint. `Entity::NONE`
    /// entries are tombstones.
    references: SmallVec<[Entity; 4]>,
    /// Holders that currently reference this entity (one entry per live
    /// reference slot), used to tombstone eagerly on destroy.
    referenced_by: SmallVec<[Entity; 2]>,
    /// Array attachments: `(type, buffer)` pairs, buffer length is always a
    /// multiple of the type's element size.
    arrays: SmallVec<[(ArrayType, Vec<u8>); 1]>,
}

impl Slot {
    fn free() -> Self {
        Self {
            state: SlotState::Free,
            chunk: ChunkIndex::EMPTY,
            row: 0,
            parent: Entity::NONE,
            children: SmallVec::new(),
            references: SmallVec::new(),
            referenced_by: SmallVec::new(),
            arrays: SmallVec::new(),
        }
    }
}

fn remove_one<const N: usize>(list: &mut SmallVec<[Entity; N]>, value: Entity)
where
    [Entity; N]: smallvec::Array<Item = Entity>,
{
    if let Some(position) = list.iter().position(|e| *e == value) {
        list.swap_remove(position);
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The archetype world. See the module docs for the storage model.
pub struct World {
    schema: Arc<Schema>,
    chunks: ChunkIndex,
    /// Dense slot table; index 0 is the reserved "none" slot.
    slots: Vec<Slot>,
    /// Recyclable ids, popped LIFO.
    free_ids: Vec<u32>,
    live_count: usize,
    on_component_added: Option<ComponentHook>,
    on_component_removed: Option<ComponentHook>,
    #[cfg(debug_assertions)]
    creation_trace_enabled: bool,
    #[cfg(debug_assertions)]
    creation_traces: HashMap<u32, std::backtrace::Backtrace>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.live_count)
            .field("chunk_count", &self.chunks.len())
            .field("row_size", &self.schema.row_size())
            .finish()
    }
}

impl World {
    /// Create a world over a registered schema with default configuration.
    pub fn new(schema: Schema) -> Self {
        Self::with_config(schema, WorldConfig::default())
    }

    /// Create a world with explicit configuration.
    pub fn with_config(schema: Schema, config: WorldConfig) -> Self {
        let schema = Arc::new(schema);
        let mut slots = Vec::with_capacity(config.initial_slot_capacity.max(1));
        slots.push(Slot::free()); // id 0 = "none"
        #[cfg(not(debug_assertions))]
        let _ = config.enable_creation_trace;
        Self {
            chunks: ChunkIndex::new(schema.clone()),
            schema,
            slots,
            free_ids: Vec::new(),
            live_count: 0,
            on_component_added: config.on_component_added,
            on_component_removed: config.on_component_removed,
            #[cfg(debug_assertions)]
            creation_trace_enabled: config.enable_creation_trace,
            #[cfg(debug_assertions)]
            creation_traces: HashMap::new(),
        }
    }

    // -- accessors ----------------------------------------------------------

    /// The world's schema.
    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The chunk index (read-only; queries iterate it directly).
    #[inline]
    pub fn chunk_index(&self) -> &ChunkIndex {
        &self.chunks
    }

    /// Borrow the chunk an entity currently lives in.
    pub fn chunk_of(&self, entity: Entity) -> Result<&Chunk, WorldError> {
        let slot = self.slot(entity)?;
        Ok(self.chunks.chunk(slot.chunk))
    }

    /// Number of live entities.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.live_count
    }

    /// Whether `entity` refers to a live entity.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slot(entity).is_ok()
    }

    /// The slot state of `entity` (`Free` for none/out-of-range ids).
    pub fn entity_state(&self, entity: Entity) -> SlotState {
        match self.slots.get(entity.to_raw() as usize) {
            Some(slot) if entity.is_some() => slot.state,
            _ => SlotState::Free,
        }
    }

    /// The chunk currently holding `entity`.
    pub fn entity_chunk(&self, entity: Entity) -> Result<ChunkId, WorldError> {
        Ok(self.slot(entity)?.chunk)
    }

    /// The row of `entity` within its chunk.
    pub fn entity_row(&self, entity: Entity) -> Result<usize, WorldError> {
        Ok(self.slot(entity)?.row as usize)
    }

    /// The definition (component/array/tag signature) of `entity`.
    pub fn entity_definition(&self, entity: Entity) -> Result<Definition, WorldError> {
        let slot = self.slot(entity)?;
        Ok(*self.chunks.chunk(slot.chunk).definition())
    }

    /// The parent of `entity` (`Entity::NONE` if unparented).
    pub fn parent(&self, entity: Entity) -> Result<Entity, WorldError> {
        Ok(self.slot(entity)?.parent)
    }

    /// The children of `entity`, unordered.
    pub fn children(&self, entity: Entity) -> Result<&[Entity], WorldError> {
        Ok(&self.slot(entity)?.children)
    }

    /// The stack trace captured when `entity` was created, if tracing was
    /// enabled. Debug builds only.
    #[cfg(debug_assertions)]
    pub fn creation_trace(&self, entity: Entity) -> Option<&std::backtrace::Backtrace> {
        self.creation_traces.get(&entity.to_raw())
    }

    /// The recyclable-id stack, bottom to top (snapshot capture).
    pub(crate) fn free_id_stack(&self) -> &[u32] {
        &self.free_ids
    }

    fn slot(&self, entity: Entity) -> Result<&Slot, WorldError> {
        match self.slots.get(entity.to_raw() as usize) {
            Some(slot) if entity.is_some() && slot.state.is_alive() => Ok(slot),
            _ => Err(WorldError::EntityNotFound(entity)),
        }
    }

    // -- schema growth ------------------------------------------------------

    /// Register a component type on a running world. Existing chunks widen
    /// their rows; existing columns keep their offsets.
    pub fn register_component<T: Pod + 'static>(&mut self) -> Result<ComponentType, WorldError> {
        if let Some(existing) = self.schema.lookup_component::<T>() {
            return Ok(existing);
        }
        let mut schema = (*self.schema).clone();
        let index = schema.register_component::<T>()?;
        self.install_schema(schema);
        Ok(index)
    }

    /// Register a sized component slot on a running world.
    pub fn register_component_dynamic(&mut self, size: usize) -> Result<ComponentType, WorldError> {
        let mut schema = (*self.schema).clone();
        let index = schema.register_component_dynamic(size)?;
        self.install_schema(schema);
        Ok(index)
    }

    /// Register an array-attachment type on a running world.
    pub fn register_array<T: Pod + 'static>(&mut self) -> Result<ArrayType, WorldError> {
        if let Some(existing) = self.schema.lookup_array::<T>() {
            return Ok(existing);
        }
        let mut schema = (*self.schema).clone();
        let index = schema.register_array::<T>()?;
        self.install_schema(schema);
        Ok(index)
    }

    /// Register a tag type on a running world.
    pub fn register_tag<T: 'static>(&mut self) -> Result<TagType, WorldError> {
        if let Some(existing) = self.schema.lookup_tag::<T>() {
            return Ok(existing);
        }
        let mut schema = (*self.schema).clone();
        let index = schema.register_tag::<T>()?;
        self.install_schema(schema);
        Ok(index)
    }

    fn install_schema(&mut self, schema: Schema) {
        let schema = Arc::new(schema);
        self.chunks.widen_all(schema.clone());
        self.schema = schema;
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create a new entity in the empty-definition chunk, enabled, with no
    /// parent. Recycles a freed id if one is available.
    pub fn create_entity(&mut self) -> Entity {
        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                self.slots.push(Slot::free());
                (self.slots.len() - 1) as u32
            }
        };
        let entity = Entity::from_raw(id);
        let row = self.chunks.chunk_mut(ChunkIndex::EMPTY).add_entity(entity);

        let slot = &mut self.slots[id as usize];
        slot.state = SlotState::Enabled;
        slot.chunk = ChunkIndex::EMPTY;
        slot.row = row as u32;
        slot.parent = Entity::NONE;
        slot.children.clear();
        slot.references.clear();
        slot.referenced_by.clear();
        slot.arrays.clear();

        self.live_count += 1;
        #[cfg(debug_assertions)]
        if self.creation_trace_enabled {
            self.creation_traces
                .insert(id, std::backtrace::Backtrace::force_capture());
        }
        entity
    }

    /// Predict, without allocating, the next `count` ids [`create_entity`]
    /// would hand out (recycled ids first, then fresh ones).
    pub fn peek_created_ids(&self, count: usize) -> Vec<Entity> {
        let mut out = Vec::with_capacity(count);
        let mut recycled = self.free_ids.iter().rev();
        let mut fresh = self.slots.len() as u32;
        for _ in 0..count {
            match recycled.next() {
                Some(&id) => out.push(Entity::from_raw(id)),
                None => {
                    out.push(Entity::from_raw(fresh));
                    fresh += 1;
                }
            }
        }
        out
    }

    /// Destroy `entity`: orphan its children, free its arrays, tombstone
    /// every reference slot pointing at it, swap-remove it from its chunk,
    /// and recycle the id. Emits a component-removed event for every
    /// component the entity held.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.slot(entity)?;
        let id = entity.to_raw() as usize;

        // Detach from the parent's child set.
        let parent = self.slots[id].parent;
        if parent.is_some() {
            remove_one(&mut self.slots[parent.to_raw() as usize].children, entity);
        }

        // Orphan children. A child whose only disabled ancestor was this
        // entity becomes observed-enabled again.
        let children = std::mem::take(&mut self.slots[id].children);
        for child in children {
            let child_slot = &mut self.slots[child.to_raw() as usize];
            child_slot.parent = Entity::NONE;
            if child_slot.state == SlotState::DisabledInherited {
                child_slot.state = SlotState::Enabled;
                self.propagate_enable(child);
            }
        }

        // Drop outgoing references, then tombstone incoming ones.
        let references = std::mem::take(&mut self.slots[id].references);
        for target in references {
            if target.is_some() {
                if let Some(target_slot) = self.slots.get_mut(target.to_raw() as usize) {
                    remove_one(&mut target_slot.referenced_by, entity);
                }
            }
        }
        let holders = std::mem::take(&mut self.slots[id].referenced_by);
        for holder in holders {
            let holder_slot = &mut self.slots[holder.to_raw() as usize];
            for reference in holder_slot.references.iter_mut() {
                if *reference == entity {
                    *reference = Entity::NONE;
                }
            }
        }

        // Free side arrays.
        self.slots[id].arrays.clear();

        // Swap-remove from the chunk and patch the displaced entity's slot.
        let chunk_id = self.slots[id].chunk;
        let row = self.slots[id].row as usize;
        let removed = self.chunks.chunk(chunk_id).definition().component_indices();
        let displaced = self.chunks.chunk_mut(chunk_id).remove_entity(row);
        if let Some(moved) = displaced {
            self.slots[moved.to_raw() as usize].row = row as u32;
        }

        let slot = &mut self.slots[id];
        slot.state = SlotState::Free;
        slot.parent = Entity::NONE;
        slot.row = 0;
        self.free_ids.push(id as u32);
        self.live_count -= 1;
        #[cfg(debug_assertions)]
        self.creation_traces.remove(&(id as u32));

        for index in removed {
            self.emit_removed(entity, index);
        }
        Ok(())
    }

    // -- enable / parenting -------------------------------------------------

    /// Set the self-enabled state of `entity` and propagate the observed
    /// state through its descendants.
    pub fn set_enabled(&mut self, entity: Entity, enabled: bool) -> Result<(), WorldError> {
        self.slot(entity)?;
        let id = entity.to_raw() as usize;
        let state = self.slots[id].state;
        if enabled {
            match state {
                // Already self-enabled (observed state is the ancestors' call).
                SlotState::Enabled | SlotState::DisabledInherited => {}
                SlotState::Disabled => {
                    if self.parent_observed_enabled(entity) {
                        self.slots[id].state = SlotState::Enabled;
                        self.propagate_enable(entity);
                    } else {
                        self.slots[id].state = SlotState::DisabledInherited;
                    }
                }
                SlotState::Free => unreachable!(),
            }
        } else {
            match state {
                SlotState::Disabled => {}
                SlotState::Enabled => {
                    self.slots[id].state = SlotState::Disabled;
                    self.propagate_disable(entity);
                }
                // Subtree is already observed-disabled through an ancestor.
                SlotState::DisabledInherited => {
                    self.slots[id].state = SlotState::Disabled;
                }
                SlotState::Free => unreachable!(),
            }
        }
        Ok(())
    }

    /// Re-parent `entity` under `parent` (`Entity::NONE` to orphan).
    /// Refuses cycles, leaving the world unchanged.
    pub fn set_parent(&mut self, entity: Entity, parent: Entity) -> Result<(), WorldError> {
        self.slot(entity)?;
        if parent.is_some() {
            self.slot(parent)?;
        }
        let id = entity.to_raw() as usize;
        let old_parent = self.slots[id].parent;
        if old_parent == parent {
            return Ok(());
        }

        if parent.is_some() {
            let mut cursor = parent;
            while cursor.is_some() {
                if cursor == entity {
                    return Err(WorldError::CycleDetected {
                        child: entity,
                        parent,
                    });
                }
                cursor = self.slots[cursor.to_raw() as usize].parent;
            }
        }

        if old_parent.is_some() {
            remove_one(&mut self.slots[old_parent.to_raw() as usize].children, entity);
        }
        self.slots[id].parent = parent;
        if parent.is_some() {
            self.slots[parent.to_raw() as usize].children.push(entity);
        }

        // Recompute the inherited state under the new ancestor chain.
        let parent_enabled = self.parent_observed_enabled(entity);
        match self.slots[id].state {
            SlotState::Enabled if !parent_enabled => {
                self.slots[id].state = SlotState::DisabledInherited;
                self.propagate_disable(entity);
            }
            SlotState::DisabledInherited if parent_enabled => {
                self.slots[id].state = SlotState::Enabled;
                self.propagate_enable(entity);
            }
            _ => {}
        }
        Ok(())
    }

    fn parent_observed_enabled(&self, entity: Entity) -> bool {
        let parent = self.slots[entity.to_raw() as usize].parent;
        parent.is_none() || self.slots[parent.to_raw() as usize].state == SlotState::Enabled
    }

    /// Mark every `Enabled` descendant of `entity` as `DisabledInherited`.
    /// Stops at explicitly disabled subtrees (already observed-disabled).
    fn propagate_disable(&mut self, entity: Entity) {
        let children: SmallVec<[Entity; 4]> =
            self.slots[entity.to_raw() as usize].children.clone();
        for child in children {
            let child_slot = &mut self.slots[child.to_raw() as usize];
            if child_slot.state == SlotState::Enabled {
                child_slot.state = SlotState::DisabledInherited;
                self.propagate_disable(child);
            }
        }
    }

    /// Lift `DisabledInherited` back to `Enabled` below a newly
    /// observed-enabled entity. Explicitly disabled children keep their
    /// subtree down.
    fn propagate_enable(&mut self, entity: Entity) {
        let children: SmallVec<[Entity; 4]> =
            self.slots[entity.to_raw() as usize].children.clone();
        for child in children {
            let child_slot = &mut self.slots[child.to_raw() as usize];
            if child_slot.state == SlotState::DisabledInherited {
                child_slot.state = SlotState::Enabled;
                self.propagate_enable(child);
            }
        }
    }

    // -- component mutation -------------------------------------------------

    /// Strict add: migrates `entity` into a chunk whose definition includes
    /// `index` and writes `bytes` (zero-fills if `None`). Fails with
    /// `TypeAlreadyPresent` if the component is already on the entity.
    pub fn add_component_raw(
        &mut self,
        entity: Entity,
        index: ComponentType,
        bytes: Option<&[u8]>,
    ) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_component(index)?;
        if let Some(bytes) = bytes {
            self.check_component_len(index, bytes)?;
        }
        let definition = self.entity_definition(entity)?;
        if definition.has_component(index) {
            return Err(WorldError::TypeAlreadyPresent {
                namespace: "component",
                index: index.0,
            });
        }
        self.migrate_to(entity, definition.with_component(index));
        if let Some(bytes) = bytes {
            self.write_component(entity, index, bytes);
        }
        self.emit_added(entity, index);
        Ok(())
    }

    /// Idempotent add: no-op if the component is already present, otherwise
    /// a zero-filled strict add.
    pub fn try_add_component_raw(
        &mut self,
        entity: Entity,
        index: ComponentType,
    ) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_component(index)?;
        if self.entity_definition(entity)?.has_component(index) {
            return Ok(());
        }
        self.add_component_raw(entity, index, None)
    }

    /// The migrate-or-overwrite fast path: if the component is present its
    /// bytes are overwritten in place (no migration, no added event);
    /// otherwise the entity migrates and the bytes are written.
    pub fn add_or_set_component_raw(
        &mut self,
        entity: Entity,
        index: ComponentType,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_component(index)?;
        self.check_component_len(index, bytes)?;
        if self.entity_definition(entity)?.has_component(index) {
            self.write_component(entity, index, bytes);
            Ok(())
        } else {
            self.add_component_raw(entity, index, Some(bytes))
        }
    }

    /// Overwrite the bytes of a component the entity already has.
    pub fn set_component_raw(
        &mut self,
        entity: Entity,
        index: ComponentType,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_component(index)?;
        self.check_component_len(index, bytes)?;
        if !self.entity_definition(entity)?.has_component(index) {
            return Err(WorldError::TypeMissing {
                namespace: "component",
                index: index.0,
            });
        }
        self.write_component(entity, index, bytes);
        Ok(())
    }

    /// Remove a component, migrating the entity out of its current chunk.
    pub fn remove_component_raw(
        &mut self,
        entity: Entity,
        index: ComponentType,
    ) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_component(index)?;
        let definition = self.entity_definition(entity)?;
        if !definition.has_component(index) {
            return Err(WorldError::TypeMissing {
                namespace: "component",
                index: index.0,
            });
        }
        self.migrate_to(entity, definition.without_component(index));
        self.emit_removed(entity, index);
        Ok(())
    }

    /// Borrow the bytes of a component on `entity`. The borrow must not be
    /// held across any mutating call.
    pub fn get_component_raw(
        &self,
        entity: Entity,
        index: ComponentType,
    ) -> Result<&[u8], WorldError> {
        let slot = self.slot(entity)?;
        self.schema.check_component(index)?;
        let chunk = self.chunks.chunk(slot.chunk);
        if !chunk.definition().has_component(index) {
            return Err(WorldError::TypeMissing {
                namespace: "component",
                index: index.0,
            });
        }
        Ok(chunk.component_bytes(slot.row as usize, index))
    }

    /// Whether `entity` currently has the component.
    pub fn has_component_raw(&self, entity: Entity, index: ComponentType) -> bool {
        self.entity_definition(entity)
            .map(|d| d.has_component(index))
            .unwrap_or(false)
    }

    // -- typed component sugar ----------------------------------------------

    /// Typed strict add. `T` must be registered in the schema.
    pub fn add_component<T: Pod + 'static>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), WorldError> {
        let index = self.component_index::<T>()?;
        self.add_component_raw(entity, index, Some(bytemuck::bytes_of(&value)))
    }

    /// Typed overwrite of an existing component.
    pub fn set_component<T: Pod + 'static>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), WorldError> {
        let index = self.component_index::<T>()?;
        self.set_component_raw(entity, index, bytemuck::bytes_of(&value))
    }

    /// Typed migrate-or-overwrite.
    pub fn add_or_set_component<T: Pod + 'static>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), WorldError> {
        let index = self.component_index::<T>()?;
        self.add_or_set_component_raw(entity, index, bytemuck::bytes_of(&value))
    }

    /// Typed removal.
    pub fn remove_component<T: Pod + 'static>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let index = self.component_index::<T>()?;
        self.remove_component_raw(entity, index)
    }

    /// Typed read (unaligned copy-out).
    pub fn get_component<T: Pod + 'static>(&self, entity: Entity) -> Result<T, WorldError> {
        let index = self.component_index::<T>()?;
        Ok(bytemuck::pod_read_unaligned(
            self.get_component_raw(entity, index)?,
        ))
    }

    /// Whether `entity` has the component registered for `T`.
    pub fn has_component<T: Pod + 'static>(&self, entity: Entity) -> bool {
        self.schema
            .lookup_component::<T>()
            .map(|index| self.has_component_raw(entity, index))
            .unwrap_or(false)
    }

    fn component_index<T: Pod + 'static>(&self) -> Result<ComponentType, WorldError> {
        self.schema
            .lookup_component::<T>()
            .ok_or_else(|| WorldError::unregistered("component", std::any::type_name::<T>()))
    }

    fn check_component_len(&self, index: ComponentType, bytes: &[u8]) -> Result<(), WorldError> {
        let size = self.schema.component_size(index);
        if bytes.len() != size {
            return Err(WorldError::OutOfRange {
                index: bytes.len(),
                len: size,
            });
        }
        Ok(())
    }

    fn write_component(&mut self, entity: Entity, index: ComponentType, bytes: &[u8]) {
        let (chunk, row) = {
            let slot = &self.slots[entity.to_raw() as usize];
            (slot.chunk, slot.row as usize)
        };
        self.chunks
            .chunk_mut(chunk)
            .set_component_bytes(row, index, bytes);
    }

    // -- tags ---------------------------------------------------------------

    /// Strict tag add; migrates over the tag mask.
    pub fn add_tag_raw(&mut self, entity: Entity, index: TagType) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_tag(index)?;
        let definition = self.entity_definition(entity)?;
        if definition.has_tag(index) {
            return Err(WorldError::TypeAlreadyPresent {
                namespace: "tag",
                index: index.0,
            });
        }
        self.migrate_to(entity, definition.with_tag(index));
        Ok(())
    }

    /// Remove a tag; migrates over the tag mask.
    pub fn remove_tag_raw(&mut self, entity: Entity, index: TagType) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_tag(index)?;
        let definition = self.entity_definition(entity)?;
        if !definition.has_tag(index) {
            return Err(WorldError::TypeMissing {
                namespace: "tag",
                index: index.0,
            });
        }
        self.migrate_to(entity, definition.without_tag(index));
        Ok(())
    }

    /// Whether `entity` carries the tag.
    pub fn has_tag_raw(&self, entity: Entity, index: TagType) -> bool {
        self.entity_definition(entity)
            .map(|d| d.has_tag(index))
            .unwrap_or(false)
    }

    /// Typed tag add.
    pub fn add_tag<T: 'static>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let index = self.tag_index::<T>()?;
        self.add_tag_raw(entity, index)
    }

    /// Typed tag removal.
    pub fn remove_tag<T: 'static>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let index = self.tag_index::<T>()?;
        self.remove_tag_raw(entity, index)
    }

    /// Whether `entity` carries the tag registered for `T`.
    pub fn has_tag<T: 'static>(&self, entity: Entity) -> bool {
        self.schema
            .lookup_tag::<T>()
            .map(|index| self.has_tag_raw(entity, index))
            .unwrap_or(false)
    }

    fn tag_index<T: 'static>(&self) -> Result<TagType, WorldError> {
        self.schema
            .lookup_tag::<T>()
            .ok_or_else(|| WorldError::unregistered("tag", std::any::type_name::<T>()))
    }

    // -- array attachments --------------------------------------------------

    /// Allocate a zero-filled array of `length` elements on `entity` and
    /// migrate it into a chunk whose definition carries the array bit.
    pub fn create_array_raw(
        &mut self,
        entity: Entity,
        index: ArrayType,
        length: usize,
    ) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_array(index)?;
        let definition = self.entity_definition(entity)?;
        if definition.has_array(index) {
            return Err(WorldError::TypeAlreadyPresent {
                namespace: "array",
                index: index.0,
            });
        }
        let element_size = self.schema.array_element_size(index);
        self.migrate_to(entity, definition.with_array(index));
        self.slots[entity.to_raw() as usize]
            .arrays
            .push((index, vec![0; length * element_size]));
        Ok(())
    }

    /// Allocate an array initialized from `bytes` (length is inferred).
    pub fn create_array_with_raw(
        &mut self,
        entity: Entity,
        index: ArrayType,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_array(index)?;
        let element_size = self.schema.array_element_size(index);
        self.check_array_multiple(element_size, bytes)?;
        let length = if element_size == 0 { 0 } else { bytes.len() / element_size };
        self.create_array_raw(entity, index, length)?;
        if element_size > 0 {
            self.array_buf_mut(entity, index)?.copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Number of elements in the attachment.
    pub fn array_len_raw(&self, entity: Entity, index: ArrayType) -> Result<usize, WorldError> {
        self.schema.check_array(index)?;
        let element_size = self.schema.array_element_size(index);
        let buffer = self.array_buf(entity, index)?;
        Ok(if element_size == 0 { 0 } else { buffer.len() / element_size })
    }

    /// The raw bytes of the attachment.
    pub fn get_array_raw(&self, entity: Entity, index: ArrayType) -> Result<&[u8], WorldError> {
        Ok(self.array_buf(entity, index)?.as_slice())
    }

    /// Resize the attachment, zero-filling any new tail.
    pub fn resize_array_raw(
        &mut self,
        entity: Entity,
        index: ArrayType,
        length: usize,
    ) -> Result<(), WorldError> {
        self.schema.check_array(index)?;
        let element_size = self.schema.array_element_size(index);
        let buffer = self.array_buf_mut(entity, index)?;
        buffer.resize(length * element_size, 0);
        Ok(())
    }

    /// Replace the whole attachment with `bytes` (resizing to fit).
    pub fn set_array_raw(
        &mut self,
        entity: Entity,
        index: ArrayType,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        self.schema.check_array(index)?;
        let element_size = self.schema.array_element_size(index);
        self.check_array_multiple(element_size, bytes)?;
        let buffer = self.array_buf_mut(entity, index)?;
        buffer.clear();
        buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Replace the attachment if present, otherwise create it.
    pub fn create_or_set_array_raw(
        &mut self,
        entity: Entity,
        index: ArrayType,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_array(index)?;
        if self.entity_definition(entity)?.has_array(index) {
            self.set_array_raw(entity, index, bytes)
        } else {
            self.create_array_with_raw(entity, index, bytes)
        }
    }

    /// Overwrite one element.
    pub fn set_array_element_raw(
        &mut self,
        entity: Entity,
        index: ArrayType,
        element_index: usize,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        self.schema.check_array(index)?;
        let element_size = self.schema.array_element_size(index);
        if bytes.len() != element_size {
            return Err(WorldError::OutOfRange {
                index: bytes.len(),
                len: element_size,
            });
        }
        let length = self.array_len_raw(entity, index)?;
        if element_index >= length {
            return Err(WorldError::OutOfRange {
                index: element_index,
                len: length,
            });
        }
        let buffer = self.array_buf_mut(entity, index)?;
        buffer[element_index * element_size..(element_index + 1) * element_size]
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Overwrite a run of elements starting at `element_index`.
    pub fn set_array_elements_raw(
        &mut self,
        entity: Entity,
        index: ArrayType,
        element_index: usize,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        self.schema.check_array(index)?;
        let element_size = self.schema.array_element_size(index);
        self.check_array_multiple(element_size, bytes)?;
        let count = if element_size == 0 { 0 } else { bytes.len() / element_size };
        let length = self.array_len_raw(entity, index)?;
        if element_index + count > length {
            return Err(WorldError::OutOfRange {
                index: element_index + count,
                len: length,
            });
        }
        let buffer = self.array_buf_mut(entity, index)?;
        buffer[element_index * element_size..(element_index + count) * element_size]
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Borrow one element's bytes.
    pub fn get_array_element_raw(
        &self,
        entity: Entity,
        index: ArrayType,
        element_index: usize,
    ) -> Result<&[u8], WorldError> {
        self.schema.check_array(index)?;
        let element_size = self.schema.array_element_size(index);
        let length = self.array_len_raw(entity, index)?;
        if element_index >= length {
            return Err(WorldError::OutOfRange {
                index: element_index,
                len: length,
            });
        }
        let buffer = self.array_buf(entity, index)?;
        Ok(&buffer[element_index * element_size..(element_index + 1) * element_size])
    }

    /// Free the attachment and migrate the entity out of the array bit.
    pub fn destroy_array_raw(&mut self, entity: Entity, index: ArrayType) -> Result<(), WorldError> {
        self.slot(entity)?;
        self.schema.check_array(index)?;
        let definition = self.entity_definition(entity)?;
        if !definition.has_array(index) {
            return Err(WorldError::TypeMissing {
                namespace: "array",
                index: index.0,
            });
        }
        let slot = &mut self.slots[entity.to_raw() as usize];
        slot.arrays.retain(|(i, _)| *i != index);
        self.migrate_to(entity, definition.without_array(index));
        Ok(())
    }

    /// Typed array creation.
    pub fn create_array<T: Pod + 'static>(
        &mut self,
        entity: Entity,
        length: usize,
    ) -> Result<(), WorldError> {
        let index = self.array_index::<T>()?;
        self.create_array_raw(entity, index, length)
    }

    /// Typed element read (unaligned copy-out).
    pub fn array_element<T: Pod + 'static>(
        &self,
        entity: Entity,
        element_index: usize,
    ) -> Result<T, WorldError> {
        let index = self.array_index::<T>()?;
        Ok(bytemuck::pod_read_unaligned(self.get_array_element_raw(
            entity,
            index,
            element_index,
        )?))
    }

    /// Typed element write.
    pub fn set_array_element<T: Pod + 'static>(
        &mut self,
        entity: Entity,
        element_index: usize,
        value: T,
    ) -> Result<(), WorldError> {
        let index = self.array_index::<T>()?;
        self.set_array_element_raw(entity, index, element_index, bytemuck::bytes_of(&value))
    }

    /// Copy the whole attachment out as typed values.
    pub fn array_values<T: Pod + 'static>(&self, entity: Entity) -> Result<Vec<T>, WorldError> {
        let index = self.array_index::<T>()?;
        let bytes = self.get_array_raw(entity, index)?;
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return Ok(Vec::new());
        }
        Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    fn array_index<T: Pod + 'static>(&self) -> Result<ArrayType, WorldError> {
        self.schema
            .lookup_array::<T>()
            .ok_or_else(|| WorldError::unregistered("array", std::any::type_name::<T>()))
    }

    fn array_buf(&self, entity: Entity, index: ArrayType) -> Result<&Vec<u8>, WorldError> {
        let slot = self.slot(entity)?;
        slot.arrays
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, buffer)| buffer)
            .ok_or(WorldError::TypeMissing {
                namespace: "array",
                index: index.0,
            })
    }

    fn array_buf_mut(&mut self, entity: Entity, index: ArrayType) -> Result<&mut Vec<u8>, WorldError> {
        self.slot(entity)?;
        self.slots[entity.to_raw() as usize]
            .arrays
            .iter_mut()
            .find(|(i, _)| *i == index)
            .map(|(_, buffer)| buffer)
            .ok_or(WorldError::TypeMissing {
                namespace: "array",
                index: index.0,
            })
    }

    fn check_array_multiple(&self, element_size: usize, bytes: &[u8]) -> Result<(), WorldError> {
        if element_size == 0 || bytes.len() % element_size == 0 {
            Ok(())
        } else {
            Err(WorldError::OutOfRange {
                index: bytes.len(),
                len: element_size,
            })
        }
    }

    // -- references ---------------------------------------------------------

    /// Append `to` to `from`'s reference list; returns the 1-based rint.
    pub fn add_reference(&mut self, from: Entity, to: Entity) -> Result<u32, WorldError> {
        self.slot(from)?;
        self.slot(to)?;
        self.slots[from.to_raw() as usize].references.push(to);
        self.slots[to.to_raw() as usize].referenced_by.push(from);
        Ok(self.slots[from.to_raw() as usize].references.len() as u32)
    }

    /// Number of reference slots on `from` (tombstones included).
    pub fn reference_count(&self, from: Entity) -> Result<usize, WorldError> {
        Ok(self.slot(from)?.references.len())
    }

    /// Dereference slot `rint`. Yields `Entity::NONE` for tombstones.
    pub fn get_reference(&self, from: Entity, rint: u32) -> Result<Entity, WorldError> {
        let slot = self.slot(from)?;
        let len = slot.references.len();
        if rint == 0 || rint as usize > len {
            return Err(WorldError::OutOfRange {
                index: rint as usize,
                len,
            });
        }
        Ok(slot.references[rint as usize - 1])
    }

    /// Remove the reference at `rint` by tombstoning: the slot is kept (so
    /// later rints stay stable) and reads yield `Entity::NONE`.
    pub fn remove_reference_at(&mut self, from: Entity, rint: u32) -> Result<(), WorldError> {
        let old = self.get_reference(from, rint)?;
        if old.is_some() {
            remove_one(&mut self.slots[old.to_raw() as usize].referenced_by, from);
        }
        self.slots[from.to_raw() as usize].references[rint as usize - 1] = Entity::NONE;
        Ok(())
    }

    /// Remove the first reference slot holding `target` by swap-remove: the
    /// last slot's value moves into the vacated rint, which is returned.
    pub fn remove_reference(&mut self, from: Entity, target: Entity) -> Result<u32, WorldError> {
        self.slot(from)?;
        let slot = &mut self.slots[from.to_raw() as usize];
        let position = slot
            .references
            .iter()
            .position(|e| *e == target)
            .ok_or(WorldError::EntityNotFound(target))?;
        slot.references.swap_remove(position);
        if target.is_some() {
            remove_one(&mut self.slots[target.to_raw() as usize].referenced_by, from);
        }
        Ok(position as u32 + 1)
    }

    // -- internals ----------------------------------------------------------

    fn migrate_to(&mut self, entity: Entity, new_definition: Definition) {
        let id = entity.to_raw() as usize;
        let src = self.slots[id].chunk;
        let row = self.slots[id].row as usize;
        let dst = self.chunks.get_or_create(new_definition);
        debug_assert_ne!(src, dst, "migration target equals source definition");
        let (new_row, displaced) = self.chunks.migrate(src, row, dst);
        if let Some(moved) = displaced {
            self.slots[moved.to_raw() as usize].row = row as u32;
        }
        let slot = &mut self.slots[id];
        slot.chunk = dst;
        slot.row = new_row as u32;
        trace!(entity = entity.to_raw(), chunk = dst.0, row = new_row, "migrated entity");
    }

    fn emit_added(&mut self, entity: Entity, index: ComponentType) {
        if let Some(hook) = self.on_component_added.as_mut() {
            hook(entity, index);
        }
    }

    fn emit_removed(&mut self, entity: Entity, index: ComponentType) {
        if let Some(hook) = self.on_component_removed.as_mut() {
            hook(entity, index);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
