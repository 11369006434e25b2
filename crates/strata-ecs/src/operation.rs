//! The operation buffer: a recorded, replayable stream of structural edits.
//!
//! Recording appends instructions to a packed byte stream: a 1-byte opcode
//! followed by a fixed or variable little-endian payload. Replay
//! ([`OperationBuffer::perform`]) walks the stream front-to-back against a
//! world, maintaining two working vectors:
//!
//! - the **selection** -- the entities every "selected" opcode applies to, in
//!   append order;
//! - the **history** -- every entity created during this replay, addressed by
//!   "previously created" opcodes via a reverse offset `k` (0 = most recent).
//!
//! No instruction reads from the world except through ids already in the
//! selection or history, so a stream is portable to any world whose schema
//! assigns the same indices (a contract, not a runtime check -- see the
//! schema docs).
//!
//! Replay is deterministic: id allocation follows the world's LIFO free
//! stack, which [`World::peek_created_ids`] mirrors for
//! [`created_entities`](OperationBuffer::created_entities). Replay is also
//! fire-and-forget: the first failing instruction aborts and surfaces its
//! error, and effects already applied stay applied.

use tracing::warn;

use crate::entity::Entity;
use crate::schema::{ArrayType, ComponentType, Schema, TagType};
use crate::world::World;
use crate::WorldError;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

/// Instruction opcodes. Byte 0 is deliberately unassigned so a zeroed buffer
/// reads as corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum OpCode {
    CreateSingle = 1,
    CreateSingleAndSelect,
    CreateMany,
    CreateManyAndSelect,
    SetSelectedEntity,
    AppendEntityToSelection,
    AppendMultiple,
    SelectPreviouslyCreated,
    AppendPreviouslyCreated,
    ClearSelection,
    SetParent,
    SetParentToPreviouslyCreated,
    EnableSelected,
    DisableSelected,
    AddComponentType,
    TryAddComponentType,
    AddComponent,
    SetComponent,
    AddOrSetComponent,
    RemoveComponentType,
    CreateArray,
    CreateAndInitializeArray,
    ResizeArray,
    SetArrayElement,
    SetArrayElements,
    SetArray,
    CreateOrSetArray,
    AddTag,
    RemoveTag,
    AddReferenceToPreviouslyCreated,
    RemoveReference,
    DestroySelected,
}

impl OpCode {
    fn from_byte(byte: u8) -> Option<OpCode> {
        use OpCode::*;
        // Discriminants are contiguous from 1; indexing a table avoids any
        // unsafe transmute.
        const TABLE: [OpCode; 32] = [
            CreateSingle,
            CreateSingleAndSelect,
            CreateMany,
            CreateManyAndSelect,
            SetSelectedEntity,
            AppendEntityToSelection,
            AppendMultiple,
            SelectPreviouslyCreated,
            AppendPreviouslyCreated,
            ClearSelection,
            SetParent,
            SetParentToPreviouslyCreated,
            EnableSelected,
            DisableSelected,
            AddComponentType,
            TryAddComponentType,
            AddComponent,
            SetComponent,
            AddOrSetComponent,
            RemoveComponentType,
            CreateArray,
            CreateAndInitializeArray,
            ResizeArray,
            SetArrayElement,
            SetArrayElements,
            SetArray,
            CreateOrSetArray,
            AddTag,
            RemoveTag,
            AddReferenceToPreviouslyCreated,
            RemoveReference,
            DestroySelected,
        ];
        TABLE.get(byte.checked_sub(1)? as usize).copied()
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Bounds-checked reader over the instruction stream. Every truncated read
/// surfaces as `CorruptedStream` at the instruction's byte offset.
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn done(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn corrupt(&self) -> WorldError {
        WorldError::CorruptedStream {
            offset: self.offset,
        }
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], WorldError> {
        let end = self.offset.checked_add(count).ok_or_else(|| self.corrupt())?;
        if end > self.bytes.len() {
            return Err(self.corrupt());
        }
        let out = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, WorldError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, WorldError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, WorldError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_blob(&mut self, stride: u32, count: u32) -> Result<&'a [u8], WorldError> {
        let len = (stride as usize)
            .checked_mul(count as usize)
            .ok_or_else(|| self.corrupt())?;
        self.read_bytes(len)
    }
}

fn previously_created(history: &[Entity], k: u32) -> Result<Entity, WorldError> {
    history
        .len()
        .checked_sub(1 + k as usize)
        .map(|i| history[i])
        .ok_or(WorldError::OutOfRange {
            index: k as usize,
            len: history.len(),
        })
}

fn require_selection(selection: &[Entity]) -> Result<(), WorldError> {
    if selection.is_empty() {
        Err(WorldError::NoSelection)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OperationBuffer
// ---------------------------------------------------------------------------

/// A recorded edit stream plus its replay working state.
#[derive(Debug, Default)]
pub struct OperationBuffer {
    stream: Vec<u8>,
    selection: Vec<Entity>,
    history: Vec<Entity>,
}

impl OperationBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte length of the recorded stream.
    pub fn len(&self) -> usize {
        self.stream.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// Clear the stream, selection, and history without releasing their
    /// allocations.
    pub fn reset(&mut self) {
        self.stream.clear();
        self.selection.clear();
        self.history.clear();
    }

    // -- low-level writers --------------------------------------------------

    fn grow_for(&mut self, additional: usize) {
        let needed = self.stream.len() + additional;
        if needed > self.stream.capacity() {
            let target = needed.next_power_of_two();
            self.stream.reserve_exact(target - self.stream.len());
        }
    }

    fn put_op(&mut self, op: OpCode) {
        self.grow_for(1);
        self.stream.push(op as u8);
    }

    fn put_u16(&mut self, value: u16) {
        self.grow_for(2);
        self.stream.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.grow_for(4);
        self.stream.extend_from_slice(&value.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.grow_for(bytes.len());
        self.stream.extend_from_slice(bytes);
    }

    // -- recording: creation and selection ----------------------------------

    /// Record: create one entity (history only).
    pub fn create_entity(&mut self) {
        self.put_op(OpCode::CreateSingle);
    }

    /// Record: create one entity and make it the selection.
    pub fn create_and_select(&mut self) {
        self.put_op(OpCode::CreateSingleAndSelect);
    }

    /// Record: create `count` entities (history only).
    pub fn create_many(&mut self, count: u32) {
        self.put_op(OpCode::CreateMany);
        self.put_u32(count);
    }

    /// Record: create `count` entities and make them the selection.
    pub fn create_many_and_select(&mut self, count: u32) {
        self.put_op(OpCode::CreateManyAndSelect);
        self.put_u32(count);
    }

    /// Record: replace the selection with `entity`.
    pub fn select(&mut self, entity: Entity) {
        self.put_op(OpCode::SetSelectedEntity);
        self.put_u32(entity.to_raw());
    }

    /// Record: append `entity` to the selection.
    pub fn append_to_selection(&mut self, entity: Entity) {
        self.put_op(OpCode::AppendEntityToSelection);
        self.put_u32(entity.to_raw());
    }

    /// Record: append several entities to the selection.
    pub fn append_multiple(&mut self, entities: &[Entity]) {
        self.put_op(OpCode::AppendMultiple);
        self.put_u32(entities.len() as u32);
        for entity in entities {
            self.put_u32(entity.to_raw());
        }
    }

    /// Record: replace the selection with the entity created `k` creations
    /// ago (0 = most recent).
    pub fn select_previously_created(&mut self, k: u32) {
        self.put_op(OpCode::SelectPreviouslyCreated);
        self.put_u32(k);
    }

    /// Record: append the entity created `k` creations ago to the selection.
    pub fn append_previously_created(&mut self, k: u32) {
        self.put_op(OpCode::AppendPreviouslyCreated);
        self.put_u32(k);
    }

    /// Record: empty the selection.
    pub fn clear_selection(&mut self) {
        self.put_op(OpCode::ClearSelection);
    }

    // -- recording: hierarchy and enable state ------------------------------

    /// Record: set the parent of every selected entity.
    pub fn set_parent(&mut self, parent: Entity) {
        self.put_op(OpCode::SetParent);
        self.put_u32(parent.to_raw());
    }

    /// Record: parent every selected entity under the entity created `k`
    /// creations ago.
    pub fn set_parent_to_previously_created(&mut self, k: u32) {
        self.put_op(OpCode::SetParentToPreviouslyCreated);
        self.put_u32(k);
    }

    /// Record: enable every selected entity.
    pub fn enable_selected(&mut self) {
        self.put_op(OpCode::EnableSelected);
    }

    /// Record: disable every selected entity.
    pub fn disable_selected(&mut self) {
        self.put_op(OpCode::DisableSelected);
    }

    // -- recording: components ----------------------------------------------

    /// Record: strict zero-filled component add on the selection.
    pub fn add_component_type(&mut self, index: ComponentType) {
        self.put_op(OpCode::AddComponentType);
        self.put_u16(index.0);
    }

    /// Record: idempotent component add on the selection.
    pub fn try_add_component_type(&mut self, index: ComponentType) {
        self.put_op(OpCode::TryAddComponentType);
        self.put_u16(index.0);
    }

    /// Record: strict component add with an initial value.
    pub fn add_component_raw(&mut self, index: ComponentType, bytes: &[u8]) {
        self.put_op(OpCode::AddComponent);
        self.put_u16(index.0);
        self.put_u32(bytes.len() as u32);
        self.put_bytes(bytes);
    }

    /// Record: overwrite a present component.
    pub fn set_component_raw(&mut self, index: ComponentType, bytes: &[u8]) {
        self.put_op(OpCode::SetComponent);
        self.put_u16(index.0);
        self.put_u32(bytes.len() as u32);
        self.put_bytes(bytes);
    }

    /// Record: the migrate-or-overwrite fast path.
    pub fn add_or_set_component_raw(&mut self, index: ComponentType, bytes: &[u8]) {
        self.put_op(OpCode::AddOrSetComponent);
        self.put_u16(index.0);
        self.put_u32(bytes.len() as u32);
        self.put_bytes(bytes);
    }

    /// Record: remove a component from the selection.
    pub fn remove_component_type(&mut self, index: ComponentType) {
        self.put_op(OpCode::RemoveComponentType);
        self.put_u16(index.0);
    }

    /// Typed strict add; resolves the index through `schema`.
    pub fn add_component<T: bytemuck::Pod + 'static>(
        &mut self,
        schema: &Schema,
        value: T,
    ) -> Result<(), WorldError> {
        let index = lookup_component::<T>(schema)?;
        self.add_component_raw(index, bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Typed overwrite.
    pub fn set_component<T: bytemuck::Pod + 'static>(
        &mut self,
        schema: &Schema,
        value: T,
    ) -> Result<(), WorldError> {
        let index = lookup_component::<T>(schema)?;
        self.set_component_raw(index, bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Typed migrate-or-overwrite.
    pub fn add_or_set_component<T: bytemuck::Pod + 'static>(
        &mut self,
        schema: &Schema,
        value: T,
    ) -> Result<(), WorldError> {
        let index = lookup_component::<T>(schema)?;
        self.add_or_set_component_raw(index, bytemuck::bytes_of(&value));
        Ok(())
    }

    // -- recording: arrays ----------------------------------------------------

    /// Record: allocate a zero-filled array attachment.
    pub fn create_array(&mut self, index: ArrayType, length: u32) {
        self.put_op(OpCode::CreateArray);
        self.put_u16(index.0);
        self.put_u32(length);
    }

    /// Record: allocate an array attachment initialized from `bytes`
    /// (`bytes.len()` must be a multiple of `stride`).
    pub fn create_and_initialize_array_raw(&mut self, index: ArrayType, stride: u32, bytes: &[u8]) {
        assert!(stride > 0 && bytes.len() % stride as usize == 0, "blob must be whole elements");
        self.put_op(OpCode::CreateAndInitializeArray);
        self.put_u16(index.0);
        self.put_u32(stride);
        self.put_u32((bytes.len() / stride as usize) as u32);
        self.put_bytes(bytes);
    }

    /// Record: resize an array attachment.
    pub fn resize_array(&mut self, index: ArrayType, length: u32) {
        self.put_op(OpCode::ResizeArray);
        self.put_u16(index.0);
        self.put_u32(length);
    }

    /// Record: overwrite one array element.
    pub fn set_array_element_raw(&mut self, index: ArrayType, element_index: u32, bytes: &[u8]) {
        self.put_op(OpCode::SetArrayElement);
        self.put_u16(index.0);
        self.put_u32(bytes.len() as u32);
        self.put_u32(element_index);
        self.put_bytes(bytes);
    }

    /// Record: overwrite a run of array elements starting at `element_index`.
    pub fn set_array_elements_raw(
        &mut self,
        index: ArrayType,
        stride: u32,
        element_index: u32,
        bytes: &[u8],
    ) {
        assert!(stride > 0 && bytes.len() % stride as usize == 0, "blob must be whole elements");
        self.put_op(OpCode::SetArrayElements);
        self.put_u16(index.0);
        self.put_u32(stride);
        self.put_u32(element_index);
        self.put_u32((bytes.len() / stride as usize) as u32);
        self.put_bytes(bytes);
    }

    /// Record: replace the whole array attachment.
    pub fn set_array_raw(&mut self, index: ArrayType, stride: u32, bytes: &[u8]) {
        assert!(stride > 0 && bytes.len() % stride as usize == 0, "blob must be whole elements");
        self.put_op(OpCode::SetArray);
        self.put_u16(index.0);
        self.put_u32(stride);
        self.put_u32((bytes.len() / stride as usize) as u32);
        self.put_bytes(bytes);
    }

    /// Record: replace the attachment, creating it if missing.
    pub fn create_or_set_array_raw(&mut self, index: ArrayType, stride: u32, bytes: &[u8]) {
        assert!(stride > 0 && bytes.len() % stride as usize == 0, "blob must be whole elements");
        self.put_op(OpCode::CreateOrSetArray);
        self.put_u16(index.0);
        self.put_u32(stride);
        self.put_u32((bytes.len() / stride as usize) as u32);
        self.put_bytes(bytes);
    }

    // -- recording: tags, references, destruction ---------------------------

    /// Record: add a tag to the selection.
    pub fn add_tag(&mut self, index: TagType) {
        self.put_op(OpCode::AddTag);
        self.put_u16(index.0);
    }

    /// Record: remove a tag from the selection.
    pub fn remove_tag(&mut self, index: TagType) {
        self.put_op(OpCode::RemoveTag);
        self.put_u16(index.0);
    }

    /// Record: every selected entity gains a reference to the entity created
    /// `k` creations ago.
    pub fn add_reference_to_previously_created(&mut self, k: u32) {
        self.put_op(OpCode::AddReferenceToPreviouslyCreated);
        self.put_u32(k);
    }

    /// Record: tombstone reference slot `rint` on every selected entity.
    pub fn remove_reference(&mut self, rint: u32) {
        self.put_op(OpCode::RemoveReference);
        self.put_u32(rint);
    }

    /// Record: destroy every selected entity, then clear the selection.
    pub fn destroy_selected(&mut self) {
        self.put_op(OpCode::DestroySelected);
    }

    // -- prediction ---------------------------------------------------------

    /// Predict which ids replay would allocate, without executing: counts the
    /// stream's create instructions and asks the world for that many upcoming
    /// ids. Callers use this to wire created entities into other systems
    /// before the replay runs.
    pub fn created_entities(&self, world: &World) -> Result<Vec<Entity>, WorldError> {
        Ok(world.peek_created_ids(self.created_count()?))
    }

    fn created_count(&self) -> Result<usize, WorldError> {
        let mut cursor = Cursor::new(&self.stream);
        let mut count = 0usize;
        while !cursor.done() {
            let at = cursor.offset;
            let op = OpCode::from_byte(cursor.read_u8()?)
                .ok_or(WorldError::CorruptedStream { offset: at })?;
            match op {
                OpCode::CreateSingle | OpCode::CreateSingleAndSelect => count += 1,
                OpCode::CreateMany | OpCode::CreateManyAndSelect => {
                    count += cursor.read_u32()? as usize;
                }
                OpCode::SetSelectedEntity
                | OpCode::AppendEntityToSelection
                | OpCode::SelectPreviouslyCreated
                | OpCode::AppendPreviouslyCreated
                | OpCode::SetParent
                | OpCode::SetParentToPreviouslyCreated
                | OpCode::AddReferenceToPreviouslyCreated
                | OpCode::RemoveReference => {
                    cursor.read_u32()?;
                }
                OpCode::AppendMultiple => {
                    let n = cursor.read_u32()?;
                    cursor.read_blob(4, n)?;
                }
                OpCode::ClearSelection
                | OpCode::EnableSelected
                | OpCode::DisableSelected
                | OpCode::DestroySelected => {}
                OpCode::AddComponentType
                | OpCode::TryAddComponentType
                | OpCode::RemoveComponentType
                | OpCode::AddTag
                | OpCode::RemoveTag => {
                    cursor.read_u16()?;
                }
                OpCode::AddComponent | OpCode::SetComponent | OpCode::AddOrSetComponent => {
                    cursor.read_u16()?;
                    let size = cursor.read_u32()?;
                    cursor.read_blob(1, size)?;
                }
                OpCode::CreateArray | OpCode::ResizeArray => {
                    cursor.read_u16()?;
                    cursor.read_u32()?;
                }
                OpCode::CreateAndInitializeArray
                | OpCode::SetArray
                | OpCode::CreateOrSetArray => {
                    cursor.read_u16()?;
                    let stride = cursor.read_u32()?;
                    let length = cursor.read_u32()?;
                    cursor.read_blob(stride, length)?;
                }
                OpCode::SetArrayElement => {
                    cursor.read_u16()?;
                    let stride = cursor.read_u32()?;
                    cursor.read_u32()?;
                    cursor.read_blob(stride, 1)?;
                }
                OpCode::SetArrayElements => {
                    cursor.read_u16()?;
                    let stride = cursor.read_u32()?;
                    cursor.read_u32()?;
                    let run = cursor.read_u32()?;
                    cursor.read_blob(stride, run)?;
                }
            }
        }
        Ok(count)
    }

    // -- replay -------------------------------------------------------------

    /// Replay the stream against `world`. Aborts at the first failing
    /// instruction; effects applied before the abort are kept.
    pub fn perform(&mut self, world: &mut World) -> Result<(), WorldError> {
        let result = self.perform_inner(world);
        if let Err(error) = &result {
            warn!(%error, "operation replay aborted");
        }
        result
    }

    fn perform_inner(&mut self, world: &mut World) -> Result<(), WorldError> {
        self.selection.clear();
        self.history.clear();
        let selection = &mut self.selection;
        let history = &mut self.history;
        let mut cursor = Cursor::new(&self.stream);

        while !cursor.done() {
            let at = cursor.offset;
            let op = OpCode::from_byte(cursor.read_u8()?)
                .ok_or(WorldError::CorruptedStream { offset: at })?;
            match op {
                // -- creation -------------------------------------------------
                OpCode::CreateSingle => {
                    history.push(world.create_entity());
                }
                OpCode::CreateSingleAndSelect => {
                    let entity = world.create_entity();
                    history.push(entity);
                    selection.clear();
                    selection.push(entity);
                }
                OpCode::CreateMany | OpCode::CreateManyAndSelect => {
                    let count = cursor.read_u32()?;
                    if op == OpCode::CreateManyAndSelect {
                        selection.clear();
                    }
                    for _ in 0..count {
                        let entity = world.create_entity();
                        history.push(entity);
                        if op == OpCode::CreateManyAndSelect {
                            selection.push(entity);
                        }
                    }
                }

                // -- selection ------------------------------------------------
                OpCode::SetSelectedEntity => {
                    let entity = Entity::from_raw(cursor.read_u32()?);
                    selection.clear();
                    selection.push(entity);
                }
                OpCode::AppendEntityToSelection => {
                    selection.push(Entity::from_raw(cursor.read_u32()?));
                }
                OpCode::AppendMultiple => {
                    let count = cursor.read_u32()?;
                    for _ in 0..count {
                        selection.push(Entity::from_raw(cursor.read_u32()?));
                    }
                }
                OpCode::SelectPreviouslyCreated => {
                    let k = cursor.read_u32()?;
                    let entity = previously_created(history, k)?;
                    selection.clear();
                    selection.push(entity);
                }
                OpCode::AppendPreviouslyCreated => {
                    let k = cursor.read_u32()?;
                    selection.push(previously_created(history, k)?);
                }
                OpCode::ClearSelection => selection.clear(),

                // -- hierarchy / enable ---------------------------------------
                OpCode::SetParent => {
                    let parent = Entity::from_raw(cursor.read_u32()?);
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.set_parent(entity, parent)?;
                    }
                }
                OpCode::SetParentToPreviouslyCreated => {
                    let k = cursor.read_u32()?;
                    let parent = previously_created(history, k)?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.set_parent(entity, parent)?;
                    }
                }
                OpCode::EnableSelected | OpCode::DisableSelected => {
                    require_selection(selection)?;
                    let enabled = op == OpCode::EnableSelected;
                    for &entity in selection.iter() {
                        world.set_enabled(entity, enabled)?;
                    }
                }

                // -- components -----------------------------------------------
                OpCode::AddComponentType | OpCode::TryAddComponentType => {
                    let index = ComponentType(cursor.read_u16()?);
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        if op == OpCode::AddComponentType {
                            world.add_component_raw(entity, index, None)?;
                        } else {
                            world.try_add_component_raw(entity, index)?;
                        }
                    }
                }
                OpCode::AddComponent | OpCode::SetComponent | OpCode::AddOrSetComponent => {
                    let index = ComponentType(cursor.read_u16()?);
                    let size = cursor.read_u32()?;
                    let bytes = cursor.read_blob(1, size)?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        match op {
                            OpCode::AddComponent => {
                                world.add_component_raw(entity, index, Some(bytes))?
                            }
                            OpCode::SetComponent => world.set_component_raw(entity, index, bytes)?,
                            _ => world.add_or_set_component_raw(entity, index, bytes)?,
                        }
                    }
                }
                OpCode::RemoveComponentType => {
                    let index = ComponentType(cursor.read_u16()?);
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.remove_component_raw(entity, index)?;
                    }
                }

                // -- arrays ---------------------------------------------------
                OpCode::CreateArray => {
                    let index = ArrayType(cursor.read_u16()?);
                    let length = cursor.read_u32()?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.create_array_raw(entity, index, length as usize)?;
                    }
                }
                OpCode::CreateAndInitializeArray => {
                    let index = ArrayType(cursor.read_u16()?);
                    let stride = cursor.read_u32()?;
                    let length = cursor.read_u32()?;
                    let bytes = cursor.read_blob(stride, length)?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.create_array_with_raw(entity, index, bytes)?;
                    }
                }
                OpCode::ResizeArray => {
                    let index = ArrayType(cursor.read_u16()?);
                    let length = cursor.read_u32()?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.resize_array_raw(entity, index, length as usize)?;
                    }
                }
                OpCode::SetArrayElement => {
                    let index = ArrayType(cursor.read_u16()?);
                    let stride = cursor.read_u32()?;
                    let element_index = cursor.read_u32()?;
                    let bytes = cursor.read_blob(stride, 1)?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.set_array_element_raw(entity, index, element_index as usize, bytes)?;
                    }
                }
                OpCode::SetArrayElements => {
                    let index = ArrayType(cursor.read_u16()?);
                    let stride = cursor.read_u32()?;
                    let element_index = cursor.read_u32()?;
                    let run = cursor.read_u32()?;
                    let bytes = cursor.read_blob(stride, run)?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.set_array_elements_raw(entity, index, element_index as usize, bytes)?;
                    }
                }
                OpCode::SetArray | OpCode::CreateOrSetArray => {
                    let index = ArrayType(cursor.read_u16()?);
                    let stride = cursor.read_u32()?;
                    let length = cursor.read_u32()?;
                    let bytes = cursor.read_blob(stride, length)?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        if op == OpCode::SetArray {
                            world.set_array_raw(entity, index, bytes)?;
                        } else {
                            world.create_or_set_array_raw(entity, index, bytes)?;
                        }
                    }
                }

                // -- tags -----------------------------------------------------
                OpCode::AddTag | OpCode::RemoveTag => {
                    let index = TagType(cursor.read_u16()?);
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        if op == OpCode::AddTag {
                            world.add_tag_raw(entity, index)?;
                        } else {
                            world.remove_tag_raw(entity, index)?;
                        }
                    }
                }

                // -- references -----------------------------------------------
                OpCode::AddReferenceToPreviouslyCreated => {
                    let k = cursor.read_u32()?;
                    let target = previously_created(history, k)?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.add_reference(entity, target)?;
                    }
                }
                OpCode::RemoveReference => {
                    let rint = cursor.read_u32()?;
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.remove_reference_at(entity, rint)?;
                    }
                }

                // -- destruction ----------------------------------------------
                OpCode::DestroySelected => {
                    require_selection(selection)?;
                    for &entity in selection.iter() {
                        world.destroy_entity(entity)?;
                    }
                    // Dead ids would poison every later selected opcode.
                    selection.clear();
                }
            }
        }
        Ok(())
    }
}

fn lookup_component<T: bytemuck::Pod + 'static>(
    schema: &Schema,
) -> Result<ComponentType, WorldError> {
    schema
        .lookup_component::<T>()
        .ok_or_else(|| WorldError::unregistered("component", std::any::type_name::<T>()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
