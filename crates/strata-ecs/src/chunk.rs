//! Chunk storage: one columnar table per archetype.
//!
//! A [`Chunk`] stores every entity sharing one [`Definition`]. Storage is
//! row-major: one contiguous byte buffer holding fixed-stride rows of size
//! [`Schema::row_size`], addressed through schema-global component offsets.
//! A row therefore reserves space for every registered component, whether or
//! not this chunk's definition includes it; unused columns are tolerated in
//! exchange for a single allocation per chunk and offset arithmetic that is
//! identical across chunks (which makes cross-chunk migration a straight
//! byte copy).
//!
//! Row 0 of every chunk is a reserved sentinel; live rows start at 1.
//! Removal is swap-remove: the last row is moved into the vacated slot and
//! the displaced entity is reported so the caller can patch its slot. Any
//! mutation bumps the chunk `version`, which doubles as the invalidation
//! signal for cached row pointers and query change detection.
//!
//! Component rows hold `bytemuck::Pod` data only, and offsets are packed
//! without padding, so all typed access goes through unaligned reads and
//! writes. Nothing in this module needs `unsafe`.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::debug;

use crate::definition::Definition;
use crate::entity::Entity;
use crate::schema::{ComponentType, Schema};

// ---------------------------------------------------------------------------
// ChunkId
// ---------------------------------------------------------------------------

/// Identifies a chunk within a world. Indices into the world's [`ChunkIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub(crate) u32);

impl ChunkId {
    /// The index as a usize.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Columnar storage for all entities sharing one definition.
#[derive(Debug)]
pub struct Chunk {
    definition: Definition,
    schema: Arc<Schema>,
    /// Parallel entity column. `entities[0]` is the reserved sentinel.
    entities: Vec<Entity>,
    /// Row-major component bytes, `entities.len() * row_size` long (the
    /// sentinel row is kept zeroed so row arithmetic stays uniform).
    rows: Vec<u8>,
    /// Bumped on every structural change to this chunk.
    version: u64,
}

impl Chunk {
    pub(crate) fn new(definition: Definition, schema: Arc<Schema>) -> Self {
        let row_size = schema.row_size();
        Self {
            definition,
            schema,
            entities: vec![Entity::NONE],
            rows: vec![0; row_size],
            version: 0,
        }
    }

    /// The definition every entity in this chunk shares.
    #[inline]
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// The schema this chunk's row layout follows.
    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of live entities (the sentinel row is not counted).
    #[inline]
    pub fn count(&self) -> usize {
        self.entities.len() - 1
    }

    /// Whether the chunk holds no live entities.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Monotonic mutation counter.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The live entity ids, in row order (row `r` is `entities()[r - 1]`).
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities[1..]
    }

    /// The entity stored at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is 0 or past the last live row.
    #[inline]
    pub fn entity_at(&self, row: usize) -> Entity {
        assert!(row >= 1, "row 0 is reserved");
        self.entities[row]
    }

    /// Linear search for the row holding `entity`.
    pub fn row_of(&self, entity: Entity) -> Option<usize> {
        self.entities[1..].iter().position(|e| *e == entity).map(|i| i + 1)
    }

    // -- structural ---------------------------------------------------------

    /// Append `entity` with a zero-initialized row. Returns the new row (≥ 1).
    pub fn add_entity(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        self.rows.resize(self.rows.len() + self.schema.row_size(), 0);
        self.version += 1;
        row
    }

    /// Swap-remove the entity at `row`. If another entity was moved into the
    /// vacated row, it is returned so the caller can patch its slot.
    pub fn remove_entity(&mut self, row: usize) -> Option<Entity> {
        let last = self.count();
        assert!(row >= 1 && row <= last, "row {row} out of range (count {last})");
        let row_size = self.schema.row_size();

        let displaced = if row != last {
            self.entities[row] = self.entities[last];
            if row_size > 0 {
                let (head, tail) = self.rows.split_at_mut(last * row_size);
                head[row * row_size..(row + 1) * row_size]
                    .copy_from_slice(&tail[..row_size]);
            }
            Some(self.entities[row])
        } else {
            None
        };

        self.entities.truncate(last);
        self.rows.truncate(last * row_size);
        self.version += 1;
        displaced
    }

    /// Migrate the entity at `row` into `dst`.
    ///
    /// A new row is appended in `dst`; bytes for every component present in
    /// both definitions are copied over, all other destination components
    /// stay zero-initialized. The source row is then swap-removed.
    ///
    /// Returns `(new_row_in_dst, displaced_source_entity)`.
    pub fn move_to(&mut self, row: usize, dst: &mut Chunk) -> (usize, Option<Entity>) {
        debug_assert!(Arc::ptr_eq(&self.schema, &dst.schema), "chunks must share a schema");
        let entity = self.entity_at(row);
        let new_row = dst.add_entity(entity);

        let shared = self
            .definition
            .components()
            .intersection(dst.definition.components());
        let row_size = self.schema.row_size();
        for index in shared.iter() {
            let index = ComponentType(index as u16);
            let offset = self.schema.component_offset(index);
            let size = self.schema.component_size(index);
            let src = row * row_size + offset;
            let dst_at = new_row * row_size + offset;
            dst.rows[dst_at..dst_at + size].copy_from_slice(&self.rows[src..src + size]);
        }

        let displaced = self.remove_entity(row);
        (new_row, displaced)
    }

    // -- component access ---------------------------------------------------

    /// The full byte row at `row` (all schema columns, used or not).
    pub fn row_bytes(&self, row: usize) -> &[u8] {
        assert!(row >= 1 && row <= self.count());
        let row_size = self.schema.row_size();
        &self.rows[row * row_size..(row + 1) * row_size]
    }

    /// The bytes of one component at `row`.
    #[inline]
    pub fn component_bytes(&self, row: usize, index: ComponentType) -> &[u8] {
        debug_assert!(row >= 1 && row <= self.count());
        let at = row * self.schema.row_size() + self.schema.component_offset(index);
        &self.rows[at..at + self.schema.component_size(index)]
    }

    /// Overwrite the bytes of one component at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is not exactly the component's registered size.
    pub fn set_component_bytes(&mut self, row: usize, index: ComponentType, bytes: &[u8]) {
        debug_assert!(row >= 1 && row <= self.count());
        let size = self.schema.component_size(index);
        assert_eq!(bytes.len(), size, "component byte length mismatch");
        let at = row * self.schema.row_size() + self.schema.component_offset(index);
        self.rows[at..at + size].copy_from_slice(bytes);
    }

    /// Read one component value. Unaligned copy-out; `T` must match the
    /// registered size.
    #[inline]
    pub fn get<T: Pod>(&self, row: usize, index: ComponentType) -> T {
        let bytes = self.component_bytes(row, index);
        debug_assert_eq!(bytes.len(), std::mem::size_of::<T>());
        bytemuck::pod_read_unaligned(bytes)
    }

    /// Write one component value.
    #[inline]
    pub fn set<T: Pod>(&mut self, row: usize, index: ComponentType, value: &T) {
        self.set_component_bytes(row, index, bytemuck::bytes_of(value));
    }

    /// Strided iteration over one component column across every live row.
    /// Yields values by unaligned copy; length equals [`count`](Self::count).
    pub fn component_column<T: Pod>(&self, index: ComponentType) -> ColumnIter<'_, T> {
        let size = self.schema.component_size(index);
        debug_assert_eq!(size, std::mem::size_of::<T>());
        let row_size = self.schema.row_size();
        ColumnIter {
            rows: &self.rows,
            cursor: row_size + self.schema.component_offset(index),
            stride: row_size,
            size,
            remaining: self.count(),
            _marker: PhantomData,
        }
    }

    // -- schema growth ------------------------------------------------------

    /// Re-layout every row for a widened schema. Existing columns keep their
    /// offsets (schema offsets are append-only); the new tail is zero-filled.
    pub(crate) fn widen_rows(&mut self, new_schema: Arc<Schema>) {
        let old_size = self.schema.row_size();
        let new_size = new_schema.row_size();
        debug_assert!(new_size >= old_size);
        if new_size != old_size {
            let mut rows = vec![0u8; self.entities.len() * new_size];
            for row in 0..self.entities.len() {
                rows[row * new_size..row * new_size + old_size]
                    .copy_from_slice(&self.rows[row * old_size..(row + 1) * old_size]);
            }
            self.rows = rows;
            self.version += 1;
        }
        self.schema = new_schema;
    }
}

// ---------------------------------------------------------------------------
// ColumnIter
// ---------------------------------------------------------------------------

/// Iterator over one component column of a chunk, yielding copies.
pub struct ColumnIter<'a, T> {
    rows: &'a [u8],
    cursor: usize,
    stride: usize,
    size: usize,
    remaining: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> Iterator for ColumnIter<'_, T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        if self.remaining == 0 {
            return None;
        }
        let value = bytemuck::pod_read_unaligned(&self.rows[self.cursor..self.cursor + self.size]);
        self.cursor += self.stride;
        self.remaining -= 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Pod> ExactSizeIterator for ColumnIter<'_, T> {}

// ---------------------------------------------------------------------------
// ChunkIndex
// ---------------------------------------------------------------------------

/// Maps definitions to chunks, creating chunks on demand.
///
/// Chunk 0 is always the empty-definition chunk. The chunk count only ever
/// grows, which is what query caches key their invalidation on.
#[derive(Debug)]
pub struct ChunkIndex {
    schema: Arc<Schema>,
    chunks: Vec<Chunk>,
    by_definition: HashMap<Definition, ChunkId>,
}

impl ChunkIndex {
    /// The id of the empty-definition chunk.
    pub const EMPTY: ChunkId = ChunkId(0);

    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        let mut index = Self {
            schema: schema.clone(),
            chunks: Vec::new(),
            by_definition: HashMap::new(),
        };
        let id = index.get_or_create(Definition::EMPTY);
        debug_assert_eq!(id, Self::EMPTY);
        index
    }

    /// Find the chunk for `definition`, creating it if it does not exist.
    pub fn get_or_create(&mut self, definition: Definition) -> ChunkId {
        if let Some(&id) = self.by_definition.get(&definition) {
            return id;
        }
        let id = ChunkId(self.chunks.len() as u32);
        debug!(chunk = id.0, components = definition.components().len(), "creating chunk");
        self.chunks.push(Chunk::new(definition, self.schema.clone()));
        self.by_definition.insert(definition, id);
        id
    }

    /// Look up the chunk for `definition` without creating it.
    pub fn lookup(&self, definition: &Definition) -> Option<ChunkId> {
        self.by_definition.get(definition).copied()
    }

    /// Number of chunks (monotonic).
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no chunks. Never true for a live world: the
    /// empty-definition chunk exists from construction.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Borrow a chunk.
    #[inline]
    pub fn chunk(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id.index()]
    }

    /// Mutably borrow a chunk.
    #[inline]
    pub fn chunk_mut(&mut self, id: ChunkId) -> &mut Chunk {
        &mut self.chunks[id.index()]
    }

    /// Iterate all chunks with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (ChunkId(i as u32), c))
    }

    /// Migrate one row between two distinct chunks.
    pub(crate) fn migrate(
        &mut self,
        src: ChunkId,
        row: usize,
        dst: ChunkId,
    ) -> (usize, Option<Entity>) {
        assert_ne!(src, dst, "migration requires distinct chunks");
        let (src_chunk, dst_chunk) = if src.index() < dst.index() {
            let (left, right) = self.chunks.split_at_mut(dst.index());
            (&mut left[src.index()], &mut right[0])
        } else {
            let (left, right) = self.chunks.split_at_mut(src.index());
            (&mut right[0], &mut left[dst.index()])
        };
        src_chunk.move_to(row, dst_chunk)
    }

    /// Re-layout every chunk for a widened schema.
    pub(crate) fn widen_all(&mut self, new_schema: Arc<Schema>) {
        debug!(row_size = new_schema.row_size(), chunks = self.chunks.len(), "widening chunk rows");
        for chunk in &mut self.chunks {
            chunk.widen_rows(new_schema.clone());
        }
        self.schema = new_schema;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ComponentType;

    #[derive(Clone, Copy, PartialEq, Debug, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Pos {
        x: u32,
        y: u32,
    }

    #[derive(Clone, Copy, PartialEq, Debug, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Vel {
        vx: i32,
    }

    fn schema() -> (Arc<Schema>, ComponentType, ComponentType) {
        let mut schema = Schema::new();
        let p = schema.register_component::<Pos>().unwrap();
        let v = schema.register_component::<Vel>().unwrap();
        (Arc::new(schema), p, v)
    }

    #[test]
    fn rows_start_at_one() {
        let (schema, p, _) = schema();
        let def = Definition::new().with_component(p);
        let mut chunk = Chunk::new(def, schema);
        assert_eq!(chunk.count(), 0);
        let row = chunk.add_entity(Entity::from_raw(1));
        assert_eq!(row, 1);
        assert_eq!(chunk.count(), 1);
        assert_eq!(chunk.entity_at(1), Entity::from_raw(1));
    }

    #[test]
    fn swap_remove_reports_displaced_entity() {
        let (schema, p, _) = schema();
        let def = Definition::new().with_component(p);
        let mut chunk = Chunk::new(def, schema);
        let a = Entity::from_raw(1);
        let b = Entity::from_raw(2);
        let c = Entity::from_raw(3);
        chunk.add_entity(a);
        chunk.add_entity(b);
        chunk.add_entity(c);
        chunk.set(1, p, &Pos { x: 10, y: 0 });
        chunk.set(2, p, &Pos { x: 20, y: 0 });
        chunk.set(3, p, &Pos { x: 30, y: 0 });

        // Removing the middle row pulls the last row into its place.
        let displaced = chunk.remove_entity(2);
        assert_eq!(displaced, Some(c));
        assert_eq!(chunk.count(), 2);
        assert_eq!(chunk.entity_at(2), c);
        assert_eq!(chunk.get::<Pos>(2, p), Pos { x: 30, y: 0 });

        // Removing the last row displaces nothing.
        assert_eq!(chunk.remove_entity(2), None);
        assert_eq!(chunk.count(), 1);
        assert_eq!(chunk.entity_at(1), a);
    }

    #[test]
    fn version_bumps_on_every_mutation() {
        let (schema, p, _) = schema();
        let mut chunk = Chunk::new(Definition::new().with_component(p), schema);
        let v0 = chunk.version();
        chunk.add_entity(Entity::from_raw(1));
        let v1 = chunk.version();
        assert!(v1 > v0);
        chunk.remove_entity(1);
        assert!(chunk.version() > v1);
    }

    #[test]
    fn move_to_preserves_shared_components_and_zero_fills() {
        let (schema, p, v) = schema();
        let mut src = Chunk::new(
            Definition::new().with_component(p).with_component(v),
            schema.clone(),
        );
        let mut dst = Chunk::new(Definition::new().with_component(p), schema);

        let e = Entity::from_raw(1);
        let row = src.add_entity(e);
        src.set(row, p, &Pos { x: 7, y: 9 });
        src.set(row, v, &Vel { vx: -3 });

        let (new_row, displaced) = src.move_to(row, &mut dst);
        assert_eq!(displaced, None);
        assert_eq!(src.count(), 0);
        assert_eq!(dst.count(), 1);
        assert_eq!(dst.entity_at(new_row), e);
        assert_eq!(dst.get::<Pos>(new_row, p), Pos { x: 7, y: 9 });
        // The Vel column is not part of dst's definition; its bytes stay zero.
        assert_eq!(dst.get::<Vel>(new_row, v), Vel { vx: 0 });
    }

    #[test]
    fn column_iteration_matches_row_order() {
        let (schema, p, _) = schema();
        let mut chunk = Chunk::new(Definition::new().with_component(p), schema);
        for i in 1..=4u32 {
            let row = chunk.add_entity(Entity::from_raw(i));
            chunk.set(row, p, &Pos { x: i * 10, y: i });
        }
        let xs: Vec<u32> = chunk.component_column::<Pos>(p).map(|pos| pos.x).collect();
        assert_eq!(xs, vec![10, 20, 30, 40]);
        assert_eq!(chunk.component_column::<Pos>(p).len(), 4);
    }

    #[test]
    fn widen_keeps_existing_offsets() {
        let mut schema = Schema::new();
        let p = schema.register_component::<Pos>().unwrap();
        let schema = Arc::new(schema);

        let mut chunk = Chunk::new(Definition::new().with_component(p), schema.clone());
        let row = chunk.add_entity(Entity::from_raw(1));
        chunk.set(row, p, &Pos { x: 5, y: 6 });

        let mut wider = (*schema).clone();
        let v = wider.register_component::<Vel>().unwrap();
        let wider = Arc::new(wider);
        chunk.widen_rows(wider);

        assert_eq!(chunk.get::<Pos>(row, p), Pos { x: 5, y: 6 });
        assert_eq!(chunk.get::<Vel>(row, v), Vel { vx: 0 });
    }

    #[test]
    fn chunk_index_creates_on_demand() {
        let (schema, p, _) = schema();
        let mut index = ChunkIndex::new(schema);
        assert_eq!(index.len(), 1); // empty-definition chunk

        let def = Definition::new().with_component(p);
        let id = index.get_or_create(def);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get_or_create(def), id);
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup(&def), Some(id));
        assert_eq!(index.lookup(&Definition::EMPTY), Some(ChunkIndex::EMPTY));
    }

    #[test]
    fn chunk_index_migration_patches_both_chunks() {
        let (schema, p, v) = schema();
        let mut index = ChunkIndex::new(schema);
        let src = index.get_or_create(Definition::new().with_component(p).with_component(v));
        let dst = index.get_or_create(Definition::new().with_component(p));

        let e = Entity::from_raw(9);
        let row = index.chunk_mut(src).add_entity(e);
        index.chunk_mut(src).set(row, p, &Pos { x: 1, y: 2 });

        let (new_row, displaced) = index.migrate(src, row, dst);
        assert_eq!(displaced, None);
        assert_eq!(index.chunk(src).count(), 0);
        assert_eq!(index.chunk(dst).count(), 1);
        assert_eq!(index.chunk(dst).get::<Pos>(new_row, p), Pos { x: 1, y: 2 });
    }
}
