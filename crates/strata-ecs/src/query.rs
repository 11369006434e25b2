//! Queries: archetype predicates over the chunk index.
//!
//! A [`Query`] carries a required and an excluded [`Definition`]. A chunk
//! matches when its definition is a superset of the required masks and
//! disjoint from the excluded masks; iteration then yields whole matching
//! chunks so callers can run tight loops over
//! [`component_column`](crate::chunk::Chunk::component_column) slices without
//! per-entity indirection.
//!
//! The matching-chunk list is cached. Chunk definitions are immutable and the
//! chunk count only grows, so the cache is refreshed by scanning just the
//! chunks created since the last call. Change detection on top of that uses
//! per-chunk versions: pass the version high-water mark you last observed.

use crate::chunk::{Chunk, ChunkId};
use crate::definition::Definition;
use crate::schema::{ArrayType, ComponentType, Schema, TagType};
use crate::world::World;
use crate::WorldError;

/// A cached archetype predicate.
#[derive(Debug, Default, Clone)]
pub struct Query {
    required: Definition,
    excluded: Definition,
    cached: Vec<ChunkId>,
    chunks_seen: usize,
}

impl Query {
    /// A query matching every chunk.
    pub fn new() -> Self {
        Self::default()
    }

    // -- predicate construction ---------------------------------------------

    /// Require a component by index.
    #[must_use]
    pub fn require(mut self, index: ComponentType) -> Self {
        self.required = self.required.with_component(index);
        self.invalidate();
        self
    }

    /// Exclude a component by index.
    #[must_use]
    pub fn exclude(mut self, index: ComponentType) -> Self {
        self.excluded = self.excluded.with_component(index);
        self.invalidate();
        self
    }

    /// Require an array attachment by index.
    #[must_use]
    pub fn require_array(mut self, index: ArrayType) -> Self {
        self.required = self.required.with_array(index);
        self.invalidate();
        self
    }

    /// Require a tag by index.
    #[must_use]
    pub fn require_tag(mut self, index: TagType) -> Self {
        self.required = self.required.with_tag(index);
        self.invalidate();
        self
    }

    /// Exclude a tag by index.
    #[must_use]
    pub fn exclude_tag(mut self, index: TagType) -> Self {
        self.excluded = self.excluded.with_tag(index);
        self.invalidate();
        self
    }

    /// Require the component registered for `T`.
    pub fn with<T: bytemuck::Pod + 'static>(self, schema: &Schema) -> Result<Self, WorldError> {
        let index = schema
            .lookup_component::<T>()
            .ok_or_else(|| WorldError::unregistered("component", std::any::type_name::<T>()))?;
        Ok(self.require(index))
    }

    /// Exclude the component registered for `T`.
    pub fn without<T: bytemuck::Pod + 'static>(self, schema: &Schema) -> Result<Self, WorldError> {
        let index = schema
            .lookup_component::<T>()
            .ok_or_else(|| WorldError::unregistered("component", std::any::type_name::<T>()))?;
        Ok(self.exclude(index))
    }

    /// Require the tag registered for `T`.
    pub fn with_tag<T: 'static>(self, schema: &Schema) -> Result<Self, WorldError> {
        let index = schema
            .lookup_tag::<T>()
            .ok_or_else(|| WorldError::unregistered("tag", std::any::type_name::<T>()))?;
        Ok(self.require_tag(index))
    }

    /// Require the array attachment registered for `T`.
    pub fn with_array<T: bytemuck::Pod + 'static>(
        self,
        schema: &Schema,
    ) -> Result<Self, WorldError> {
        let index = schema
            .lookup_array::<T>()
            .ok_or_else(|| WorldError::unregistered("array", std::any::type_name::<T>()))?;
        Ok(self.require_array(index))
    }

    fn invalidate(&mut self) {
        self.cached.clear();
        self.chunks_seen = 0;
    }

    // -- matching -----------------------------------------------------------

    /// Whether a definition satisfies this query's predicate.
    pub fn matches(&self, definition: &Definition) -> bool {
        definition.contains(&self.required) && definition.is_disjoint(&self.excluded)
    }

    /// Refresh the cached chunk list against `world`. Only chunks created
    /// since the previous refresh are examined.
    fn refresh(&mut self, world: &World) {
        let index = world.chunk_index();
        if index.len() == self.chunks_seen {
            return;
        }
        for (id, chunk) in index.iter().skip(self.chunks_seen) {
            if self.matches(chunk.definition()) {
                self.cached.push(id);
            }
        }
        self.chunks_seen = index.len();
    }

    /// Iterate matching chunks. Empty chunks are skipped.
    pub fn chunks<'w>(&'w mut self, world: &'w World) -> impl Iterator<Item = &'w Chunk> + 'w {
        self.refresh(world);
        let index = world.chunk_index();
        self.cached
            .iter()
            .map(move |id| index.chunk(*id))
            .filter(|chunk| !chunk.is_empty())
    }

    /// Iterate matching chunks whose version is above `version` -- change
    /// detection for consumers that track a high-water mark.
    pub fn chunks_changed_since<'w>(
        &'w mut self,
        world: &'w World,
        version: u64,
    ) -> impl Iterator<Item = &'w Chunk> + 'w {
        self.chunks(world)
            .filter(move |chunk| chunk.version() > version)
    }

    /// Collect every entity in every matching chunk, in chunk/row order.
    pub fn entities(&mut self, world: &World) -> Vec<crate::entity::Entity> {
        self.chunks(world)
            .flat_map(|chunk| chunk.entities().iter().copied())
            .collect()
    }

    /// Total number of matching entities.
    pub fn count(&mut self, world: &World) -> usize {
        self.chunks(world).map(|chunk| chunk.count()).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::world::World;

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

    struct Frozen;

    fn setup() -> World {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        schema.register_component::<Vel>().unwrap();
        schema.register_tag::<Frozen>().unwrap();
        World::new(schema)
    }

    #[test]
    fn matches_superset_and_respects_exclusion() {
        let mut world = setup();
        let moving = world.create_entity();
        world.add_component(moving, Pos { x: 1, y: 1 }).unwrap();
        world.add_component(moving, Vel { vx: 2 }).unwrap();
        let still = world.create_entity();
        world.add_component(still, Pos { x: 9, y: 9 }).unwrap();

        let mut both = Query::new()
            .with::<Pos>(world.schema())
            .unwrap()
            .with::<Vel>(world.schema())
            .unwrap();
        assert_eq!(both.entities(&world), vec![moving]);

        let mut still_only = Query::new()
            .with::<Pos>(world.schema())
            .unwrap()
            .without::<Vel>(world.schema())
            .unwrap();
        assert_eq!(still_only.entities(&world), vec![still]);
    }

    #[test]
    fn cache_picks_up_chunks_created_later() {
        let mut world = setup();
        let mut query = Query::new().with::<Pos>(world.schema()).unwrap();
        assert_eq!(query.count(&world), 0);

        let a = world.create_entity();
        world.add_component(a, Pos { x: 0, y: 0 }).unwrap();
        assert_eq!(query.count(&world), 1);

        // A new archetype appears after the query's first refresh.
        let b = world.create_entity();
        world.add_component(b, Pos { x: 0, y: 0 }).unwrap();
        world.add_component(b, Vel { vx: 1 }).unwrap();
        assert_eq!(query.count(&world), 2);
    }

    #[test]
    fn tag_constraints_narrow_matching() {
        let mut world = setup();
        let tagged = world.create_entity();
        world.add_component(tagged, Pos { x: 0, y: 0 }).unwrap();
        world.add_tag::<Frozen>(tagged).unwrap();
        let plain = world.create_entity();
        world.add_component(plain, Pos { x: 0, y: 0 }).unwrap();

        let mut frozen = Query::new()
            .with::<Pos>(world.schema())
            .unwrap()
            .with_tag::<Frozen>(world.schema())
            .unwrap();
        assert_eq!(frozen.entities(&world), vec![tagged]);

        let tag = world.schema().lookup_tag::<Frozen>().unwrap();
        let mut thawed = Query::new().with::<Pos>(world.schema()).unwrap().exclude_tag(tag);
        assert_eq!(thawed.entities(&world), vec![plain]);
    }

    #[test]
    fn column_iteration_is_per_chunk() {
        let mut world = setup();
        for i in 0..5u32 {
            let e = world.create_entity();
            world.add_component(e, Pos { x: i, y: 0 }).unwrap();
        }
        let pos = world.schema().lookup_component::<Pos>().unwrap();
        let mut query = Query::new().require(pos);

        let mut total = 0u32;
        for chunk in query.chunks(&world) {
            for value in chunk.component_column::<Pos>(pos) {
                total += value.x;
            }
        }
        assert_eq!(total, 10);
    }

    #[test]
    fn change_detection_filters_on_version() {
        let mut world = setup();
        let e = world.create_entity();
        world.add_component(e, Pos { x: 0, y: 0 }).unwrap();

        let mut query = Query::new().with::<Pos>(world.schema()).unwrap();
        let mark = query.chunks(&world).map(|c| c.version()).max().unwrap();
        assert_eq!(query.chunks_changed_since(&world, mark).count(), 0);

        // A structural change bumps the chunk past the mark.
        let f = world.create_entity();
        world.add_component(f, Pos { x: 1, y: 1 }).unwrap();
        assert_eq!(query.chunks_changed_since(&world, mark).count(), 1);
    }
}
