//! Benchmarks for the hot paths: entity creation, signature migration,
//! columnar query iteration, and operation-buffer replay.
//!
//! Run with: `cargo bench --bench world_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use strata_ecs::operation::OperationBuffer;
use strata_ecs::query::Query;
use strata_ecs::schema::Schema;
use strata_ecs::world::World;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Health {
    points: u32,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn schema() -> Schema {
    let mut schema = Schema::new();
    schema.register_component::<Position>().unwrap();
    schema.register_component::<Velocity>().unwrap();
    schema.register_component::<Health>().unwrap();
    schema
}

/// A world with `count` entities, all carrying Position and every other one
/// carrying Velocity, seeded deterministically.
fn populated_world(count: usize) -> World {
    let mut rng = Pcg64::seed_from_u64(0x5eed);
    let mut world = World::new(schema());
    for i in 0..count {
        let e = world.create_entity();
        world
            .add_component(
                e,
                Position {
                    x: rng.gen_range(-1000.0..1000.0),
                    y: rng.gen_range(-1000.0..1000.0),
                },
            )
            .unwrap();
        if i % 2 == 0 {
            world
                .add_component(
                    e,
                    Velocity {
                        dx: rng.gen_range(-1.0..1.0),
                        dy: rng.gen_range(-1.0..1.0),
                    },
                )
                .unwrap();
        }
    }
    world
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_create_entities(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_entities");
    for count in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut world = World::new(schema());
                for _ in 0..count {
                    black_box(world.create_entity());
                }
                world
            });
        });
    }
    group.finish();
}

fn bench_migration(c: &mut Criterion) {
    c.bench_function("add_remove_component_migration", |b| {
        let mut world = populated_world(1_000);
        let entities: Vec<_> = {
            let mut q = Query::new()
                .with::<Position>(world.schema())
                .unwrap()
                .without::<Velocity>(world.schema())
                .unwrap();
            q.entities(&world)
        };
        b.iter(|| {
            for &e in &entities {
                world.add_component(e, Health { points: 100 }).unwrap();
            }
            for &e in &entities {
                world.remove_component::<Health>(e).unwrap();
            }
        });
    });
}

fn bench_query_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_iteration");
    for count in [10_000usize, 100_000] {
        let world = populated_world(count);
        let position = world.schema().lookup_component::<Position>().unwrap();
        let velocity = world.schema().lookup_component::<Velocity>().unwrap();
        let mut query = Query::new().require(position).require(velocity);

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let mut sum = 0.0f32;
                for chunk in query.chunks(&world) {
                    let positions = chunk.component_column::<Position>(position);
                    let velocities = chunk.component_column::<Velocity>(velocity);
                    for (p, v) in positions.zip(velocities) {
                        sum += p.x * v.dx + p.y * v.dy;
                    }
                }
                black_box(sum)
            });
        });
    }
    group.finish();
}

fn bench_operation_replay(c: &mut Criterion) {
    c.bench_function("operation_replay_1k_creates", |b| {
        b.iter(|| {
            let mut world = World::new(schema());
            let mut op = OperationBuffer::new();
            op.create_many_and_select(1_000);
            op.add_component(world.schema(), Position { x: 1.0, y: 2.0 })
                .unwrap();
            op.perform(&mut world).unwrap();
            world
        });
    });
}

criterion_group!(
    benches,
    bench_create_entities,
    bench_migration,
    bench_query_iteration,
    bench_operation_replay
);
criterion_main!(benches);
