//! Basic benchmarks for the `dynamic_array` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use dynamic_array::{CopyElements, DynamicArray, MoveElements};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = String;
const ITEM_COUNT: usize = 64;

fn test_item() -> TestItem {
    "benchmark item".to_string()
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("dynamic_array_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(DynamicArray::<TestItem>::new()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("push_grow_move");
    group.bench_function("push_grow_move", |b| {
        b.iter_custom(|iters| {
            let items = iter::repeat_with(test_item)
                .take(ITEM_COUNT)
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut array = DynamicArray::<TestItem, MoveElements>::new();

                for item in &items {
                    array.push(black_box(item.clone()));
                }

                drop(black_box(array));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("push_grow_copy");
    group.bench_function("push_grow_copy", |b| {
        b.iter_custom(|iters| {
            let items = iter::repeat_with(test_item)
                .take(ITEM_COUNT)
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut array = DynamicArray::<TestItem, CopyElements>::new();

                for item in &items {
                    array.push(black_box(item.clone()));
                }

                drop(black_box(array));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("push_reserved");
    group.bench_function("push_reserved", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut array = DynamicArray::<usize>::builder()
                    .capacity(ITEM_COUNT)
                    .build();

                for value in 0..ITEM_COUNT {
                    array.push(black_box(value));
                }

                drop(black_box(array));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("insert_front");
    group.bench_function("insert_front", |b| {
        b.iter_custom(|iters| {
            let mut arrays = iter::repeat_with(|| {
                let mut array = DynamicArray::<usize>::builder()
                    .capacity(ITEM_COUNT + 1)
                    .build();
                array.extend(0..ITEM_COUNT);
                array
            })
            .take(usize::try_from(iters).unwrap())
            .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for array in &mut arrays {
                _ = black_box(array.insert(0, black_box(ITEM_COUNT)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("erase_front");
    group.bench_function("erase_front", |b| {
        b.iter_custom(|iters| {
            let mut arrays = iter::repeat_with(|| (0..ITEM_COUNT).collect::<DynamicArray<usize>>())
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for array in &mut arrays {
                _ = black_box(array.erase(0));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("clone");
    group.bench_function("clone", |b| {
        b.iter_custom(|iters| {
            let source = iter::repeat_with(test_item)
                .take(ITEM_COUNT)
                .collect::<DynamicArray<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(source.clone()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("clone_from_reuse");
    group.bench_function("clone_from_reuse", |b| {
        b.iter_custom(|iters| {
            let source = (0..ITEM_COUNT).collect::<DynamicArray<usize>>();
            let mut target = DynamicArray::<usize>::builder()
                .capacity(ITEM_COUNT)
                .build();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                target.clone_from(black_box(&source));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
