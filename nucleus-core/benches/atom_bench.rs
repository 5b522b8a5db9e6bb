//! Benchmarks for the atom update pipeline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde::{Deserialize, Serialize};

use nucleus_core::{AtomOptions, AtomStore, CollectionOptions};

#[derive(Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: u64,
}

fn scalar_updates(c: &mut Criterion) {
    let store = AtomStore::new();
    let counter = store.create_atom(AtomOptions::new("counter", 0u64)).unwrap();
    counter.on_change(|_, _, _| {}).unwrap();

    c.bench_function("scalar_update", |b| {
        b.iter(|| counter.update_with(|v, _| black_box(v + 1)).unwrap())
    });
}

fn watched_record_updates(c: &mut Criterion) {
    let store = AtomStore::new();
    let profile = store
        .create_atom(AtomOptions::new(
            "profile",
            Profile {
                name: "ada".into(),
                visits: 0,
            },
        ))
        .unwrap();
    profile.watch("visits", |_, _| {}).unwrap();
    profile.watch("name", |_, _| {}).unwrap();

    c.bench_function("watched_record_change", |b| {
        let mut visits = 0u64;
        b.iter(|| {
            visits += 1;
            profile.change("visits", black_box(visits)).unwrap()
        })
    });
}

fn collection_push(c: &mut Criterion) {
    let store = AtomStore::new();
    let list = store
        .create_collection(CollectionOptions::<u32>::new("list"))
        .unwrap();

    c.bench_function("collection_push_pop", |b| {
        b.iter(|| {
            list.push([black_box(1)]).unwrap();
            list.pop().unwrap();
        })
    });
}

criterion_group!(benches, scalar_updates, watched_record_updates, collection_push);
criterion_main!(benches);
