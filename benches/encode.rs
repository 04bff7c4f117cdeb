use criterion::{black_box, criterion_group, criterion_main, Criterion};

use realmsync::game::update::compression::Compressor;
use realmsync::game::update::encoder::{decode, encode_full, encode_partial};
use realmsync::game::update::fields::{object_fields, unit_fields, EntityType};
use realmsync::game::update::flags::MessageFlags;
use realmsync::game::update::store::FieldStore;

fn seeded_store() -> FieldStore {
    let mut store = FieldStore::new(EntityType::Avatar);
    store.set(object_fields::GUID, 0x0000_0001_0000_002Au64).unwrap();
    store.set(unit_fields::LEVEL, 60u32).unwrap();
    store.set(unit_fields::HEALTH, 4200u32).unwrap();
    store.set(unit_fields::MAX_HEALTH, 4200u32).unwrap();
    store.composite_set(unit_fields::BYTES_0, [1, 1, 0, 1]).unwrap();
    store
}

fn bench_encode(c: &mut Criterion) {
    c.bench_function("encode_full", |b| {
        let mut store = seeded_store();
        b.iter(|| black_box(encode_full(&mut store, MessageFlags::SELF)))
    });

    c.bench_function("encode_partial_two_fields", |b| {
        let mut store = seeded_store();
        let mut health = 0u32;
        b.iter(|| {
            health = health.wrapping_add(1);
            store.set(unit_fields::HEALTH, health).unwrap();
            store.set(object_fields::GUID, u64::from(health)).unwrap();
            black_box(encode_partial(&mut store))
        })
    });

    let mut store = seeded_store();
    let full = encode_full(&mut store, MessageFlags::empty());
    c.bench_function("decode_full", |b| {
        b.iter(|| black_box(decode(full.as_bytes()).unwrap()))
    });

    let compressor = Compressor::default();
    c.bench_function("compress_full", |b| {
        b.iter(|| black_box(compressor.compress(full.as_bytes()).unwrap()))
    });
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
