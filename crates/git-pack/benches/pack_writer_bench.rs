use std::collections::HashSet;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use git_object::ObjectType;
use git_pack::sink::BufferSink;
use git_pack::store::MemoryStore;
use git_pack::table::ObjectTable;
use git_pack::write_order::plan_write_order;
use git_pack::writer::write_pack;

fn build_table(count: usize, size: usize) -> (MemoryStore, ObjectTable) {
    let mut store = MemoryStore::new();
    let mut table = ObjectTable::new();
    for i in 0..count {
        let data = vec![(i % 256) as u8; size];
        let id = store.put(ObjectType::Blob, data.clone()).unwrap();
        table.insert(id, ObjectType::Blob, data.len(), i as u32);
    }
    (store, table)
}

fn streaming_write_throughput(c: &mut Criterion) {
    let (store, table) = build_table(500, 2048);

    let mut group = c.benchmark_group("pack_writer");
    group.throughput(Throughput::Bytes((500 * 2048) as u64));
    group.bench_function("500_blobs_no_deltas", |b| {
        b.iter(|| {
            let mut table = table.clone();
            let mut sink = BufferSink::new();
            let order = plan_write_order(&mut table, &HashSet::new()).unwrap();
            write_pack(
                black_box(&mut table),
                black_box(&order),
                black_box(&store),
                black_box(&mut sink),
            )
            .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, streaming_write_throughput);
criterion_main!(benches);
