//! Run with:
//!   cargo bench --bench dispatch_bench

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use weiche::{CodeAddr, DispatchTable, DispatchTableCreateInfo, FunctionKey, SymbolTable};

fn demo_keys(n: usize) -> Vec<FunctionKey> {
    let symbols = SymbolTable::new();
    let module = symbols.intern("bench");
    (0..n)
        .map(|i| FunctionKey::new(module, symbols.intern(&format!("f{i}")), 2))
        .collect()
}

fn loaded_table(keys: &[FunctionKey]) -> DispatchTable {
    let table = DispatchTable::new(DispatchTableCreateInfo::default());
    table.start_staging();
    for (i, key) in keys.iter().enumerate() {
        let record = table.put(*key);
        table.bind(&record, CodeAddr(0x1000 + i));
    }
    table.end_staging(true);
    table.cursor().publish();
    table
}

fn bench_lookup(c: &mut Criterion) {
    let keys = demo_keys(1024);
    let table = loaded_table(&keys);
    let active = table.cursor().active();

    c.bench_function("find_entry/hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(table.find_entry(black_box(&keys[i]), active))
        })
    });

    c.bench_function("get_or_make_stub/loaded", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(table.get_or_make_stub(black_box(keys[i])))
        })
    });
}

fn bench_put(c: &mut Criterion) {
    let keys = demo_keys(1024);
    let table = loaded_table(&keys);
    table.start_staging();

    c.bench_function("put/existing", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(table.put(black_box(keys[i])))
        })
    });

    table.end_staging(false);
}

criterion_group!(benches, bench_lookup, bench_put);
criterion_main!(benches);
