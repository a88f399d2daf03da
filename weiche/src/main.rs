use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering::Relaxed},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use weiche::{CodeAddr, DispatchTable, DispatchTableCreateInfo, FunctionKey, SymbolTable};

/// Hot-reload stress demo: reader threads resolve functions against the
/// active generation while the main thread runs full reload cycles.
#[derive(Parser)]
struct Args {
    /// Distinct functions in the demo module
    #[arg(long, default_value_t = 64)]
    functions: usize,
    /// Full reload cycles to run
    #[arg(long, default_value_t = 8)]
    cycles: usize,
    /// Concurrent reader threads
    #[arg(long, default_value_t = 4)]
    readers: usize,
    /// Print the table after the run
    #[arg(long, default_value_t = false)]
    dump: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let symbols = SymbolTable::new();
    let table = Arc::new(DispatchTable::new(DispatchTableCreateInfo::default()));

    let module = symbols.intern("demo");
    let keys: Vec<FunctionKey> = (0..args.functions)
        .map(|i| FunctionKey::new(module, symbols.intern(&format!("f{i}")), (i % 8) as u32))
        .collect();

    let stop = Arc::new(AtomicBool::new(false));
    let lookups = Arc::new(AtomicU64::new(0));

    let readers: Vec<_> = (0..args.readers)
        .map(|_| {
            let table = Arc::clone(&table);
            let keys = keys.clone();
            let stop = Arc::clone(&stop);
            let lookups = Arc::clone(&lookups);
            thread::spawn(move || {
                let mut i = 0usize;
                while !stop.load(Relaxed) {
                    let key = keys[i % keys.len()];
                    let record = table.get_or_make_stub(key);
                    assert_eq!(*record.key(), key);
                    lookups.fetch_add(1, Relaxed);
                    i += 1;
                }
            })
        })
        .collect();

    for cycle in 0..args.cycles {
        table.start_staging();
        for (i, key) in keys.iter().enumerate() {
            let record = table.put(*key);
            table.bind(&record, CodeAddr(0x1000 + cycle * 0x10000 + i));
        }
        table.end_staging(true);
        table.cursor().publish();
        thread::sleep(Duration::from_millis(2));
    }

    stop.store(true, Relaxed);
    for reader in readers {
        reader.join().expect("reader thread");
    }

    let active = table.cursor().active();
    println!("cycles: {}", args.cycles);
    println!("lookups: {}", lookups.load(Relaxed));
    println!(
        "active generation: {} ({} entries)",
        active.0,
        table.count(active)
    );
    println!("entry bytes: {}", table.total_bytes());
    println!("table bytes: {}", table.table_bytes());
    println!("stub races: {}", table.stub_races());

    if args.dump {
        let mut out = std::io::stdout().lock();
        table.dump(&mut out, false).expect("dump");
    }
}
