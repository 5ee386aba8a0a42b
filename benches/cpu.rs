use criterion::{criterion_group, criterion_main, Criterion};
use gb_core::gb::{GameBoy, GameBoyMode};

fn empty_rom() -> Vec<u8> {
    let mut data = vec![0u8; 0x8000];
    data[0x147] = 0x00;
    data[0x148] = 0x00;
    data[0x149] = 0x00;
    data[0x14d] = 0xe7; // header checksum for an all-zero 0x134-0x14c range
    data
}

fn benchmark_cpu_clock(c: &mut Criterion) {
    let mut gb = GameBoy::new(Some(GameBoyMode::Dmg));
    gb.load_rom(&empty_rom()).unwrap();

    c.bench_function("cpu_cycles", |b| {
        b.iter(|| {
            gb.run(1_000_000).unwrap();
        })
    });
}

criterion_group!(benches, benchmark_cpu_clock);
criterion_main!(benches);
