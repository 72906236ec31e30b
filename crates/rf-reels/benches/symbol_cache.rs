//! Symbol parse cache and reel advance benchmarks

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rf_reels::{
    NullPresenter, Reel, ReelConfig, ReelId, ReelStrip, ReelTiming, SpinDirection, SymbolCache,
    SymbolSpec,
};

const NAMES: [&str; 8] = [
    "M1", "L3", "W-3B", "SC", "M1-3A-2B", "RP-2A|M2-2A", "BN-4D", "JP",
];

fn bench_parse_uncached(c: &mut Criterion) {
    c.bench_function("symbol_parse_uncached", |b| {
        b.iter(|| {
            for name in NAMES {
                black_box(SymbolSpec::parse(black_box(name)));
            }
        })
    });
}

fn bench_cache_hit(c: &mut Criterion) {
    let cache = SymbolCache::new();
    for name in NAMES {
        cache.get(name);
    }

    c.bench_function("symbol_cache_hit", |b| {
        b.iter(|| {
            for name in NAMES {
                black_box(cache.get(black_box(name)));
            }
        })
    });
}

fn bench_reel_advance(c: &mut Criterion) {
    let cache = Arc::new(SymbolCache::new());
    let names: Vec<String> = (0..64)
        .map(|i| match i % 8 {
            0 => "T-3A".to_string(),
            1 => "T-3B".to_string(),
            2 => "T-3C".to_string(),
            _ => format!("S{i}"),
        })
        .collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let strip = Arc::new(ReelStrip::from_names("bench", &refs, &cache).unwrap());
    let config = ReelConfig::new(ReelId::column(0), 4, "bench");
    let mut reel = Reel::new(&config, ReelTiming::normal(), strip, cache, 1, &mut NullPresenter)
        .unwrap();

    c.bench_function("reel_advance_and_repair_64", |b| {
        b.iter(|| {
            for _ in 0..64 {
                reel.advance(SpinDirection::Down, &mut NullPresenter);
            }
            black_box(reel.repair(&mut NullPresenter).unwrap());
        })
    });
}

criterion_group!(benches, bench_parse_uncached, bench_cache_hit, bench_reel_advance);
criterion_main!(benches);
