use bgpcap::trie::{key_from_ipv4, Family, PatriciaTrie};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::net::Ipv4Addr;

/// Deterministic pseudo-random /24s spread across 10.0.0.0/8, avoiding a
/// `rand` dependency for what's otherwise a fixed benchmark fixture.
fn sample_prefixes(n: usize) -> Vec<([u8; 16], u8)> {
    let mut state: u32 = 0x2545F491;
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let octet2 = (state >> 8) as u8;
            let octet3 = (state >> 16) as u8;
            (key_from_ipv4(Ipv4Addr::new(10, octet2, octet3, 0)), 24)
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_insert");
    for size in [1_000usize, 10_000, 100_000] {
        let prefixes = sample_prefixes(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &prefixes, |b, prefixes| {
            b.iter(|| {
                let mut trie: PatriciaTrie<()> = PatriciaTrie::init(Family::V4);
                for (key, bitlen) in prefixes {
                    trie.insert(*key, *bitlen, ());
                }
                black_box(trie.len())
            });
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let prefixes = sample_prefixes(100_000);
    let mut trie: PatriciaTrie<()> = PatriciaTrie::init(Family::V4);
    for (key, bitlen) in &prefixes {
        trie.insert(*key, *bitlen, ());
    }

    let mut group = c.benchmark_group("trie_lookup");
    group.bench_function("search_best_hit", |b| {
        b.iter(|| {
            for (key, bitlen) in prefixes.iter().take(1_000) {
                black_box(trie.search_best(*key, *bitlen));
            }
        });
    });
    group.bench_function("is_supernet_of", |b| {
        b.iter(|| {
            for (key, _) in prefixes.iter().take(1_000) {
                black_box(trie.is_supernet_of(*key, 32));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
