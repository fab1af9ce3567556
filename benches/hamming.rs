use std::hint::black_box;

use casedup::graph::{Node, SimilarityGraph};
use casedup::hamming::{DHash, hamming_64, hamming_naive};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::prelude::*;

fn random_hash(rng: &mut impl Rng) -> DHash {
    DHash::from_bits((0..64).map(|_| rng.random::<bool>()))
}

fn bench_hamming(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hamming");
    let mut rng = rand::rng();
    let mut src = vec![0u8; 8];
    let mut dst = vec![0u8; 8 << 20];
    rng.fill_bytes(&mut src);
    rng.fill_bytes(&mut dst);

    group.throughput(Throughput::Bytes(dst.len() as u64));
    group.bench_function("hamming_8_naive", |b| {
        b.iter(|| {
            dst.chunks_exact(black_box(8)).map(|chunk| hamming_naive(&src, chunk)).sum::<u32>()
        });
    });
    group.bench_function("hamming_8_u64", |b| {
        b.iter(|| dst.chunks_exact(8).map(|chunk| hamming_64(&src, chunk)).sum::<u32>());
    });
    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("SimilarityGraph");
    let mut rng = rand::rng();

    for n in [500, 2000] {
        let nodes = (0..n)
            .map(|i| Node {
                image_id: i as i64,
                case_id: format!("C{}", i % 50),
                new_name: format!("{i}.jpg"),
                hash: random_hash(&mut rng),
            })
            .collect::<Vec<_>>();
        group.throughput(Throughput::Elements((n * (n - 1) / 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &nodes, |b, nodes| {
            b.iter(|| SimilarityGraph::build(nodes.clone(), black_box(5), |_| {}).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_hamming, bench_graph);
criterion_main!(benches);
