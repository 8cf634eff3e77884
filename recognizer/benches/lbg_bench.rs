use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sprec_recognizer::Lbg;

fn blob(center: &[f32], n: usize, spread: f32, seed: u64) -> Vec<Vec<f32>> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            center
                .iter()
                .map(|&c| {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                    let r = ((state >> 33) as f32) / (u32::MAX as f32) - 0.5;
                    c + r * spread
                })
                .collect()
        })
        .collect()
}

fn bench_cluster(c: &mut Criterion) {
    let dim = 12;
    let centers: Vec<Vec<f32>> = (0..8)
        .map(|i| (0..dim).map(|d| ((i * 7 + d) % 13) as f32).collect())
        .collect();

    let mut samples = Vec::new();
    for (i, center) in centers.iter().enumerate() {
        samples.extend(blob(center, 250, 0.5, 0x1234 + i as u64));
    }

    c.bench_function("lbg_cluster_2000x12_into_8", |b| {
        let lbg = Lbg::new(8, 0.01);
        b.iter(|| lbg.cluster(black_box(&samples)).unwrap())
    });

    c.bench_function("lbg_cluster_2000x12_into_64", |b| {
        let lbg = Lbg::new(64, 0.01);
        b.iter(|| lbg.cluster(black_box(&samples)).unwrap())
    });
}

criterion_group!(benches, bench_cluster);
criterion_main!(benches);
