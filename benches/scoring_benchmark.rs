use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use drugsens::css::calculate_css;
use drugsens::data::Block;
use drugsens::fit::FitOptions;
use drugsens::score::calculate_ri;
use drugsens::types::DoseResponseCurve;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn noisy_matrix(size: usize) -> Block {
    let mut rng = StdRng::seed_from_u64(0x5EED + size as u64);
    let doses: Vec<f64> = (0..size).map(|i| if i == 0 { 0.0 } else { 0.2 * 3f64.powi(i as i32) }).collect();
    let mut concs = Vec::with_capacity(size * size * 2);
    let mut responses = Vec::with_capacity(size * size);
    for &a in &doses {
        for &b in &doses {
            concs.extend_from_slice(&[a, b]);
            let ea = 80.0 * a / (a + 5.0);
            let eb = 60.0 * b / (b + 2.0);
            responses.push(ea + eb - ea * eb / 100.0 + rng.gen_range(-3.0..3.0));
        }
    }
    Block::new(
        "bench",
        Array2::from_shape_vec((size * size, 2), concs).unwrap(),
        Array1::from_vec(responses),
    )
    .unwrap()
}

fn benchmark_scoring(c: &mut Criterion) {
    let options = FitOptions::default();
    let curve = DoseResponseCurve::from_pairs(
        &[0.0, 0.1954, 0.7812, 3.125, 12.5, 50.0],
        &[2.95, 3.76, 18.13, 28.69, 46.66, 58.82],
    );
    c.bench_function("calculate_ri", |b| {
        b.iter(|| black_box(calculate_ri(black_box(&curve), &options)))
    });

    let mut group = c.benchmark_group("calculate_css");
    for size in [4_usize, 6, 8] {
        let block = noisy_matrix(size);
        let ic50 = [2.0, 1.0];
        group.bench_with_input(BenchmarkId::from_parameter(size), &block, |b, input| {
            b.iter(|| black_box(calculate_css(black_box(input), &ic50, &options)));
        });
    }
    group.finish();
}

criterion_group!(scoring, benchmark_scoring);
criterion_main!(scoring);
