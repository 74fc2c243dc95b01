#[macro_use]
extern crate criterion;

extern crate cinerank;
extern crate ndarray;
extern crate rand;
extern crate rand_xorshift;
extern crate tempfile;

use criterion::Criterion;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use cinerank::data::InteractionMatrix;
use cinerank::evaluation::extract_top_k;
use cinerank::ModelKind;

fn synthetic(num_users: usize, num_items: usize, density: f64) -> InteractionMatrix {
    let mut rng = XorShiftRng::seed_from_u64(42);
    let mut pairs = Vec::new();

    for user_id in 0..num_users {
        for item_id in 0..num_items {
            if rng.gen_bool(density) {
                pairs.push((user_id, item_id));
            }
        }
    }

    InteractionMatrix::from_pairs(num_users, num_items, &pairs).unwrap()
}

fn bench_top_k(c: &mut Criterion) {
    let mut rng = XorShiftRng::seed_from_u64(0);
    let scores = Array2::from_shape_fn((943, 1682), |_| rng.gen::<f32>());

    c.bench_function("extract_top_k", |b| b.iter(|| extract_top_k(&scores, 100)));
}

fn bench_fit_and_predict(c: &mut Criterion) {
    let train = synthetic(500, 400, 0.05);
    let dir = tempfile::tempdir().unwrap();

    for kind in &[ModelKind::Ease, ModelKind::ItemKnn] {
        let mut model = kind.build();

        c.bench_function(&format!("fit_{}", kind), |b| {
            b.iter(|| model.fit(&train, dir.path()).unwrap())
        });
        c.bench_function(&format!("predict_{}", kind), |b| {
            b.iter(|| model.predict(&train).unwrap())
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_top_k, bench_fit_and_predict
}
criterion_main!(benches);
