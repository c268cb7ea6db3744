use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use corrtrack::registration::{correlation_surface, register_optimized, register_upsampled};
use corrtrack::registration::bfgs::BfgsOptions;
use corrtrack::{crop, get_shifts, CorrelationConfig, Normalization, Patch};

/// Speckle image: sharp Gaussian spots on a flat background, translated by
/// `shift`. Spots are pre-rendered on an oversized float canvas and
/// bilinearly resampled.
fn make_speckle_pair(width: u32, height: u32, shift: [f64; 2], seed: u64) -> (GrayImage, GrayImage) {
    let pad = 16i64;
    let cw = width as i64 + 2 * pad;
    let ch = height as i64 + 2 * pad;
    let mut canvas = vec![20.0f64; (cw * ch) as usize];
    let mut rng = StdRng::seed_from_u64(seed);

    let n_spots = (cw * ch / 10) as usize;
    for _ in 0..n_spots {
        let sx = rng.gen_range(0.0..cw as f64);
        let sy = rng.gen_range(0.0..ch as f64);
        let sigma: f64 = rng.gen_range(0.5..0.8);
        let amp = rng.gen_range(50.0..120.0);
        let r = (3.0 * sigma).ceil() as i64;
        for y in (sy as i64 - r).max(0)..(sy as i64 + r + 1).min(ch) {
            for x in (sx as i64 - r).max(0)..(sx as i64 + r + 1).min(cw) {
                let d2 = (x as f64 - sx).powi(2) + (y as f64 - sy).powi(2);
                canvas[(y * cw + x) as usize] += amp * (-d2 / (2.0 * sigma * sigma)).exp();
            }
        }
    }

    let sample = |x: f64, y: f64| -> u8 {
        let (x, y) = (x + pad as f64, y + pad as f64);
        let x0 = (x.floor() as i64).clamp(0, cw - 2);
        let y0 = (y.floor() as i64).clamp(0, ch - 2);
        let (tx, ty) = (x - x0 as f64, y - y0 as f64);
        let at = |xx: i64, yy: i64| canvas[(yy * cw + xx) as usize];
        let v = (at(x0, y0) * (1.0 - tx) + at(x0 + 1, y0) * tx) * (1.0 - ty)
            + (at(x0, y0 + 1) * (1.0 - tx) + at(x0 + 1, y0 + 1) * tx) * ty;
        v.round().clamp(0.0, 255.0) as u8
    };

    let a = GrayImage::from_fn(width, height, |x, y| Luma([sample(x as f64, y as f64)]));
    let b = GrayImage::from_fn(width, height, |x, y| {
        Luma([sample(x as f64 - shift[0], y as f64 - shift[1])])
    });
    (a, b)
}

fn patch_pair(half: usize) -> (Patch, Patch) {
    let (a, b) = make_speckle_pair(256, 256, [1.37, -0.62], 7);
    let (pa, _) = crop(&a, [128.0, 128.0], half).expect("center crop fits");
    let (pb, _) = crop(&b, [128.0, 128.0], half).expect("center crop fits");
    (pa, pb)
}

fn bench_register_upsampled(c: &mut Criterion) {
    let (src, tgt) = patch_pair(15);
    c.bench_function("register_upsampled_31px_uf20", |b| {
        b.iter(|| {
            let r = register_upsampled(black_box(&src), black_box(&tgt), 20, Normalization::Phase)
                .expect("registration of fixture");
            black_box(r.displacement)
        })
    });

    let (src, tgt) = patch_pair(35);
    c.bench_function("register_upsampled_71px_uf100", |b| {
        b.iter(|| {
            let r = register_upsampled(black_box(&src), black_box(&tgt), 100, Normalization::Phase)
                .expect("registration of fixture");
            black_box(r.displacement)
        })
    });
}

fn bench_register_optimized(c: &mut Criterion) {
    let (src, tgt) = patch_pair(15);
    let options = BfgsOptions::default();
    c.bench_function("register_optimized_31px_phase", |b| {
        b.iter(|| {
            let r = register_optimized(black_box(&src), black_box(&tgt), true, &options, 1.68)
                .expect("registration of fixture");
            black_box(r.displacement)
        })
    });
}

fn bench_surface(c: &mut Criterion) {
    let (src, tgt) = patch_pair(15);
    c.bench_function("correlation_surface_31px_uf4", |b| {
        b.iter(|| {
            let s = correlation_surface(black_box(&src), black_box(&tgt), 4, true)
                .expect("surface of fixture");
            black_box(s.peak_displacement)
        })
    });
}

fn bench_get_shifts(c: &mut Criterion) {
    let (a, b) = make_speckle_pair(320, 320, [6.3, -4.1], 11);
    let config = CorrelationConfig::default();
    c.bench_function("get_shifts_coarse70_fine15", |bch| {
        bch.iter(|| {
            let r = get_shifts(black_box(&a), black_box(&b), [160.0, 160.0], [0.0, 0.0], &config)
                .expect("registration of fixture");
            black_box(r.displacement)
        })
    });
}

criterion_group!(
    hotpaths,
    bench_register_upsampled,
    bench_register_optimized,
    bench_surface,
    bench_get_shifts
);
criterion_main!(hotpaths);
