use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use image::{DynamicImage, Rgb, RgbImage};
use siamese_forensics::{
    analysis::ela::TamperDetector, catalog::EmbeddingCatalog, embedding::Embedding,
};

fn textured(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let v = ((x * 31 + y * 17) ^ (x * y)) % 256;
        Rgb([v as u8, (v * 5 % 256) as u8, (255 - v) as u8])
    }))
}

fn unit_vector(seed: usize, dim: usize) -> Embedding {
    let raw = (0..dim)
        .map(|i| ((seed * dim + i) as f32 * 0.37).sin())
        .collect::<Vec<_>>();
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    Embedding::new(raw.into_iter().map(|v| v / norm).collect())
}

fn bench_ela(c: &mut Criterion) {
    let image = textured(512, 512);
    let detector = TamperDetector::new(90);

    c.bench_function("ela_severity_512", |b| {
        b.iter(|| detector.detect(black_box(&image)).unwrap())
    });
}

fn bench_catalog(c: &mut Criterion) {
    let catalog = EmbeddingCatalog::in_memory("pre", 128);
    for i in 0..10_000 {
        catalog
            .append(&format!("images/pre/{i}.jpg"), unit_vector(i, 128))
            .unwrap();
    }
    let query = unit_vector(42, 128);
    let snapshot = catalog.snapshot();

    c.bench_function("catalog_nearest_10k", |b| {
        b.iter(|| snapshot.nearest(black_box(&query), 0.5).unwrap())
    });
}

criterion_group!(benches, bench_ela, bench_catalog);
criterion_main!(benches);
