#![allow(dead_code)]

use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};
use siamese_forensics::{
    LabeledImage,
    catalog::EmbeddingCatalog,
    embedding::{
        Embedder, SiameseModels,
        network::{
            BatchNormWeights, ConvBlockWeights, InputShape, LinearWeights, MODEL_FORMAT_VERSION,
            ModelFile, SiameseNetwork,
        },
    },
};

pub const SIZE: u32 = 8;
pub const DIM: usize = 8;

fn filler(n: usize, offset: f32, seed: f32) -> Vec<f32> {
    (0..n)
        .map(|i| ((i as f32 + offset) * 0.618 + seed).sin() * 0.5)
        .collect()
}

pub fn model(seed: f32) -> ModelFile {
    let plane = (SIZE * SIZE) as usize;

    ModelFile {
        format_version: MODEL_FORMAT_VERSION,
        input: InputShape {
            channels: 1,
            height: SIZE,
            width: SIZE,
        },
        conv_blocks: vec![ConvBlockWeights {
            in_channels: 1,
            out_channels: 2,
            kernel_size: 3,
            weight: filler(18, 1.0, seed),
            bias: vec![0.05, -0.05],
            batch_norm: BatchNormWeights {
                gamma: vec![1.0, 0.5],
                beta: vec![0.0, 0.1],
                running_mean: vec![0.1, 0.0],
                running_var: vec![1.0, 2.0],
                eps: 1e-5,
            },
        }],
        linear: vec![
            LinearWeights {
                in_features: 2 * plane,
                out_features: 16,
                weight: filler(32 * plane, 2.0, seed),
                bias: filler(16, 3.0, seed),
            },
            LinearWeights {
                in_features: 16,
                out_features: DIM,
                weight: filler(16 * DIM, 4.0, seed),
                bias: filler(DIM, 5.0, seed),
            },
        ],
    }
}

pub fn embedder(seed: f32) -> Embedder {
    Embedder::new(Arc::new(SiameseNetwork::from_model(model(seed)).unwrap()))
}

pub fn models() -> Arc<SiameseModels> {
    Arc::new(SiameseModels::new(embedder(0.1), embedder(0.7), embedder(0.1)))
}

pub fn catalogs() -> (Arc<EmbeddingCatalog>, Arc<EmbeddingCatalog>) {
    (
        Arc::new(EmbeddingCatalog::in_memory("pre", DIM)),
        Arc::new(EmbeddingCatalog::in_memory("post", DIM)),
    )
}

/// Distinct textured image per `variant`.
pub fn photo(label: &str, variant: u32) -> LabeledImage {
    let image = RgbImage::from_fn(48, 40, |x, y| {
        let v = (x * (variant + 3) + y * (variant * 7 + 1) + (x * y) % (variant + 5)) % 256;
        Rgb([v as u8, ((v * 3 + variant * 40) % 256) as u8, (255 - v) as u8])
    });
    LabeledImage::new(label, DynamicImage::ImageRgb8(image))
}

/// Pseudo-random RGB noise, the kind of content ELA scores highest.
pub fn noise(label: &str, size: u32, seed: u32) -> LabeledImage {
    let mut state = seed;
    let image = RgbImage::from_fn(size, size, |_, _| {
        let mut channel = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        };
        Rgb([channel(), channel(), channel()])
    });
    LabeledImage::new(label, DynamicImage::ImageRgb8(image))
}
