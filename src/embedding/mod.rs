pub mod network;

use std::{path::Path, sync::Arc};

use image::DynamicImage;
use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};

use crate::{
    embedding::network::{FeatureExtractor, InputShape, SiameseNetwork},
    error::{ForensicsError, Result},
    image_utils::to_input_tensor,
};

/// Lower bound on the norm used when normalizing, so a zero vector stays zero.
const NORM_EPS: f32 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Scales `raw` onto the unit hypersphere.
    pub fn normalized(raw: Array1<f32>) -> Self {
        let norm = raw.dot(&raw).sqrt().max(NORM_EPS);
        Self(raw.mapv(|v| v / norm).to_vec())
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32> {
        if self.dim() != other.dim() {
            return Err(ForensicsError::DimensionMismatch {
                expected: self.dim(),
                actual: other.dim(),
            });
        }

        let sum = self
            .0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>();

        Ok(sum.sqrt())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

#[derive(Clone)]
pub struct Embedder {
    network: Arc<dyn FeatureExtractor>,
}

impl Embedder {
    pub fn new(network: Arc<dyn FeatureExtractor>) -> Self {
        Self { network }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let network = SiameseNetwork::load(path)?;
        Ok(Self::new(Arc::new(network)))
    }

    pub fn input_shape(&self) -> InputShape {
        self.network.input_shape()
    }

    /// Dimension of the embeddings this embedder produces; catalogs fed by it
    /// must be opened with the same dimension.
    pub fn output_dim(&self) -> usize {
        self.network.output_dim()
    }

    pub fn preprocess(&self, image: &DynamicImage) -> Result<Array3<f32>> {
        let shape = self.input_shape();
        let tensor = to_input_tensor(image, shape.channels, shape.width, shape.height)?;

        if tensor.dim() != shape.dims() {
            return Err(ForensicsError::ShapeMismatch(format!(
                "preprocessing produced {:?}, network expects {:?}",
                tensor.dim(),
                shape.dims()
            )));
        }

        Ok(tensor)
    }

    pub fn embed(&self, image: &DynamicImage) -> Result<Embedding> {
        let tensor = self.preprocess(image)?;
        let raw = self.network.forward(&tensor)?;
        Ok(Embedding::normalized(raw))
    }

    pub fn embed_pair(&self, a: &DynamicImage, b: &DynamicImage) -> Result<(Embedding, Embedding)> {
        Ok((self.embed(a)?, self.embed(b)?))
    }

    pub fn embed_triplet(
        &self,
        anchor: &DynamicImage,
        positive: &DynamicImage,
        negative: &DynamicImage,
    ) -> Result<(Embedding, Embedding, Embedding)> {
        Ok((self.embed(anchor)?, self.embed(positive)?, self.embed(negative)?))
    }
}

/// The three networks used by the matching pipeline, loaded once at startup.
#[derive(Clone)]
pub struct SiameseModels {
    /// Triplet network archiving and querying "pre" images.
    pub pre: Embedder,
    /// Pair network archiving and querying "post" images.
    pub post: Embedder,
    /// Network whose embeddings give the direct pre/post distance.
    pub matcher: Embedder,
}

impl SiameseModels {
    pub fn new(pre: Embedder, post: Embedder, matcher: Embedder) -> Self {
        Self { pre, post, matcher }
    }

    pub fn load<P: AsRef<Path>>(pre: P, post: P, matcher: P) -> Result<Self> {
        Ok(Self::new(
            Embedder::load(pre)?,
            Embedder::load(post)?,
            Embedder::load(matcher)?,
        ))
    }
}
