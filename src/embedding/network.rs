use std::{fs::File, io::BufReader, path::Path};

use ndarray::{Array1, Array2, Array3, Array4};
use serde::{Deserialize, Serialize};

use crate::error::{ForensicsError, Result};

pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Reflection padding applied before every convolution.
const PAD: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub channels: usize,
    pub height: u32,
    pub width: u32,
}

impl InputShape {
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.channels, self.height as usize, self.width as usize)
    }
}

/// Anything that maps a preprocessed `(channels, height, width)` tensor to a
/// raw, unnormalized feature vector.
pub trait FeatureExtractor: Send + Sync {
    fn input_shape(&self) -> InputShape;

    /// Length of the vectors `forward` returns.
    fn output_dim(&self) -> usize;

    fn forward(&self, input: &Array3<f32>) -> Result<Array1<f32>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub format_version: u32,
    pub input: InputShape,
    pub conv_blocks: Vec<ConvBlockWeights>,
    pub linear: Vec<LinearWeights>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvBlockWeights {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    /// Row-major `[out_channels, in_channels, kernel_size, kernel_size]`.
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    pub batch_norm: BatchNormWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNormWeights {
    pub gamma: Vec<f32>,
    pub beta: Vec<f32>,
    pub running_mean: Vec<f32>,
    pub running_var: Vec<f32>,
    #[serde(default = "default_eps")]
    pub eps: f32,
}

fn default_eps() -> f32 {
    1e-5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearWeights {
    pub in_features: usize,
    pub out_features: usize,
    /// Row-major `[out_features, in_features]`.
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

struct ConvBlock {
    weight: Array4<f32>,
    bias: Array1<f32>,
    bn_scale: Array1<f32>,
    bn_shift: Array1<f32>,
}

impl ConvBlock {
    fn from_weights(w: ConvBlockWeights, index: usize) -> Result<Self> {
        let k = w.kernel_size;
        if k == 0 {
            return Err(ForensicsError::ModelFormat(format!(
                "conv block {index}: kernel size must be positive"
            )));
        }

        let weight = Array4::from_shape_vec((w.out_channels, w.in_channels, k, k), w.weight)
            .map_err(|e| ForensicsError::ModelFormat(format!("conv block {index} weight: {e}")))?;

        let bn = w.batch_norm;
        for (name, len) in [
            ("bias", w.bias.len()),
            ("gamma", bn.gamma.len()),
            ("beta", bn.beta.len()),
            ("running_mean", bn.running_mean.len()),
            ("running_var", bn.running_var.len()),
        ] {
            if len != w.out_channels {
                return Err(ForensicsError::ModelFormat(format!(
                    "conv block {index}: {name} has {len} values, expected {}",
                    w.out_channels
                )));
            }
        }

        // Batch norm in inference mode is an affine map per channel.
        let bn_scale = bn
            .gamma
            .iter()
            .zip(&bn.running_var)
            .map(|(g, var)| g / (var + bn.eps).sqrt())
            .collect::<Array1<f32>>();
        let bn_shift = bn
            .beta
            .iter()
            .zip(&bn.running_mean)
            .zip(bn_scale.iter())
            .map(|((b, mean), scale)| b - mean * scale)
            .collect::<Array1<f32>>();

        Ok(Self {
            weight,
            bias: Array1::from(w.bias),
            bn_scale,
            bn_shift,
        })
    }

    fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    fn kernel_size(&self) -> usize {
        self.weight.dim().2
    }

    fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let k = self.kernel_size();
        if height <= PAD || width <= PAD || height + 2 * PAD < k || width + 2 * PAD < k {
            return None;
        }
        Some((height + 2 * PAD - k + 1, width + 2 * PAD - k + 1))
    }

    /// Reflection pad, convolution, ReLU, then batch norm.
    fn forward(&self, input: &Array3<f32>) -> Array3<f32> {
        let (in_c, height, width) = input.dim();
        let k = self.kernel_size();
        let out_h = height + 2 * PAD - k + 1;
        let out_w = width + 2 * PAD - k + 1;
        let mut output = Array3::zeros((self.out_channels(), out_h, out_w));

        for o in 0..self.out_channels() {
            for y in 0..out_h {
                for x in 0..out_w {
                    let mut acc = self.bias[o];
                    for c in 0..in_c {
                        for ky in 0..k {
                            let sy = reflect(y + ky, height);
                            for kx in 0..k {
                                let sx = reflect(x + kx, width);
                                acc += self.weight[[o, c, ky, kx]] * input[[c, sy, sx]];
                            }
                        }
                    }
                    output[[o, y, x]] = acc.max(0.0) * self.bn_scale[o] + self.bn_shift[o];
                }
            }
        }

        output
    }
}

/// Maps a coordinate in the padded plane back onto the unpadded axis of `len`.
fn reflect(padded: usize, len: usize) -> usize {
    if padded < PAD {
        PAD - padded
    } else if padded - PAD >= len {
        2 * (len - 1) + PAD - padded
    } else {
        padded - PAD
    }
}

struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    fn from_weights(w: LinearWeights, index: usize) -> Result<Self> {
        let weight = Array2::from_shape_vec((w.out_features, w.in_features), w.weight)
            .map_err(|e| ForensicsError::ModelFormat(format!("linear layer {index} weight: {e}")))?;
        if w.bias.len() != w.out_features {
            return Err(ForensicsError::ModelFormat(format!(
                "linear layer {index}: bias has {} values, expected {}",
                w.bias.len(),
                w.out_features
            )));
        }

        Ok(Self {
            weight,
            bias: Array1::from(w.bias),
        })
    }

    fn forward(&self, input: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(input) + &self.bias
    }
}

/// Siamese convolutional embedding network in inference mode. Both branches
/// share these weights, so one instance embeds every input of a pair or
/// triplet.
pub struct SiameseNetwork {
    input: InputShape,
    conv_blocks: Vec<ConvBlock>,
    linear: Vec<Linear>,
}

impl SiameseNetwork {
    pub fn from_model(model: ModelFile) -> Result<Self> {
        if model.format_version != MODEL_FORMAT_VERSION {
            return Err(ForensicsError::ModelFormat(format!(
                "unsupported model format version {}",
                model.format_version
            )));
        }
        if model.linear.is_empty() {
            return Err(ForensicsError::ModelFormat(
                "model needs at least one linear layer".into(),
            ));
        }

        let conv_blocks = model
            .conv_blocks
            .into_iter()
            .enumerate()
            .map(|(i, w)| ConvBlock::from_weights(w, i))
            .collect::<Result<Vec<_>>>()?;
        let linear = model
            .linear
            .into_iter()
            .enumerate()
            .map(|(i, w)| Linear::from_weights(w, i))
            .collect::<Result<Vec<_>>>()?;

        let (mut channels, mut height, mut width) = model.input.dims();
        for (i, block) in conv_blocks.iter().enumerate() {
            if block.in_channels() != channels {
                return Err(ForensicsError::ShapeMismatch(format!(
                    "conv block {i} expects {} channels, previous layer produces {channels}",
                    block.in_channels()
                )));
            }
            (height, width) = block.output_size(height, width).ok_or_else(|| {
                ForensicsError::ShapeMismatch(format!(
                    "conv block {i} cannot be applied to a {height}x{width} plane"
                ))
            })?;
            channels = block.out_channels();
        }

        let mut features = channels * height * width;
        for (i, layer) in linear.iter().enumerate() {
            let expected = layer.weight.dim().1;
            if expected != features {
                return Err(ForensicsError::ShapeMismatch(format!(
                    "linear layer {i} expects {expected} features, previous layer produces {features}"
                )));
            }
            features = layer.weight.dim().0;
        }

        Ok(Self {
            input: model.input,
            conv_blocks,
            linear,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let model: ModelFile = serde_json::from_reader(reader)?;
        Self::from_model(model)
    }
}

impl FeatureExtractor for SiameseNetwork {
    fn input_shape(&self) -> InputShape {
        self.input
    }

    fn output_dim(&self) -> usize {
        self.linear
            .last()
            .map(|layer| layer.weight.dim().0)
            .unwrap_or(0)
    }

    fn forward(&self, input: &Array3<f32>) -> Result<Array1<f32>> {
        if input.dim() != self.input.dims() {
            return Err(ForensicsError::ShapeMismatch(format!(
                "network expects input {:?}, got {:?}",
                self.input.dims(),
                input.dim()
            )));
        }

        let mut x = input.to_owned();
        for block in &self.conv_blocks {
            x = block.forward(&x);
        }

        let mut v = x.iter().copied().collect::<Array1<f32>>();
        let last = self.linear.len() - 1;
        for (i, layer) in self.linear.iter().enumerate() {
            v = layer.forward(&v);
            if i < last {
                v.mapv_inplace(|a| a.max(0.0));
            }
        }

        Ok(v)
    }
}
