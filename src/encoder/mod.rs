//! Frozen SimCLR encoder: ResNet trunk followed by a three-layer projection head.
//!
//! Checkpoints are safetensors files. Trunk tensors live under `encoder.` with
//! torchvision-style names (`encoder.conv1.weight`, `encoder.layer1.0.bn1.running_mean`),
//! the head under `projection.dense1`, `projection.dense2` and `projection.dense3`.
//! Weights are loaded as plain tensors rather than variables, so nothing in the
//! encoder can ever receive a gradient.
pub mod features;

use std::path::{Path, PathBuf};

use candle::{DType, Device, Tensor};
use candle_nn::{Func, Linear, Module, VarBuilder};
use candle_transformers::models::resnet;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::FeatureDepth;

pub use features::{FeatureBank, extract_features};

/// ResNet variant used as the encoder trunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    Resnet18,
    Resnet34,
    Resnet50,
}

impl Backbone {
    /// Width of the pooled trunk output
    pub fn feature_dim(&self) -> usize {
        match self {
            Backbone::Resnet18 | Backbone::Resnet34 => 512,
            Backbone::Resnet50 => 2048,
        }
    }

    fn build(&self, vb: VarBuilder<'static>) -> candle::Result<Func<'static>> {
        match self {
            Backbone::Resnet18 => resnet::resnet18_no_final_layer(vb),
            Backbone::Resnet34 => resnet::resnet34_no_final_layer(vb),
            Backbone::Resnet50 => resnet::resnet50_no_final_layer(vb),
        }
    }
}

/// Shape of the encoder and how it is run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub checkpoint: PathBuf,
    pub backbone: Backbone,
    /// Widths of the three dense layers of the projection head
    pub hidden_dims: [usize; 3],
    /// Images per forward pass during feature extraction
    pub batch_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("checkpoints/simclr.safetensors"),
            backbone: Backbone::Resnet50,
            hidden_dims: [256, 128, 50],
            batch_size: 32,
        }
    }
}

/// Every tap of one forward pass
#[derive(Debug, Clone)]
pub struct EncoderOutputs {
    pub backbone: Tensor,
    pub projection1: Tensor,
    pub projection2: Tensor,
    pub output: Tensor,
}

impl EncoderOutputs {
    pub fn get(&self, depth: FeatureDepth) -> &Tensor {
        match depth {
            FeatureDepth::Backbone => &self.backbone,
            FeatureDepth::Projection1 => &self.projection1,
            FeatureDepth::Projection2 => &self.projection2,
            FeatureDepth::Output => &self.output,
        }
    }
}

pub struct SimclrEncoder {
    trunk: Func<'static>,
    dense1: Linear,
    dense2: Linear,
    dense3: Linear,
    backbone: Backbone,
    hidden_dims: [usize; 3],
}

impl SimclrEncoder {
    /// Build the encoder from any variable source
    pub fn from_var_builder(
        vb: VarBuilder<'static>,
        backbone: Backbone,
        hidden_dims: [usize; 3],
    ) -> candle::Result<Self> {
        let trunk = backbone.build(vb.pp("encoder"))?;
        let head = vb.pp("projection");
        let dense1 = candle_nn::linear(backbone.feature_dim(), hidden_dims[0], head.pp("dense1"))?;
        let dense2 = candle_nn::linear(hidden_dims[0], hidden_dims[1], head.pp("dense2"))?;
        let dense3 = candle_nn::linear(hidden_dims[1], hidden_dims[2], head.pp("dense3"))?;
        Ok(Self {
            trunk,
            dense1,
            dense2,
            dense3,
            backbone,
            hidden_dims,
        })
    }

    /// Memory-map a checkpoint and build a frozen encoder from it
    pub fn load(path: &Path, config: &EncoderConfig, device: &Device) -> anyhow::Result<Self> {
        if !path.is_file() {
            anyhow::bail!("Encoder checkpoint not found: {}", path.display());
        }
        // SAFETY: the checkpoint is not expected to change while the run is in progress.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        let encoder = Self::from_var_builder(vb, config.backbone, config.hidden_dims)?;
        info!(
            checkpoint = %path.display(),
            backbone = ?config.backbone,
            hidden = ?config.hidden_dims,
            "encoder loaded and frozen"
        );
        Ok(encoder)
    }

    pub fn backbone(&self) -> Backbone {
        self.backbone
    }

    /// Width of the features tapped at `depth`
    pub fn feature_dim(&self, depth: FeatureDepth) -> usize {
        match depth {
            FeatureDepth::Backbone => self.backbone.feature_dim(),
            FeatureDepth::Projection1 => self.hidden_dims[0],
            FeatureDepth::Projection2 => self.hidden_dims[1],
            FeatureDepth::Output => self.hidden_dims[2],
        }
    }

    /// Run images `(N, 3, H, W)` through the encoder, keeping every tap
    pub fn forward(&self, images: &Tensor) -> candle::Result<EncoderOutputs> {
        let backbone = self.trunk.forward(images)?;
        let projection1 = self.dense1.forward(&backbone)?.relu()?;
        let projection2 = self.dense2.forward(&projection1)?.relu()?;
        let output = self.dense3.forward(&projection2)?;
        Ok(EncoderOutputs {
            backbone,
            projection1,
            projection2,
            output,
        })
    }
}

/// Pick the compute device: CPU when asked, otherwise CUDA or Metal if compiled in
pub fn device(cpu: bool) -> candle::Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if candle::utils::cuda_is_available() {
        Device::new_cuda(0)
    } else if candle::utils::metal_is_available() {
        Device::new_metal(0)
    } else {
        Ok(Device::Cpu)
    }
}
