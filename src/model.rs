//! Convolutional steering regressor.
//!
//! The network is described by [`SteeringModelConfig`]: a list of filter
//! counts, one per convolution stage, and a list of dense layer widths. Each
//! convolution stage halves the spatial resolution, so the input height and
//! width must be divisible by `2^stages`.

use std::fmt;

use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        loss::{MseLoss, Reduction},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

use crate::data::SteeringBatch;
use crate::error::Error;
use crate::preprocess::INPUT_SHAPE;

#[derive(Config, Debug)]
pub struct SteeringModelConfig {
    /// `[height, width, channels]` of the frames the model accepts.
    #[config(default = "INPUT_SHAPE")]
    pub input_shape: [usize; 3],
    /// Filters of each convolution stage.
    #[config(default = "vec![32, 64, 128, 256, 512]")]
    pub conv_filters: Vec<usize>,
    /// Widths of the hidden dense layers.
    #[config(default = "vec![1024, 256, 64]")]
    pub dense_units: Vec<usize>,
}

// Keras defaults: running stats keep 99% of their previous value.
fn batch_norm(num_features: usize) -> BatchNormConfig {
    BatchNormConfig::new(num_features)
        .with_momentum(0.01)
        .with_epsilon(1e-3)
}

/// 3x3 "same" convolution followed by batch norm and ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    fn new(channels: [usize; 2], device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            norm: batch_norm(channels[1]).init(device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }

    /// Number of output filters.
    pub fn filters(&self) -> usize {
        self.conv.weight.val().dims()[0]
    }
}

/// Two convolution blocks and a 2x2 max pool.
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvStage<B> {
    fn new(in_channels: usize, filters: usize, device: &B::Device) -> Self {
        Self {
            blocks: vec![
                ConvBlock::new([in_channels, filters], device),
                ConvBlock::new([filters, filters], device),
            ],
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));
        self.pool.forward(x)
    }

    pub fn blocks(&self) -> &[ConvBlock<B>] {
        &self.blocks
    }
}

/// Fully connected layer followed by batch norm and ReLU.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    linear: Linear<B>,
    norm: BatchNorm<B, 0>,
    activation: Relu,
}

impl<B: Backend> DenseBlock<B> {
    fn new(d_input: usize, d_output: usize, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(d_input, d_output).init(device),
            norm: batch_norm(d_output).init(device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(input);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct SteeringModel<B: Backend> {
    stages: Vec<ConvStage<B>>,
    dense: Vec<DenseBlock<B>>,
    output: Linear<B>,
    height: usize,
    width: usize,
    channels: usize,
}

impl SteeringModelConfig {
    /// Builds the model, checking that the input survives every pooling step.
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<SteeringModel<B>> {
        let [height, width, channels] = self.input_shape;
        let reduction = 1usize
            .checked_shl(self.conv_filters.len() as u32)
            .ok_or_else(|| Error::Config("too many convolution stages".to_string()))?;

        if height == 0 || width == 0 || channels == 0 {
            return Err(Error::Config(format!(
                "input shape {:?} has an empty dimension",
                self.input_shape
            )));
        }
        if height % reduction != 0 || width % reduction != 0 {
            return Err(Error::Config(format!(
                "input {height}x{width} is not divisible by {reduction} ({} pooling stages)",
                self.conv_filters.len()
            )));
        }

        let mut in_channels = channels;
        let mut stages = Vec::with_capacity(self.conv_filters.len());
        for &filters in &self.conv_filters {
            stages.push(ConvStage::new(in_channels, filters, device));
            in_channels = filters;
        }

        let mut features = (height / reduction) * (width / reduction) * in_channels;
        let mut dense = Vec::with_capacity(self.dense_units.len());
        for &units in &self.dense_units {
            dense.push(DenseBlock::new(features, units, device));
            features = units;
        }

        Ok(SteeringModel {
            stages,
            dense,
            output: LinearConfig::new(features, 1).init(device),
            height,
            width,
            channels,
        })
    }

    /// Output shape of every layer in evaluation order, batch axis first.
    pub fn layer_shapes(&self) -> Vec<LayerShape> {
        let [mut height, mut width, channels] = self.input_shape;
        let mut layers = vec![LayerShape::new("input", &[height, width, channels])];

        for (stage, &filters) in self.conv_filters.iter().enumerate() {
            let stage = stage + 1;
            for block in 1..=2 {
                let shape = [height, width, filters];
                layers.push(LayerShape::new(format!("stage{stage}.conv{block}"), &shape));
                layers.push(LayerShape::new(format!("stage{stage}.norm{block}"), &shape));
                layers.push(LayerShape::new(format!("stage{stage}.relu{block}"), &shape));
            }
            height /= 2;
            width /= 2;
            layers.push(LayerShape::new(
                format!("stage{stage}.pool"),
                &[height, width, filters],
            ));
        }

        let channels = self.conv_filters.last().copied().unwrap_or(channels);
        layers.push(LayerShape::new("flatten", &[height * width * channels]));

        for (index, &units) in self.dense_units.iter().enumerate() {
            let index = index + 1;
            layers.push(LayerShape::new(format!("dense{index}"), &[units]));
            layers.push(LayerShape::new(format!("dense{index}.norm"), &[units]));
            layers.push(LayerShape::new(format!("dense{index}.relu"), &[units]));
        }

        layers.push(LayerShape::new("output", &[1]));
        layers
    }
}

/// Builds the default architecture for frames of `input_shape`.
pub fn create_model<B: Backend>(
    input_shape: [usize; 3],
    device: &B::Device,
) -> crate::Result<SteeringModel<B>> {
    SteeringModelConfig::new()
        .with_input_shape(input_shape)
        .init(device)
}

impl<B: Backend> SteeringModel<B> {
    /// # Shapes
    ///   - Images `[batch_size, channels, height, width]`
    ///   - Output `[batch_size, 1]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [_, channels, height, width] = images.dims();
        debug_assert_eq!(
            [height, width, channels],
            self.input_shape(),
            "unexpected input shape"
        );

        let x = self
            .stages
            .iter()
            .fold(images, |x, stage| stage.forward(x));
        let x = x.flatten::<2>(1, 3);
        let x = self.dense.iter().fold(x, |x, block| block.forward(x));

        self.output.forward(x)
    }

    /// Mean squared error of the predicted steering angles.
    pub fn forward_loss(&self, batch: SteeringBatch<B>) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let output = self.forward(batch.images);
        let loss = MseLoss::new().forward(output.clone(), batch.targets, Reduction::Mean);

        (loss, output)
    }

    /// `[height, width, channels]` accepted by [`Self::forward`].
    pub fn input_shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    pub fn stages(&self) -> &[ConvStage<B>] {
        &self.stages
    }

    /// Width of the final layer.
    pub fn output_size(&self) -> usize {
        self.output.weight.val().dims()[1]
    }
}

/// One row of the layer listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerShape {
    pub name: String,
    /// Output dimensions without the batch axis.
    pub shape: Vec<usize>,
}

impl LayerShape {
    fn new(name: impl Into<String>, shape: &[usize]) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
        }
    }
}

impl fmt::Display for LayerShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16} (None", self.name)?;
        for dim in &self.shape {
            write!(f, ", {dim}")?;
        }
        write!(f, ")")
    }
}
