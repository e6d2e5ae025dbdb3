//! ResNeXt-50 (32x4d) Architecture
//!
//! Same topology and parameter naming as torchvision's `resnext50_32x4d`,
//! with the final `fc` replaced by a dropout-then-linear head sized to the
//! triage label set. Field names follow torchvision so checkpoint keys map
//! one-to-one; the only renamed containers are the `nn.Sequential` indices
//! (`downsample.0/1`, `fc.1`), handled by the checkpoint key normalizer.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::labels::NUM_CLASSES;

/// Bottleneck output channels are `planes * EXPANSION`
const EXPANSION: usize = 4;

/// Channels produced by the stem
const STEM_CHANNELS: usize = 64;

/// Configuration for the ResNeXt classifier
#[derive(Config, Debug)]
pub struct ResNeXtConfig {
    /// Number of bottleneck blocks in each of the four stages
    #[config(default = "[3, 4, 6, 3]")]
    pub layers: [usize; 4],

    /// Cardinality of the grouped 3x3 convolutions
    #[config(default = "32")]
    pub groups: usize,

    /// Channels per group at the first stage
    #[config(default = "4")]
    pub width_per_group: usize,

    /// Number of output classes
    #[config(default = "4")]
    pub num_classes: usize,

    /// Dropout in front of the final linear layer
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl ResNeXtConfig {
    /// The architecture the triage checkpoints were trained with
    pub fn resnext50_32x4d() -> Self {
        Self::new().with_num_classes(NUM_CLASSES)
    }

    /// Features entering the classifier head
    pub fn feature_dim(&self) -> usize {
        512 * EXPANSION
    }

    /// Build the network with freshly initialised weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNeXt<B> {
        ResNeXt::new(self, device)
    }
}

/// Projection shortcut used when a block changes resolution or width
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// 1x1 reduce, grouped 3x3, 1x1 expand, with residual connection
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub conv3: Conv2d<B>,
    pub bn3: BatchNorm<B>,
    pub relu: Relu,
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn new(
        in_channels: usize,
        planes: usize,
        stride: usize,
        config: &ResNeXtConfig,
        device: &B::Device,
    ) -> Self {
        let width = planes * config.width_per_group / 64 * config.groups;
        let out_channels = planes * EXPANSION;

        let conv1 = Conv2dConfig::new([in_channels, width], [1, 1])
            .with_bias(false)
            .init(device);
        let conv2 = Conv2dConfig::new([width, width], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_groups(config.groups)
            .with_bias(false)
            .init(device);
        let conv3 = Conv2dConfig::new([width, out_channels], [1, 1])
            .with_bias(false)
            .init(device);

        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1,
            bn1: BatchNormConfig::new(width).init(device),
            conv2,
            bn2: BatchNormConfig::new(width).init(device),
            conv3,
            bn3: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            downsample,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.relu.forward(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));

        self.relu.forward(out + identity)
    }
}

/// Dropout followed by the class projection
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub dropout: Dropout,
    pub linear: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(self.dropout.forward(x))
    }
}

/// ResNeXt classifier
///
/// Architecture:
/// - 7x7/2 stem convolution, BatchNorm, ReLU, 3x3/2 max pooling
/// - four stages of bottleneck blocks (64, 128, 256, 512 planes)
/// - global average pooling
/// - dropout + linear head
#[derive(Module, Debug)]
pub struct ResNeXt<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub relu: Relu,
    pub maxpool: MaxPool2d,
    pub layer1: Vec<Bottleneck<B>>,
    pub layer2: Vec<Bottleneck<B>>,
    pub layer3: Vec<Bottleneck<B>>,
    pub layer4: Vec<Bottleneck<B>>,
    pub avgpool: AdaptiveAvgPool2d,
    pub fc: ClassifierHead<B>,
    num_classes: usize,
}

impl<B: Backend> ResNeXt<B> {
    pub fn new(config: &ResNeXtConfig, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([3, STEM_CHANNELS], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut in_channels = STEM_CHANNELS;
        let mut stage = |planes: usize, blocks: usize, stride: usize| {
            (0..blocks)
                .map(|i| {
                    let block_stride = if i == 0 { stride } else { 1 };
                    let block = Bottleneck::new(in_channels, planes, block_stride, config, device);
                    in_channels = planes * EXPANSION;
                    block
                })
                .collect::<Vec<_>>()
        };

        let layer1 = stage(64, config.layers[0], 1);
        let layer2 = stage(128, config.layers[1], 2);
        let layer3 = stage(256, config.layers[2], 2);
        let layer4 = stage(512, config.layers[3], 2);

        let fc = ClassifierHead {
            dropout: DropoutConfig::new(config.dropout).init(),
            linear: LinearConfig::new(config.feature_dim(), config.num_classes).init(device),
        };

        Self {
            conv1,
            bn1: BatchNormConfig::new(STEM_CHANNELS).init(device),
            relu: Relu::new(),
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let mut x = self.maxpool.forward(x);

        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.avgpool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.fc.forward(x)
    }

    /// Forward pass with softmax over the class dimension
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}
