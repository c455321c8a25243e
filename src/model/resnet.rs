//! ResNet backbone with bottleneck blocks
//!
//! Layout and parameter names follow torchvision's `resnet50` (stride on the
//! 3x3 convolution, expansion 4, `layerN.M.downsample`) so pretrained weights
//! map onto the modules field by field.
//!
//! Architecture (`blocks = [3, 4, 6, 3]`, width 64):
//! - Stem: 7x7 conv stride 2, BatchNorm, ReLU, 3x3 max pool stride 2
//! - 4 stages of bottleneck blocks, widths 64/128/256/512, outputs 256..2048
//! - Global average pooling and a linear classifier
//! - Optional auxiliary classifier on the pooled stage-3 features

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Blocks per stage of ResNet-50
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// Channel expansion of a bottleneck block's last convolution
pub const EXPANSION: usize = 4;

/// Configuration for [`SceneClassifier`]
#[derive(Config, Debug, PartialEq)]
pub struct ResNetConfig {
    /// Bottleneck blocks in each of the four stages
    pub blocks: [usize; 4],
    /// Number of output classes
    pub num_classes: usize,
    /// Width of the first stage; 64 for the standard network
    #[config(default = "64")]
    pub base_width: usize,
    /// Attach the auxiliary classifier to stage 3
    #[config(default = "false")]
    pub aux_head: bool,
}

impl ResNetConfig {
    /// Standard ResNet-50
    pub fn resnet50(num_classes: usize) -> Self {
        Self::new(RESNET50_BLOCKS, num_classes)
    }

    /// Same architecture with a different number of outputs
    pub fn for_classes(&self, num_classes: usize) -> Self {
        Self {
            num_classes,
            ..self.clone()
        }
    }

    /// Channels entering the classifier
    pub fn feature_dim(&self) -> usize {
        self.base_width * 8 * EXPANSION
    }

    /// Channels entering the auxiliary classifier
    pub fn aux_feature_dim(&self) -> usize {
        self.base_width * 4 * EXPANSION
    }

    /// Initialize the backbone alone
    pub fn init_backbone<B: Backend>(&self, device: &B::Device) -> ResNetBackbone<B> {
        ResNetBackbone::new(self, device)
    }

    /// Initialize the full classifier with random weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> SceneClassifier<B> {
        SceneClassifier::new(self.init_backbone(device), self, device)
    }
}

/// 1x1 projection on the residual path when shape changes
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// 1x1 reduce, 3x3, 1x1 expand, with a residual connection
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub conv3: Conv2d<B>,
    pub bn3: BatchNorm<B>,
    pub downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> Bottleneck<B> {
    pub fn new(in_channels: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = width * EXPANSION;

        let downsample = if stride != 1 || in_channels != out_channels {
            Some(Downsample::new(in_channels, out_channels, stride, device))
        } else {
            None
        };

        Self {
            conv1: Conv2dConfig::new([in_channels, width], [1, 1])
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(width).init(device),
            conv2: Conv2dConfig::new([width, width], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(width).init(device),
            conv3: Conv2dConfig::new([width, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            bn3: BatchNormConfig::new(out_channels).init(device),
            downsample,
            relu: Relu::new(),
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

fn make_stage<B: Backend>(
    in_channels: usize,
    width: usize,
    blocks: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<Bottleneck<B>> {
    let mut stage = Vec::with_capacity(blocks);
    stage.push(Bottleneck::new(in_channels, width, stride, device));
    for _ in 1..blocks {
        stage.push(Bottleneck::new(width * EXPANSION, width, 1, device));
    }
    stage
}

/// Convolutional feature extractor (everything before the classifier)
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    maxpool: MaxPool2d,
    pub layer1: Vec<Bottleneck<B>>,
    pub layer2: Vec<Bottleneck<B>>,
    pub layer3: Vec<Bottleneck<B>>,
    pub layer4: Vec<Bottleneck<B>>,
    relu: Relu,
}

/// Feature maps of the last two stages
pub struct BackboneFeatures<B: Backend> {
    pub stage3: Tensor<B, 4>,
    pub stage4: Tensor<B, 4>,
}

impl<B: Backend> ResNetBackbone<B> {
    pub fn new(config: &ResNetConfig, device: &B::Device) -> Self {
        let base = config.base_width;
        let [b1, b2, b3, b4] = config.blocks;

        Self {
            conv1: Conv2dConfig::new([3, base], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(base).init(device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: make_stage(base, base, b1, 1, device),
            layer2: make_stage(base * EXPANSION, base * 2, b2, 2, device),
            layer3: make_stage(base * 2 * EXPANSION, base * 4, b3, 2, device),
            layer4: make_stage(base * 4 * EXPANSION, base * 8, b4, 2, device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> BackboneFeatures<B> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(input)));
        let x = self.maxpool.forward(x);

        let x = run_stage(&self.layer1, x);
        let x = run_stage(&self.layer2, x);
        let stage3 = run_stage(&self.layer3, x);
        let stage4 = run_stage(&self.layer4, stage3.clone());

        BackboneFeatures { stage3, stage4 }
    }
}

fn run_stage<B: Backend>(stage: &[Bottleneck<B>], x: Tensor<B, 4>) -> Tensor<B, 4> {
    stage.iter().fold(x, |x, block| block.forward(x))
}

/// Pool `[n, c, h, w]` to `[n, c]`
fn global_pool<B: Backend>(pool: &AdaptiveAvgPool2d, x: Tensor<B, 4>) -> Tensor<B, 2> {
    let x = pool.forward(x);
    let [batch_size, channels, _, _] = x.dims();
    x.reshape([batch_size, channels])
}

/// Auxiliary classifier on stage-3 features
#[derive(Module, Debug)]
pub struct AuxHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
}

impl<B: Backend> AuxHead<B> {
    fn new(in_features: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_features, num_classes).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.fc.forward(global_pool(&self.pool, x))
    }
}

/// Logits of a training forward pass
#[derive(Debug, Clone)]
pub struct ClassifierOutput<B: Backend> {
    /// Primary logits [batch_size, num_classes]
    pub logits: Tensor<B, 2>,
    /// Auxiliary logits, present when the model has an auxiliary head
    pub aux_logits: Option<Tensor<B, 2>>,
}

/// ResNet backbone with a scene classification head
#[derive(Module, Debug)]
pub struct SceneClassifier<B: Backend> {
    pub backbone: ResNetBackbone<B>,
    pool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
    pub aux: Option<AuxHead<B>>,
}

impl<B: Backend> SceneClassifier<B> {
    /// Attach a freshly initialized head to `backbone`
    pub fn new(backbone: ResNetBackbone<B>, config: &ResNetConfig, device: &B::Device) -> Self {
        let aux = if config.aux_head {
            Some(AuxHead::new(config.aux_feature_dim(), config.num_classes, device))
        } else {
            None
        };

        Self {
            backbone,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(config.feature_dim(), config.num_classes).init(device),
            aux,
        }
    }

    /// Primary logits [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(x);
        self.fc.forward(global_pool(&self.pool, features.stage4))
    }

    /// Primary and auxiliary logits, used while training
    pub fn forward_train(&self, x: Tensor<B, 4>) -> ClassifierOutput<B> {
        let features = self.backbone.forward(x);
        let aux_logits = self.aux.as_ref().map(|aux| aux.forward(features.stage3));
        let logits = self.fc.forward(global_pool(&self.pool, features.stage4));

        ClassifierOutput { logits, aux_logits }
    }

    /// `[in_features, num_classes]` of the classification layer
    pub fn head_dims(&self) -> [usize; 2] {
        self.fc.weight.val().dims()
    }

    pub fn num_classes(&self) -> usize {
        self.head_dims()[1]
    }

    pub fn has_aux_head(&self) -> bool {
        self.aux.is_some()
    }
}
