use burn::prelude::*;
use nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};

use super::{
    conv_bn::{ConvBn, ConvBnConfig},
    inverted_residual::{InvertedResidual, InvertedResidualConfig},
};

const STEM_CHANNELS: usize = 32;
const LAST_CHANNELS: usize = 1280;

// t = expansion factor, c = output channels, n = repeats, s = first stride
const BOTTLENECKS: [[usize; 4]; 7] = [
    [1, 16, 1, 1],
    [6, 24, 2, 2],
    [6, 32, 3, 2],
    [6, 64, 4, 2],
    [6, 96, 3, 1],
    [6, 160, 3, 2],
    [6, 320, 1, 1],
];

/// Rounds `channels` to the nearest multiple of 8, never dropping more than
/// 10% below it.
fn make_divisible(channels: f64) -> usize {
    let divisor = 8.0;
    let rounded = ((channels + divisor / 2.0) / divisor).floor() * divisor;
    let rounded = rounded.max(divisor);

    if rounded < 0.9 * channels {
        (rounded + divisor) as usize
    } else {
        rounded as usize
    }
}

#[derive(Module, Debug)]
enum Stage<B: Backend> {
    Conv(ConvBn<B>),
    Bottleneck(InvertedResidual<B>),
}

impl<B: Backend> Stage<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Stage::Conv(conv) => conv.forward(x),
            Stage::Bottleneck(block) => block.forward(x),
        }
    }
}

/// MobileNetV2 feature extractor pooled to one vector per image.
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    stages: Vec<Stage<B>>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> Backbone<B> {
    /// `[batch, 3, h, w]` images to `[batch, feature_dim]` features.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .stages
            .iter()
            .fold(images, |x, stage| stage.forward(x));

        self.pool.forward(x).flatten(1, 3)
    }
}

#[derive(Config, Debug)]
pub struct BackboneConfig {
    #[config(default = 1.0)]
    pub width_mult: f64,
}

impl BackboneConfig {
    pub fn feature_dim(&self) -> usize {
        make_divisible(LAST_CHANNELS as f64 * self.width_mult.max(1.0))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let mut channels = make_divisible(STEM_CHANNELS as f64 * self.width_mult);
        let mut stages = vec![Stage::Conv(
            ConvBnConfig::three_by_three([3, channels], 2).init(device),
        )];

        for [t, c, n, s] in BOTTLENECKS {
            let output = make_divisible(c as f64 * self.width_mult);
            for repeat in 0..n {
                let stride = if repeat == 0 { s } else { 1 };
                stages.push(Stage::Bottleneck(
                    InvertedResidualConfig::new([channels, output], stride, t).init(device),
                ));
                channels = output;
            }
        }

        stages.push(Stage::Conv(
            ConvBnConfig::new([channels, self.feature_dim()]).init(device),
        ));

        Backbone {
            stages,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}
