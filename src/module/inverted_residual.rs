use burn::prelude::*;

use super::conv_bn::{ConvBn, ConvBnConfig};

/// MobileNetV2 bottleneck: optional 1x1 expansion, 3x3 depthwise, linear 1x1
/// projection, with a skip connection when shapes line up.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBn<B>>,
    depthwise: ConvBn<B>,
    project: ConvBn<B>,
    residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.project.forward(self.depthwise.forward(x));

        if self.residual {
            input + x
        } else {
            x
        }
    }
}

#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    pub channels: [usize; 2],
    pub stride: usize,
    pub expand_ratio: usize,
}

impl InvertedResidualConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> InvertedResidual<B> {
        let [input, output] = self.channels;
        let hidden = input * self.expand_ratio;

        let expand = (self.expand_ratio != 1).then(|| ConvBnConfig::new([input, hidden]).init(device));

        InvertedResidual {
            expand,
            depthwise: ConvBnConfig::three_by_three([hidden, hidden], self.stride)
                .with_groups(hidden)
                .init(device),
            project: ConvBnConfig::new([hidden, output])
                .with_relu6(false)
                .init(device),
            residual: self.stride == 1 && input == output,
        }
    }
}
