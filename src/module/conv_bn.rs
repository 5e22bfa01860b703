use burn::{nn::conv::Conv2d, prelude::*, tensor::activation::relu};
use nn::{conv::Conv2dConfig, BatchNorm, BatchNormConfig, PaddingConfig2d};

/// Convolution followed by batch norm and, unless it is a linear
/// bottleneck projection, a ReLU6.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    relu6: bool,
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm.forward(self.conv.forward(x));

        if self.relu6 {
            relu(x).clamp_max(6)
        } else {
            x
        }
    }
}

#[derive(Config, Debug)]
pub struct ConvBnConfig {
    channels: [usize; 2],

    #[config(default = "[1, 1]")]
    kernel_size: [usize; 2],

    #[config(default = "[1, 1]")]
    stride: [usize; 2],

    #[config(default = 1)]
    groups: usize,

    #[config(default = true)]
    relu6: bool,
}

impl ConvBnConfig {
    /// 3x3 convolution padded to keep the spatial size at stride 1.
    pub fn three_by_three(channels: [usize; 2], stride: usize) -> Self {
        Self::new(channels)
            .with_kernel_size([3, 3])
            .with_stride([stride, stride])
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBn<B> {
        let padding = PaddingConfig2d::Explicit(self.kernel_size[0] / 2, self.kernel_size[1] / 2);

        ConvBn {
            conv: Conv2dConfig::new(self.channels, self.kernel_size)
                .with_stride(self.stride)
                .with_padding(padding)
                .with_groups(self.groups)
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(self.channels[1]).init(device),
            relu6: self.relu6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn three_by_three_halves_at_stride_two() {
        let device = Default::default();
        let block = ConvBnConfig::three_by_three([3, 8], 2).init::<TestBackend>(&device);

        let out = block.forward(Tensor::ones([2, 3, 16, 16], &device));

        assert_eq!(out.dims(), [2, 8, 8, 8]);
    }

    #[test]
    fn activation_is_clamped_to_six() {
        let device = Default::default();
        let block = ConvBnConfig::new([4, 4]).init::<TestBackend>(&device);

        let out = block.forward(Tensor::random(
            [1, 4, 4, 4],
            burn::tensor::Distribution::Normal(0.0, 100.0),
            &device,
        ));
        let values = out.into_data().to_vec::<f32>().unwrap();

        assert!(values.iter().all(|&v| (0.0..=6.0).contains(&v)));
    }
}
