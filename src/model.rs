use burn::{prelude::*, tensor::activation::softmax};
use nn::{Dropout, DropoutConfig, Linear, LinearConfig};

use crate::{
    config::ModelVariant,
    data::{attributes::float_tensor, AttributeTable},
    module::backbone::{Backbone, BackboneConfig},
};

const MIN_PROBABILITY: f64 = 1.0e-6;

/// What every variant produces for a batch of images.
#[derive(Debug, Clone)]
pub struct ImsituOutput<B: Backend> {
    /// `[batch, sum(domains)]` logits, one slice per attribute.
    pub attributes: Tensor<B, 2>,
    /// `[batch, embed_dim]`, in the label embedding space.
    pub embedding: Tensor<B, 2>,
}

#[derive(Module, Debug)]
pub struct AttributeHead<B: Backend> {
    linear: Linear<B>,
}

#[derive(Module, Debug)]
pub struct EmbeddingHead<B: Backend> {
    linear: Linear<B>,
}

#[derive(Module, Debug)]
pub struct JointHead<B: Backend> {
    attributes: AttributeHead<B>,
    embedding: EmbeddingHead<B>,
}

/// Predicts the seen classes, then reads attributes off the class posterior.
#[derive(Module, Debug)]
pub struct IndirectHead<B: Backend> {
    classes: Linear<B>,
    /// Per attribute, `[seen_labels, value_width]` value distributions.
    distributions: Vec<Tensor<B, 2>>,
    domains: Vec<usize>,
}

impl<B: Backend> IndirectHead<B> {
    // Binary attributes come out as logit(p) and categorical ones as log(p),
    // which sigmoid and softmax map back onto the same probabilities.
    fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let posterior = softmax(self.classes.forward(features), 1);
        let [batch, _] = posterior.dims();

        let slices = self
            .distributions
            .iter()
            .zip(&self.domains)
            .map(|(distribution, &domain)| {
                let probs = posterior
                    .clone()
                    .matmul(distribution.clone())
                    .clamp(MIN_PROBABILITY, 1.0);

                if domain == 1 {
                    let present = probs.clone().slice([0..batch, 0..1]);
                    let absent = probs.slice([0..batch, 1..2]);
                    present.log() - absent.log()
                } else {
                    probs.log()
                }
            })
            .collect();

        Tensor::cat(slices, 1)
    }
}

#[derive(Module, Debug)]
pub enum Head<B: Backend> {
    Iap(IndirectHead<B>),
    Dap(AttributeHead<B>),
    Ours(JointHead<B>),
    Devise(EmbeddingHead<B>),
}

#[derive(Module, Debug)]
pub struct ImsituModel<B: Backend> {
    backbone: Backbone<B>,
    dropout: Dropout,
    head: Head<B>,
    attribute_width: usize,
    embed_dim: usize,
}

impl<B: Backend> ImsituModel<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> ImsituOutput<B> {
        let features = self.dropout.forward(self.backbone.forward(images));
        let [batch, _] = features.dims();
        let device = features.device();

        // Variants without one of the heads emit zeros, which scoring turns
        // into a channel that is constant across labels.
        let no_attributes = || Tensor::zeros([batch, self.attribute_width], &device);
        let no_embedding = || Tensor::zeros([batch, self.embed_dim], &device);

        let (attributes, embedding) = match &self.head {
            Head::Iap(head) => (head.forward(features), no_embedding()),
            Head::Dap(head) => (head.linear.forward(features), no_embedding()),
            Head::Ours(head) => (
                head.attributes.linear.forward(features.clone()),
                head.embedding.linear.forward(features),
            ),
            Head::Devise(head) => (no_attributes(), head.linear.forward(features)),
        };

        ImsituOutput {
            attributes,
            embedding,
        }
    }

    pub fn variant(&self) -> ModelVariant {
        match self.head {
            Head::Iap(_) => ModelVariant::Iap,
            Head::Dap(_) => ModelVariant::Dap,
            Head::Ours(_) => ModelVariant::Ours,
            Head::Devise(_) => ModelVariant::Devise,
        }
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub variant: ModelVariant,

    pub dropout: f64,

    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,
}

impl ModelConfig {
    /// Builds the model for the attribute taxonomy and embedding space of
    /// the seen (training) labels.
    pub fn init<B: Backend>(&self, seen: &AttributeTable, device: &B::Device) -> ImsituModel<B> {
        let features = self.backbone.feature_dim();
        let attribute_width = seen.attribute_width();
        let embed_dim = seen.embed_dim;

        let attribute_head = || AttributeHead {
            linear: LinearConfig::new(features, attribute_width).init(device),
        };
        let embedding_head = || EmbeddingHead {
            linear: LinearConfig::new(features, embed_dim).init(device),
        };

        let head = match self.variant {
            ModelVariant::Iap => Head::Iap(IndirectHead {
                classes: LinearConfig::new(features, seen.num_labels()).init(device),
                distributions: (0..seen.attributes.len())
                    .map(|att| {
                        let (data, shape) = seen.value_distribution(att);
                        float_tensor(data, shape, device)
                    })
                    .collect(),
                domains: seen.domains(),
            }),
            ModelVariant::Dap => Head::Dap(attribute_head()),
            ModelVariant::Ours => Head::Ours(JointHead {
                attributes: attribute_head(),
                embedding: embedding_head(),
            }),
            ModelVariant::Devise => Head::Devise(embedding_head()),
        };

        ImsituModel {
            backbone: self.backbone.init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            head,
            attribute_width,
            embed_dim,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{attributes::tests::taxonomy, Split};
    use burn::backend::NdArray;
    use burn::tensor::activation::sigmoid;

    type TestBackend = NdArray<f32>;

    fn config(variant: ModelVariant) -> ModelConfig {
        ModelConfig::new(variant, 0.0).with_backbone(BackboneConfig::new().with_width_mult(0.25))
    }

    #[test]
    fn every_variant_has_the_same_output_shape() {
        let device = Default::default();
        let seen = taxonomy().table(Split::Train).unwrap();

        for variant in ModelVariant::ALL {
            let model = config(variant).init::<TestBackend>(&seen, &device);
            let output = model.forward(Tensor::zeros([2, 3, 32, 32], &device));

            assert_eq!(model.variant(), variant);
            assert_eq!(output.attributes.dims(), [2, 4], "{variant}");
            assert_eq!(output.embedding.dims(), [2, 2], "{variant}");
        }
    }

    #[test]
    fn missing_heads_emit_zeros() {
        let device = Default::default();
        let seen = taxonomy().table(Split::Train).unwrap();
        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);

        let dap = config(ModelVariant::Dap).init::<TestBackend>(&seen, &device);
        let devise = config(ModelVariant::Devise).init::<TestBackend>(&seen, &device);

        let embedding: Vec<f32> = dap.forward(images.clone()).embedding.into_data().to_vec().unwrap();
        let attributes: Vec<f32> = devise.forward(images).attributes.into_data().to_vec().unwrap();
        assert!(embedding.iter().all(|&v| v == 0.0));
        assert!(attributes.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn indirect_attributes_are_valid_probabilities() {
        let device = Default::default();
        let seen = taxonomy().table(Split::Train).unwrap();
        let model = config(ModelVariant::Iap).init::<TestBackend>(&seen, &device);

        let attributes = model
            .forward(Tensor::ones([3, 3, 32, 32], &device))
            .attributes;

        let binary: Vec<f32> = sigmoid(attributes.clone().slice([0..3, 0..1]))
            .into_data()
            .to_vec()
            .unwrap();
        let categorical: Vec<f32> = attributes
            .slice([0..3, 1..4])
            .exp()
            .sum_dim(1)
            .into_data()
            .to_vec()
            .unwrap();

        assert!(binary.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(categorical.iter().all(|&total| (total - 1.0).abs() < 1e-3));
    }
}
