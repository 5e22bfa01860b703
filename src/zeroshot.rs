//! Zero-shot scoring: fuse the embedding and attribute evidence for every
//! candidate label into one distribution per image, then rank the gold label.
//!
//! Attribute probabilities live in attribute-value space (one sigmoid per
//! binary attribute, one softmax per categorical attribute). They reach label
//! space through each label's ground-truth value: a label whose value is `v`
//! receives `P(value = v)`, a label with a binary attribute absent receives
//! `1 - p`, and a label whose value is unknown receives the average over all
//! values. Every channel is then a `[batch, labels]` likelihood and channels
//! are multiplied together as independent evidence.

use burn::{
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

use crate::{config::ModelVariant, data::LabelSpace, model::ImsituOutput};

pub const NORMALIZATION_EPS: f64 = 1.0e-12;
/// Floor for a channel probability before taking its log.
pub const MIN_PROBABILITY: f64 = 1.0e-30;
pub const TOP_K: usize = 5;

/// Which evidence channels take part in scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub embeddings: bool,
    pub attributes: bool,
}

impl Channels {
    /// The channels a variant has trained heads for.
    pub fn for_variant(variant: ModelVariant) -> Self {
        match variant {
            ModelVariant::Ours => Self {
                embeddings: true,
                attributes: true,
            },
            ModelVariant::Iap | ModelVariant::Dap => Self {
                embeddings: false,
                attributes: true,
            },
            ModelVariant::Devise => Self {
                embeddings: true,
                attributes: false,
            },
        }
    }

    /// Explicit toggles win; with neither set the variant decides.
    pub fn resolve(use_emb: bool, use_att: bool, variant: ModelVariant) -> Self {
        if use_emb || use_att {
            Self {
                embeddings: use_emb,
                attributes: use_att,
            }
        } else {
            Self::for_variant(variant)
        }
    }
}

/// `sigmoid(embedding · label_embeddingsᵀ)`, `[batch, labels]`.
pub fn embedding_probabilities<B: Backend>(
    embedding: Tensor<B, 2>,
    label_embeddings: Tensor<B, 2>,
) -> Tensor<B, 2> {
    sigmoid(embedding.matmul(label_embeddings.transpose()))
}

/// Splits the attribute representation into per-attribute probabilities in
/// attribute-value space: `[batch, 1]` for binary attributes, `[batch, k]`
/// for categorical ones.
pub fn attribute_probabilities<B: Backend>(
    attributes: Tensor<B, 2>,
    domains: &[usize],
) -> Vec<Tensor<B, 2>> {
    let [batch, width] = attributes.dims();
    debug_assert_eq!(width, domains.iter().sum::<usize>());

    let mut start = 0;
    domains
        .iter()
        .map(|&domain| {
            let slice = attributes.clone().slice([0..batch, start..start + domain]);
            start += domain;

            if domain == 1 {
                sigmoid(slice)
            } else {
                softmax(slice, 1)
            }
        })
        .collect()
}

/// Gathers attribute-value probabilities into label space, one `[batch,
/// labels]` tensor per attribute.
pub fn label_probabilities<B: Backend>(
    attribute_probs: Vec<Tensor<B, 2>>,
    label_space: &LabelSpace<B>,
) -> Vec<Tensor<B, 2>> {
    attribute_probs
        .into_iter()
        .zip(&label_space.encodings)
        .zip(&label_space.domains)
        .map(|((probs, encoding), &domain)| {
            let probs = if domain == 1 {
                // (present, absent), matching the encoding rows
                Tensor::cat(vec![probs.clone(), probs.neg().add_scalar(1.0)], 1)
            } else {
                probs
            };
            probs.matmul(encoding.clone())
        })
        .collect()
}

/// Multiplies the channels elementwise and renormalizes every row to sum to 1.
///
/// The product is taken in log space and shifted by the row maximum, so many
/// small channels do not underflow to an all-zero row.
pub fn combine<B: Backend>(channels: Vec<Tensor<B, 2>>) -> Tensor<B, 2> {
    let log_product = channels
        .into_iter()
        .map(|channel| channel.clamp_min(MIN_PROBABILITY).log())
        .reduce(|sum, channel| sum + channel)
        .expect("scoring needs at least one evidence channel");
    let row_max = log_product.clone().max_dim(1);
    let product = (log_product - row_max).exp();
    let denominator = product.clone().sum_dim(1).add_scalar(NORMALIZATION_EPS);

    product / denominator
}

/// Per-label probabilities for a batch of model outputs, `[batch, labels]`.
pub fn label_distribution<B: Backend>(
    output: ImsituOutput<B>,
    label_space: &LabelSpace<B>,
    channels: Channels,
) -> Tensor<B, 2> {
    let [batch, _] = output.embedding.dims();
    let device = output.embedding.device();
    let mut evidence = vec![];

    if channels.embeddings {
        evidence.push(embedding_probabilities(
            output.embedding,
            label_space.embeddings.clone(),
        ));
    }
    if channels.attributes {
        let attribute_probs = attribute_probabilities(output.attributes, &label_space.domains);
        evidence.extend(label_probabilities(attribute_probs, label_space));
    }
    if evidence.is_empty() {
        evidence.push(Tensor::ones([batch, label_space.num_labels()], &device));
    }

    combine(evidence)
}

/// 1-based rank of each gold label; ties go to the lower label id.
pub fn gold_ranks<B: Backend>(probs: Tensor<B, 2>, gold: &[usize]) -> Vec<usize> {
    let [batch, num_labels] = probs.dims();
    debug_assert_eq!(batch, gold.len());
    let values: Vec<f32> = probs.into_data().iter::<f32>().collect();

    values
        .chunks(num_labels)
        .zip(gold)
        .map(|(row, &label)| rank_in_row(row, label))
        .collect()
}

fn rank_in_row(row: &[f32], label: usize) -> usize {
    let target = row[label];
    let ahead = row
        .iter()
        .enumerate()
        .filter(|&(j, &p)| p > target || (p == target && j < label))
        .count();

    ahead + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TopKAccuracy {
    pub top1: f64,
    pub top5: f64,
}

impl TopKAccuracy {
    pub fn from_ranks(ranks: &[usize]) -> Self {
        if ranks.is_empty() {
            return Self::default();
        }

        let fraction = |k: usize| {
            ranks.iter().filter(|&&rank| rank <= k).count() as f64 / ranks.len() as f64
        };

        Self {
            top1: fraction(1),
            top5: fraction(TOP_K),
        }
    }
}

/// Runs the whole scoring procedure on one batch.
pub fn evaluate<B: Backend>(
    output: ImsituOutput<B>,
    label_space: &LabelSpace<B>,
    channels: Channels,
    gold: &[usize],
) -> TopKAccuracy {
    let probs = label_distribution(output, label_space, channels);
    TopKAccuracy::from_ranks(&gold_ranks(probs, gold))
}
