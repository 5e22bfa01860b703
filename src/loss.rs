use burn::{
    nn::loss::BinaryCrossEntropyLossConfig,
    prelude::*,
    tensor::activation::{log_sigmoid, log_softmax},
};

use crate::{
    data::{
        attributes::{float_tensor, UNKNOWN_VALUE},
        AttributeTable, LabelSpace,
    },
    model::ImsituOutput,
};

#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    pub attribute: Tensor<B, 1>,
    pub embedding: Tensor<B, 1>,
}

impl<B: Backend> LossOutput<B> {
    /// Unweighted sum of both terms.
    pub fn total(self) -> Tensor<B, 1> {
        self.attribute + self.embedding
    }
}

/// Attribute classification loss plus embedding loss against the labels of
/// one split.
#[derive(Debug, Clone)]
pub struct ZeroShotLoss {
    domains: Vec<usize>,
    values: Vec<Vec<i64>>,
}

impl ZeroShotLoss {
    pub fn new(table: &AttributeTable) -> Self {
        Self {
            domains: table.domains(),
            values: table.values.clone(),
        }
    }

    pub fn forward<B: Backend>(
        &self,
        output: ImsituOutput<B>,
        label_space: &LabelSpace<B>,
        gold: &[usize],
    ) -> LossOutput<B> {
        LossOutput {
            attribute: self.attribute_loss(output.attributes, gold),
            embedding: embedding_loss(output.embedding, label_space, gold),
        }
    }

    /// Per attribute, binary cross-entropy with logits or categorical
    /// cross-entropy, averaged over the examples whose label has a known value
    /// and summed over attributes.
    pub fn attribute_loss<B: Backend>(
        &self,
        attributes: Tensor<B, 2>,
        gold: &[usize],
    ) -> Tensor<B, 1> {
        let [batch, _] = attributes.dims();
        let device = attributes.device();
        let mut total = Tensor::zeros([1], &device);
        let mut start = 0;

        for (att, &domain) in self.domains.iter().enumerate() {
            let logits = attributes.clone().slice([0..batch, start..start + domain]);
            start += domain;

            let values: Vec<i64> = gold.iter().map(|&label| self.values[label][att]).collect();
            let mask: Vec<f32> = values
                .iter()
                .map(|&value| if value == UNKNOWN_VALUE { 0.0 } else { 1.0 })
                .collect();
            let known: f32 = mask.iter().sum();
            if known == 0.0 {
                continue;
            }
            let mask = float_tensor::<B>(mask, [batch, 1], &device);

            let per_example = if domain == 1 {
                let target: Vec<f32> = values
                    .iter()
                    .map(|&value| if value == 1 { 1.0 } else { 0.0 })
                    .collect();
                let target = float_tensor::<B>(target, [batch, 1], &device);
                binary_cross_entropy_with_logits(logits, target)
            } else {
                let mut target = vec![0.0; batch * domain];
                for (row, &value) in values.iter().enumerate() {
                    if value != UNKNOWN_VALUE {
                        target[row * domain + value as usize] = 1.0;
                    }
                }
                let target = float_tensor::<B>(target, [batch, domain], &device);
                (log_softmax(logits, 1) * target).sum_dim(1).neg()
            };

            total = total + (per_example * mask).sum().div_scalar(known);
        }

        total
    }
}

/// Binary cross-entropy of `embedding · label_embeddingsᵀ` against the
/// one-hot gold labels, averaged over every (example, label) pair.
pub fn embedding_loss<B: Backend>(
    embedding: Tensor<B, 2>,
    label_space: &LabelSpace<B>,
    gold: &[usize],
) -> Tensor<B, 1> {
    let device = embedding.device();
    let logits = embedding.matmul(label_space.embeddings.clone().transpose());
    let [batch, num_labels] = logits.dims();

    let mut one_hot = vec![0i64; batch * num_labels];
    for (row, &label) in gold.iter().enumerate() {
        one_hot[row * num_labels + label] = 1;
    }
    let targets = Tensor::<B, 2, Int>::from_data(
        TensorData::new(one_hot, [batch, num_labels]).convert::<B::IntElem>(),
        &device,
    );

    BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(&device)
        .forward(logits, targets)
}

// Unreduced, so the attribute loss can mask examples with unknown values.
fn binary_cross_entropy_with_logits<B: Backend>(
    logits: Tensor<B, 2>,
    target: Tensor<B, 2>,
) -> Tensor<B, 2> {
    let positive = target.clone() * log_sigmoid(logits.clone());
    let negative = target.neg().add_scalar(1.0) * log_sigmoid(logits.neg());

    (positive + negative).neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{attributes::tests::taxonomy, Split};
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::ElementConversion,
    };

    type TestBackend = NdArray<f32>;

    fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar().elem()
    }

    fn tensor<B: Backend>(rows: &[&[f32]]) -> Tensor<B, 2> {
        let data: Vec<f32> = rows.iter().flat_map(|row| row.iter().copied()).collect();
        float_tensor(data, [rows.len(), rows[0].len()], &Default::default())
    }

    #[test]
    fn binary_loss_matches_closed_form() {
        let loss = binary_cross_entropy_with_logits(
            tensor::<TestBackend>(&[&[0.0, 2.0]]),
            tensor::<TestBackend>(&[&[1.0, 0.0]]),
        );
        let values: Vec<f32> = loss.into_data().to_vec().unwrap();

        assert!((values[0] - std::f32::consts::LN_2).abs() < 1e-5);
        assert!((values[1] - (1.0 + 2.0f32.exp()).ln()).abs() < 1e-4);
    }

    #[test]
    fn unknown_values_are_masked_out() {
        let val = taxonomy().table(Split::Valid).unwrap();
        let criterion = ZeroShotLoss::new(&val);

        // "reading" has no body_part; "waving" has no motion
        let logits = tensor::<TestBackend>(&[&[0.0, 0.0, 0.0, 0.0]]);
        let reading = scalar(criterion.attribute_loss(logits.clone(), &[1]));
        let waving = scalar(criterion.attribute_loss(logits, &[2]));

        assert!((reading - std::f32::consts::LN_2).abs() < 1e-5);
        assert!((waving - 3.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn confident_correct_attributes_cost_little() {
        let val = taxonomy().table(Split::Valid).unwrap();
        let criterion = ZeroShotLoss::new(&val);

        let right = tensor::<TestBackend>(&[&[8.0, -8.0, -8.0, 8.0]]);
        let wrong = tensor::<TestBackend>(&[&[-8.0, 8.0, -8.0, -8.0]]);

        assert!(scalar(criterion.attribute_loss(right.clone(), &[0])) < 1e-2);
        assert!(
            scalar(criterion.attribute_loss(wrong, &[0]))
                > scalar(criterion.attribute_loss(right, &[0]))
        );
    }

    #[test]
    fn embedding_loss_prefers_the_gold_label() {
        let device = Default::default();
        let val = taxonomy().table(Split::Valid).unwrap();
        let space = val.to_device::<TestBackend>(&device);

        let toward_waving = tensor::<TestBackend>(&[&[4.0, 4.0]]);
        let at_waving = scalar(embedding_loss(toward_waving.clone(), &space, &[2]));
        let at_reading = scalar(embedding_loss(toward_waving, &space, &[1]));

        assert!(at_waving < at_reading);
    }

    #[test]
    fn embedding_loss_is_mean_binary_cross_entropy() {
        let device = Default::default();
        let val = taxonomy().table(Split::Valid).unwrap();
        let space = val.to_device::<TestBackend>(&device);

        // a zero embedding scores every label at logit 0
        let loss = scalar(embedding_loss(tensor(&[&[0.0, 0.0]]), &space, &[1]));

        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn total_loss_backpropagates() {
        type Train = Autodiff<TestBackend>;
        let device = Default::default();
        let train = taxonomy().table(Split::Train).unwrap();
        let space = train.to_device::<Train>(&device);
        let criterion = ZeroShotLoss::new(&train);

        let attributes = tensor::<Train>(&[&[0.5, 0.1, 0.2, 0.3], &[-0.5, 0.3, 0.2, 0.1]])
            .require_grad();
        let embedding = tensor::<Train>(&[&[0.1, 0.2], &[0.3, -0.4]]).require_grad();

        let loss = criterion
            .forward(
                ImsituOutput {
                    attributes: attributes.clone(),
                    embedding: embedding.clone(),
                },
                &space,
                &[0, 1],
            )
            .total();
        let value: f32 = loss.clone().into_scalar().elem();
        let grads = loss.backward();

        assert!(value.is_finite() && value > 0.0);
        assert!(attributes.grad(&grads).is_some());
        assert!(embedding.grad(&grads).is_some());
    }
}
