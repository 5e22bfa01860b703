use std::{path::PathBuf, time::Instant};

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use crate::{
    config::Hyperparameters,
    data::{ImSituBatch, LabelSpace},
    error::CheckpointError,
    loss::ZeroShotLoss,
    model::ImsituModel,
    zeroshot::{self, Channels},
};

use super::{
    checkpoint::Checkpoint,
    early_stopping::{Decision, EarlyStopping},
    metrics::{BatchMean, EvaluationAccumulator, EvaluationSummary},
};

/// Labels of one split, on the device, with the loss that scores against them.
pub struct LabelTarget<B: Backend> {
    pub space: LabelSpace<B>,
    pub loss: ZeroShotLoss,
}

/// Owns everything that changes while training: the model, the optimizer state
/// and the stopping policy.
pub struct TrainingSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ImsituModel<B>, B>,
{
    model: ImsituModel<B>,
    optimizer: O,
    hyperparameters: Hyperparameters,
    channels: Channels,
    train_target: LabelTarget<B>,
    early_stopping: EarlyStopping,
    first_epoch: usize,
    log_every: usize,
}

impl<B, O> TrainingSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ImsituModel<B>, B>,
{
    pub fn new(
        model: ImsituModel<B>,
        optimizer: O,
        hyperparameters: Hyperparameters,
        train_target: LabelTarget<B>,
        patience: usize,
        log_every: usize,
    ) -> Self {
        let channels = Channels::resolve(
            hyperparameters.use_emb,
            hyperparameters.use_att,
            model.variant(),
        );

        Self {
            model,
            optimizer,
            hyperparameters,
            channels,
            train_target,
            early_stopping: EarlyStopping::new(patience),
            first_epoch: 1,
            log_every,
        }
    }

    pub fn model(&self) -> &ImsituModel<B> {
        &self.model
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Continues from a checkpoint: parameters, optimizer state and the epoch
    /// counter all pick up where it stopped.
    pub fn resume(
        mut self,
        checkpoint: &Checkpoint,
        device: &B::Device,
    ) -> Result<Self, CheckpointError> {
        let (model, optimizer) = checkpoint.restore(self.model, self.optimizer, device)?;
        let patience = self.early_stopping.patience();

        self.model = model;
        self.optimizer = optimizer;
        self.early_stopping = EarlyStopping::resumed(patience, checkpoint.epoch);
        self.first_epoch = checkpoint.epoch + 1;

        tracing::info!("resumed from epoch {}", checkpoint.epoch);

        Ok(self)
    }

    /// Validation-then-training epochs until `epoch_count` or early stopping.
    /// Returns the last epoch entered.
    pub fn fit<T, V>(
        &mut self,
        epoch_count: usize,
        train_batches: impl Fn() -> T,
        valid_batches: impl Fn() -> V,
        valid_target: &LabelTarget<B::InnerBackend>,
    ) -> usize
    where
        T: Iterator<Item = ImSituBatch<B>>,
        V: Iterator<Item = ImSituBatch<B::InnerBackend>>,
    {
        let mut last_epoch = self.first_epoch.saturating_sub(1);

        for epoch in self.first_epoch..=epoch_count {
            last_epoch = epoch;

            let summary = self.evaluate(valid_batches(), valid_target);
            tracing::info!(
                "--- E{:2} VAL ({:.3} s/batch) loss {:.3} top1 {:.3} top5 {:.3}",
                epoch,
                summary.seconds_per_batch,
                summary.loss,
                summary.top1,
                summary.top5
            );

            if self.early_stopping.update(epoch, summary.top5) == Decision::Stop {
                tracing::info!(
                    "Early stopping at epoch {}, best top5 {:.3} at epoch {}",
                    epoch,
                    self.early_stopping.best(),
                    self.early_stopping.best_epoch()
                );
                break;
            }

            let loss = self.train_epoch(epoch, train_batches());
            tracing::info!("overall loss was {:.3}", loss);
        }

        last_epoch
    }

    /// Scores every batch without dropout or gradient tracking.
    pub fn evaluate(
        &self,
        batches: impl Iterator<Item = ImSituBatch<B::InnerBackend>>,
        target: &LabelTarget<B::InnerBackend>,
    ) -> EvaluationSummary {
        let model = self.model.valid();
        let start = Instant::now();
        let mut accumulator = EvaluationAccumulator::default();

        for batch in batches {
            let output = model.forward(batch.images);
            let loss: f32 = target
                .loss
                .forward(output.clone(), &target.space, &batch.labels)
                .total()
                .into_scalar()
                .elem();
            let accuracy =
                zeroshot::evaluate(output, &target.space, self.channels, &batch.labels);

            accumulator.update(loss as f64, accuracy);
        }

        accumulator.summary(start.elapsed().as_secs_f64())
    }

    /// One pass over the training batches; returns the mean batch loss.
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        batches: impl Iterator<Item = ImSituBatch<B>>,
    ) -> f64 {
        let start = Instant::now();
        let mut losses = BatchMean::default();

        for (b, batch) in batches.enumerate() {
            losses.update(self.train_batch(batch) as f64);

            if self.log_every > 0 && b % self.log_every == 0 && b >= self.log_every {
                tracing::info!(
                    "e{:2}b{:5} Cost {:.3} , {:.3} s/batch",
                    epoch,
                    b,
                    losses.mean(),
                    start.elapsed().as_secs_f64() / (b + 1) as f64
                );
            }
        }

        losses.mean()
    }

    pub fn train_batch(&mut self, batch: ImSituBatch<B>) -> f32 {
        let output = self.model.forward(batch.images);
        let loss = self
            .train_target
            .loss
            .forward(output, &self.train_target.space, &batch.labels)
            .total();
        let value: f32 = loss.clone().into_scalar().elem();

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .optimizer
            .step(self.hyperparameters.lr, self.model.clone(), grads);

        value
    }

    pub fn save(&self, epoch: usize) -> Result<PathBuf, CheckpointError> {
        let checkpoint =
            Checkpoint::capture(&self.hyperparameters, epoch, &self.model, &self.optimizer)?;
        let path = checkpoint.write(&self.hyperparameters.save_dir)?;
        tracing::info!("saved checkpoint {}", path.display());

        Ok(path)
    }
}
