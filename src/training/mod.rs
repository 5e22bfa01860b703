pub mod checkpoint;
pub mod early_stopping;
pub mod metrics;
pub mod session;

use std::{path::Path, sync::Arc};

use burn::{
    config::Config,
    data::dataloader::{DataLoader, DataLoaderBuilder},
    optim::{decay::WeightDecayConfig, AdamConfig},
    prelude::Backend,
    tensor::backend::AutodiffBackend,
};

use crate::{
    config::{log_hyperparameters, Hyperparameters},
    data::{AttributeTable, ImSitu, ImSituBatch, ImSituBatcher, ImSituDataset},
    error::ConfigError,
    loss::ZeroShotLoss,
    model::ModelConfig,
    module::backbone::BackboneConfig,
};

pub use checkpoint::Checkpoint;
pub use metrics::EvaluationSummary;
pub use session::{LabelTarget, TrainingSession};

#[derive(Config)]
pub struct TrainingConfig {
    pub hyperparameters: Hyperparameters,

    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,

    #[config(default = 50)]
    pub epoch_count: usize,

    #[config(default = 3)]
    pub patience: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 2)]
    pub worker_count: usize,

    #[config(default = 100)]
    pub log_every: usize,
}

/// What a finished run reports.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub last_epoch: usize,
    pub checkpoint: std::path::PathBuf,
    pub test: EvaluationSummary,
}

fn label_target<B: Backend>(table: &AttributeTable, device: &B::Device) -> LabelTarget<B> {
    LabelTarget {
        space: table.to_device(device),
        loss: ZeroShotLoss::new(table),
    }
}

/// Single-threaded so batches come out in dataset order on every pass.
fn evaluation_loader<B: Backend>(
    batcher: ImSituBatcher<B>,
    batch_size: usize,
    dataset: ImSituDataset,
) -> Arc<dyn DataLoader<ImSituBatch<B>>> {
    DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .build(dataset)
}

pub fn train<B: AutodiffBackend>(
    data_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> crate::error::Result<TrainingReport> {
    let hyperparameters = config.hyperparameters.clone();
    log_hyperparameters(&hyperparameters);

    let config_path = hyperparameters.save_dir.join("config.json");
    config
        .save(&config_path)
        .map_err(|source| ConfigError::SaveDir {
            path: config_path,
            source,
        })?;

    B::seed(config.seed);

    let (train, valid, test) = ImSitu::splits(data_dir)?;

    let model = ModelConfig::new(hyperparameters.model_variant, hyperparameters.dropout)
        .with_backbone(config.backbone.clone())
        .init::<B>(&train.attributes, &device);
    let optimizer = AdamConfig::new()
        .with_beta_1(hyperparameters.beta1)
        .with_beta_2(hyperparameters.beta2)
        .with_epsilon(hyperparameters.eps)
        .with_weight_decay(Some(WeightDecayConfig::new(hyperparameters.l2_weight)))
        .init();

    let mut session = TrainingSession::new(
        model,
        optimizer,
        hyperparameters.clone(),
        label_target(&train.attributes, &device),
        config.patience,
        config.log_every,
    );
    if let Some(ckpt) = &hyperparameters.ckpt {
        session = session.resume(&Checkpoint::read(ckpt)?, &device)?;
    }
    tracing::info!(
        "{} model, zero-shot channels: embeddings={} attributes={}",
        hyperparameters.model_variant,
        session.channels().embeddings,
        session.channels().attributes
    );

    let batcher_train = ImSituBatcher::<B>::training(device.clone());
    let batcher_eval = ImSituBatcher::<B::InnerBackend>::new(device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(hyperparameters.batch_size)
        .shuffle(config.seed)
        .num_workers(config.worker_count)
        .build(train.dataset);

    let dataloader_valid = evaluation_loader(
        batcher_eval.clone(),
        hyperparameters.batch_size,
        valid.dataset,
    );
    let dataloader_test =
        evaluation_loader(batcher_eval, hyperparameters.batch_size, test.dataset);

    let last_epoch = session.fit(
        config.epoch_count,
        || dataloader_train.iter(),
        || dataloader_valid.iter(),
        &label_target(&valid.attributes, &device),
    );

    let checkpoint = session.save(last_epoch)?;

    let test_summary =
        session.evaluate(dataloader_test.iter(), &label_target(&test.attributes, &device));
    tracing::info!(
        "--- TEST loss {:.3} top1 {:.3} top5 {:.3}",
        test_summary.loss,
        test_summary.top1,
        test_summary.top5
    );

    Ok(TrainingReport {
        last_epoch,
        checkpoint,
        test: test_summary,
    })
}
