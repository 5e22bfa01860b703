use burn::backend::{wgpu::WgpuDevice, Autodiff, Wgpu};
use clap::Parser;
use config::{Cli, Hyperparameters};
use training::{train, TrainingConfig};

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod loss;
pub mod model;
pub mod module;
pub mod training;
pub mod zeroshot;

fn main() -> anyhow::Result<()> {
    type Backend = Wgpu<f32, i32>;
    type AutodiffBackend = Autodiff<Backend>;

    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    let hyperparameters = cli.resolve(Hyperparameters::recommended())?;
    let config = TrainingConfig::new(hyperparameters)
        .with_seed(cli.seed)
        .with_worker_count(cli.num_workers);

    let device = WgpuDevice::default();
    let report = train::<AutodiffBackend>(&cli.data_dir, config, device)?;

    tracing::info!(
        "finished after epoch {}, checkpoint {}, test top1 {:.3} top5 {:.3}",
        report.last_epoch,
        report.checkpoint.display(),
        report.test.top1,
        report.test.top5
    );

    Ok(())
}
