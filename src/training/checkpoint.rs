use std::{
    fs,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use burn::{
    module::Module,
    optim::Optimizer,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::{config::Hyperparameters, error::CheckpointError, model::ImsituModel};

type BytesRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Everything needed to resume a run, written as one JSON document. Model and
/// optimizer records are burn binary records, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub hyperparameters: Hyperparameters,
    pub epoch: usize,
    model: String,
    optimizer: String,
}

fn recorder_error(err: burn::record::RecorderError) -> CheckpointError {
    CheckpointError::Recorder(format!("{err:?}"))
}

impl Checkpoint {
    pub fn capture<B, O>(
        hyperparameters: &Hyperparameters,
        epoch: usize,
        model: &ImsituModel<B>,
        optimizer: &O,
    ) -> Result<Self, CheckpointError>
    where
        B: AutodiffBackend,
        O: Optimizer<ImsituModel<B>, B>,
    {
        let recorder = BytesRecorder::default();
        let model = Recorder::<B>::record(&recorder, model.clone().into_record(), ())
            .map_err(recorder_error)?;
        let optimizer =
            Recorder::<B>::record(&recorder, optimizer.to_record(), ()).map_err(recorder_error)?;

        Ok(Self {
            hyperparameters: hyperparameters.clone(),
            epoch,
            model: STANDARD.encode(model),
            optimizer: STANDARD.encode(optimizer),
        })
    }

    pub fn file_name(epoch: usize) -> String {
        format!("ckpt_{epoch}.json")
    }

    /// Writes `ckpt_<epoch>.json` under `dir` through a temporary file, so a
    /// reader never sees a partial checkpoint.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, CheckpointError> {
        let path = dir.join(Self::file_name(self.epoch));
        let partial = path.with_extension("json.partial");
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CheckpointError::Io { path, source }
        };

        let json = serde_json::to_vec(self)?;
        fs::write(&partial, json).map_err(io_error(&partial))?;
        fs::rename(&partial, &path).map_err(io_error(&path))?;

        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self, CheckpointError> {
        let raw = fs::read(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_json::from_slice(&raw)?)
    }

    /// Loads the saved parameters and optimizer state into freshly built
    /// counterparts.
    pub fn restore<B, O>(
        &self,
        model: ImsituModel<B>,
        optimizer: O,
        device: &B::Device,
    ) -> Result<(ImsituModel<B>, O), CheckpointError>
    where
        B: AutodiffBackend,
        O: Optimizer<ImsituModel<B>, B>,
    {
        let recorder = BytesRecorder::default();
        let model_record = Recorder::<B>::load(&recorder, STANDARD.decode(&self.model)?, device)
            .map_err(recorder_error)?;
        let optimizer_record =
            Recorder::<B>::load(&recorder, STANDARD.decode(&self.optimizer)?, device)
                .map_err(recorder_error)?;

        Ok((
            model.load_record(model_record),
            optimizer.load_record(optimizer_record),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ModelVariant,
        data::{attributes::tests::taxonomy, Split},
        model::ModelConfig,
        module::backbone::BackboneConfig,
    };
    use burn::{
        backend::{Autodiff, NdArray},
        optim::AdamConfig,
        prelude::*,
    };

    type TestBackend = Autodiff<NdArray<f32>>;

    fn model(device: &<TestBackend as Backend>::Device) -> ImsituModel<TestBackend> {
        let seen = taxonomy().table(Split::Train).unwrap();
        ModelConfig::new(ModelVariant::Ours, 0.0)
            .with_backbone(BackboneConfig::new().with_width_mult(0.25))
            .init(&seen, device)
    }

    fn output_of(model: &ImsituModel<TestBackend>) -> Vec<f32> {
        let device = Default::default();
        model
            .forward(Tensor::ones([1, 3, 32, 32], &device))
            .embedding
            .into_data()
            .to_vec()
            .unwrap()
    }

    #[test]
    fn written_checkpoint_restores_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let saved = model(&device);
        let optimizer = AdamConfig::new().init::<TestBackend, ImsituModel<TestBackend>>();
        let hyperparameters = Hyperparameters::new().with_model_variant(ModelVariant::Ours);

        let path = Checkpoint::capture(&hyperparameters, 7, &saved, &optimizer)
            .unwrap()
            .write(dir.path())
            .unwrap();
        assert_eq!(path, dir.path().join("ckpt_7.json"));
        assert!(!dir.path().join("ckpt_7.json.partial").exists());

        let checkpoint = Checkpoint::read(&path).unwrap();
        assert_eq!(checkpoint.epoch, 7);
        assert_eq!(checkpoint.hyperparameters.model_variant, ModelVariant::Ours);

        let (restored, _optimizer) = checkpoint
            .restore(model(&device), optimizer, &device)
            .unwrap();
        assert_eq!(output_of(&restored), output_of(&saved));
    }

    #[test]
    fn corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt_1.json");
        fs::write(&path, "{\"epoch\": 1}").unwrap();

        assert!(matches!(
            Checkpoint::read(&path),
            Err(CheckpointError::Json(_))
        ));
    }
}
