use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use burn::config::Config;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which zero-shot recognizer to train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Indirect attribute prediction through the seen classes.
    Iap,
    /// Direct attribute prediction.
    Dap,
    /// Attributes and word embeddings together.
    Ours,
    /// Word embeddings only.
    Devise,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 4] = [
        ModelVariant::Iap,
        ModelVariant::Dap,
        ModelVariant::Ours,
        ModelVariant::Devise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Iap => "iap",
            ModelVariant::Dap => "dap",
            ModelVariant::Ours => "ours",
            ModelVariant::Devise => "devise",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelVariant::ALL
            .into_iter()
            .find(|variant| variant.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownModelVariant(s.to_string()))
    }
}

#[derive(Config, Debug)]
pub struct Hyperparameters {
    #[config(default = 0.1)]
    pub margin: f64,

    #[config(default = 1.0e-3)]
    pub lr: f64,

    #[config(default = 64)]
    pub batch_size: usize,

    #[config(default = 1.0e-8)]
    pub eps: f32,

    #[config(default = 0.9)]
    pub beta1: f32,

    #[config(default = 0.999)]
    pub beta2: f32,

    #[config(default = 0.2)]
    pub dropout: f64,

    #[config(default = 1.0e-3)]
    pub l2_weight: f64,

    #[config(default = "ModelVariant::Ours")]
    pub model_variant: ModelVariant,

    #[config(default = false)]
    pub use_emb: bool,

    #[config(default = false)]
    pub use_att: bool,

    #[config(default = "PathBuf::from(\"save\")")]
    pub save_dir: PathBuf,

    pub ckpt: Option<PathBuf>,
}

impl Hyperparameters {
    /// Overrides recommended for the imSitu zero-shot run.
    pub fn recommended() -> Self {
        Self::new()
            .with_lr(1.0e-4)
            .with_batch_size(32)
            .with_eps(1.0e-8)
            .with_save_dir(PathBuf::from("imsitu_train"))
    }
}

/// Train an imSitu zero-shot verb recognizer.
#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Checkpoint file to resume from, relative to <root>/checkpoints
    #[arg(long)]
    pub ckpt: Option<String>,

    /// Directory to save checkpoints to, relative to <root>/checkpoints
    #[arg(long)]
    pub save_dir: Option<String>,

    /// Learning rate
    #[arg(long)]
    pub lr: Option<f64>,

    /// Epsilon for Adam
    #[arg(long)]
    pub eps: Option<f32>,

    /// Batch size
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Beta1 for Adam
    #[arg(long)]
    pub beta1: Option<f32>,

    /// Beta2 for Adam, rarely worth touching
    #[arg(long)]
    pub beta2: Option<f32>,

    /// Rate of activations that are dropped
    #[arg(long)]
    pub dropout: Option<f64>,

    /// L2 regularization weight
    #[arg(long)]
    pub l2_weight: Option<f64>,

    /// Ranking margin
    #[arg(long)]
    pub margin: Option<f64>,

    /// Model to use: iap, dap, ours or devise
    #[arg(long)]
    pub imsitu_model: Option<String>,

    /// Use word embeddings for zero-shot scoring
    #[arg(long, action = ArgAction::SetTrue)]
    pub use_emb: bool,

    /// Use attributes for zero-shot scoring
    #[arg(long, action = ArgAction::SetTrue)]
    pub use_att: bool,

    /// Project root holding the checkpoints directory
    #[arg(long, env = "IMSITU_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Directory holding attributes.json, the split lists and images/
    #[arg(long, env = "IMSITU_DATA", default_value = "data/imsitu")]
    pub data_dir: PathBuf,

    /// Data loader worker threads
    #[arg(long, default_value_t = 2)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Merges the command line over `defaults` and resolves paths under
    /// `<root>/checkpoints`. Creates the save directory when it is missing.
    pub fn resolve(&self, defaults: Hyperparameters) -> Result<Hyperparameters, ConfigError> {
        let mut config = defaults;

        if let Some(lr) = self.lr {
            config.lr = lr;
        }
        if let Some(eps) = self.eps {
            config.eps = eps;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(beta1) = self.beta1 {
            config.beta1 = beta1;
        }
        if let Some(beta2) = self.beta2 {
            config.beta2 = beta2;
        }
        if let Some(dropout) = self.dropout {
            config.dropout = dropout;
        }
        if let Some(l2_weight) = self.l2_weight {
            config.l2_weight = l2_weight;
        }
        if let Some(margin) = self.margin {
            config.margin = margin;
        }
        if let Some(variant) = &self.imsitu_model {
            config.model_variant = variant.parse()?;
        }
        if self.use_emb {
            config.use_emb = true;
        }
        if self.use_att {
            config.use_att = true;
        }
        if let Some(save_dir) = &self.save_dir {
            config.save_dir = PathBuf::from(save_dir);
        }
        if let Some(ckpt) = &self.ckpt {
            config.ckpt = Some(PathBuf::from(ckpt));
        }

        validate(&config)?;

        let checkpoints = self.root.join("checkpoints");
        config.save_dir = checkpoints.join(&config.save_dir);
        create_save_dir(&config.save_dir)?;

        config.ckpt = match config.ckpt.take() {
            Some(ckpt) if !ckpt.as_os_str().is_empty() => {
                let ckpt = checkpoints.join(ckpt);
                if !ckpt.exists() {
                    return Err(ConfigError::MissingCheckpoint(ckpt));
                }
                Some(ckpt)
            }
            _ => None,
        };

        Ok(config)
    }
}

fn validate(config: &Hyperparameters) -> Result<(), ConfigError> {
    let invalid = |name, message: &str| ConfigError::InvalidValue {
        name,
        message: message.to_string(),
    };

    if config.batch_size == 0 {
        return Err(invalid("batch_size", "must be at least 1"));
    }
    if !(config.lr > 0.0) {
        return Err(invalid("lr", "must be positive"));
    }
    if !(0.0..1.0).contains(&config.dropout) {
        return Err(invalid("dropout", "must lie in [0, 1)"));
    }
    if !(0.0..1.0).contains(&config.beta1) || !(0.0..1.0).contains(&config.beta2) {
        return Err(invalid("beta", "must lie in [0, 1)"));
    }

    Ok(())
}

fn create_save_dir(path: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(path).map_err(|source| ConfigError::SaveDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Prints every resolved hyperparameter, one per line.
pub fn log_hyperparameters(config: &Hyperparameters) {
    tracing::info!("~~~~~~~~ Hyperparameters used: ~~~~~~~");
    tracing::info!("margin : {}", config.margin);
    tracing::info!("lr : {}", config.lr);
    tracing::info!("batch_size : {}", config.batch_size);
    tracing::info!("eps : {}", config.eps);
    tracing::info!("beta1 : {}", config.beta1);
    tracing::info!("beta2 : {}", config.beta2);
    tracing::info!("dropout : {}", config.dropout);
    tracing::info!("l2_weight : {}", config.l2_weight);
    tracing::info!("imsitu_model : {}", config.model_variant);
    tracing::info!("use_emb : {}", config.use_emb);
    tracing::info!("use_att : {}", config.use_att);
    tracing::info!("save_dir : {}", config.save_dir.display());
    match &config.ckpt {
        Some(ckpt) => tracing::info!("ckpt : {}", ckpt.display()),
        None => tracing::info!("ckpt : <none>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_in(root: &Path) -> Cli {
        Cli {
            root: root.to_path_buf(),
            ..Cli::default()
        }
    }

    #[test]
    fn omitted_options_keep_defaults() {
        let root = tempfile::tempdir().unwrap();
        let config = cli_in(root.path())
            .resolve(Hyperparameters::recommended())
            .unwrap();

        assert_eq!(config.lr, 1.0e-4);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.beta2, 0.999);
        assert_eq!(config.model_variant, ModelVariant::Ours);
        assert!(!config.use_emb);
        assert!(!config.use_att);
        assert!(config.ckpt.is_none());
        assert_eq!(
            config.save_dir,
            root.path().join("checkpoints").join("imsitu_train")
        );
        assert!(config.save_dir.is_dir());
    }

    #[test]
    fn provided_options_win_even_when_equal_to_defaults() {
        let root = tempfile::tempdir().unwrap();
        let mut cli = cli_in(root.path());
        cli.lr = Some(1.0e-3);
        cli.batch_size = Some(64);
        cli.dropout = Some(0.0);
        cli.imsitu_model = Some("devise".to_string());
        cli.use_att = true;

        let config = cli.resolve(Hyperparameters::recommended()).unwrap();

        assert_eq!(config.lr, 1.0e-3);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.dropout, 0.0);
        assert_eq!(config.model_variant, ModelVariant::Devise);
        assert!(config.use_att);
        assert!(!config.use_emb);
    }

    #[test]
    fn unknown_model_variant_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut cli = cli_in(root.path());
        cli.imsitu_model = Some("resnet".to_string());

        let err = cli.resolve(Hyperparameters::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModelVariant(ref name) if name == "resnet"));
    }

    #[test]
    fn missing_checkpoint_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut cli = cli_in(root.path());
        cli.ckpt = Some("nope.json".to_string());

        let err = cli.resolve(Hyperparameters::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCheckpoint(_)));
    }

    #[test]
    fn existing_checkpoint_resolves_under_checkpoints() {
        let root = tempfile::tempdir().unwrap();
        let checkpoints = root.path().join("checkpoints");
        fs::create_dir_all(&checkpoints).unwrap();
        fs::write(checkpoints.join("ckpt_3.json"), "{}").unwrap();

        let mut cli = cli_in(root.path());
        cli.ckpt = Some("ckpt_3.json".to_string());

        let config = cli.resolve(Hyperparameters::new()).unwrap();
        assert_eq!(config.ckpt, Some(checkpoints.join("ckpt_3.json")));
    }

    #[test]
    fn empty_checkpoint_means_none() {
        let root = tempfile::tempdir().unwrap();
        let mut cli = cli_in(root.path());
        cli.ckpt = Some(String::new());

        let config = cli.resolve(Hyperparameters::new()).unwrap();
        assert!(config.ckpt.is_none());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut cli = cli_in(root.path());
        cli.batch_size = Some(0);

        let err = cli.resolve(Hyperparameters::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "batch_size", .. }));
    }

    #[test]
    fn variants_parse_from_their_names() {
        for variant in ModelVariant::ALL {
            assert_eq!(variant.as_str().parse::<ModelVariant>().unwrap(), variant);
        }
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::try_parse_from([
            "imsitu-zsl",
            "-b",
            "16",
            "--imsitu-model",
            "dap",
            "--use-emb",
            "--l2-weight",
            "0.0005",
        ])
        .unwrap();

        assert_eq!(cli.batch_size, Some(16));
        assert_eq!(cli.imsitu_model.as_deref(), Some("dap"));
        assert!(cli.use_emb);
        assert!(!cli.use_att);
        assert_eq!(cli.l2_weight, Some(5.0e-4));
        assert!(cli.lr.is_none());
    }
}
