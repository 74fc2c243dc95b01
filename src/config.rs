//! Runtime settings for the binaries.
//!
//! Settings come from `CINERANK_`-prefixed environment variables, with a
//! `.env` file in the working directory loaded first if present:
//!
//! | Variable                       | Default            |
//! |--------------------------------|--------------------|
//! | `CINERANK_INTERACTIONS_PATH`   | `data/ratings.csv` |
//! | `CINERANK_MODEL`               | `ItemKNN`          |
//! | `CINERANK_CHECKPOINT_DIR`      | `ckpt`             |
//! | `CINERANK_TEST_RATIO`          | `0.1`              |
//! | `CINERANK_K`                   | `100`              |
//! | `CINERANK_SEED`                | `42`               |
//! | `CINERANK_TOP_K`               | `10`               |
use std::path::PathBuf;

use crate::models::DEFAULT_TOP_K;
use crate::pipeline::PipelineConfig;

const ENV_PREFIX: &str = "CINERANK_";

fn default_interactions_path() -> PathBuf {
    PathBuf::from("data/ratings.csv")
}

fn default_model() -> String {
    PipelineConfig::default().model
}

fn default_checkpoint_dir() -> PathBuf {
    PipelineConfig::default().output_dir
}

fn default_test_ratio() -> f32 {
    PipelineConfig::default().test_ratio
}

fn default_k() -> usize {
    PipelineConfig::default().k
}

fn default_seed() -> u64 {
    PipelineConfig::default().seed
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// Settings shared by `fit_offline` and `recommend`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Settings {
    /// Interaction log to train on: MovieLens `u.data` if the extension is
    /// `.data`, a headered CSV otherwise.
    #[serde(default = "default_interactions_path")]
    pub interactions_path: PathBuf,
    /// Registry name of the model.
    #[serde(default = "default_model")]
    pub model: String,
    /// Directory checkpoints are written to and served from.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Fraction of entries held out for evaluation.
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f32,
    /// Ranking cutoff for offline metrics.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Seeds the train/test split.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Recommendations returned per request.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Settings {
    /// Read settings from the process environment, after loading `.env`.
    pub fn from_env() -> Result<Settings, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed(ENV_PREFIX).from_env()
    }

    /// Read settings from explicit `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Settings, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(vars)
    }

    /// The pipeline configuration these settings describe.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            model: self.model.clone(),
            output_dir: self.checkpoint_dir.clone(),
            test_ratio: self.test_ratio,
            k: self.k,
            seed: self.seed,
        }
    }
}
