//! Offline training and evaluation.
//!
//! [`run`] takes an interaction log that has already been remapped to dense
//! indices, holds out a fraction of the entries, fits the requested model on
//! the rest, measures it on the held-out entries and persists the model
//! together with the id mapping needed to serve it.
use std::fs::{create_dir_all, rename, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use tracing::info;

use crate::data::{train_test_split, IdMap, InteractionMatrix, Interactions};
use crate::evaluation::{evaluate, extract_top_k, Metrics};
use crate::models::ModelKind;
use crate::Result;

/// File the id mapping is written to, next to the checkpoint.
pub const ID_MAP_FILENAME: &str = "id_map.json";

/// Inputs of a pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Registry name of the model to train.
    pub model: String,
    /// Directory the checkpoint and id map are written into.
    pub output_dir: PathBuf,
    /// Fraction of entries held out for evaluation.
    pub test_ratio: f32,
    /// Ranking cutoff for the metrics.
    pub k: usize,
    /// Seeds the train/test split.
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            model: ModelKind::ItemKnn.name().to_owned(),
            output_dir: PathBuf::from("ckpt"),
            test_ratio: 0.1,
            k: 100,
            seed: 42,
        }
    }
}

/// Summary of a pipeline run.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    /// Which model was trained.
    pub model: ModelKind,
    /// Rows of the interaction matrix.
    pub num_users: usize,
    /// Columns of the interaction matrix.
    pub num_items: usize,
    /// Entries the model was fitted on.
    pub train_interactions: usize,
    /// Entries held out.
    pub test_interactions: usize,
    /// Where the checkpoint was written.
    pub checkpoint: PathBuf,
    /// Held-out metrics, `None` when nothing was held out.
    pub metrics: Option<Metrics>,
}

#[derive(Serialize)]
struct IdMaps<'a> {
    users: &'a IdMap,
    items: &'a IdMap,
}

fn write_id_map(interactions: &Interactions, dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        create_dir_all(dir)?;
    }

    let path = dir.join(ID_MAP_FILENAME);
    let temp_path = path.with_extension("json.tmp");

    {
        let writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer(
            writer,
            &IdMaps {
                users: interactions.users(),
                items: interactions.items(),
            },
        )
        .map_err(std::io::Error::from)?;
    }

    rename(&temp_path, &path)?;

    Ok(path)
}

/// Split, fit, evaluate and persist a model on `matrix`.
pub fn run_matrix(matrix: &InteractionMatrix, config: &PipelineConfig) -> Result<PipelineReport> {
    let kind: ModelKind = config.model.parse()?;
    let mut rng = XorShiftRng::seed_from_u64(config.seed);

    let (train, test) = train_test_split(matrix, &mut rng, config.test_ratio);
    info!(
        model = %kind,
        train = train.nnz(),
        test = test.nnz(),
        "Split interactions"
    );

    let mut model = kind.build();
    model.fit(&train, &config.output_dir)?;

    let top_k = extract_top_k(&model.predict(&train)?, config.k);
    let metrics = evaluate(&top_k, &test, config.k);

    match metrics {
        Some(ref metrics) => info!(
            model = %kind,
            k = metrics.k,
            precision = metrics.precision,
            recall = metrics.recall,
            ndcg = metrics.ndcg,
            "Evaluated"
        ),
        None => info!(model = %kind, "No held-out interactions, evaluation skipped"),
    }

    let checkpoint = model.save(&config.output_dir)?;

    Ok(PipelineReport {
        model: kind,
        num_users: matrix.num_users(),
        num_items: matrix.num_items(),
        train_interactions: train.nnz(),
        test_interactions: test.nnz(),
        checkpoint,
        metrics,
    })
}

/// Run the pipeline on `interactions` and write `id_map.json` beside the
/// checkpoint.
pub fn run(interactions: &Interactions, config: &PipelineConfig) -> Result<PipelineReport> {
    let report = run_matrix(interactions.matrix(), config)?;
    let id_map = write_id_map(interactions, &config.output_dir)?;
    info!(path = %id_map.display(), "Wrote id map");

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LogRecord;
    use crate::ErrorKind;

    fn log() -> Vec<LogRecord> {
        iproduct!(0..20u64, 0..15u64)
            .filter(|&(user, item)| (user + item) % 3 != 0)
            .map(|(user, item)| LogRecord::new(100 + user, 1000 + item))
            .collect()
    }

    fn config(dir: &Path, model: ModelKind) -> PipelineConfig {
        PipelineConfig {
            model: model.name().to_owned(),
            output_dir: dir.to_path_buf(),
            test_ratio: 0.2,
            k: 5,
            seed: 7,
        }
    }

    #[test]
    fn runs_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let interactions = Interactions::from_log(&log());

        let report = run(&interactions, &config(dir.path(), ModelKind::Ease)).unwrap();

        assert_eq!((report.num_users, report.num_items), (20, 15));
        assert_eq!(
            report.train_interactions + report.test_interactions,
            interactions.matrix().nnz()
        );
        assert!(report.test_interactions > 0);
        assert!(report.checkpoint.exists());

        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.k, 5);
        assert!(metrics.precision >= 0.0 && metrics.precision <= 1.0);
        assert!(metrics.ndcg >= 0.0 && metrics.ndcg <= 1.0);

        let id_map: serde_json::Value = serde_json::from_reader(
            File::open(dir.path().join(ID_MAP_FILENAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(id_map["items"]["ids"][0], 1000);
    }

    #[test]
    fn evaluation_is_skipped_without_holdout() {
        let dir = tempfile::tempdir().unwrap();
        let interactions = Interactions::from_log(&log());
        let mut config = config(dir.path(), ModelKind::ItemKnn);
        config.test_ratio = 0.0;

        let report = run(&interactions, &config).unwrap();

        assert_eq!(report.test_interactions, 0);
        assert!(report.metrics.is_none());
    }

    #[test]
    fn unknown_models_fail_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), ModelKind::Ease);
        config.model = "SVD".to_owned();

        let error = run(&Interactions::from_log(&log()), &config).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ModelNotRegistered);
        assert!(!dir.path().join(ID_MAP_FILENAME).exists());
    }
}
