//! Models module.
//!
//! Every variant implements [`ScoringModel`]. The shared operations
//! (`predict`, `recommend`) are provided methods built on two
//! variant-specific scoring functions, so shape checks, masking and top-k
//! selection behave identically across variants.
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::{Array1, Array2};

use super::{ItemId, RecommendError, Result};
use crate::data::InteractionMatrix;
use crate::evaluation::top_k_indices;

#[cfg(feature = "neural")]
pub mod deep_fm;
pub mod ease;
pub mod item_knn;
#[cfg(feature = "neural")]
pub mod neural;
#[cfg(feature = "neural")]
pub mod neural_mf;

/// Number of recommendations returned when the caller does not say.
pub const DEFAULT_TOP_K: usize = 10;

/// The registered model variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// Embarrassingly shallow autoencoder.
    Ease,
    /// Item-based nearest neighbours.
    ItemKnn,
    /// Embedding MLP.
    #[cfg(feature = "neural")]
    NeuralMf,
    /// Factorization machine plus MLP.
    #[cfg(feature = "neural")]
    DeepFm,
}

impl ModelKind {
    /// Every variant linked into this build.
    pub fn all() -> Vec<ModelKind> {
        let mut kinds = vec![ModelKind::Ease, ModelKind::ItemKnn];
        #[cfg(feature = "neural")]
        kinds.extend_from_slice(&[ModelKind::NeuralMf, ModelKind::DeepFm]);
        kinds
    }

    /// The registry name of the variant.
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Ease => "EASE",
            ModelKind::ItemKnn => "ItemKNN",
            #[cfg(feature = "neural")]
            ModelKind::NeuralMf => "NeuralMF",
            #[cfg(feature = "neural")]
            ModelKind::DeepFm => "DeepFM",
        }
    }

    /// Construct an unfitted instance with default hyperparameters.
    pub fn build(self) -> Box<dyn ScoringModel> {
        match self {
            ModelKind::Ease => Box::new(ease::Ease::default()),
            ModelKind::ItemKnn => Box::new(item_knn::ItemKnn::default()),
            #[cfg(feature = "neural")]
            ModelKind::NeuralMf => Box::new(neural_mf::NeuralMf::default()),
            #[cfg(feature = "neural")]
            ModelKind::DeepFm => Box::new(deep_fm::DeepFm::default()),
        }
    }
}

/// Item-item co-occurrence counts `XᵀX`.
pub(crate) fn co_occurrence(interactions: &InteractionMatrix) -> Array2<f64> {
    let num_items = interactions.num_items();
    let mut gram = Array2::zeros((num_items, num_items));

    for user in interactions.iter_users() {
        for (&i, &j) in iproduct!(user.item_ids, user.item_ids) {
            gram[(i, j)] += 1.0;
        }
    }

    gram
}

/// Sorted, de-duplicated context items that fall inside the catalog.
pub(crate) fn known_items(context: &[ItemId], num_items: usize) -> Vec<ItemId> {
    let mut items: Vec<ItemId> = context
        .iter()
        .cloned()
        .filter(|&item_id| item_id < num_items)
        .collect();
    items.sort_unstable();
    items.dedup();
    items
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = RecommendError;

    fn from_str(name: &str) -> Result<ModelKind> {
        ModelKind::all()
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| RecommendError::ModelNotRegistered(name.to_owned()))
    }
}

/// Contract shared by every recommendation model.
pub trait ScoringModel: fmt::Debug + Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> ModelKind;

    /// `(num_users, num_items)` of the fitted model, or `None` when the
    /// model has not been fitted or restored.
    fn shape(&self) -> Option<(usize, usize)>;

    /// Whether `predict` and `recommend` can be called.
    fn is_loaded(&self) -> bool {
        self.shape().is_some()
    }

    /// Train on `train`, write a checkpoint into `checkpoint_dir` and leave
    /// the model loaded. Returns the checkpoint path.
    fn fit(&mut self, train: &InteractionMatrix, checkpoint_dir: &Path) -> Result<PathBuf>;

    /// Unmasked scores for every `(row, item)` of `ratings`. Callers have
    /// already checked the shape.
    fn score_matrix(&self, ratings: &InteractionMatrix) -> Result<Array2<f32>>;

    /// Unmasked scores over all items for a session context.
    fn score_context(&self, context: &[ItemId]) -> Result<Array1<f32>>;

    /// File name the checkpoint is written under.
    fn checkpoint_filename(&self) -> String;

    /// Write the full model state into `dir`.
    fn save(&self, dir: &Path) -> Result<PathBuf>;

    /// Replace the model state with the checkpoint at `path`.
    fn restore(&mut self, path: &Path) -> Result<()>;

    /// Dense scores for every `(row, item)` of `ratings`, with observed
    /// entries set to `-inf`.
    ///
    /// The output is `num_users × num_items` regardless of how sparse the
    /// input is.
    fn predict(&self, ratings: &InteractionMatrix) -> Result<Array2<f32>> {
        let expected = self.shape().ok_or(RecommendError::NotLoaded)?;

        if ratings.shape() != expected {
            return Err(RecommendError::InvalidShape {
                expected,
                found: ratings.shape(),
            });
        }

        let mut scores = self.score_matrix(ratings)?;

        for user in ratings.iter_users() {
            for &item_id in user.item_ids {
                scores[(user.user_id, item_id)] = f32::NEG_INFINITY;
            }
        }

        Ok(scores)
    }

    /// The `top_k` best items for a session context, excluding the context.
    fn recommend(&self, context: &[ItemId], top_k: usize) -> Result<Vec<ItemId>> {
        if !self.is_loaded() {
            return Err(RecommendError::NotLoaded);
        }

        if context.is_empty() {
            return Ok(Vec::new());
        }

        let mut scores = self.score_context(context)?;

        for &item_id in context {
            if let Some(score) = scores.get_mut(item_id) {
                *score = f32::NEG_INFINITY;
            }
        }

        Ok(top_k_indices(scores.view(), top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn names_round_trip() {
        for kind in ModelKind::all() {
            assert_eq!(kind.name().parse::<ModelKind>().unwrap(), kind);
            assert_eq!(kind.build().kind(), kind);
        }
    }

    #[test]
    fn unknown_names_are_not_registered() {
        let error = "SVD".parse::<ModelKind>().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ModelNotRegistered);
    }

    #[cfg(not(feature = "neural"))]
    #[test]
    fn neural_names_need_the_feature() {
        assert!("NeuralMF".parse::<ModelKind>().is_err());
        assert!("DeepFM".parse::<ModelKind>().is_err());
    }

    #[test]
    fn unfitted_models_refuse_to_serve() {
        let ratings = InteractionMatrix::empty(2, 2);

        for kind in ModelKind::all() {
            let model = kind.build();
            assert!(!model.is_loaded());
            assert_eq!(
                model.predict(&ratings).unwrap_err().kind(),
                ErrorKind::NotLoaded
            );
            assert_eq!(
                model.recommend(&[0], DEFAULT_TOP_K).unwrap_err().kind(),
                ErrorKind::NotLoaded
            );
        }
    }

    #[test]
    fn every_variant_fits_restores_and_serves() {
        let dir = tempfile::tempdir().unwrap();
        let train =
            InteractionMatrix::from_pairs(3, 5, &[(0, 0), (0, 1), (1, 2), (2, 4)]).unwrap();

        for kind in ModelKind::all() {
            let mut model = kind.build();
            let path = model.fit(&train, dir.path()).unwrap();
            assert_eq!(model.shape(), Some((3, 5)));

            let scores = model.predict(&train).unwrap();
            assert_eq!(scores.dim(), (3, 5));
            for user in train.iter_users() {
                for &item_id in user.item_ids {
                    assert_eq!(scores[(user.user_id, item_id)], f32::NEG_INFINITY);
                }
            }
            assert!(scores[(0, 2)].is_finite());

            let mut restored = kind.build();
            restored.restore(&path).unwrap();
            assert_eq!(restored.predict(&train).unwrap(), scores, "{}", kind);

            let recommended = restored.recommend(&[0, 1], 3).unwrap();
            assert!(!recommended.is_empty());
            assert!(recommended.iter().all(|item_id| [2, 3, 4].contains(item_id)));
            let mut unique = recommended.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), recommended.len());

            assert!(restored.recommend(&[], 3).unwrap().is_empty());
            assert_eq!(
                restored
                    .predict(&InteractionMatrix::empty(3, 4))
                    .unwrap_err()
                    .kind(),
                ErrorKind::InvalidShape
            );
        }
    }

    #[test]
    fn known_items_drops_duplicates_and_unknowns() {
        assert_eq!(known_items(&[3, 1, 3, 9], 5), vec![1, 3]);
    }

    #[test]
    fn fitting_needs_interactions() {
        let dir = tempfile::tempdir().unwrap();
        let train = InteractionMatrix::empty(2, 2);

        for kind in ModelKind::all() {
            let mut model = kind.build();
            assert_eq!(
                model.fit(&train, dir.path()).unwrap_err().kind(),
                ErrorKind::NoInteractions
            );
        }
    }
}
