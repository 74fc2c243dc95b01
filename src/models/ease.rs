//! EASE: a closed-form linear item-item model.
//!
//! With `X` the training matrix and `λ` the L2 penalty, the model computes
//! ```text
//! G = XᵀX + λI,  P = G⁻¹,  B_ij = -P_ij / P_jj,  B_jj = 0
//! ```
//! and scores a user with interaction row `x` as `x·B`.
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use ndarray::parallel::prelude::*;
use ndarray::{s, Array1, Array2, Axis, Zip};
use tracing::info;

use super::{co_occurrence, known_items, ModelKind, ScoringModel};
use crate::checkpoint::{self, Checkpoint};
use crate::data::InteractionMatrix;
use crate::{ItemId, RecommendError, Result};

const PIVOT_EPSILON: f64 = 1e-12;

/// Hyperparameters describing the EASE model.
#[derive(Builder, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[builder(default)]
pub struct Hyperparameters {
    /// Diagonal regulariser added to the Gram matrix.
    l2_penalty: f32,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters { l2_penalty: 100.0 }
    }
}

#[derive(Debug)]
struct ModelData {
    num_users: usize,
    num_items: usize,
    weights: Array2<f32>,
}

/// The EASE model.
#[derive(Debug, Default)]
pub struct Ease {
    hyper: Hyperparameters,
    model: Option<ModelData>,
}

impl Ease {
    /// Build an unfitted model.
    pub fn new(hyper: Hyperparameters) -> Self {
        Ease { hyper, model: None }
    }

    fn model(&self) -> Result<&ModelData> {
        self.model.as_ref().ok_or(RecommendError::NotLoaded)
    }
}

/// Invert a square matrix by Gauss-Jordan elimination with partial
/// pivoting. Rows are eliminated in parallel for each pivot column.
pub(crate) fn invert(matrix: &Array2<f64>) -> Result<Array2<f64>> {
    let n = matrix.nrows();
    let mut augmented = Array2::<f64>::zeros((n, 2 * n));
    augmented.slice_mut(s![.., ..n]).assign(matrix);
    for i in 0..n {
        augmented[(i, n + i)] = 1.0;
    }

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &b| {
                augmented[(a, col)]
                    .abs()
                    .partial_cmp(&augmented[(b, col)].abs())
                    .unwrap_or(Ordering::Equal)
            })
            .unwrap_or(col);

        let pivot = augmented[(pivot_row, col)];
        if !(pivot.abs() > PIVOT_EPSILON) {
            return Err(RecommendError::SingularMatrix);
        }

        if pivot_row != col {
            for j in 0..2 * n {
                augmented.swap((pivot_row, j), (col, j));
            }
        }

        augmented.row_mut(col).mapv_inplace(|value| value / pivot);
        let pivot_values = augmented.row(col).to_owned();

        augmented
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut values)| {
                let factor = values[col];
                if row != col && factor != 0.0 {
                    values.scaled_add(-factor, &pivot_values);
                }
            });
    }

    Ok(augmented.slice(s![.., n..]).to_owned())
}

impl ScoringModel for Ease {
    fn kind(&self) -> ModelKind {
        ModelKind::Ease
    }

    fn shape(&self) -> Option<(usize, usize)> {
        self.model
            .as_ref()
            .map(|model| (model.num_users, model.num_items))
    }

    fn fit(&mut self, train: &InteractionMatrix, checkpoint_dir: &Path) -> Result<PathBuf> {
        if train.is_empty() {
            return Err(RecommendError::NoInteractions);
        }

        let (num_users, num_items) = train.shape();
        info!(
            num_users,
            num_items,
            l2_penalty = self.hyper.l2_penalty,
            "Fitting EASE"
        );

        let mut gram = co_occurrence(train);
        gram.diag_mut()
            .mapv_inplace(|value| value + f64::from(self.hyper.l2_penalty));

        let precision = invert(&gram)?;
        let diagonal: Array1<f64> = precision.diag().to_owned();

        let mut weights = Array2::<f32>::zeros((num_items, num_items));
        Zip::indexed(&mut weights)
            .and(&precision)
            .for_each(|(i, j), weight, &value| {
                if i != j {
                    *weight = (-value / diagonal[j]) as f32;
                }
            });

        self.model = Some(ModelData {
            num_users,
            num_items,
            weights,
        });

        self.save(checkpoint_dir)
    }

    fn score_matrix(&self, ratings: &InteractionMatrix) -> Result<Array2<f32>> {
        let model = self.model()?;
        let weights = &model.weights;
        let mut scores = Array2::zeros((ratings.num_users(), model.num_items));

        scores
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(user_id, mut row)| {
                for &item_id in ratings.row(user_id) {
                    row += &weights.row(item_id);
                }
            });

        Ok(scores)
    }

    fn score_context(&self, context: &[ItemId]) -> Result<Array1<f32>> {
        let model = self.model()?;
        let mut scores = Array1::zeros(model.num_items);

        for item_id in known_items(context, model.num_items) {
            scores += &model.weights.row(item_id);
        }

        Ok(scores)
    }

    fn checkpoint_filename(&self) -> String {
        format!("{}_{}.ckpt", ModelKind::Ease.name(), self.hyper.l2_penalty)
    }

    fn save(&self, dir: &Path) -> Result<PathBuf> {
        let model = self.model()?;
        let path = dir.join(self.checkpoint_filename());

        checkpoint::write(
            &path,
            &Checkpoint::new(
                ModelKind::Ease,
                model.num_users,
                model.num_items,
                (&self.hyper, &model.weights),
            ),
        )?;
        info!(path = %path.display(), "Saved EASE checkpoint");

        Ok(path)
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        let checkpoint: Checkpoint<(Hyperparameters, Array2<f32>)> =
            checkpoint::read(path, ModelKind::Ease)?;
        let (hyper, weights) = checkpoint.state;

        if weights.dim() != (checkpoint.num_items, checkpoint.num_items) {
            return Err(RecommendError::CorruptCheckpoint {
                path: path.display().to_string(),
                reason: format!("weights have shape {:?}", weights.dim()),
            });
        }

        self.hyper = hyper;
        self.model = Some(ModelData {
            num_users: checkpoint.num_users,
            num_items: checkpoint.num_items,
            weights,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;
    use crate::ErrorKind;

    fn train() -> InteractionMatrix {
        InteractionMatrix::from_pairs(
            4,
            4,
            &[(0, 0), (0, 1), (1, 0), (1, 1), (1, 2), (2, 2), (2, 3), (3, 0)],
        )
        .unwrap()
    }

    #[test]
    fn inverts_small_matrices() {
        let matrix = arr2(&[[4.0, 7.0], [2.0, 6.0]]);
        let inverse = invert(&matrix).unwrap();
        let expected = arr2(&[[0.6, -0.7], [-0.2, 0.4]]);

        for (a, b) in inverse.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }

        let product = matrix.dot(&inverse);
        for ((i, j), value) in product.indexed_iter() {
            let target = if i == j { 1.0 } else { 0.0 };
            assert!((value - target).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_singular_matrices() {
        let matrix = arr2(&[[1.0, 2.0], [2.0, 4.0]]);
        assert_eq!(
            invert(&matrix).unwrap_err().kind(),
            ErrorKind::SingularMatrix
        );
    }

    #[test]
    fn weights_have_zero_diagonal() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = Ease::new(
            HyperparametersBuilder::default()
                .l2_penalty(1.0)
                .build()
                .unwrap(),
        );
        let path = model.fit(&train(), dir.path()).unwrap();

        assert!(path.ends_with("EASE_1.ckpt"));
        let weights = &model.model.as_ref().unwrap().weights;
        assert!(weights.diag().iter().all(|&value| value == 0.0));
        // Items 0 and 1 always co-occur, so they reinforce each other.
        assert!(weights[(0, 1)] > 0.0);
        assert!(weights[(0, 1)] > weights[(0, 3)]);
    }

    #[test]
    fn context_scores_follow_co_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = Ease::new(
            HyperparametersBuilder::default()
                .l2_penalty(1.0)
                .build()
                .unwrap(),
        );
        model.fit(&train(), dir.path()).unwrap();

        let recommendations = model.recommend(&[0], 3).unwrap();
        assert_eq!(recommendations[0], 1);
        assert!(!recommendations.contains(&0));

        // Duplicates and out-of-catalog ids do not change the scores.
        assert_eq!(
            model.score_context(&[0, 0, 99]).unwrap(),
            model.score_context(&[0]).unwrap()
        );
    }

    #[test]
    fn predict_checks_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = Ease::default();
        model.fit(&train(), dir.path()).unwrap();

        let error = model
            .predict(&InteractionMatrix::empty(4, 5))
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidShape);
    }
}
