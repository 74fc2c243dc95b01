//! Item-based nearest neighbours.
//!
//! Item similarity is the cosine between item columns of the training
//! matrix. Only the `num_neighbours` most similar items are kept for each
//! item; a user's score for item `j` is the summed similarity of `j` to the
//! items in their history, over those neighbour lists.
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use tracing::info;

use super::{co_occurrence, known_items, ModelKind, ScoringModel};
use crate::checkpoint::{self, Checkpoint};
use crate::data::InteractionMatrix;
use crate::evaluation::top_k_indices;
use crate::{ItemId, RecommendError, Result};

/// Hyperparameters describing the ItemKNN model.
#[derive(Builder, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[builder(default)]
pub struct Hyperparameters {
    /// Neighbours kept per item.
    num_neighbours: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            num_neighbours: 100,
        }
    }
}

type Neighbours = Vec<Vec<(ItemId, f32)>>;

#[derive(Debug)]
struct ModelData {
    num_users: usize,
    num_items: usize,
    neighbours: Neighbours,
}

/// The ItemKNN model.
#[derive(Debug, Default)]
pub struct ItemKnn {
    hyper: Hyperparameters,
    model: Option<ModelData>,
}

impl ItemKnn {
    /// Build an unfitted model.
    pub fn new(hyper: Hyperparameters) -> Self {
        ItemKnn { hyper, model: None }
    }

    fn model(&self) -> Result<&ModelData> {
        self.model.as_ref().ok_or(RecommendError::NotLoaded)
    }
}

/// Add the similarities of every neighbour of `item_ids` into `scores`.
fn accumulate(
    neighbours: &Neighbours,
    item_ids: &[ItemId],
    mut scores: ndarray::ArrayViewMut1<f32>,
) {
    for &item_id in item_ids {
        for &(neighbour, similarity) in &neighbours[item_id] {
            scores[neighbour] += similarity;
        }
    }
}

fn nearest_neighbours(gram: &Array2<f64>, num_neighbours: usize) -> Neighbours {
    let norms: Vec<f64> = gram.diag().iter().map(|count| count.sqrt()).collect();

    (0..gram.nrows())
        .into_par_iter()
        .map(|item_id| {
            let similarities: Array1<f32> = gram
                .row(item_id)
                .indexed_iter()
                .map(|(other, &count)| {
                    if other == item_id || count == 0.0 {
                        f32::NEG_INFINITY
                    } else {
                        (count / (norms[item_id] * norms[other])) as f32
                    }
                })
                .collect();

            top_k_indices(similarities.view(), num_neighbours)
                .into_iter()
                .map(|other| (other, similarities[other]))
                .collect()
        })
        .collect()
}

impl ScoringModel for ItemKnn {
    fn kind(&self) -> ModelKind {
        ModelKind::ItemKnn
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
            num_neighbours = self.hyper.num_neighbours,
            "Fitting ItemKNN"
        );

        let neighbours = nearest_neighbours(&co_occurrence(train), self.hyper.num_neighbours);

        self.model = Some(ModelData {
            num_users,
            num_items,
            neighbours,
        });

        self.save(checkpoint_dir)
    }

    fn score_matrix(&self, ratings: &InteractionMatrix) -> Result<Array2<f32>> {
        let model = self.model()?;
        let mut scores = Array2::zeros((ratings.num_users(), model.num_items));

        for (user, row) in ratings.iter_users().zip(scores.outer_iter_mut()) {
            accumulate(&model.neighbours, user.item_ids, row);
        }

        Ok(scores)
    }

    fn score_context(&self, context: &[ItemId]) -> Result<Array1<f32>> {
        let model = self.model()?;
        let mut scores = Array1::zeros(model.num_items);

        accumulate(
            &model.neighbours,
            &known_items(context, model.num_items),
            scores.view_mut(),
        );

        Ok(scores)
    }

    fn checkpoint_filename(&self) -> String {
        format!(
            "{}_{}.ckpt",
            ModelKind::ItemKnn.name(),
            self.hyper.num_neighbours
        )
    }

    fn save(&self, dir: &Path) -> Result<PathBuf> {
        let model = self.model()?;
        let path = dir.join(self.checkpoint_filename());

        checkpoint::write(
            &path,
            &Checkpoint::new(
                ModelKind::ItemKnn,
                model.num_users,
                model.num_items,
                (&self.hyper, &model.neighbours),
            ),
        )?;
        info!(path = %path.display(), "Saved ItemKNN checkpoint");

        Ok(path)
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        let checkpoint: Checkpoint<(Hyperparameters, Neighbours)> =
            checkpoint::read(path, ModelKind::ItemKnn)?;
        let (num_users, num_items) = (checkpoint.num_users, checkpoint.num_items);
        let (hyper, neighbours) = checkpoint.state;

        let out_of_range = neighbours
            .iter()
            .flat_map(|row| row.iter())
            .any(|&(item_id, _)| item_id >= num_items);

        if neighbours.len() != num_items || out_of_range {
            return Err(RecommendError::CorruptCheckpoint {
                path: path.display().to_string(),
                reason: "neighbour lists do not match the item count".to_owned(),
            });
        }

        self.hyper = hyper;
        self.model = Some(ModelData {
            num_users,
            num_items,
            neighbours,
        });

        Ok(())
    }
}
