//! DeepFM: a factorisation machine alongside an MLP tower.
//!
//! With `u` and `v` the user and item embeddings, the factorisation machine
//! term is
//! ```text
//! fm = Σu + Σv + ½ Σ((u + v)² − u² − v²)
//! ```
//! i.e. first-order sums plus the pairwise interaction `Σ uₖvₖ`. The deep
//! part runs `[u, v]` through a tower of linear, batch norm, ReLU and
//! dropout layers. The output layer maps `[fm, tower]` to one logit.
use candle_core::{Module, Tensor};
use candle_nn::{linear, Embedding, Linear, VarBuilder};

use super::neural::{
    embedding, Architecture, EmbeddingModel, Hyperparameters, PointwiseNetwork, Tower,
};
use super::ModelKind;

/// The DeepFM model.
pub type DeepFm = EmbeddingModel<DeepFmArchitecture>;

/// Builds [`DeepFmNetwork`]s.
#[derive(Debug)]
pub struct DeepFmArchitecture;

impl Architecture for DeepFmArchitecture {
    type Network = DeepFmNetwork;

    const KIND: ModelKind = ModelKind::DeepFm;

    fn build(
        num_users: usize,
        num_items: usize,
        hyper: &Hyperparameters,
        vb: VarBuilder,
    ) -> candle_core::Result<DeepFmNetwork> {
        let embedding_dim = hyper.embedding_dim();
        let fm_vb = vb.pp("fm");
        let user_embedding = embedding(num_users, embedding_dim, fm_vb.pp("user_embedding"))?;
        let item_embedding = embedding(num_items, embedding_dim, fm_vb.pp("item_embedding"))?;
        let deep = Tower::new(
            2 * embedding_dim,
            hyper.hidden_dims(),
            hyper.dropout(),
            true,
            vb.pp("deep"),
        )?;
        let output = linear(1 + deep.output_dim(), 1, vb.pp("output"))?;

        Ok(DeepFmNetwork {
            user_embedding,
            item_embedding,
            deep,
            output,
        })
    }
}

/// Shared embeddings, deep tower and output layer.
#[derive(Clone, Debug)]
pub struct DeepFmNetwork {
    user_embedding: Embedding,
    item_embedding: Embedding,
    deep: Tower,
    output: Linear,
}

/// One FM value per row, as a `(batch, 1)` column.
fn fm_term(user_vectors: &Tensor, item_vectors: &Tensor) -> candle_core::Result<Tensor> {
    let first_order = (user_vectors.sum_keepdim(1)? + item_vectors.sum_keepdim(1)?)?;
    let sum_square = (user_vectors + item_vectors)?.sqr()?.sum_keepdim(1)?;
    let square_sum = (user_vectors.sqr()? + item_vectors.sqr()?)?.sum_keepdim(1)?;

    first_order + ((sum_square - square_sum)? * 0.5)?
}

impl PointwiseNetwork for DeepFmNetwork {
    fn forward_t(
        &self,
        users: &Tensor,
        items: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let user_vectors = self.user_embedding.forward(users)?;
        let item_vectors = self.item_embedding.forward(items)?;

        let fm = fm_term(&user_vectors, &item_vectors)?;
        let deep = self
            .deep
            .forward_t(&Tensor::cat(&[&user_vectors, &item_vectors], 1)?, train)?;

        self.output
            .forward(&Tensor::cat(&[&fm, &deep], 1)?)?
            .squeeze(1)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    use super::super::neural::HyperparametersBuilder;
    use super::*;
    use crate::data::InteractionMatrix;
    use crate::models::ScoringModel;

    fn hyper(hidden_dims: Vec<usize>) -> Hyperparameters {
        HyperparametersBuilder::default()
            .embedding_dim(3)
            .hidden_dims(hidden_dims)
            .dropout(0.0)
            .minibatch_size(8)
            .num_epochs(5)
            .learning_rate(0.01)
            .build()
            .unwrap()
    }

    #[test]
    fn fm_term_is_sums_plus_dot_product() {
        let user_vectors = Tensor::new(&[[1f32, 2.0], [0.5, -1.0]], &Device::Cpu).unwrap();
        let item_vectors = Tensor::new(&[[3f32, -1.0], [2.0, 2.0]], &Device::Cpu).unwrap();

        let fm = fm_term(&user_vectors, &item_vectors).unwrap();
        assert_eq!(fm.dims(), &[2, 1]);

        // 3 + 2 + (3 - 2) and -0.5 + 4 + (1 - 2)
        let fm = fm.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!((fm[0] - 6.0).abs() < 1e-6);
        assert!((fm[1] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn output_layer_sees_fm_and_tower() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        DeepFmArchitecture::build(2, 3, &hyper(vec![5, 4]), vb).unwrap();

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["fm.user_embedding.weight"].dims(), &[2, 3]);
        assert_eq!(data["fm.item_embedding.weight"].dims(), &[3, 3]);
        assert_eq!(data["deep.0.weight"].dims(), &[5, 6]);
        assert_eq!(data["deep.1.batch_norm.running_var"].dims(), &[4]);
        assert_eq!(data["output.weight"].dims(), &[1, 5]);
    }

    #[test]
    fn batch_statistics_are_learned_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let train = InteractionMatrix::from_pairs(
            4,
            6,
            &[(0, 0), (0, 1), (1, 2), (1, 3), (2, 4), (3, 5), (3, 0)],
        )
        .unwrap();
        let mut model = DeepFm::new(hyper(vec![5, 4]));
        let path = model.fit(&train, dir.path()).unwrap();

        let fitted = model.state_dict().unwrap();
        let running_mean = fitted
            .iter()
            .find(|tensor| tensor.name == "deep.0.batch_norm.running_mean")
            .unwrap();
        assert!(running_mean.values.iter().any(|&value| value != 0.0));

        let mut restored = DeepFm::default();
        restored.restore(&path).unwrap();

        assert_eq!(restored.hyperparameters(), model.hyperparameters());
        assert_eq!(restored.state_dict().unwrap(), fitted);
        assert_eq!(
            restored.score_matrix(&train).unwrap(),
            model.score_matrix(&train).unwrap()
        );
    }

    #[test]
    fn evaluation_ignores_the_batch() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let network = DeepFmArchitecture::build(3, 4, &hyper(vec![6]), vb).unwrap();

        let users = Tensor::new(&[0u32, 1, 2, 2], &Device::Cpu).unwrap();
        let items = Tensor::new(&[3u32, 0, 1, 2], &Device::Cpu).unwrap();
        let batched = network
            .forward_t(&users, &items, false)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        // In evaluation mode a pair scores the same alone or in a batch.
        let alone = network
            .forward_t(
                &users.narrow(0, 1, 1).unwrap(),
                &items.narrow(0, 1, 1).unwrap(),
                false,
            )
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((alone[0] - batched[1]).abs() < 1e-5);
    }
}
