//! Neural matrix factorisation.
//!
//! The user and item embeddings are concatenated and passed through a ReLU
//! tower; a final linear layer maps the tower output to one logit.
use candle_core::{Module, Tensor};
use candle_nn::{linear, Embedding, Linear, VarBuilder};

use super::neural::{
    embedding, Architecture, EmbeddingModel, Hyperparameters, PointwiseNetwork, Tower,
};
use super::ModelKind;

/// The NeuralMF model.
pub type NeuralMf = EmbeddingModel<NeuralMfArchitecture>;

/// Builds [`NeuralMfNetwork`]s.
#[derive(Debug)]
pub struct NeuralMfArchitecture;

impl Architecture for NeuralMfArchitecture {
    type Network = NeuralMfNetwork;

    const KIND: ModelKind = ModelKind::NeuralMf;

    fn build(
        num_users: usize,
        num_items: usize,
        hyper: &Hyperparameters,
        vb: VarBuilder,
    ) -> candle_core::Result<NeuralMfNetwork> {
        let embedding_dim = hyper.embedding_dim();
        let user_embedding = embedding(num_users, embedding_dim, vb.pp("user_embedding"))?;
        let item_embedding = embedding(num_items, embedding_dim, vb.pp("item_embedding"))?;
        let mlp = Tower::new(
            2 * embedding_dim,
            hyper.hidden_dims(),
            hyper.dropout(),
            false,
            vb.pp("mlp"),
        )?;
        let output = linear(mlp.output_dim(), 1, vb.pp("output"))?;

        Ok(NeuralMfNetwork {
            user_embedding,
            item_embedding,
            mlp,
            output,
        })
    }
}

/// Embeddings, MLP tower and output layer.
#[derive(Clone, Debug)]
pub struct NeuralMfNetwork {
    user_embedding: Embedding,
    item_embedding: Embedding,
    mlp: Tower,
    output: Linear,
}

impl PointwiseNetwork for NeuralMfNetwork {
    fn forward_t(
        &self,
        users: &Tensor,
        items: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let user_vectors = self.user_embedding.forward(users)?;
        let item_vectors = self.item_embedding.forward(items)?;

        let hidden = self
            .mlp
            .forward_t(&Tensor::cat(&[&user_vectors, &item_vectors], 1)?, train)?;

        self.output.forward(&hidden)?.squeeze(1)
    }
}
