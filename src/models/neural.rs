//! Shared machinery for the neural embedding models.
//!
//! Both neural variants look up one embedding per user and per item and
//! differ only in the network stacked on top. A network implements
//! [`PointwiseNetwork`]: a batched forward pass producing one logit per
//! `(user, item)` pair. Networks are built from `candle` layers whose
//! variables live in a [`VarMap`], so gradients come from `candle`'s
//! autograd and [`EmbeddingModel`] supplies training, chunked inference and
//! checkpointing for any [`Architecture`].
//!
//! Training minimises binary cross-entropy over the observed pairs only:
//! every label is 1 and no negatives are sampled.
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, ModuleT, Tensor};
use candle_nn::{
    batch_norm, linear, AdamW, BatchNorm, BatchNormConfig, Dropout, Embedding, Init, Linear,
    Optimizer, ParamsAdamW, VarBuilder, VarMap,
};
use derive_builder::Builder;
use ndarray::{s, Array1, Array2, ArrayViewMut1};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use tracing::info;

use super::{ModelKind, ScoringModel};
use crate::checkpoint::{self, Checkpoint};
use crate::data::InteractionMatrix;
use crate::{ItemId, RecommendError, Result, UserId};

/// Items scored per forward pass at inference time.
pub const INFERENCE_CHUNK_SIZE: usize = 1000;

/// Row standing in for an unknown user when scoring a session context.
pub const PLACEHOLDER_USER: UserId = 0;

const EMBEDDING_INIT_STD: f64 = 0.01;
const MAX_LOG_LOSS: f32 = 100.0;

/// Hyperparameters shared by the neural models.
#[derive(Builder, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[builder(default)]
pub struct Hyperparameters {
    /// Width of the user and item embeddings.
    embedding_dim: usize,
    /// Widths of the hidden layers.
    hidden_dims: Vec<usize>,
    /// Probability of zeroing a hidden activation during training.
    dropout: f32,
    /// Pairs per optimizer step.
    minibatch_size: usize,
    /// Passes over the training pairs.
    num_epochs: usize,
    /// Adam step size.
    learning_rate: f32,
    /// Seeds the order in which pairs are visited.
    seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            embedding_dim: 64,
            hidden_dims: vec![128, 64],
            dropout: 0.2,
            minibatch_size: 256,
            num_epochs: 20,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

impl Hyperparameters {
    /// Width of the user and item embeddings.
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Widths of the hidden layers.
    pub fn hidden_dims(&self) -> &[usize] {
        &self.hidden_dims
    }

    /// Dropout probability.
    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    /// Seed for shuffling the training pairs.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Mean cross-entropy of `logits` against an all-ones target.
///
/// Each term is `-log σ(x) = ½(|x| - x) + ln(1 + e^-|x|)`, capped at 100.
/// `|x|` is taken as `max(x, -x)`, which splits the gradient evenly at 0.
pub(crate) fn positive_log_loss(logits: &Tensor) -> candle_core::Result<Tensor> {
    let magnitude = logits.maximum(&logits.neg()?)?;
    let negative_part = ((&magnitude - logits)? * 0.5)?;
    let tail = magnitude.neg()?.exp()?.affine(1.0, 1.0)?.log()?;

    (negative_part + tail)?.minimum(MAX_LOG_LOSS)?.mean_all()
}

/// Embedding table initialised from `N(0, 0.01²)`.
pub(crate) fn embedding(
    rows: usize,
    cols: usize,
    vb: VarBuilder,
) -> candle_core::Result<Embedding> {
    let weight = vb.get_with_hints(
        (rows, cols),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: EMBEDDING_INIT_STD,
        },
    )?;

    Ok(Embedding::new(weight, cols))
}

#[derive(Clone, Debug)]
struct TowerLayer {
    linear: Linear,
    batch_norm: Option<BatchNorm>,
}

/// Stack of linear layers, each followed by optional batch normalisation,
/// ReLU and dropout.
#[derive(Clone, Debug)]
pub struct Tower {
    layers: Vec<TowerLayer>,
    dropout: Dropout,
    output_dim: usize,
}

impl Tower {
    /// Layer `idx` lives under `{vb}.{idx}`, its batch norm under
    /// `{vb}.{idx}.batch_norm`.
    pub(crate) fn new(
        input_dim: usize,
        hidden_dims: &[usize],
        dropout: f32,
        with_batch_norm: bool,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let mut layers = Vec::with_capacity(hidden_dims.len());
        let mut inputs = input_dim;

        for (idx, &outputs) in hidden_dims.iter().enumerate() {
            let layer_vb = vb.pp(idx.to_string());
            let batch_norm = if with_batch_norm {
                Some(batch_norm(
                    outputs,
                    BatchNormConfig::default(),
                    layer_vb.pp("batch_norm"),
                )?)
            } else {
                None
            };

            layers.push(TowerLayer {
                linear: linear(inputs, outputs, layer_vb)?,
                batch_norm,
            });
            inputs = outputs;
        }

        Ok(Tower {
            layers,
            dropout: Dropout::new(dropout),
            output_dim: inputs,
        })
    }

    /// Width of the tower output.
    pub(crate) fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Dropout and batch statistics apply only when `train` is set.
    pub(crate) fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();

        for layer in &self.layers {
            xs = layer.linear.forward(&xs)?;
            if let Some(batch_norm) = &layer.batch_norm {
                xs = batch_norm.forward_t(&xs, train)?;
            }
            xs = self.dropout.forward_t(&xs.relu()?, train)?;
        }

        Ok(xs)
    }
}

/// A network scoring `(user, item)` pairs.
pub trait PointwiseNetwork: fmt::Debug + Send + Sync {
    /// One logit per pair for `u32` id tensors of equal length. Dropout and
    /// batch statistics are active only when `train` is set.
    fn forward_t(&self, users: &Tensor, items: &Tensor, train: bool)
        -> candle_core::Result<Tensor>;
}

/// Describes how to build the network of a neural model.
pub trait Architecture: fmt::Debug + Send + Sync + 'static {
    /// The network type.
    type Network: PointwiseNetwork;

    /// Registry entry of the model.
    const KIND: ModelKind;

    /// A freshly initialised network with its variables registered in `vb`.
    fn build(
        num_users: usize,
        num_items: usize,
        hyper: &Hyperparameters,
        vb: VarBuilder,
    ) -> candle_core::Result<Self::Network>;
}

fn id_tensor(ids: &[usize]) -> candle_core::Result<Tensor> {
    let ids: Vec<u32> = ids.iter().map(|&id| id as u32).collect();
    let len = ids.len();

    Tensor::from_vec(ids, len, &Device::Cpu)
}

/// Train the variables in `varmap` through `network` on the observed pairs
/// of `train`. Returns the mean loss of every epoch.
pub(crate) fn fit_network<N: PointwiseNetwork>(
    network: &N,
    varmap: &VarMap,
    train: &InteractionMatrix,
    hyper: &Hyperparameters,
    rng: &mut XorShiftRng,
) -> candle_core::Result<Vec<f32>> {
    let pairs = train.pairs();
    let mut order: Vec<usize> = (0..pairs.len()).collect();
    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: f64::from(hyper.learning_rate),
            weight_decay: 0.0,
            ..ParamsAdamW::default()
        },
    )?;
    let mut losses = Vec::with_capacity(hyper.num_epochs);

    for epoch in 0..hyper.num_epochs {
        order.shuffle(rng);

        let mut loss_value = 0.0;
        let mut num_batches = 0;

        for batch in order.chunks(hyper.minibatch_size.max(1)) {
            let users: Vec<UserId> = batch.iter().map(|&idx| pairs[idx].0).collect();
            let items: Vec<ItemId> = batch.iter().map(|&idx| pairs[idx].1).collect();

            let logits = network.forward_t(&id_tensor(&users)?, &id_tensor(&items)?, true)?;
            let loss = positive_log_loss(&logits)?;
            optimizer.backward_step(&loss)?;

            loss_value += loss.to_scalar::<f32>()?;
            num_batches += 1;
        }

        let epoch_loss = loss_value / num_batches.max(1) as f32;
        info!(
            epoch = epoch + 1,
            num_epochs = hyper.num_epochs,
            loss = epoch_loss,
            "Finished epoch"
        );
        losses.push(epoch_loss);
    }

    Ok(losses)
}

/// Score every item for `user` in chunks of [`INFERENCE_CHUNK_SIZE`],
/// writing probabilities into `out`.
pub(crate) fn score_user<N: PointwiseNetwork>(
    network: &N,
    user: UserId,
    mut out: ArrayViewMut1<f32>,
) -> candle_core::Result<()> {
    let num_items = out.len();

    for start in (0..num_items).step_by(INFERENCE_CHUNK_SIZE) {
        let end = (start + INFERENCE_CHUNK_SIZE).min(num_items);
        let items = Tensor::arange(start as u32, end as u32, &Device::Cpu)?;
        let users = Tensor::full(user as u32, end - start, &Device::Cpu)?;

        let logits = network.forward_t(&users, &items, false)?;
        let probabilities = candle_nn::ops::sigmoid(&logits)?.to_vec1::<f32>()?;

        out.slice_mut(s![start..end])
            .assign(&Array1::from(probabilities));
    }

    Ok(())
}

/// A named variable as stored in a checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NamedTensor {
    /// Variable path, e.g. `mlp.0.weight`.
    pub name: String,
    /// Dimensions of the variable.
    pub shape: Vec<usize>,
    /// Values in row-major order.
    pub values: Vec<f32>,
}

fn state_dict(varmap: &VarMap) -> candle_core::Result<Vec<NamedTensor>> {
    let data = varmap
        .data()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut tensors = data
        .iter()
        .map(|(name, var)| {
            Ok(NamedTensor {
                name: name.clone(),
                shape: var.dims().to_vec(),
                values: var.flatten_all()?.to_vec1::<f32>()?,
            })
        })
        .collect::<candle_core::Result<Vec<_>>>()?;
    tensors.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(tensors)
}

fn load_state_dict(
    varmap: &VarMap,
    tensors: Vec<NamedTensor>,
) -> std::result::Result<(), String> {
    let data = varmap
        .data()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut tensors: HashMap<String, NamedTensor> = tensors
        .into_iter()
        .map(|tensor| (tensor.name.clone(), tensor))
        .collect();

    for (name, var) in data.iter() {
        let tensor = tensors
            .remove(name)
            .ok_or_else(|| format!("missing tensor {}", name))?;

        if tensor.shape != var.dims() {
            return Err(format!(
                "tensor {} has shape {:?}, expected {:?}",
                name,
                tensor.shape,
                var.dims()
            ));
        }

        Tensor::from_vec(tensor.values, tensor.shape, &Device::Cpu)
            .and_then(|value| var.set(&value))
            .map_err(|error| format!("tensor {}: {}", name, error))?;
    }

    match tensors.keys().next() {
        Some(name) => Err(format!("unexpected tensor {}", name)),
        None => Ok(()),
    }
}

struct ModelData<N> {
    num_users: usize,
    num_items: usize,
    varmap: VarMap,
    network: N,
}

impl<N> fmt::Debug for ModelData<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ModelData")
            .field("num_users", &self.num_users)
            .field("num_items", &self.num_items)
            .finish()
    }
}

/// A neural model: hyperparameters plus, once fitted, its network.
#[derive(Debug)]
pub struct EmbeddingModel<A: Architecture> {
    hyper: Hyperparameters,
    model: Option<ModelData<A::Network>>,
    architecture: PhantomData<A>,
}

impl<A: Architecture> Default for EmbeddingModel<A> {
    fn default() -> Self {
        EmbeddingModel::new(Hyperparameters::default())
    }
}

impl<A: Architecture> EmbeddingModel<A> {
    /// Build an unfitted model.
    pub fn new(hyper: Hyperparameters) -> Self {
        EmbeddingModel {
            hyper,
            model: None,
            architecture: PhantomData,
        }
    }

    /// The model's hyperparameters.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    /// Every variable of the fitted network, sorted by name. Batch
    /// normalisation running statistics are included.
    pub fn state_dict(&self) -> Result<Vec<NamedTensor>> {
        Ok(state_dict(&self.model()?.varmap)?)
    }

    fn model(&self) -> Result<&ModelData<A::Network>> {
        self.model.as_ref().ok_or(RecommendError::NotLoaded)
    }

    fn build(
        num_users: usize,
        num_items: usize,
        hyper: &Hyperparameters,
    ) -> candle_core::Result<ModelData<A::Network>> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let network = A::build(num_users, num_items, hyper, vb)?;

        Ok(ModelData {
            num_users,
            num_items,
            varmap,
            network,
        })
    }
}

impl<A: Architecture> ScoringModel for EmbeddingModel<A> {
    fn kind(&self) -> ModelKind {
        A::KIND
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
            model = %A::KIND,
            num_users,
            num_items,
            num_pairs = train.nnz(),
            embedding_dim = self.hyper.embedding_dim,
            num_epochs = self.hyper.num_epochs,
            "Fitting neural model"
        );

        let mut rng = XorShiftRng::seed_from_u64(self.hyper.seed);
        let model = Self::build(num_users, num_items, &self.hyper)?;
        let losses = fit_network(&model.network, &model.varmap, train, &self.hyper, &mut rng)?;
        info!(model = %A::KIND, loss = ?losses.last(), "Finished fitting");

        self.model = Some(model);

        self.save(checkpoint_dir)
    }

    fn score_matrix(&self, ratings: &InteractionMatrix) -> Result<Array2<f32>> {
        let model = self.model()?;
        let mut scores = Array2::zeros((ratings.num_users(), model.num_items));

        for (user, row) in scores.outer_iter_mut().enumerate() {
            score_user(&model.network, user, row)?;
        }

        Ok(scores)
    }

    fn score_context(&self, _context: &[ItemId]) -> Result<Array1<f32>> {
        let model = self.model()?;
        let mut scores = Array1::zeros(model.num_items);

        score_user(&model.network, PLACEHOLDER_USER, scores.view_mut())?;

        Ok(scores)
    }

    fn checkpoint_filename(&self) -> String {
        format!("{}_emb{}.ckpt", A::KIND.name(), self.hyper.embedding_dim)
    }

    fn save(&self, dir: &Path) -> Result<PathBuf> {
        let model = self.model()?;
        let path = dir.join(self.checkpoint_filename());

        checkpoint::write(
            &path,
            &Checkpoint::new(
                A::KIND,
                model.num_users,
                model.num_items,
                (&self.hyper, state_dict(&model.varmap)?),
            ),
        )?;
        info!(model = %A::KIND, path = %path.display(), "Saved checkpoint");

        Ok(path)
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        let checkpoint: Checkpoint<(Hyperparameters, Vec<NamedTensor>)> =
            checkpoint::read(path, A::KIND)?;
        let (num_users, num_items) = (checkpoint.num_users, checkpoint.num_items);
        let (hyper, tensors) = checkpoint.state;

        // Rebuild the network from the stored shape, then overwrite weights.
        let model = Self::build(num_users, num_items, &hyper)?;
        load_state_dict(&model.varmap, tensors).map_err(|reason| {
            RecommendError::CorruptCheckpoint {
                path: path.display().to_string(),
                reason,
            }
        })?;

        info!(model = %A::KIND, num_users, num_items, "Restored checkpoint");

        self.hyper = hyper;
        self.model = Some(model);

        Ok(())
    }
}
