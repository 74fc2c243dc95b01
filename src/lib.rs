#![deny(missing_docs)]
//! # cinerank
//!
//! `cinerank` recommends catalog items (movies) from implicit feedback:
//! given the items a user has interacted with, a model ranks the items the
//! user is likely to interact with next.
//!
//! Four interchangeable models implement the same [`ScoringModel`] contract:
//! EASE, ItemKNN, NeuralMF and DeepFM. Models are trained offline by the
//! [`pipeline`], persisted as checkpoints, and served through a
//! [`Recommender`] which owns the active model and swaps between them.
//!
//! ## Example
//!
//! ```rust,no_run
//! # extern crate cinerank;
//! # extern crate rand;
//! # extern crate rand_xorshift;
//! # use rand::SeedableRng;
//! use std::path::Path;
//!
//! use cinerank::data::{train_test_split, Interactions};
//! use cinerank::{datasets, evaluation, ModelKind, Recommender, Registry};
//!
//! let log = datasets::load_interaction_log("interactions.csv").unwrap();
//! let interactions = Interactions::from_log(&log);
//!
//! let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(42);
//! let (train, test) = train_test_split(interactions.matrix(), &mut rng, 0.1);
//!
//! let mut model = ModelKind::Ease.build();
//! model.fit(&train, Path::new("ckpt")).unwrap();
//!
//! let top_k = evaluation::extract_top_k(&model.predict(&train).unwrap(), 100);
//! println!("{:?}", evaluation::evaluate(&top_k, &test, 100));
//!
//! let recommender = Recommender::new(Registry::new("ckpt"));
//! recommender.set_model("EASE").unwrap();
//! println!("{:?}", recommender.recommend(&[0, 1], 10).unwrap());
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

extern crate bincode;
#[cfg(feature = "neural")]
extern crate candle_core;
#[cfg(feature = "neural")]
extern crate candle_nn;
extern crate csv;
extern crate failure;
extern crate ndarray;
extern crate parking_lot;
extern crate rand;
extern crate rayon;
extern crate serde;
extern crate siphasher;

use failure::Fail;

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod models;
pub mod pipeline;
pub mod recommender;
pub mod registry;

pub use models::{ModelKind, ScoringModel};
pub use recommender::Recommender;
pub use registry::Registry;

/// Alias for dense user indices.
pub type UserId = usize;
/// Alias for dense item indices.
pub type ItemId = usize;
/// Alias for identifiers as they appear in raw interaction logs.
pub type ExternalId = u64;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, RecommendError>;

/// Errors raised by models, the serving wrapper and the offline pipeline.
#[derive(Debug, Fail)]
pub enum RecommendError {
    /// The requested model name is not a linked variant.
    #[fail(display = "Model {} is not registered.", _0)]
    ModelNotRegistered(String),
    /// The checkpoint for a model does not exist.
    #[fail(
        display = "Checkpoint file not found: {}. Train the {} model first with `fit_offline`.",
        path, model
    )]
    CheckpointMissing {
        /// Model whose checkpoint was requested.
        model: String,
        /// Path that was looked up.
        path: String,
    },
    /// Prediction was requested before a model was fitted or restored.
    #[fail(display = "No model loaded. Call set_model() first.")]
    NotLoaded,
    /// A model name is active but the slot holds no instance.
    #[fail(display = "Model {} is active but no instance is loaded.", _0)]
    ModelNotInstantiated(String),
    /// Matrix dimensions disagree with the model's recorded shape.
    #[fail(display = "Invalid shape: model expects {:?}, got {:?}.", expected, found)]
    InvalidShape {
        /// `(num_users, num_items)` the model was fitted on.
        expected: (usize, usize),
        /// Shape that was supplied.
        found: (usize, usize),
    },
    /// Fitting was attempted on an empty matrix.
    #[fail(display = "Cannot fit a model on a matrix with no interactions.")]
    NoInteractions,
    /// The regularised Gram matrix could not be inverted.
    #[fail(display = "Gram matrix is singular; increase the L2 penalty.")]
    SingularMatrix,
    /// A checkpoint exists but does not describe the expected model.
    #[fail(display = "Corrupt checkpoint {}: {}", path, reason)]
    CorruptCheckpoint {
        /// Checkpoint path.
        path: String,
        /// What did not match.
        reason: String,
    },
    /// Filesystem error.
    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] std::io::Error),
    /// Checkpoint (de)serialization error.
    #[fail(display = "Serialization error: {}", _0)]
    Serialization(#[cause] bincode::Error),
    /// Interaction log parsing error.
    #[fail(display = "CSV error: {}", _0)]
    Csv(#[cause] csv::Error),
    /// Tensor operation error in a neural model.
    #[cfg(feature = "neural")]
    #[fail(display = "Tensor error: {}", _0)]
    Tensor(#[cause] candle_core::Error),
}

/// Stable, transport-independent error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// See [`RecommendError::ModelNotRegistered`].
    ModelNotRegistered,
    /// See [`RecommendError::CheckpointMissing`].
    CheckpointMissing,
    /// See [`RecommendError::NotLoaded`].
    NotLoaded,
    /// See [`RecommendError::ModelNotInstantiated`].
    ModelNotInstantiated,
    /// See [`RecommendError::InvalidShape`].
    InvalidShape,
    /// See [`RecommendError::NoInteractions`].
    NoInteractions,
    /// See [`RecommendError::SingularMatrix`].
    SingularMatrix,
    /// See [`RecommendError::CorruptCheckpoint`].
    CorruptCheckpoint,
    /// See [`RecommendError::Io`].
    Io,
    /// See [`RecommendError::Serialization`].
    Serialization,
    /// See [`RecommendError::Csv`].
    Csv,
    /// Raised by a neural model's tensor operations.
    Tensor,
}

/// `{kind, message}` pair for the serving layer to translate into responses.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorPayload {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl RecommendError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecommendError::ModelNotRegistered(_) => ErrorKind::ModelNotRegistered,
            RecommendError::CheckpointMissing { .. } => ErrorKind::CheckpointMissing,
            RecommendError::NotLoaded => ErrorKind::NotLoaded,
            RecommendError::ModelNotInstantiated(_) => ErrorKind::ModelNotInstantiated,
            RecommendError::InvalidShape { .. } => ErrorKind::InvalidShape,
            RecommendError::NoInteractions => ErrorKind::NoInteractions,
            RecommendError::SingularMatrix => ErrorKind::SingularMatrix,
            RecommendError::CorruptCheckpoint { .. } => ErrorKind::CorruptCheckpoint,
            RecommendError::Io(_) => ErrorKind::Io,
            RecommendError::Serialization(_) => ErrorKind::Serialization,
            RecommendError::Csv(_) => ErrorKind::Csv,
            #[cfg(feature = "neural")]
            RecommendError::Tensor(_) => ErrorKind::Tensor,
        }
    }

    /// The `{kind, message}` pair describing this error.
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<std::io::Error> for RecommendError {
    fn from(error: std::io::Error) -> Self {
        RecommendError::Io(error)
    }
}

impl From<bincode::Error> for RecommendError {
    fn from(error: bincode::Error) -> Self {
        RecommendError::Serialization(error)
    }
}

impl From<csv::Error> for RecommendError {
    fn from(error: csv::Error) -> Self {
        RecommendError::Csv(error)
    }
}

#[cfg(feature = "neural")]
impl From<candle_core::Error> for RecommendError {
    fn from(error: candle_core::Error) -> Self {
        RecommendError::Tensor(error)
    }
}
