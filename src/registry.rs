//! Model registry.
//!
//! Maps registry names to model variants and variants to the checkpoint
//! file they are served from. The registry is fixed at construction; a
//! deployment that only serves some variants lists them up front with
//! [`Registry::with_models`] so misconfiguration fails at startup rather
//! than on the first request.
use std::path::{Path, PathBuf};

use crate::models::{ModelKind, ScoringModel};
use crate::{RecommendError, Result};

/// Resolves, locates and constructs models for the recommender.
pub trait ModelFactory: Send + Sync {
    /// The variant registered under `name`.
    fn resolve(&self, name: &str) -> Result<ModelKind>;

    /// Where the checkpoint of `kind` is expected.
    fn checkpoint_path(&self, kind: ModelKind) -> PathBuf;

    /// A fresh, unloaded instance of `kind`.
    fn instantiate(&self, kind: ModelKind) -> Box<dyn ScoringModel>;
}

/// Registry backed by a checkpoint directory.
#[derive(Clone, Debug)]
pub struct Registry {
    checkpoint_dir: PathBuf,
    models: Vec<ModelKind>,
}

impl Registry {
    /// Register every variant linked into this build.
    pub fn new<P: Into<PathBuf>>(checkpoint_dir: P) -> Self {
        Registry {
            checkpoint_dir: checkpoint_dir.into(),
            models: ModelKind::all(),
        }
    }

    /// Register only the named variants. Fails on any name that is not a
    /// variant of this build.
    pub fn with_models<P, S>(checkpoint_dir: P, names: &[S]) -> Result<Self>
    where
        P: Into<PathBuf>,
        S: AsRef<str>,
    {
        let models = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<ModelKind>>>()?;

        Ok(Registry {
            checkpoint_dir: checkpoint_dir.into(),
            models,
        })
    }

    /// The registered variants.
    pub fn models(&self) -> &[ModelKind] {
        &self.models
    }

    /// Directory checkpoints are read from.
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }
}

impl ModelFactory for Registry {
    fn resolve(&self, name: &str) -> Result<ModelKind> {
        let kind: ModelKind = name.parse()?;

        if self.models.contains(&kind) {
            Ok(kind)
        } else {
            Err(RecommendError::ModelNotRegistered(name.to_owned()))
        }
    }

    fn checkpoint_path(&self, kind: ModelKind) -> PathBuf {
        self.checkpoint_dir.join(kind.build().checkpoint_filename())
    }

    fn instantiate(&self, kind: ModelKind) -> Box<dyn ScoringModel> {
        kind.build()
    }
}
