//! Serving wrapper around the active model.
//!
//! A [`Recommender`] owns one active slot: the name of the selected model and
//! its loaded instance. Requests read the slot under a shared lock; switching
//! models builds and restores the new instance without holding the lock and
//! then swaps it in under the exclusive lock, so readers always see either
//! the old pair or the new pair.
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::models::{ModelKind, ScoringModel};
use crate::registry::{ModelFactory, Registry};
use crate::{ItemId, RecommendError, Result};

#[derive(Debug, Default)]
struct ActiveSlot {
    name: Option<ModelKind>,
    model: Option<Box<dyn ScoringModel>>,
}

/// Owns the active model and serves recommendations from it.
#[derive(Debug)]
pub struct Recommender<F = Registry> {
    factory: F,
    slot: RwLock<ActiveSlot>,
}

impl<F: ModelFactory> Recommender<F> {
    /// A recommender with no active model.
    pub fn new(factory: F) -> Self {
        Recommender {
            factory,
            slot: RwLock::new(ActiveSlot::default()),
        }
    }

    /// The factory models are resolved through.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// The currently selected model, if any.
    pub fn active_model(&self) -> Option<ModelKind> {
        self.slot.read().name
    }

    /// Make `name` the active model, restoring it from its checkpoint.
    ///
    /// Selecting the model that is already active does nothing. On failure
    /// the previously active model keeps serving.
    pub fn set_model(&self, name: &str) -> Result<()> {
        if self.active_model().map(ModelKind::name) == Some(name) {
            debug!(model = name, "Model already loaded, skipping reload");
            return Ok(());
        }

        let kind = self.factory.resolve(name)?;
        let path = self.factory.checkpoint_path(kind);

        if !path.exists() {
            return Err(RecommendError::CheckpointMissing {
                model: kind.name().to_owned(),
                path: path.display().to_string(),
            });
        }

        info!(model = %kind, path = %path.display(), "Switching model");

        let mut model = self.factory.instantiate(kind);
        model.restore(&path)?;

        let mut slot = self.slot.write();
        if slot.name == Some(kind) {
            // A concurrent switch installed the same model first.
            return Ok(());
        }

        drop(slot.model.take());
        slot.name = Some(kind);
        slot.model = Some(model);

        info!(model = %kind, "Model loaded");

        Ok(())
    }

    /// The `top_k` best items for a session context, from the active model.
    pub fn recommend(&self, context: &[ItemId], top_k: usize) -> Result<Vec<ItemId>> {
        let slot = self.slot.read();

        let name = slot.name.ok_or(RecommendError::NotLoaded)?;
        let model = slot
            .model
            .as_ref()
            .ok_or_else(|| RecommendError::ModelNotInstantiated(name.name().to_owned()))?;

        debug!(model = %name, context_len = context.len(), top_k, "Recommending");

        model.recommend(context, top_k)
    }
}
