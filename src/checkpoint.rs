//! On-disk checkpoint format.
//!
//! A checkpoint is a single bincode record holding the model kind, the
//! shape the model was fitted on, and a model-specific state (weights and
//! hyperparameters). Files are written to a temporary sibling first and
//! renamed into place, so a reader never sees a half-written checkpoint.
use std::fs::{create_dir_all, rename, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{RecommendError, Result};
use crate::models::ModelKind;

/// Bumped whenever the layout of any model state changes.
pub const FORMAT_VERSION: u32 = 2;

/// A persisted model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint<T> {
    /// Layout version the file was written with.
    pub format_version: u32,
    /// Which variant wrote the file.
    pub model: ModelKind,
    /// Rows of the matrix the model was fitted on.
    pub num_users: usize,
    /// Columns of the matrix the model was fitted on.
    pub num_items: usize,
    /// Variant-specific state.
    pub state: T,
}

impl<T> Checkpoint<T> {
    /// Wrap a state for writing.
    pub fn new(model: ModelKind, num_users: usize, num_items: usize, state: T) -> Self {
        Checkpoint {
            format_version: FORMAT_VERSION,
            model,
            num_users,
            num_items,
            state,
        }
    }
}

/// Write `checkpoint` to `path`, creating parent directories and replacing
/// any previous file.
pub fn write<T: Serialize>(path: &Path, checkpoint: &Checkpoint<T>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("ckpt.tmp");

    {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        bincode::serialize_into(&mut writer, checkpoint)?;
    }

    rename(&temp_path, path)?;

    Ok(())
}

/// Read the checkpoint at `path`, checking that it was written by `model`.
pub fn read<T: DeserializeOwned>(path: &Path, model: ModelKind) -> Result<Checkpoint<T>> {
    if !path.exists() {
        return Err(RecommendError::CheckpointMissing {
            model: model.name().to_owned(),
            path: path.display().to_string(),
        });
    }

    let reader = BufReader::new(File::open(path)?);
    let checkpoint: Checkpoint<T> = bincode::deserialize_from(reader)?;

    let corrupt = |reason: String| RecommendError::CorruptCheckpoint {
        path: path.display().to_string(),
        reason,
    };

    if checkpoint.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "format version {} (expected {})",
            checkpoint.format_version, FORMAT_VERSION
        )));
    }

    if checkpoint.model != model {
        return Err(corrupt(format!(
            "written by {} (expected {})",
            checkpoint.model.name(),
            model.name()
        )));
    }

    Ok(checkpoint)
}
