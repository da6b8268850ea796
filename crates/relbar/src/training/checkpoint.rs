//! Model snapshots written during training.
//!
//! Layout under the output directory:
//!
//! ```text
//! {dir}/{phase}_{step:05}/generator.mpk
//! {dir}/{phase}_{step:05}/discriminator.mpk
//! {dir}/{phase}_{step:05}/meta.json
//! ```

use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::error::{RelbarError, Result};
use crate::model::discriminator::{DiscriminatorConfig, RelbarDiscriminator};
use crate::model::generator::{GeneratorConfig, RelbarGenerator};

/// Metadata stored next to each snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMeta {
    pub phase: String,
    pub step: usize,
    pub temperature: f64,
    pub eta: f64,
}

/// Receives parameter snapshots. Fire-and-forget: implementations log
/// failures instead of returning them.
pub trait CheckpointSink<B: Backend> {
    fn save(
        &mut self,
        generator: &RelbarGenerator<B>,
        discriminator: &RelbarDiscriminator<B>,
        phase: &str,
        step: usize,
    );
}

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoints;

impl<B: Backend> CheckpointSink<B> for NoCheckpoints {
    fn save(&mut self, _: &RelbarGenerator<B>, _: &RelbarDiscriminator<B>, _: &str, _: usize) {}
}

/// Writes burn MessagePack records.
#[derive(Debug, Clone)]
pub struct MpkCheckpointSink {
    dir: PathBuf,
    saved: Vec<PathBuf>,
}

impl MpkCheckpointSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            saved: Vec::new(),
        }
    }

    /// Directories written so far, oldest first.
    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    fn write<B: Backend>(
        &self,
        generator: &RelbarGenerator<B>,
        discriminator: &RelbarDiscriminator<B>,
        phase: &str,
        step: usize,
    ) -> Result<PathBuf> {
        let step_dir = self.dir.join(format!("{phase}_{step:05}"));
        std::fs::create_dir_all(&step_dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        let generator_path = step_dir.join("generator");
        generator
            .clone()
            .save_file(&generator_path, &recorder)
            .map_err(|e| record_error(&generator_path, e))?;

        let discriminator_path = step_dir.join("discriminator");
        discriminator
            .clone()
            .save_file(&discriminator_path, &recorder)
            .map_err(|e| record_error(&discriminator_path, e))?;

        serde_json::to_writer_pretty(
            std::fs::File::create(step_dir.join("meta.json"))?,
            &CheckpointMeta {
                phase: phase.to_string(),
                step,
                temperature: generator.temperature(),
                eta: generator.eta(),
            },
        )?;
        Ok(step_dir)
    }
}

impl<B: Backend> CheckpointSink<B> for MpkCheckpointSink {
    fn save(
        &mut self,
        generator: &RelbarGenerator<B>,
        discriminator: &RelbarDiscriminator<B>,
        phase: &str,
        step: usize,
    ) {
        match self.write(generator, discriminator, phase, step) {
            Ok(dir) => {
                tracing::info!(phase, step, dir = %dir.display(), "Checkpoint saved");
                self.saved.push(dir);
            }
            Err(e) => tracing::warn!(phase, step, error = %e, "Checkpoint failed, training continues"),
        }
    }
}

fn record_error(path: &Path, e: impl std::fmt::Display) -> RelbarError {
    RelbarError::Checkpoint {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Load a generator record (path with or without the `.mpk` extension).
pub fn load_generator<B: Backend>(
    path: &Path,
    config: &GeneratorConfig,
    device: &B::Device,
) -> Result<RelbarGenerator<B>> {
    config
        .init::<B>(device)
        .load_file(path, &NamedMpkFileRecorder::<FullPrecisionSettings>::new(), device)
        .map_err(|e| record_error(path, e))
}

/// Load a discriminator record (path with or without the `.mpk` extension).
pub fn load_discriminator<B: Backend>(
    path: &Path,
    config: &DiscriminatorConfig,
    device: &B::Device,
) -> Result<RelbarDiscriminator<B>> {
    config
        .init::<B>(device)
        .load_file(path, &NamedMpkFileRecorder::<FullPrecisionSettings>::new(), device)
        .map_err(|e| record_error(path, e))
}

/// Read the `meta.json` of a snapshot directory.
pub fn read_meta(step_dir: &Path) -> Result<CheckpointMeta> {
    let file = std::fs::File::open(step_dir.join("meta.json"))?;
    Ok(serde_json::from_reader(file)?)
}
