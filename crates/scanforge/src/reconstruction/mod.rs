//! External photogrammetry engine invocation.
//!
//! The engine is a capability: anything that can turn a directory of frames
//! into a model directory. [`CommandEngine`] runs a real executable; tests
//! substitute their own implementations.

pub mod command;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ReconstructionError;

pub use command::CommandEngine;

#[async_trait]
pub trait ReconstructionEngine: Send + Sync {
    /// Runs to completion and returns the model directory on success.
    /// Implementations do not retry and do not time out on their own.
    async fn invoke(
        &self,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, ReconstructionError>;
}
