pub mod check;
pub mod completions;
pub mod export;
pub mod migrate;
pub mod models;

use anyhow::{Context, Result};
use clap::ValueEnum;
use plenum_core::checker::Mode;
use plenum_core::config::ProjectConfig;
use plenum_core::registry::ModelRegistry;

/// Checker mode as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// One meeting; references to organization-wide models are not followed.
    Internal,
    /// One meeting; every reference must stay inside it.
    External,
    /// The whole dataset.
    All,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Internal => Self::Internal,
            ModeArg::External => Self::External,
            ModeArg::All => Self::All,
        }
    }
}

/// The configured models document, or the built-in one.
pub fn load_registry(config: &ProjectConfig) -> Result<ModelRegistry> {
    match &config.registry.models {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ModelRegistry::from_yaml(&source)
                .with_context(|| format!("Failed to load models from {}", path.display()))
        }
        None => ModelRegistry::builtin().context("Built-in models are invalid"),
    }
}
