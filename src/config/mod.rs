//! Configuration loading
//!
//! Settings come from built-in defaults, then an optional TOML file, then
//! command-line flags. Inventory and argument parsing live in the submodules.

pub mod args;
pub mod inventory;

pub use args::{parse_kv, parse_vars};
pub use inventory::load_targets;

use crate::dispatch::{DispatchConfig, RetryPolicy};
use crate::error::{Error, Result};
use crate::stager::RepairPolicy;
use crate::transport::SshConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StagehandConfig {
    pub dispatch: DispatchConfig,
    pub retry: RetryPolicy,
    pub stage: RepairPolicy,
    pub ssh: SshConfig,
}

impl StagehandConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| Error::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.parallelism == 0 {
            return Err(Error::config("dispatch.parallelism must be at least 1"));
        }
        if self.retry.base < 1.0 {
            return Err(Error::config("retry.base must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(Error::config("retry.jitter_factor must be between 0.0 and 1.0"));
        }
        if self.ssh.program.trim().is_empty() {
            return Err(Error::config("ssh.program must not be empty"));
        }
        Ok(())
    }

    /// Dispatch settings with the retry policy folded in
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            retry: self.retry.clone(),
            ..self.dispatch.clone()
        }
    }
}
