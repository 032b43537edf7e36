//! Optimizer/executor tuning surface (§11): a `serde`-deserializable
//! configuration loaded from an optional `tensorjit.toml`, mirroring
//! the teacher's `NeurlangConfig::load`/`load_from_cwd`/`find_and_load`
//! trio (`src/config.rs`) but scoped to this crate's two tuning knobs
//! instead of a general project manifest.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching `tensorjit.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TensorJitConfig {
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl Default for TensorJitConfig {
    fn default() -> Self {
        TensorJitConfig {
            optimizer: OptimizerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl TensorJitConfig {
    /// Builds a config directly from explicit values, bypassing file
    /// I/O (§11: "Construction from explicit values ... is equally
    /// supported").
    pub fn new(max_kernel_size: i64, min_kernel_size: i64, thread_target: i64) -> Self {
        TensorJitConfig {
            optimizer: OptimizerConfig {
                max_kernel_size,
                min_kernel_size,
                thread_target,
            },
            executor: ExecutorConfig::default(),
        }
    }

    /// Loads configuration from an explicit file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TensorJitConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads from `tensorjit.toml` in the current directory or an
    /// ancestor, falling back to [`TensorJitConfig::default`] if none
    /// is found.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir()?;
        Self::find_and_load(&cwd)
    }

    /// Searches `start_dir` and its ancestors for `tensorjit.toml`.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join("tensorjit.toml");
            if candidate.exists() {
                return Self::load(&candidate);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// The worker-pool size the parallel executor should use: the
    /// explicit override when set, otherwise `thread_target` (§5/§11:
    /// "`thread_target` ... doubles as the executor's worker-pool size
    /// unless `executor.worker_threads` is explicitly set").
    pub fn worker_threads(&self) -> usize {
        if self.executor.worker_threads > 0 {
            self.executor.worker_threads as usize
        } else {
            self.optimizer.thread_target.max(1) as usize
        }
    }
}

/// The optimizer's three tuning knobs (§4.4): the split phase's upper
/// bound, the split/fuse phases' lower bound, and the shared-loop
/// promotion target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizerConfig {
    #[serde(default = "default_max_kernel_size")]
    pub max_kernel_size: i64,

    #[serde(default = "default_min_kernel_size")]
    pub min_kernel_size: i64,

    #[serde(default = "default_thread_target")]
    pub thread_target: i64,
}

fn default_max_kernel_size() -> i64 {
    64
}

fn default_min_kernel_size() -> i64 {
    2
}

fn default_thread_target() -> i64 {
    1
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_kernel_size: default_max_kernel_size(),
            min_kernel_size: default_min_kernel_size(),
            thread_target: default_thread_target(),
        }
    }
}

/// The parallel executor's own tuning knob.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// `0` means "use `optimizer.thread_target` as the pool size".
    #[serde(default)]
    pub worker_threads: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig { worker_threads: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_the_single_threaded_baseline() {
        let cfg = TensorJitConfig::default();
        assert_eq!(cfg.optimizer.max_kernel_size, 64);
        assert_eq!(cfg.optimizer.min_kernel_size, 2);
        assert_eq!(cfg.optimizer.thread_target, 1);
        assert_eq!(cfg.worker_threads(), 1);
    }

    #[test]
    fn parses_a_partial_toml_document() {
        let toml_src = "[optimizer]\nmax_kernel_size = 32\n";
        let cfg: TensorJitConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.optimizer.max_kernel_size, 32);
        assert_eq!(cfg.optimizer.min_kernel_size, 2);
        assert_eq!(cfg.executor.worker_threads, 0);
    }

    #[test]
    fn explicit_worker_threads_overrides_thread_target() {
        let mut cfg = TensorJitConfig::new(64, 2, 4);
        cfg.executor.worker_threads = 8;
        assert_eq!(cfg.worker_threads(), 8);
    }

    #[test]
    fn find_and_load_falls_back_to_default_without_a_file() {
        let dir = std::env::temp_dir();
        let cfg = TensorJitConfig::find_and_load(&dir).unwrap_or_else(|_| TensorJitConfig::default());
        assert!(cfg.optimizer.max_kernel_size > 0);
    }
}
