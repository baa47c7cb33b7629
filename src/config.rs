use crate::dtype::DType;
use crate::grid::BlockShapePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_MAX_BLOCK_ELEMENTS: &str = "DELAYED_ARRAY_MAX_BLOCK_ELEMENTS";
pub const ENV_BLOCK_SIZE_BYTES: &str = "DELAYED_ARRAY_BLOCK_SIZE_BYTES";
pub const ENV_BLOCK_SHAPE_POLICY: &str = "DELAYED_ARRAY_BLOCK_SHAPE_POLICY";
pub const ENV_CONCURRENCY: &str = "DELAYED_ARRAY_CONCURRENCY";

pub const DEFAULT_BLOCK_SIZE_BYTES: usize = 45_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Knobs that govern block processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Overrides the element budget derived from `block_size_bytes`.
    pub max_block_elements: Option<usize>,
    pub block_size_bytes: usize,
    pub block_shape_policy: BlockShapePolicy,
    pub concurrency_degree: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_block_elements: None,
            block_size_bytes: DEFAULT_BLOCK_SIZE_BYTES,
            block_shape_policy: BlockShapePolicy::default(),
            concurrency_degree: 1,
        }
    }
}

impl ExecutionConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Apply `DELAYED_ARRAY_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`, keyed by the
    /// `DELAYED_ARRAY_*` names.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        }

        if let Some(v) = lookup(ENV_MAX_BLOCK_ELEMENTS) {
            self.max_block_elements = Some(parse(ENV_MAX_BLOCK_ELEMENTS, v)?);
        }
        if let Some(v) = lookup(ENV_BLOCK_SIZE_BYTES) {
            self.block_size_bytes = parse(ENV_BLOCK_SIZE_BYTES, v)?;
        }
        if let Some(v) = lookup(ENV_BLOCK_SHAPE_POLICY) {
            self.block_shape_policy = parse(ENV_BLOCK_SHAPE_POLICY, v)?;
        }
        if let Some(v) = lookup(ENV_CONCURRENCY) {
            self.concurrency_degree = parse(ENV_CONCURRENCY, v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_block_elements == Some(0) {
            return Err(ConfigError::Zero("max_block_elements"));
        }
        if self.block_size_bytes == 0 {
            return Err(ConfigError::Zero("block_size_bytes"));
        }
        if self.concurrency_degree == 0 {
            return Err(ConfigError::Zero("concurrency_degree"));
        }
        Ok(())
    }

    /// Element budget for blocks of `dtype`.
    pub fn max_block_elements_for(&self, dtype: DType) -> usize {
        self.max_block_elements
            .unwrap_or_else(|| (self.block_size_bytes / dtype.size()).max(1))
    }
}
