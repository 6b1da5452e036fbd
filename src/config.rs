use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct FixedStepConfig {
    #[serde(default = "FixedStepConfig::default_step")]
    pub step: f32,
    #[serde(default = "FixedStepConfig::default_max_substeps")]
    pub max_substeps: u32,
}

impl FixedStepConfig {
    fn default_step() -> f32 {
        1.0 / 60.0
    }

    const fn default_max_substeps() -> u32 {
        8
    }
}

impl Default for FixedStepConfig {
    fn default() -> Self {
        Self { step: Self::default_step(), max_substeps: Self::default_max_substeps() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_capacity")]
    pub capacity: usize,
}

impl CacheConfig {
    const fn default_capacity() -> usize {
        256
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: Self::default_capacity() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    /// Guard against a script queuing unbounded coroutines in one frame.
    #[serde(default = "ScriptConfig::default_max_coroutines_per_instance")]
    pub max_coroutines_per_instance: usize,
    #[serde(default = "ScriptConfig::default_log_callback_errors")]
    pub log_callback_errors: bool,
}

impl ScriptConfig {
    const fn default_max_coroutines_per_instance() -> usize {
        64
    }

    const fn default_log_callback_errors() -> bool {
        true
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_coroutines_per_instance: Self::default_max_coroutines_per_instance(),
            log_callback_errors: Self::default_log_callback_errors(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub fixed: FixedStepConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scripts: ScriptConfig,
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }
}
