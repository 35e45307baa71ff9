//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Draftloom pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub history: HistoryConfig,
    pub queue: QueueConfig,
    pub sandbox: SandboxConfig,
    pub transpiler: TranspilerConfig,
    pub autosave: AutosaveConfig,
}

/// Undo/redo stack sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum entries kept on each of the undo and redo stacks
    pub undo_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { undo_capacity: 50 }
    }
}

/// Retry queue defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Priority assigned to errors enqueued without an explicit one
    pub default_priority: i32,
    /// Attempts before an item is dropped from the queue
    pub max_attempts: u32,
    /// Batch size for batched drain
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_priority: 5,
            max_attempts: 3,
            batch_size: 10,
        }
    }
}

/// Sandboxed execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Per-request execution timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum code payload accepted before crossing the boundary
    pub max_code_bytes: usize,
    /// How long to wait for the boundary's ready handshake
    pub ready_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_code_bytes: 1024 * 1024,
            ready_timeout_ms: 5_000,
        }
    }
}

/// External transpiler acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranspilerConfig {
    /// Equivalent mirrors tried in order for the transpiler bundle
    pub mirrors: Vec<String>,
    /// Retries per mirror before falling back to the next one
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries, in milliseconds
    pub backoff_base_ms: u64,
    /// Hard overall deadline for acquisition, in milliseconds. Past it the
    /// pipeline proceeds and lets classification absorb the failure.
    pub acquire_deadline_ms: u64,
}

impl Default for TranspilerConfig {
    fn default() -> Self {
        Self {
            mirrors: vec![
                "https://unpkg.com/@babel/standalone/babel.min.js".to_string(),
                "https://cdn.jsdelivr.net/npm/@babel/standalone/babel.min.js".to_string(),
                "https://cdnjs.cloudflare.com/ajax/libs/babel-standalone/7.26.4/babel.min.js"
                    .to_string(),
            ],
            max_retries: 3,
            backoff_base_ms: 1_000,
            acquire_deadline_ms: 30_000,
        }
    }
}

/// Debounced persistence of draft edits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveConfig {
    /// Window within which bursts of edits collapse into one write
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self { debounce_ms: 2_000 }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("DRAFTLOOM_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("draftloom")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the default database path
    pub fn database_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("draftloom.db"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let path = Self::config_path()?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
