//! Engine configuration loaded from `config.toml`.

use crate::error::{Error, Result};
use crate::policy::IntegrationPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name for pr-engine files under the platform config/cache dirs.
const APP_DIR: &str = "pr-engine";

/// Filename for the configuration.
const CONFIG_FILE: &str = "config.toml";

/// Git invocation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Git executable to run
    pub executable: PathBuf,
    /// Committer name used for commits created by the engine
    pub committer_name: String,
    /// Committer email used for commits created by the engine
    pub committer_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("git"),
            committer_name: "pr-engine".to_string(),
            committer_email: "pr-engine@localhost".to_string(),
        }
    }
}

/// Top level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of integration preview workers; host parallelism when unset
    pub preview_workers: Option<usize>,
    /// Directory for per-request cache data
    pub cache_dir: Option<PathBuf>,
    /// Git settings
    pub git: GitConfig,
    /// Integration policies, first match wins
    pub integration_policies: Vec<IntegrationPolicy>,
}

impl EngineConfig {
    /// Effective worker count
    pub fn preview_workers(&self) -> usize {
        self.preview_workers
            .filter(|workers| *workers > 0)
            .unwrap_or_else(default_workers)
    }

    /// Effective cache directory
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
        })
    }
}

/// Number of workers to use when none is configured
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Load configuration from disk.
///
/// Returns the default configuration if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Save configuration to disk, creating the parent directory if needed.
pub fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.exists()) {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("failed to create {}: {e}", dir.display())))?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;

    fs::write(path, format!("# pr-engine configuration\n\n{content}"))
        .map_err(|e| Error::Config(format!("failed to write {}: {e}", path.display())))?;

    Ok(())
}
