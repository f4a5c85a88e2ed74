//! Configuration file parsing for blinder.toml.

use blinder_platform::{AppInfo, PlatformConfig, PreconfiguredPrefs};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Identity reported to the filter engine as `_appInfo`
    #[serde(default)]
    pub app: AppInfo,

    /// Executor, bootstrap and construction settings
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Where bootstrap scripts live
    #[serde(default)]
    pub resources: ResourcesConfig,

    /// Preferences preset before the filter engine starts
    #[serde(default)]
    pub prefs: PreconfiguredPrefs,

    /// The file this configuration was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourcesConfig {
    /// Directory holding the bootstrap sources; relative to the config file
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Resource directory, resolved against the config file's directory.
    pub fn resource_dir(&self) -> PathBuf {
        let dir = self
            .resources
            .dir
            .clone()
            .unwrap_or_else(|| self.platform.base_path.clone());
        match self.source.as_deref().and_then(Path::parent) {
            Some(base) if dir.is_relative() => base.join(dir),
            _ => dir,
        }
    }
}

/// Load configuration from a file or search for default config files.
///
/// An explicitly named file must exist; otherwise a missing file means
/// defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return read_config(path);
    }

    match find_config_file().or_else(user_config_file) {
        Some(path) if path.exists() => read_config(&path),
        _ => Ok(Config::default()),
    }
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    config.source = Some(path.to_path_buf());
    Ok(config)
}

/// Search for configuration file in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_ancestors(&cwd)
}

fn find_config_in_ancestors(start: &Path) -> Option<PathBuf> {
    const CONFIG_NAMES: &[&str] = &["blinder.toml", ".blinderrc.toml"];

    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}

/// `<config dir>/blinder/config.toml`, e.g. `~/.config/blinder/config.toml`.
fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("blinder").join("config.toml"))
}
