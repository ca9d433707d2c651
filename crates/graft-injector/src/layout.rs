use anyhow::{anyhow, Context, Result};
use graft_core::Channel;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR_ENV: &str = "GRAFT_CONFIG_DIR";
pub const INSTALLED_BUNDLE_NAME: &str = "graft.asar";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLayout {
    root: PathBuf,
}

impl EngineLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("graft.toml")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn location_cache_path(&self, channel: Channel) -> PathBuf {
        self.cache_dir().join(format!("{}.location", channel.as_str()))
    }

    pub fn installed_bundle_path(&self) -> PathBuf {
        self.root.join(INSTALLED_BUNDLE_NAME)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.cache_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_config_root() -> Result<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(explicit));
    }

    dirs::config_dir()
        .map(|dir| dir.join("graft"))
        .ok_or_else(|| anyhow!("cannot resolve a config directory; set {CONFIG_DIR_ENV}"))
}
