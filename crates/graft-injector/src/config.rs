use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use graft_core::Channel;
use serde::Deserialize;

use crate::process::TerminatePolicy;
use crate::EngineLayout;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub locate: LocateConfig,
    pub process: ProcessConfig,
    pub inject: InjectConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocateConfig {
    pub extra_search_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    pub poll_interval_ms: u64,
    pub terminate_timeout_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            terminate_timeout_ms: 6_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InjectConfig {
    pub default_channel: Channel,
    pub skip_relaunch: bool,
    pub bundle_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: Option<String>,
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse graft config")?;
        if config.process.poll_interval_ms == 0 {
            return Err(anyhow!("process.poll_interval_ms must be greater than zero"));
        }
        if config.process.terminate_timeout_ms < config.process.poll_interval_ms {
            return Err(anyhow!(
                "process.terminate_timeout_ms ({}) must not be shorter than process.poll_interval_ms ({})",
                config.process.terminate_timeout_ms,
                config.process.poll_interval_ms
            ));
        }
        Ok(config)
    }

    pub fn load(layout: &EngineLayout) -> Result<Self> {
        let path = layout.config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };
        Self::from_toml_str(&raw).with_context(|| format!("invalid config: {}", path.display()))
    }

    pub fn terminate_policy(&self) -> TerminatePolicy {
        TerminatePolicy {
            poll_interval: Duration::from_millis(self.process.poll_interval_ms),
            timeout: Duration::from_millis(self.process.terminate_timeout_ms),
        }
    }
}
