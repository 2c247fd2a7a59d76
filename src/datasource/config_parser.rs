use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;

use crate::{
    datasource::file_path::*,
    utils::{elevation::Mechanism, logger::parse_level},
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_ms: u64,
    pub gpu_index: u32,
    pub rapl_energy_path: PathBuf,
    pub rapl_range_path: PathBuf,
    pub cpu_root: PathBuf,
    pub hwmon_root: PathBuf,
    pub msr_device: PathBuf,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            gpu_index: 0,
            rapl_energy_path: PathBuf::from(RAPL_ENERGY_UJ),
            rapl_range_path: PathBuf::from(RAPL_MAX_ENERGY_RANGE_UJ),
            cpu_root: PathBuf::from(CPU_SYSFS_ROOT),
            hwmon_root: PathBuf::from(HWMON_ROOT),
            msr_device: PathBuf::from(MSR_DEVICE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    pub mechanism: Mechanism,
    /// Environment variable holding the sudo password
    pub password_env: Option<String>,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            mechanism: Mechanism::Sudo,
            password_env: None,
        }
    }
}

impl PrivilegeConfig {
    pub fn password(&self) -> Option<String> {
        self.password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    pub mechanism: Mechanism,
    pub timeout_secs: u64,
    /// Binary run elevated with the `helper` sub-command; this executable
    /// when unset
    pub helper_path: Option<PathBuf>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            mechanism: Mechanism::Pkexec,
            timeout_secs: DEFAULT_APPLY_TIMEOUT_SECS,
            helper_path: None,
        }
    }
}

impl ApplyConfig {
    pub fn helper(&self) -> Result<PathBuf> {
        match &self.helper_path {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().context("Failed to locate the current executable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub level_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            level_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampling: SamplingConfig,
    pub privilege: PrivilegeConfig,
    pub apply: ApplyConfig,
    pub log: LogConfig,
}

impl Config {
    /// None for a level name the logger does not know
    pub fn log_level(&self) -> Option<LevelFilter> {
        parse_level(&self.log.level)
    }
}

/// Where a loaded config came from. Reported by the caller once the logger
/// is up, since loading happens before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    File,
    Defaults,
}

/// Load the config file; a missing file means every default applies.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<(Config, ConfigOrigin)> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok((Config::default(), ConfigOrigin::Defaults));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok((config, ConfigOrigin::File))
}
