use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub wrapper: WrapperConfig,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            panel: PanelConfig::default(),
            wrapper: WrapperConfig::default(),
            plugins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_stdout_enabled")]
    pub stdout: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: default_stdout_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Panel geometry pushed to every plugin right after it is spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_panel_size")]
    pub size: u32,
    #[serde(default)]
    pub mode: PanelMode,
    #[serde(default = "default_nrows")]
    pub nrows: u32,
    #[serde(default)]
    pub locked: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            size: default_panel_size(),
            mode: PanelMode::default(),
            nrows: default_nrows(),
            locked: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanelMode {
    #[default]
    Horizontal,
    Vertical,
    Deskbar,
}

impl PanelMode {
    /// Integer representation used by the `set-mode` property.
    pub fn as_raw(&self) -> i32 {
        match self {
            PanelMode::Horizontal => 0,
            PanelMode::Vertical => 1,
            PanelMode::Deskbar => 2,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(PanelMode::Horizontal),
            1 => Some(PanelMode::Vertical),
            2 => Some(PanelMode::Deskbar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperConfig {
    /// Wrapper executable; defaults to `bladebar-wrapper` next to the panel binary.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Overrides the bus directory derived from the session runtime dir.
    #[serde(default)]
    pub bus_dir: Option<PathBuf>,
    /// How long a wrapper may linger after its endpoint disconnected before it is killed.
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
    /// Respawn wrappers that exit asking for a restart.
    #[serde(default = "default_restart_on_request")]
    pub restart_on_request: bool,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            binary: None,
            bus_dir: None,
            exit_grace_ms: default_exit_grace_ms(),
            restart_on_request: default_restart_on_request(),
        }
    }
}

/// One plugin instance hosted by the panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginEntry {
    pub unique_id: u32,
    /// Module path handed to the wrapper (e.g. `/usr/lib/bladebar/plugins/libclock.so`).
    pub module: PathBuf,
    /// Internal plugin name; the module file stem when omitted.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl PluginEntry {
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let stem = self
            .module
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        stem.strip_prefix("lib").map(str::to_string).unwrap_or(stem)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("plugin unique_id {0} is used more than once")]
    DuplicatePluginId(u32),
    #[error("plugin {0} has an empty module path")]
    EmptyModule(u32),
    #[error("panel size must be greater than zero")]
    ZeroPanelSize,
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    /// Bus directory shared with the wrappers, honoring the config override.
    pub fn bus_dir(&self, dirs: &AppDirs) -> PathBuf {
        self.wrapper
            .bus_dir
            .clone()
            .unwrap_or_else(|| dirs.bus_dir().to_path_buf())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.panel.size == 0 {
            return Err(ValidationError::ZeroPanelSize);
        }

        let mut seen = BTreeSet::new();
        for plugin in &self.plugins {
            if !seen.insert(plugin.unique_id) {
                return Err(ValidationError::DuplicatePluginId(plugin.unique_id));
            }
            if plugin.module.as_os_str().is_empty() {
                return Err(ValidationError::EmptyModule(plugin.unique_id));
            }
        }
        Ok(())
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stdout_enabled() -> bool {
    true
}

fn default_panel_size() -> u32 {
    30
}

fn default_nrows() -> u32 {
    1
}

fn default_exit_grace_ms() -> u64 {
    1000
}

fn default_restart_on_request() -> bool {
    true
}
