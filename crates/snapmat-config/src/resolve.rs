//! Config resolution: CLI → env → XDG → defaults.

use std::path::{Path, PathBuf};

use crate::materializer::{ConfigError, MaterializerConfig};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SNAPMAT_CONFIG";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Xdg(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Cli(p) => write!(f, "cli:{}", p.display()),
            ConfigSource::Env(p) => write!(f, "env:{}", p.display()),
            ConfigSource::Xdg(p) => write!(f, "xdg:{}", p.display()),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

/// Candidate locations consulted during resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub cli: Option<PathBuf>,
    pub env: Option<PathBuf>,
    pub xdg: Option<PathBuf>,
}

impl ConfigPaths {
    /// Collect candidates from the CLI flag, process environment and XDG dir.
    pub fn discover(cli: Option<&Path>) -> Self {
        Self {
            cli: cli.map(Path::to_path_buf),
            env: std::env::var_os(CONFIG_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            xdg: dirs::config_dir().map(|d| d.join("snapmat").join("config.toml")),
        }
    }
}

/// A loaded configuration plus its provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: MaterializerConfig,
    pub source: ConfigSource,
}

/// Resolve the effective configuration.
///
/// An explicitly named file (CLI or env) must exist and parse. The XDG file
/// is optional and only used when present.
pub fn resolve_config(paths: &ConfigPaths) -> Result<ResolvedConfig, ConfigError> {
    if let Some(path) = &paths.cli {
        return Ok(ResolvedConfig {
            config: MaterializerConfig::load_from_file(path)?,
            source: ConfigSource::Cli(path.clone()),
        });
    }

    if let Some(path) = &paths.env {
        return Ok(ResolvedConfig {
            config: MaterializerConfig::load_from_file(path)?,
            source: ConfigSource::Env(path.clone()),
        });
    }

    if let Some(path) = paths.xdg.as_ref().filter(|p| p.exists()) {
        return Ok(ResolvedConfig {
            config: MaterializerConfig::load_from_file(path)?,
            source: ConfigSource::Xdg(path.clone()),
        });
    }

    Ok(ResolvedConfig {
        config: MaterializerConfig::default(),
        source: ConfigSource::Defaults,
    })
}
