//! Configuration file resolution and environment overrides.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, SamplingMode};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_LINK";

/// Environment variable naming an explicit config file
const CONFIG_PATH_ENV: &str = "SERIAL_LINK_CONFIG";

/// Config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "serial-link.toml";

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path, if a file was used
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_LINK_CONFIG` environment variable
    /// 2. `./serial-link.toml`
    /// 3. `<platform config dir>/serial-link/config.toml`
    /// 4. Built-in defaults
    ///
    /// Environment variables then override individual values, and the result
    /// is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load from an explicit file, which must exist.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Defaults plus environment overrides, ignoring any files.
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Write the current configuration as TOML, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        debug!(path = %path.display(), "{} points at a missing file", CONFIG_PATH_ENV);
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    default_config_path().filter(|p| p.exists())
}

/// `<platform config dir>/serial-link/config.toml`, where the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-link").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded configuration file");

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    let write_error = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(write_error)
}

/// Read `SERIAL_LINK_<key>` and parse it, if set.
fn env_value<T: FromStr>(key: &str, what: &str) -> ConfigResult<Option<T>> {
    let var = format!("{}_{}", ENV_PREFIX, key);
    match std::env::var(&var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env(var, format!("Invalid {}", what))),
        Err(_) => Ok(None),
    }
}

fn env_flag(key: &str) -> ConfigResult<Option<bool>> {
    let var = format!("{}_{}", ENV_PREFIX, key);
    match std::env::var(&var) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::env(var, "Expected true or false")),
        },
        Err(_) => Ok(None),
    }
}

/// Apply `SERIAL_LINK_<SECTION>_<KEY>` overrides.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(port) = env_value::<String>("SERIAL_DEFAULT_PORT", "port")? {
        config.serial.default_port = Some(port);
    }
    if let Some(baud) = env_value("SERIAL_DEFAULT_BAUD", "baud rate")? {
        config.serial.default_baud = baud;
    }

    if let Some(mode) = env_value::<String>("SAMPLING_MODE", "sampling mode")? {
        config.sampling.mode = match mode.to_ascii_lowercase().as_str() {
            "edge" => SamplingMode::Edge,
            "interval" => SamplingMode::Interval,
            _ => {
                return Err(ConfigError::env(
                    format!("{}_SAMPLING_MODE", ENV_PREFIX),
                    "Expected edge or interval",
                ))
            }
        };
    }
    // Setting one rate clears the other so the pair stays unambiguous.
    if let Some(period) = env_value("SAMPLING_PERIOD_MS", "period")? {
        config.sampling.period_ms = Some(period);
        config.sampling.frequency_hz = None;
    }
    if let Some(hz) = env_value("SAMPLING_FREQUENCY_HZ", "frequency")? {
        config.sampling.frequency_hz = Some(hz);
        config.sampling.period_ms = None;
    }

    if let Some(enabled) = env_flag("AUTO_BREAK_ENABLED")? {
        config.auto_break.enabled = enabled;
    }

    if let Some(level) = env_value::<String>("LOGGING_LEVEL", "log level")? {
        config.logging.level = level;
    }

    Ok(())
}
