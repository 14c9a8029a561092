//! Configuration for parseq.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PARSEQ_TIME_LIMIT_MS, PARSEQ_THROTTLE, PARSEQ_LOG)
//! 2. Config file (PARSEQ_CONFIG, or .parseq/config.yaml in the current
//!    directory or a parent, or <config dir>/parseq/config.yaml)
//! 3. Defaults (no time limit, unbounded throttle, "info" logging)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::core::{time_limit_from_millis, Defaults};
use crate::domain::Reason;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<Settings, String>> = OnceLock::new();

const DEFAULT_LOG_FILTER: &str = "info";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    /// Root time limit in milliseconds (0 = none)
    pub time_limit_ms: Option<i64>,
    /// Throttle for parallel and race nodes (0 = unbounded)
    pub throttle: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// tracing-subscriber EnvFilter directive
    pub filter: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// Plan defaults
    pub defaults: Defaults,
    /// Log filter used when RUST_LOG is not set
    pub log_filter: String,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            config_file: None,
        }
    }
}

/// Find config file: PARSEQ_CONFIG, then the current directory and parents,
/// then the user config directory
fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("PARSEQ_CONFIG") {
        return Some(PathBuf::from(explicit));
    }

    let mut current = std::env::current_dir().ok()?;
    loop {
        let config_path = current.join(".parseq").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("parseq").join("config.yaml"))
        .filter(|path| path.exists())
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Merge a config file with environment overrides
fn resolve<E>(file: ConfigFile, config_file: Option<PathBuf>, env: E) -> Result<Settings>
where
    E: Fn(&str) -> Option<String>,
{
    let time_limit_ms = match env("PARSEQ_TIME_LIMIT_MS") {
        Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
            Reason::new("config", "Bad milliseconds.").with_evidence(Value::from(raw.clone()))
        })?),
        None => file.defaults.time_limit_ms,
    };

    let throttle = match env("PARSEQ_THROTTLE") {
        Some(raw) => Some(raw.trim().parse::<usize>().map_err(|_| {
            Reason::new("config", "Bad throttle.").with_evidence(Value::from(raw.clone()))
        })?),
        None => file.defaults.throttle,
    };

    let time_limit = match time_limit_ms {
        Some(millis) => time_limit_from_millis(millis)?,
        None => None,
    };

    let log_filter = env("PARSEQ_LOG")
        .or(file.log.filter)
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    Ok(Settings {
        defaults: Defaults {
            time_limit,
            throttle: throttle.unwrap_or(0),
        },
        log_filter,
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<Settings> {
    let config_file = find_config_file();

    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve(file, config_file, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static Settings> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<Settings> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn no_env(_key: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = resolve(ConfigFile::default(), None, no_env).unwrap();

        assert_eq!(settings.defaults, Defaults::default());
        assert_eq!(settings.log_filter, "info");
        assert!(settings.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let parseq_dir = temp.path().join(".parseq");
        std::fs::create_dir_all(&parseq_dir).unwrap();

        let config_path = parseq_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
defaults:
  time_limit_ms: 2500
  throttle: 4
log:
  filter: parseq=debug
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version.as_deref(), Some("1.0"));
        assert_eq!(config.defaults.time_limit_ms, Some(2500));

        let settings = resolve(config, Some(config_path.clone()), no_env).unwrap();
        assert_eq!(settings.defaults.time_limit, Some(Duration::from_millis(2500)));
        assert_eq!(settings.defaults.throttle, 4);
        assert_eq!(settings.log_filter, "parseq=debug");
        assert_eq!(settings.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            defaults: DefaultsConfig {
                time_limit_ms: Some(1000),
                throttle: Some(2),
            },
            ..Default::default()
        };
        let env: HashMap<&str, &str> = [("PARSEQ_TIME_LIMIT_MS", "0"), ("PARSEQ_THROTTLE", "8")]
            .into_iter()
            .collect();

        let settings = resolve(file, None, |key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.defaults.time_limit, None);
        assert_eq!(settings.defaults.throttle, 8);
    }

    #[test]
    fn test_bad_env_values_are_rejected() {
        let negative = resolve(ConfigFile::default(), None, |key| {
            (key == "PARSEQ_TIME_LIMIT_MS").then(|| "-10".to_string())
        });
        assert!(negative.is_err());

        let garbage = resolve(ConfigFile::default(), None, |key| {
            (key == "PARSEQ_THROTTLE").then(|| "lots".to_string())
        });
        let err = garbage.unwrap_err();
        assert!(err.to_string().contains("Bad throttle."));
    }
}
