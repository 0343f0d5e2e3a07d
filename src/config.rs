//! TOML configuration for benchdash.
//!
//! Every section has defaults, so an empty or partial file is valid. Lookup
//! order: an explicit path (the `--config` flag), the `BENCHDASH_CONFIG`
//! environment variable, `./benchdash.toml`, then compiled-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::inference::Heuristics;

pub const CONFIG_ENV: &str = "BENCHDASH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "benchdash.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub inference: Heuristics,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Resolve configuration. An explicit path must load; the implicit
    /// locations fall through to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let cfg = Self::load(path)?;
            info!(path = %path.display(), "loaded configuration");
            return Ok(cfg);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => {
                    info!(path = %path.display(), "loaded configuration");
                    return Ok(cfg);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "BENCHDASH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => {
                    info!(path = %local.display(), "loaded configuration");
                    return Ok(cfg);
                }
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the batch registry.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/benchdash.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// terminal-bench output directory (`tb run --output-path`).
    pub runs_dir: PathBuf,
    /// Local mirror of the results bucket, `{batch}/{task}/{file}`.
    pub bucket_mirror_dir: Option<PathBuf>,
    /// Base URL of the results bucket for direct object reads.
    pub bucket_url: Option<String>,
    /// Only the tail of each log is read; summaries live at the end.
    pub max_artifact_bytes: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from("runs"),
            bucket_mirror_dir: None,
            bucket_url: None,
            max_artifact_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.storage.db_path, PathBuf::from("data/benchdash.db"));
        assert_eq!(cfg.sources.runs_dir, PathBuf::from("runs"));
        assert!(cfg.sources.bucket_url.is_none());
        assert_eq!(cfg.watch.interval_secs, 5);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_full_toml_parsing() {
        let toml_str = r#"
[server]
bind = "0.0.0.0:3000"

[storage]
db_path = "/var/lib/benchdash/registry.db"

[sources]
runs_dir = "/srv/terminal-bench/runs"
bucket_mirror_dir = "/srv/bucket"
bucket_url = "https://tb-results.s3.amazonaws.com"
max_artifact_bytes = 65536

[inference]
domain_signals = ["flask app running"]

[watch]
interval_secs = 2

[logging]
level = "debug"
json = true
"#;

        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:3000");
        assert_eq!(cfg.storage.db_path, PathBuf::from("/var/lib/benchdash/registry.db"));
        assert_eq!(cfg.sources.runs_dir, PathBuf::from("/srv/terminal-bench/runs"));
        assert_eq!(cfg.sources.bucket_mirror_dir, Some(PathBuf::from("/srv/bucket")));
        assert_eq!(
            cfg.sources.bucket_url.as_deref(),
            Some("https://tb-results.s3.amazonaws.com")
        );
        assert_eq!(cfg.sources.max_artifact_bytes, 65536);
        assert_eq!(cfg.inference.domain_signals, vec!["flask app running".to_string()]);
        assert_eq!(
            cfg.inference.error_tokens,
            Heuristics::default().error_tokens
        );
        assert_eq!(cfg.watch.interval_secs, 2);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        let defaults = Config::default();
        assert_eq!(cfg.server.bind, defaults.server.bind);
        assert_eq!(cfg.sources.max_artifact_bytes, defaults.sources.max_artifact_bytes);
        assert_eq!(
            cfg.inference.explicit_success,
            defaults.inference.explicit_success
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("benchdash.toml");
        std::fs::write(
            &path,
            r#"
[sources]
runs_dir = "/tmp/runs"
"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.sources.runs_dir, PathBuf::from("/tmp/runs"));
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = Config::resolve(Some(Path::new("/nonexistent/benchdash.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg.server.bind, back.server.bind);
        assert_eq!(cfg.inference.error_tokens, back.inference.error_tokens);
    }
}
