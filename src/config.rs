//! TOML configuration for the testdeck daemon.
//!
//! A layered configuration model: every section has compiled-in defaults,
//! the file may set any subset of keys, and the file path itself can come
//! from the command line, the `TESTDECK_CONFIG` environment variable, or the
//! standard system location.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TESTDECK_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/testdeck/testdeck.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the daemon process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. `explicit` (the `--config` flag), which must load successfully.
    /// 2. The path in `TESTDECK_CONFIG`.
    /// 3. `/etc/testdeck/testdeck.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Like [`AppConfig::resolve`] without an explicit path; never fails.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TESTDECK_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port the REST API binds to.
    pub bind: String,
    /// Origins allowed by the CORS layer. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3001".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/testdeck.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// How the external Robot Framework runner is launched and supervised.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interpreter (or bare command name resolved via `$PATH`).
    pub program: String,
    /// Module passed via `-m`.
    pub module: String,
    /// Parent directory for per-run scratch directories.
    pub workdir_root: PathBuf,
    /// Wall-clock limit for one run in seconds. `0` disables the limit.
    pub timeout_secs: u64,
    /// Seconds between SIGTERM and SIGKILL when terminating a run.
    pub kill_grace_secs: u64,
    /// Runs allowed to execute at the same time; further runs wait in PENDING.
    pub max_concurrent_runs: usize,
}

impl RunnerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            module: "robot".to_string(),
            workdir_root: std::env::temp_dir().join("testdeck-runs"),
            timeout_secs: 3600,
            kill_grace_secs: 5,
            max_concurrent_runs: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Diagnostic logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines.
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
