//! Configuration for the Tether host.
//!
//! The config file lives at `~/.tether/config.toml` unless `TETHER_CONFIG`
//! points elsewhere. Every section is optional; a missing file means defaults.
//!
//! ```toml
//! [host]
//! max_background_threads = 64
//! privileged_thread_name = "tether-main"
//!
//! [debug]
//! verbosity = "normal"   # off | normal | verbose
//!
//! [timings]
//! enabled = true
//!
//! [profiler]
//! enabled = false
//!
//! [logging]
//! filter = "${TETHER_LOG}"
//! ```

use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "TETHER_CONFIG";
pub const DEFAULT_PRIVILEGED_THREAD_NAME: &str = "tether-main";
/// Matches tokio's own blocking pool ceiling; the background pool is effectively unbounded.
pub const DEFAULT_MAX_BACKGROUND_THREADS: usize = 512;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Default, Deserialize)]
pub struct TetherConfig {
    pub host: Option<HostConfig>,
    pub debug: Option<DebugConfig>,
    pub timings: Option<InstrumentConfig>,
    pub profiler: Option<InstrumentConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HostConfig {
    /// Upper bound on concurrently running background units.
    pub max_background_threads: Option<usize>,
    /// Name given to the privileged (main) thread.
    pub privileged_thread_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DebugConfig {
    /// One of `off`, `normal`, `verbose`.
    pub verbosity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive. `${VAR}` references are expanded.
    pub filter: Option<String>,
}

/// How much the debug trace sink reports while walking chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DebugVerbosity {
    #[default]
    Off,
    Normal,
    Verbose,
}

impl DebugVerbosity {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "false" => Some(DebugVerbosity::Off),
            "normal" | "on" | "true" => Some(DebugVerbosity::Normal),
            "verbose" | "high" | "very high" => Some(DebugVerbosity::Verbose),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_enabled(self) -> bool {
        self != DebugVerbosity::Off
    }
}

impl TetherConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        toml::from_str(&content).map_err(|err| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, err);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source: err,
            }
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn max_background_threads(&self) -> usize {
        self.host
            .as_ref()
            .and_then(|host| host.max_background_threads)
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_BACKGROUND_THREADS)
    }

    #[must_use]
    pub fn privileged_thread_name(&self) -> String {
        self.host
            .as_ref()
            .and_then(|host| host.privileged_thread_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_PRIVILEGED_THREAD_NAME)
            .to_string()
    }

    #[must_use]
    pub fn debug_verbosity(&self) -> DebugVerbosity {
        let Some(raw) = self.debug.as_ref().and_then(|d| d.verbosity.as_deref()) else {
            return DebugVerbosity::default();
        };
        DebugVerbosity::parse(raw).unwrap_or_else(|| {
            tracing::warn!("Unknown debug verbosity in config: {}", raw);
            DebugVerbosity::default()
        })
    }

    #[must_use]
    pub fn timings_enabled(&self) -> bool {
        self.timings.as_ref().is_some_and(|t| t.enabled)
    }

    #[must_use]
    pub fn profiler_enabled(&self) -> bool {
        self.profiler.as_ref().is_some_and(|p| p.enabled)
    }

    /// Log filter directive with `${VAR}` references expanded.
    #[must_use]
    pub fn log_filter(&self) -> String {
        self.logging
            .as_ref()
            .and_then(|l| l.filter.as_deref())
            .map(expand_env_vars)
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }
}

/// Replace `${NAME}` with the value of the environment variable `NAME`.
///
/// Unset variables expand to the empty string; an unterminated `${` is kept verbatim.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if !name.is_empty() {
            out.push_str(&env::var(name).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// `~/.tether`, home of the default config file and the log directory.
///
/// Unlike [`config_path`], this ignores `TETHER_CONFIG`.
#[must_use]
pub fn tether_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tether"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var(CONFIG_ENV_VAR)
        && !custom.trim().is_empty()
    {
        return Some(PathBuf::from(custom));
    }
    tether_dir().map(|dir| dir.join("config.toml"))
}
