use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use coordrtt_core::{MAX_DECIMALS, RttMode, RttServiceConfig};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Effective configuration of the `coordrtt` binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(flatten)]
    pub service: RttServiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address of the query server.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl CliConfig {
    /// Parses the defaults shipped with the binary.
    pub fn builtin() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG).context("built-in default config is invalid")
    }

    /// Rejects settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let service = &self.service;
        if service.refresh.interval.is_zero() {
            bail!("refresh.interval must be greater than zero");
        }
        if service.agent.request_timeout.is_zero() {
            bail!("agent.request_timeout must be greater than zero");
        }
        if service.agent.rpc_addr.trim().is_empty() {
            bail!("agent.rpc_addr must not be empty");
        }
        if service.rtt.rounding.decimals > MAX_DECIMALS {
            bail!("rtt.rounding.decimals must be at most {MAX_DECIMALS}");
        }
        if self.server.bind.trim().is_empty() {
            bail!("server.bind must not be empty");
        }
        if service.rtt.mode == RttMode::Measured {
            let probe = &service.rtt.probe;
            if probe.program.trim().is_empty() {
                bail!("rtt.probe.program is required in measured mode");
            }
            if probe.timeout.is_zero() {
                bail!("rtt.probe.timeout must be greater than zero");
            }
            if probe.concurrency == 0 {
                bail!("rtt.probe.concurrency must be at least 1");
            }
        }
        Ok(())
    }

    /// Applies command-line overrides on top of the file configuration.
    pub fn apply_overrides(
        &mut self,
        bind: Option<String>,
        interval: Option<Duration>,
        mode: Option<RttMode>,
    ) {
        if let Some(bind) = bind {
            self.server.bind = bind;
        }
        if let Some(interval) = interval {
            self.service.refresh.interval = interval;
        }
        if let Some(mode) = mode {
            self.service.rtt.mode = mode;
        }
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }
}

/// Loads built-in defaults and layers an optional user file over them.
pub struct ConfigManager {
    path: Option<PathBuf>,
    config: CliConfig,
}

impl ConfigManager {
    /// Defaults only.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Defaults merged with the file at `path`, which must exist.
    pub fn load_with_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        Self::load_from(Some(path.into()))
    }

    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        let mut table: toml::Table =
            toml::from_str(DEFAULT_CONFIG).context("built-in default config is invalid")?;

        if let Some(path) = path.as_deref() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            let overlay: toml::Table = toml::from_str(&contents)
                .with_context(|| format!("invalid config at {}", path.display()))?;
            merge_tables(&mut table, overlay);
        }

        let config: CliConfig = toml::Value::Table(table)
            .try_into()
            .with_context(|| match path.as_deref() {
                Some(path) => format!("invalid settings in {}", path.display()),
                None => "invalid built-in settings".to_string(),
            })?;
        config.validate()?;
        Ok(Self { path, config })
    }

    #[must_use]
    pub const fn config(&self) -> &CliConfig {
        &self.config
    }

    #[must_use]
    pub fn into_config(self) -> CliConfig {
        self.config
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Recursively merges `overlay` into `base`; arrays and scalars are replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}
