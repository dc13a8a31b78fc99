//! Config file and tracing initialisation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use logpoller_core::config::PollerConfig;
use logpoller_core::jobs::JobSpec;

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directives, e.g. `"info,logpoller_evm=debug"`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();

        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `config` when set.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// One chain to poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub rpc_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub poller: PollerConfig,
    /// Jobs whose triggers are added to the poller's filter.
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl ChainSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Contents of the `--config` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// `memory`, a SQLite path/URL, or a `postgres://` URL.
    pub database_url: String,
    #[serde(default)]
    pub log: LogConfig,
    pub chains: Vec<ChainSettings>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            bail!("no chains configured");
        }
        let mut seen = Vec::with_capacity(self.chains.len());
        for chain in &self.chains {
            let id = chain.poller.chain_id;
            if seen.contains(&id) {
                bail!("chain {id} configured twice");
            }
            seen.push(id);
            if chain.request_timeout_ms == 0 {
                bail!("chain {id}: request_timeout_ms must be > 0");
            }
            chain
                .poller
                .validate()
                .with_context(|| format!("chain {id}"))?;
        }
        Ok(())
    }
}
