//! Layered configuration: built-in defaults, then an optional TOML file,
//! then command-line flags.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Args;
use crate::error::{HubError, Result};
use crate::formatter::{LlmFormatter, Provider};
use crate::history::DEFAULT_HISTORY_CAP;
use crate::session::SessionTiming;
use crate::store::{FileStore, MemoryStore, PersistenceStore, SqliteStore};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for `file`, database path for `sqlite`. Unused for `memory`.
    pub path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::File,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_delay_ms: u64,
    pub response_delay_min_ms: u64,
    pub response_delay_max_ms: u64,
    pub history_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_delay_ms: 1500,
            response_delay_min_ms: 300,
            response_delay_max_ms: 600,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

impl SessionConfig {
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            connect_delay: Duration::from_millis(self.connect_delay_ms),
            response_delay_min: Duration::from_millis(self.response_delay_min_ms),
            response_delay_max: Duration::from_millis(self.response_delay_max_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    pub provider: Provider,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        FormatterConfig {
            provider: Provider::Ollama,
            model: None,
            base_url: None,
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
    pub token: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        WebConfig {
            port: 8899,
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub default_address: String,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub formatter: FormatterConfig,
    pub web: WebConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            default_address: "mcp.example.com".to_string(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            formatter: FormatterConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl HubConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: HubConfig = toml::from_str(s).map_err(|e| HubError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| HubError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Defaults, overlaid by `--config`, overlaid by the remaining flags.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(address) = &args.address {
            self.default_address = address.clone();
        }
        if let Some(backend) = args.storage {
            self.storage.backend = backend;
        }
        if let Some(path) = &args.storage_path {
            self.storage.path = Some(path.clone());
        }
        if let Some(provider) = args.provider {
            // A model or URL chosen for another provider would not apply.
            if provider != self.formatter.provider {
                self.formatter.model = None;
                self.formatter.base_url = None;
            }
            self.formatter.provider = provider;
        }
        if let Some(model) = &args.model {
            self.formatter.model = Some(model.clone());
        }
        if let Some(url) = &args.base_url {
            self.formatter.base_url = Some(url.clone());
        }
        if let Some(port) = args.port {
            self.web.port = port;
        }
        if let Some(token) = &args.token {
            self.web.token = Some(token.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.session;
        if s.response_delay_max_ms < s.response_delay_min_ms {
            return Err(HubError::Config(format!(
                "response_delay_max_ms ({}) is below response_delay_min_ms ({})",
                s.response_delay_max_ms, s.response_delay_min_ms
            )));
        }
        if s.history_cap == 0 {
            return Err(HubError::Config("history_cap must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.formatter.temperature) {
            return Err(HubError::Config(format!(
                "temperature {} is outside 0.0..=2.0",
                self.formatter.temperature
            )));
        }
        Ok(())
    }

    pub fn open_store(&self) -> Result<PersistenceStore> {
        let store = match self.storage.backend {
            StorageBackend::Memory => PersistenceStore::new(Arc::new(MemoryStore::new())),
            StorageBackend::File => {
                let dir = self.storage.path.as_deref().unwrap_or(".client-hub");
                PersistenceStore::new(Arc::new(FileStore::new(dir)))
            }
            StorageBackend::Sqlite => {
                let path = self.storage.path.as_deref().unwrap_or(".client-hub/hub.db");
                PersistenceStore::new(Arc::new(SqliteStore::open(path)?))
            }
        };
        Ok(store)
    }

    pub fn build_formatter(&self) -> Result<LlmFormatter> {
        let f = &self.formatter;
        LlmFormatter::new(
            f.provider,
            f.model.clone(),
            f.base_url.clone(),
            f.temperature,
            Duration::from_secs(f.timeout_secs),
        )
    }
}
