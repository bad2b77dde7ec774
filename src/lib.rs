pub mod cli;
pub mod config;
pub mod error;
pub mod formatter;
pub mod history;
pub mod presets;
pub mod repl;
pub mod responder;
pub mod session;
pub mod store;
pub mod web;

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use config::HubConfig;
use error::{HubError, Result};
use formatter::LlmFormatter;
use presets::{Preset, PresetManager};
use session::{Session, SessionSnapshot};

// ---------------------------------------------------------------------------
// ClientHub: one console with its session, presets and formatter
// ---------------------------------------------------------------------------

/// Everything a front-end needs, shared by cheap clones.
#[derive(Clone)]
pub struct ClientHub {
    pub session: Session,
    presets: Arc<Mutex<PresetManager>>,
    /// Why the formatter could not be built, when it could not.
    formatter: std::result::Result<Arc<LlmFormatter>, String>,
    pub default_address: String,
}

/// Full state for rendering a console.
#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub presets: Vec<Preset>,
    pub default_address: String,
    /// `None` when output formatting is unavailable.
    pub formatter: Option<String>,
}

impl ClientHub {
    pub fn new(
        session: Session,
        presets: PresetManager,
        formatter: std::result::Result<LlmFormatter, String>,
        default_address: impl Into<String>,
    ) -> Self {
        Self {
            session,
            presets: Arc::new(Mutex::new(presets)),
            formatter: formatter.map(Arc::new),
            default_address: default_address.into(),
        }
    }

    /// Open the configured store and build all parts. A formatter that
    /// cannot be built (e.g. missing API key) only disables formatting.
    pub fn from_config(config: &HubConfig) -> Result<Self> {
        let store = config.open_store()?;
        let session = Session::new(
            store.clone(),
            config.session.timing(),
            config.session.history_cap,
        );
        let presets = PresetManager::load(store);
        let formatter = config.build_formatter().map_err(|e| {
            warn!(error = %e, "output formatting disabled");
            e.to_string()
        });
        Ok(Self::new(session, presets, formatter, config.default_address.clone()))
    }

    fn presets_lock(&self) -> MutexGuard<'_, PresetManager> {
        self.presets.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Presets
    // -----------------------------------------------------------------------

    pub fn add_preset(&self, name: &str, command: &str) -> Result<Preset> {
        self.presets_lock().add(name, command)
    }

    pub fn remove_preset(&self, id: &str) -> Option<Preset> {
        self.presets_lock().remove(id)
    }

    pub fn presets(&self) -> Vec<Preset> {
        self.presets_lock().list().to_vec()
    }

    /// Load preset `id`'s command into the session input buffer.
    pub fn apply_preset(&self, id: &str) -> Result<Preset> {
        let preset = self
            .presets_lock()
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::UnknownPreset(id.to_string()))?;
        self.session.apply_preset(&preset);
        Ok(preset)
    }

    // -----------------------------------------------------------------------
    // Formatting
    // -----------------------------------------------------------------------

    pub fn formatter_label(&self) -> Option<String> {
        self.formatter
            .as_ref()
            .ok()
            .map(|f| format!("{}/{}", f.provider, f.model))
    }

    /// Format transcript line `id` with the configured model.
    pub async fn format_line(&self, id: u64) -> Result<String> {
        let formatter = self.formatter.as_ref().map_err(|reason| HubError::Provider {
            provider: "formatter".to_string(),
            detail: reason.clone(),
        })?;
        self.session.format_line(id, formatter.as_ref()).await
    }

    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            session: self.session.snapshot(),
            presets: self.presets(),
            default_address: self.default_address.clone(),
            formatter: self.formatter_label(),
        }
    }
}

impl std::fmt::Debug for ClientHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHub")
            .field("session", &self.session)
            .field("default_address", &self.default_address)
            .field("formatter", &self.formatter_label())
            .finish_non_exhaustive()
    }
}
