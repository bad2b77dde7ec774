//! Crate-level error type.
//!
//! Validation variants (`EmptyAddress`, `EmptyCommand`, `EmptyPresetField`,
//! `InvalidTransition`, `NotConnected`) are non-fatal notices: the operation
//! that returned them left all state unchanged.

use crate::session::ConnectionState;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("server address cannot be empty")]
    EmptyAddress,

    #[error("command cannot be empty")]
    EmptyCommand,

    #[error("preset name and command cannot be empty")]
    EmptyPresetField,

    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: ConnectionState,
        action: &'static str,
    },

    #[error("not connected to a server")]
    NotConnected,

    #[error("no transcript line with id {0}")]
    UnknownLine(u64),

    #[error("no preset with id {0}")]
    UnknownPreset(String),

    #[error("history has no entry at index {0}")]
    HistoryIndex(usize),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error: {detail}")]
    Provider { provider: String, detail: String },

    #[error("{0} not set. Export it or pass via environment.")]
    MissingApiKey(&'static str),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// True for errors caused by user input rather than by the environment.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            HubError::EmptyAddress
                | HubError::EmptyCommand
                | HubError::EmptyPresetField
                | HubError::InvalidTransition { .. }
                | HubError::NotConnected
                | HubError::UnknownLine(_)
                | HubError::UnknownPreset(_)
                | HubError::HistoryIndex(_)
        )
    }
}

impl From<rusqlite::Error> for HubError {
    fn from(e: rusqlite::Error) -> Self {
        HubError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
