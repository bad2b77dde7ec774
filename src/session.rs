//! Console session: connection state, transcript and input buffer.
//!
//! ## Design
//! - `Session` is a cheap handle over `Arc<Mutex<Inner>>`; clones share state.
//! - Every operation locks, mutates and unlocks. The lock is never held across
//!   an await, so delayed work runs on spawned tasks that re-lock on wake.
//! - The connect delay and per-command reply delays are fire-and-forget: a
//!   disconnect does not cancel a reply that is already scheduled.
//! - Appended lines are also pushed onto a broadcast channel for front-ends.
//!
//! Spawning requires a Tokio runtime; `request_connect` and `submit_command`
//! must be called from within one.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{HubError, Result};
use crate::formatter::{FormatRequest, OutputFormatter};
use crate::history::{HistoryNavigator, DEFAULT_HISTORY_CAP};
use crate::presets::Preset;
use crate::responder;
use crate::store::{PersistenceStore, HISTORY_KEY};

pub const WELCOME_MESSAGE: &str = "Welcome to Client Hub! Enter a server address and connect.";
pub const DISCONNECTED_MESSAGE: &str = "Disconnected from server.";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Direction of a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    /// A command the user sent.
    #[serde(rename = "out")]
    Outbound,
    /// A server reply.
    #[serde(rename = "in")]
    Inbound,
    /// A notice from the client itself.
    #[serde(rename = "system")]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub id: u64,
    pub kind: LineKind,
    pub text: String,
}

/// An AI rendition of a transcript line, stored beside the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedView {
    pub text: Option<String>,
    pub formatting: bool,
    pub show_formatted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub connect_delay: Duration,
    /// Reply delays are drawn uniformly from `[response_delay_min, response_delay_max)`.
    pub response_delay_min: Duration,
    pub response_delay_max: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(1500),
            response_delay_min: Duration::from_millis(300),
            response_delay_max: Duration::from_millis(600),
        }
    }
}

impl SessionTiming {
    /// All delays zero; replies still arrive on a spawned task.
    pub fn immediate() -> Self {
        Self {
            connect_delay: Duration::ZERO,
            response_delay_min: Duration::ZERO,
            response_delay_max: Duration::ZERO,
        }
    }
}

/// Point-in-time copy of the session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub address: Option<String>,
    pub input: String,
    pub history_cursor: Option<usize>,
    pub history: Vec<String>,
    pub transcript: Vec<OutputLine>,
    pub formatted: HashMap<u64, FormattedView>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Inner {
    state: ConnectionState,
    address: Option<String>,
    transcript: Vec<OutputLine>,
    formatted: HashMap<u64, FormattedView>,
    input: String,
    history: HistoryNavigator,
    next_id: u64,
    rng: Box<dyn RngCore + Send>,
    events: broadcast::Sender<OutputLine>,
}

impl Inner {
    fn append(&mut self, kind: LineKind, text: impl Into<String>) -> OutputLine {
        let line = OutputLine {
            id: self.next_id,
            kind,
            text: text.into(),
        };
        self.next_id += 1;
        self.transcript.push(line.clone());
        // No subscribers is fine.
        let _ = self.events.send(line.clone());
        line
    }

    fn line(&self, id: u64) -> Option<&OutputLine> {
        // Ids are dense from 0, so the id is also the index.
        self.transcript.get(id as usize).filter(|l| l.id == id)
    }
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<Inner>>,
    store: PersistenceStore,
    timing: SessionTiming,
}

impl Session {
    /// Build a session with an entropy-seeded random source.
    pub fn new(store: PersistenceStore, timing: SessionTiming, history_cap: usize) -> Self {
        Self::with_rng(store, timing, history_cap, Box::new(StdRng::from_entropy()))
    }

    pub fn with_defaults(store: PersistenceStore) -> Self {
        Self::new(store, SessionTiming::default(), DEFAULT_HISTORY_CAP)
    }

    /// Build a session with an explicit random source (seeded in tests).
    pub fn with_rng(
        store: PersistenceStore,
        timing: SessionTiming,
        history_cap: usize,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        let history = HistoryNavigator::from_entries(store.load(HISTORY_KEY), history_cap);
        let (events, _rx) = broadcast::channel(256);
        let mut inner = Inner {
            state: ConnectionState::Disconnected,
            address: None,
            transcript: Vec::new(),
            formatted: HashMap::new(),
            input: String::new(),
            history,
            next_id: 0,
            rng,
            events,
        };
        inner.append(LineKind::System, WELCOME_MESSAGE);
        Self {
            inner: Arc::new(Mutex::new(inner)),
            store,
            timing,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Connection transitions
    // -----------------------------------------------------------------------

    /// Start connecting to `address`. Completes on a spawned task after the
    /// connect delay and cannot be cancelled.
    pub fn request_connect(&self, address: &str) -> Result<()> {
        let address = address.trim();
        if address.is_empty() {
            return Err(HubError::EmptyAddress);
        }
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Disconnected {
                return Err(HubError::InvalidTransition {
                    from: inner.state,
                    action: "connect",
                });
            }
            inner.state = ConnectionState::Connecting;
            inner.address = Some(address.to_string());
            inner.append(LineKind::System, format!("Connecting to {address}..."));
        }
        info!(address, "connecting");

        let inner = Arc::clone(&self.inner);
        let delay = self.timing.connect_delay;
        let address = address.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.state = ConnectionState::Connected;
            inner.append(
                LineKind::System,
                format!("Successfully connected to {address}. Type 'help' for commands."),
            );
            info!(address = %address, "connected");
        });
        Ok(())
    }

    pub fn request_disconnect(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Connected {
            return Err(HubError::InvalidTransition {
                from: inner.state,
                action: "disconnect",
            });
        }
        inner.state = ConnectionState::Disconnected;
        inner.append(LineKind::System, DISCONNECTED_MESSAGE);
        info!(address = ?inner.address, "disconnected");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Send `text` to the (simulated) server. Returns the Outbound line; the
    /// reply is appended later by a spawned task.
    pub fn submit_command(&self, text: &str) -> Result<OutputLine> {
        if text.trim().is_empty() {
            return Err(HubError::EmptyCommand);
        }
        let (line, delay) = {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Connected {
                return Err(HubError::NotConnected);
            }
            let line = inner.append(LineKind::Outbound, text);
            if inner.history.push(text) {
                self.store.save(HISTORY_KEY, inner.history.entries());
            }
            inner.history.reset();
            inner.input.clear();
            let delay = draw_delay(&mut *inner.rng, &self.timing);
            (line, delay)
        };
        debug!(id = line.id, command = text, delay_ms = delay.as_millis() as u64, "command sent");

        let inner = Arc::clone(&self.inner);
        let command = text.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            let reply = responder::respond(&command, &mut *inner.rng);
            let line = inner.append(LineKind::Inbound, reply);
            debug!(id = line.id, "reply received");
        });
        Ok(line)
    }

    /// Submit whatever is in the input buffer.
    pub fn submit_input(&self) -> Result<OutputLine> {
        let text = self.input();
        self.submit_command(&text)
    }

    // -----------------------------------------------------------------------
    // Input buffer & history recall
    // -----------------------------------------------------------------------

    /// Direct edit of the input buffer; leaves history navigation.
    pub fn set_input(&self, text: &str) {
        let mut inner = self.lock();
        inner.input = text.to_string();
        inner.history.reset();
    }

    pub fn input(&self) -> String {
        self.lock().input.clone()
    }

    /// Load the next older history entry into the buffer.
    pub fn history_older(&self) -> Option<String> {
        let mut inner = self.lock();
        let entry = inner.history.older()?.to_string();
        inner.input = entry.clone();
        Some(entry)
    }

    /// Load the next newer history entry into the buffer. Returns an empty
    /// string when navigation ends, `None` when not navigating.
    pub fn history_newer(&self) -> Option<String> {
        let mut inner = self.lock();
        let entry = inner.history.newer()?.to_string();
        inner.input = entry.clone();
        Some(entry)
    }

    /// Load history entry `index` into the buffer, as clicking it in a list would.
    pub fn recall_history(&self, index: usize) -> Result<String> {
        let mut inner = self.lock();
        let entry = inner
            .history
            .get(index)
            .ok_or(HubError::HistoryIndex(index))?
            .to_string();
        inner.input = entry.clone();
        inner.history.reset();
        Ok(entry)
    }

    /// Load a preset's command into the buffer.
    pub fn apply_preset(&self, preset: &Preset) {
        self.set_input(&preset.command);
    }

    pub fn history(&self) -> Vec<String> {
        self.lock().history.entries().to_vec()
    }

    pub fn history_cursor(&self) -> Option<usize> {
        self.lock().history.cursor()
    }

    // -----------------------------------------------------------------------
    // Formatted views
    // -----------------------------------------------------------------------

    /// Mark line `id` as being formatted and return its raw text.
    pub fn begin_format(&self, id: u64) -> Result<String> {
        let mut inner = self.lock();
        let text = inner.line(id).ok_or(HubError::UnknownLine(id))?.text.clone();
        inner.formatted.entry(id).or_default().formatting = true;
        Ok(text)
    }

    pub fn attach_formatted(&self, id: u64, text: String) -> Result<()> {
        let mut inner = self.lock();
        if inner.line(id).is_none() {
            return Err(HubError::UnknownLine(id));
        }
        let view = inner.formatted.entry(id).or_default();
        view.text = Some(text);
        view.formatting = false;
        view.show_formatted = true;
        Ok(())
    }

    /// Clear the in-flight flag after a failed format; the raw line stays shown.
    pub fn fail_format(&self, id: u64) {
        let mut inner = self.lock();
        if let Some(view) = inner.formatted.get_mut(&id) {
            view.formatting = false;
        }
    }

    /// Flip between raw and formatted rendering. Returns the new `show_formatted`.
    pub fn toggle_formatted(&self, id: u64) -> Result<bool> {
        let mut inner = self.lock();
        let view = inner
            .formatted
            .get_mut(&id)
            .filter(|v| v.text.is_some())
            .ok_or(HubError::UnknownLine(id))?;
        view.show_formatted = !view.show_formatted;
        Ok(view.show_formatted)
    }

    pub fn formatted(&self, id: u64) -> Option<FormattedView> {
        self.lock().formatted.get(&id).cloned()
    }

    /// Run line `id` through `formatter` and attach the result. On failure
    /// the view is left unformatted and the error is returned for the caller
    /// to report.
    pub async fn format_line<F: OutputFormatter>(&self, id: u64, formatter: &F) -> Result<String> {
        let raw = self.begin_format(id)?;
        match formatter.format(FormatRequest { raw_output: raw }).await {
            Ok(resp) => {
                self.attach_formatted(id, resp.formatted_output.clone())?;
                info!(id, "line formatted");
                Ok(resp.formatted_output)
            }
            Err(e) => {
                self.fail_format(id);
                warn!(id, error = %e, "formatting failed");
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn address(&self) -> Option<String> {
        self.lock().address.clone()
    }

    pub fn transcript(&self) -> Vec<OutputLine> {
        self.lock().transcript.clone()
    }

    /// Receive every line appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputLine> {
        self.lock().events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            state: inner.state,
            address: inner.address.clone(),
            input: inner.input.clone(),
            history_cursor: inner.history.cursor(),
            history: inner.history.entries().to_vec(),
            transcript: inner.transcript.clone(),
            formatted: inner.formatted.clone(),
        }
    }

    pub fn timing(&self) -> SessionTiming {
        self.timing
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

fn draw_delay(rng: &mut dyn RngCore, timing: &SessionTiming) -> Duration {
    let min = timing.response_delay_min.as_millis() as u64;
    let max = timing.response_delay_max.as_millis() as u64;
    if max <= min {
        return timing.response_delay_min;
    }
    Duration::from_millis(rng.gen_range(min..max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::FormatResponse;

    fn session() -> Session {
        Session::with_rng(
            PersistenceStore::in_memory(),
            SessionTiming::default(),
            DEFAULT_HISTORY_CAP,
            Box::new(StdRng::seed_from_u64(1)),
        )
    }

    async fn connected(address: &str) -> Session {
        let s = session();
        s.request_connect(address).unwrap();
        tokio::time::sleep(Duration::from_millis(1501)).await;
        assert_eq!(s.state(), ConnectionState::Connected);
        s
    }

    #[test]
    fn test_new_session_has_welcome_line() {
        let s = session();
        let t = s.transcript();
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].kind, LineKind::System);
        assert_eq!(t[0].text, WELCOME_MESSAGE);
        assert_eq!(s.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_draw_delay_bounds() {
        let timing = SessionTiming::default();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let d = draw_delay(&mut rng, &timing);
            assert!(d >= Duration::from_millis(300) && d < Duration::from_millis(600));
        }
    }

    #[test]
    fn test_draw_delay_degenerate_range() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(draw_delay(&mut rng, &SessionTiming::immediate()), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_address() {
        let s = session();
        assert!(matches!(s.request_connect("  "), Err(HubError::EmptyAddress)));
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(s.transcript().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connecting_is_rejected() {
        let s = session();
        s.request_connect("host1").unwrap();
        let err = s.request_connect("host2").unwrap_err();
        assert!(matches!(
            err,
            HubError::InvalidTransition { from: ConnectionState::Connecting, .. }
        ));
        assert_eq!(s.state(), ConnectionState::Connecting);
        assert_eq!(s.transcript().len(), 2);
        assert_eq!(s.address().as_deref(), Some("host1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_completes_after_delay() {
        let s = session();
        s.request_connect("host1").unwrap();
        tokio::time::sleep(Duration::from_millis(1499)).await;
        assert_eq!(s.state(), ConnectionState::Connecting);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(s.state(), ConnectionState::Connected);
        let t = s.transcript();
        assert_eq!(t[1].text, "Connecting to host1...");
        assert!(t[2].text.starts_with("Successfully connected to host1"));
    }

    #[tokio::test]
    async fn test_disconnect_only_when_connected() {
        let s = session();
        assert!(s.request_disconnect().is_err());
        assert_eq!(s.transcript().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_appends_notice() {
        let s = connected("host1").await;
        s.request_disconnect().unwrap();
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(s.transcript().last().unwrap().text, DISCONNECTED_MESSAGE);
    }

    #[tokio::test]
    async fn test_submit_while_disconnected_is_noop() {
        let s = session();
        assert!(matches!(s.submit_command("status"), Err(HubError::NotConnected)));
        assert!(s.transcript().iter().all(|l| l.kind != LineKind::Outbound));
        assert!(s.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_blank_is_rejected() {
        let s = connected("host1").await;
        let before = s.transcript().len();
        assert!(matches!(s.submit_command("   "), Err(HubError::EmptyCommand)));
        assert_eq!(s.transcript().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_appends_and_replies() {
        let s = connected("host1").await;
        s.set_input("help");
        let out = s.submit_input().unwrap();
        assert_eq!(out.kind, LineKind::Outbound);
        assert_eq!(out.text, "help");
        assert_eq!(s.input(), "");
        assert_eq!(s.history(), vec!["help"]);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let last = s.transcript().last().cloned().unwrap();
        assert_eq!(last.kind, LineKind::Inbound);
        assert_eq!(last.text, responder::HELP_RESPONSE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_survives_disconnect() {
        let s = connected("host1").await;
        s.submit_command("players").unwrap();
        s.request_disconnect().unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        let last = s.transcript().last().cloned().unwrap();
        assert_eq!(last.kind, LineKind::Inbound);
        assert_eq!(last.text, responder::PLAYERS_RESPONSE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_ids_are_monotonic() {
        let s = connected("host1").await;
        s.submit_command("a").unwrap();
        s.submit_command("b").unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        let ids: Vec<u64> = s.transcript().iter().map(|l| l.id).collect();
        assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_resets_history_cursor() {
        let s = connected("host1").await;
        s.submit_command("a").unwrap();
        s.submit_command("b").unwrap();
        assert_eq!(s.history_older().as_deref(), Some("b"));
        assert_eq!(s.history_cursor(), Some(0));
        s.submit_command("c").unwrap();
        assert_eq!(s.history_cursor(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_fills_input_and_edit_resets() {
        let s = connected("host1").await;
        s.submit_command("a").unwrap();
        s.submit_command("b").unwrap();
        s.history_older();
        assert_eq!(s.history_older().as_deref(), Some("a"));
        assert_eq!(s.input(), "a");
        assert_eq!(s.history_newer().as_deref(), Some("b"));
        s.set_input("typed");
        assert_eq!(s.history_cursor(), None);
        assert_eq!(s.history_newer(), None);
        assert_eq!(s.input(), "typed");
    }

    #[test]
    fn test_recall_history_out_of_range() {
        let s = session();
        assert!(matches!(s.recall_history(3), Err(HubError::HistoryIndex(3))));
    }

    #[test]
    fn test_history_loaded_from_store() {
        let store = PersistenceStore::in_memory();
        store.save(HISTORY_KEY, &["status".to_string(), "help".to_string()]);
        let s = Session::with_defaults(store);
        assert_eq!(s.history(), vec!["status", "help"]);
        assert_eq!(s.recall_history(1).unwrap(), "help");
        assert_eq!(s.input(), "help");
    }

    #[test]
    fn test_apply_preset_sets_input() {
        let s = session();
        let p = Preset {
            id: "1".into(),
            name: "st".into(),
            command: "status".into(),
        };
        s.apply_preset(&p);
        assert_eq!(s.input(), "status");
    }

    struct UpperFormatter;

    impl OutputFormatter for UpperFormatter {
        async fn format(&self, req: FormatRequest) -> Result<FormatResponse> {
            Ok(FormatResponse {
                formatted_output: req.raw_output.to_uppercase(),
            })
        }
    }

    struct DownFormatter;

    impl OutputFormatter for DownFormatter {
        async fn format(&self, _req: FormatRequest) -> Result<FormatResponse> {
            Err(HubError::Provider {
                provider: "ollama".into(),
                detail: "unavailable".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_format_line_attaches_view() {
        let s = session();
        let out = s.format_line(0, &UpperFormatter).await.unwrap();
        assert_eq!(out, WELCOME_MESSAGE.to_uppercase());
        let view = s.formatted(0).unwrap();
        assert!(view.show_formatted);
        assert!(!view.formatting);
        assert_eq!(s.transcript()[0].text, WELCOME_MESSAGE);
        assert!(!s.toggle_formatted(0).unwrap());
    }

    #[tokio::test]
    async fn test_format_failure_keeps_raw_line() {
        let s = session();
        assert!(s.format_line(0, &DownFormatter).await.is_err());
        let view = s.formatted(0).unwrap();
        assert!(view.text.is_none());
        assert!(!view.formatting);
        assert!(s.toggle_formatted(0).is_err());
    }

    #[tokio::test]
    async fn test_format_unknown_line() {
        let s = session();
        assert!(matches!(
            s.format_line(99, &UpperFormatter).await,
            Err(HubError::UnknownLine(99))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_appended_lines() {
        let s = session();
        let mut rx = s.subscribe();
        s.request_connect("host1").unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.text, "Connecting to host1...");
        let second = rx.recv().await.unwrap();
        assert!(second.text.starts_with("Successfully connected"));
    }
}
