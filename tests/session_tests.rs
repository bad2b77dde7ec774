//! End-to-end tests for the console session: connection lifecycle, simulated
//! replies and history that outlives a session.

use client_hub::error::HubError;
use client_hub::history::{HistoryNavigator, DEFAULT_HISTORY_CAP};
use client_hub::presets::PresetManager;
use client_hub::session::{ConnectionState, LineKind, Session, SessionTiming};
use client_hub::store::{FileStore, PersistenceStore, SqliteStore, HISTORY_KEY};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

fn seeded(store: PersistenceStore) -> Session {
    Session::with_rng(
        store,
        SessionTiming::default(),
        DEFAULT_HISTORY_CAP,
        Box::new(StdRng::seed_from_u64(99)),
    )
}

// ---------------------------------------------------------------------------
// Connection + replies
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connect_then_status_end_to_end() {
    let s = seeded(PersistenceStore::in_memory());
    let start = s.transcript().len();

    s.request_connect("host1").unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;

    let t = s.transcript();
    assert_eq!(t.len(), start + 2);
    assert!(t[start..].iter().all(|l| l.kind == LineKind::System));
    assert_eq!(t[start].text, "Connecting to host1...");
    assert!(t[start + 1].text.starts_with("Successfully connected to host1"));

    s.submit_command("status").unwrap();
    let t = s.transcript();
    assert_eq!(t.len(), start + 3);
    assert_eq!(t[start + 2].kind, LineKind::Outbound);
    assert_eq!(t[start + 2].text, "status");

    tokio::time::sleep(Duration::from_millis(600)).await;
    let t = s.transcript();
    assert_eq!(t.len(), start + 4);
    let reply = &t[start + 3];
    assert_eq!(reply.kind, LineKind::Inbound);
    let mut lines = reply.text.lines();
    assert_eq!(lines.next(), Some("Server Status: Online"));
    assert_eq!(lines.next(), Some("Version: 1.20.1"));
    let players = lines.next().unwrap();
    let count: u32 = players
        .strip_prefix("Players: ")
        .and_then(|s| s.strip_suffix("/20"))
        .and_then(|s| s.parse().ok())
        .unwrap();
    assert!(count < 10);
}

#[tokio::test(start_paused = true)]
async fn test_reply_not_before_min_delay() {
    let s = seeded(PersistenceStore::in_memory());
    s.request_connect("host1").unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;
    s.submit_command("help").unwrap();
    let before = s.transcript().len();
    tokio::time::sleep(Duration::from_millis(299)).await;
    assert_eq!(s.transcript().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_connected_is_rejected() {
    let s = seeded(PersistenceStore::in_memory());
    s.request_connect("host1").unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;
    let before = s.transcript().len();
    assert!(matches!(
        s.request_connect("host2"),
        Err(HubError::InvalidTransition { from: ConnectionState::Connected, .. })
    ));
    assert_eq!(s.transcript().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_disconnect() {
    let s = seeded(PersistenceStore::in_memory());
    s.request_connect("host1").unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;
    s.request_disconnect().unwrap();
    s.request_connect("host2").unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(s.state(), ConnectionState::Connected);
    assert_eq!(s.address().as_deref(), Some("host2"));
}

#[tokio::test]
async fn test_immediate_timing_still_replies_async() {
    let s = Session::with_rng(
        PersistenceStore::in_memory(),
        SessionTiming::immediate(),
        DEFAULT_HISTORY_CAP,
        Box::new(StdRng::seed_from_u64(1)),
    );
    let mut rx = s.subscribe();
    s.request_connect("local").unwrap();
    rx.recv().await.unwrap();
    rx.recv().await.unwrap();
    s.submit_command("xyz").unwrap();
    rx.recv().await.unwrap();
    let reply = rx.recv().await.unwrap();
    assert_eq!(reply.text, "Unknown command: \"xyz\"");
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_history_survives_new_session() {
    let store = PersistenceStore::in_memory();
    {
        let s = seeded(store.clone());
        s.request_connect("host1").unwrap();
        tokio::time::sleep(Duration::from_millis(1600)).await;
        s.submit_command("help").unwrap();
        s.submit_command("help").unwrap();
        s.submit_command("players").unwrap();
    }
    let s = seeded(store.clone());
    assert_eq!(s.history(), vec!["players", "help"]);
    assert_eq!(s.state(), ConnectionState::Disconnected);
    assert_eq!(s.transcript().len(), 1);
    let stored: Vec<String> = store.load(HISTORY_KEY);
    assert_eq!(stored, vec!["players", "help"]);
}

#[tokio::test(start_paused = true)]
async fn test_history_cap_through_session() {
    let store = PersistenceStore::in_memory();
    let s = seeded(store.clone());
    s.request_connect("host1").unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;
    for i in 0..51 {
        s.submit_command(&format!("cmd{i}")).unwrap();
    }
    let history = s.history();
    assert_eq!(history.len(), 50);
    assert_eq!(history[0], "cmd50");
    assert_eq!(history[49], "cmd1");
    let stored: Vec<String> = store.load(HISTORY_KEY);
    assert_eq!(stored, history);
}

#[test]
fn test_file_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = PersistenceStore::new(Arc::new(FileStore::new(dir.path())));
    let mut presets = PresetManager::load(store.clone());
    let p = presets.add("who", "players").unwrap();

    let reopened = PersistenceStore::new(Arc::new(FileStore::new(dir.path())));
    let presets = PresetManager::load(reopened);
    assert_eq!(presets.list(), &[p]);
}

#[test]
fn test_sqlite_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.db");
    {
        let store = PersistenceStore::new(Arc::new(SqliteStore::open(&path).unwrap()));
        store.save(HISTORY_KEY, &["status".to_string()]);
    }
    let store = PersistenceStore::new(Arc::new(SqliteStore::open(&path).unwrap()));
    let s = Session::with_defaults(store);
    assert_eq!(s.history(), vec!["status"]);
}

#[test]
fn test_malformed_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mcp-client-history.json"), "not json at all").unwrap();
    let store = PersistenceStore::new(Arc::new(FileStore::new(dir.path())));
    let s = Session::with_defaults(store);
    assert!(s.history().is_empty());
}

// ---------------------------------------------------------------------------
// History invariants
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_history_never_exceeds_cap(cmds in proptest::collection::vec("[a-c]{1,2}", 0..120)) {
        let mut nav = HistoryNavigator::default();
        for c in &cmds {
            nav.push(c);
        }
        prop_assert!(nav.len() <= DEFAULT_HISTORY_CAP);
        for w in nav.entries().windows(2) {
            prop_assert_ne!(&w[0], &w[1]);
        }
        if let Some(last) = cmds.last() {
            prop_assert_eq!(nav.get(0), Some(last.as_str()));
        }
    }

    #[test]
    fn prop_older_n_times_lands_on_oldest(n in 1usize..60) {
        let mut nav = HistoryNavigator::default();
        for i in 0..n {
            nav.push(&i.to_string());
        }
        let len = nav.len();
        for _ in 0..len {
            nav.older();
        }
        let oldest = nav.entries().last().cloned();
        prop_assert_eq!(nav.cursor(), Some(len - 1));
        prop_assert_eq!(nav.older().map(str::to_string), oldest);
        prop_assert_eq!(nav.cursor(), Some(len - 1));
    }
}
