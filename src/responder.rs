//! Simulated server replies.
//!
//! Stands in for a real MCP wire client: a submitted command string maps to
//! a canned response. Only `status` draws on the random source.

use rand::{Rng, RngCore};

pub const HELP_RESPONSE: &str = "Available commands: help, status, players, kick <player>";
pub const PLAYERS_RESPONSE: &str = "Online players: player1, player2, another_user";
pub const KICK_USAGE: &str = "Usage: kick <player>";

/// Player counts reported by `status` fall in `0..MAX_REPORTED_PLAYERS`.
pub const MAX_REPORTED_PLAYERS: u32 = 10;
pub const SERVER_SLOTS: u32 = 20;

pub fn status_response(players: u32) -> String {
    format!("Server Status: Online\nVersion: 1.20.1\nPlayers: {players}/{SERVER_SLOTS}")
}

/// Produce the simulated reply for `command`.
///
/// `kick <player>` is matched on the case-sensitive verb; the fixed table
/// (`help`, `status`, `players`) is matched case-insensitively on the whole
/// command. Anything else echoes back as unknown.
pub fn respond(command: &str, rng: &mut dyn RngCore) -> String {
    let mut tokens = command.split_whitespace();
    if tokens.next() == Some("kick") {
        return match tokens.next() {
            Some(player) => format!("Player {player} has been kicked."),
            None => KICK_USAGE.to_string(),
        };
    }

    match command.to_lowercase().as_str() {
        "help" => HELP_RESPONSE.to_string(),
        "status" => status_response(rng.gen_range(0..MAX_REPORTED_PLAYERS)),
        "players" => PLAYERS_RESPONSE.to_string(),
        _ => format!("Unknown command: \"{command}\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[rstest]
    #[case("help")]
    #[case("HELP")]
    #[case("Help")]
    fn test_help_is_case_insensitive(#[case] cmd: &str) {
        assert_eq!(respond(cmd, &mut rng()), HELP_RESPONSE);
    }

    #[rstest]
    #[case("kick bob", "Player bob has been kicked.")]
    #[case("kick Bob_2 now", "Player Bob_2 has been kicked.")]
    #[case("kick   carol", "Player carol has been kicked.")]
    #[case("kick", KICK_USAGE)]
    #[case("kick   ", KICK_USAGE)]
    fn test_kick(#[case] cmd: &str, #[case] expected: &str) {
        assert_eq!(respond(cmd, &mut rng()), expected);
    }

    #[test]
    fn test_kick_verb_is_case_sensitive() {
        assert_eq!(respond("KICK bob", &mut rng()), "Unknown command: \"KICK bob\"");
    }

    #[test]
    fn test_kick_requires_whole_token() {
        assert_eq!(respond("kickall", &mut rng()), "Unknown command: \"kickall\"");
    }

    #[test]
    fn test_unknown_preserves_case() {
        assert_eq!(respond("xyz", &mut rng()), "Unknown command: \"xyz\"");
        assert_eq!(respond("XyZ", &mut rng()), "Unknown command: \"XyZ\"");
    }

    #[test]
    fn test_players() {
        assert_eq!(respond("PLAYERS", &mut rng()), PLAYERS_RESPONSE);
    }

    #[test]
    fn test_status_count_in_range() {
        let mut r = rng();
        for _ in 0..200 {
            let out = respond("status", &mut r);
            let count: u32 = out
                .rsplit("Players: ")
                .next()
                .and_then(|s| s.strip_suffix("/20"))
                .and_then(|s| s.parse().ok())
                .expect("status template");
            assert!(count < MAX_REPORTED_PLAYERS);
        }
    }

    #[test]
    fn test_status_is_deterministic_for_a_seed() {
        let a = respond("status", &mut StdRng::seed_from_u64(42));
        let b = respond("STATUS", &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
        assert!(a.starts_with("Server Status: Online\nVersion: 1.20.1\nPlayers: "));
    }
}
