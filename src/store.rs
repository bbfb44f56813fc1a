use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::game::Game;
use crate::types::{GameState, GlobalStats, Notification, Session, User};

const STORE_VERSION: u8 = 1;

const USERS_FILE: &str = "users.json";
const SESSIONS_FILE: &str = "sessions.json";
const GAMES_FILE: &str = "games.json";
const NOTIFICATIONS_FILE: &str = "notifications.json";
const STATS_FILE: &str = "stats.json";

#[derive(Serialize)]
struct MapFile<'a, T> {
    version: u8,
    entries: &'a HashMap<String, T>,
}

#[derive(Deserialize)]
struct MapFileRaw {
    version: u8,
    entries: HashMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct StatsFile {
    version: u8,
    kills: u64,
    active: u64,
}

/// Everything the server remembers across restarts.
pub struct PersistedState {
    pub users: HashMap<String, User>,
    pub sessions: HashMap<String, Session>,
    pub games: HashMap<String, Game>,
    pub inboxes: HashMap<String, Vec<Notification>>,
    pub stats: GlobalStats,
}

pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Loads every collection, dropping entries that no longer make sense:
    /// expired sessions, sessions and inboxes of unknown users, and game
    /// references to games that no longer exist. Derived numbers, the alive
    /// count per game and the active-games counter, are recomputed rather
    /// than trusted.
    pub fn load_all(&self, now_ms: u64) -> PersistedState {
        let mut users: HashMap<String, User> = self.load_map(USERS_FILE, "user");

        let mut sessions: HashMap<String, Session> = self.load_map(SESSIONS_FILE, "session");
        sessions
            .retain(|_, session| session.expires_at_ms > now_ms && users.contains_key(&session.username));

        let mut games: HashMap<String, Game> = self.load_map(GAMES_FILE, "game");
        for (id, game) in games.iter_mut() {
            game.id = id.clone();
            game.alive_count = match game.started_at_ms {
                Some(_) => game.players.values().filter(|player| player.alive()).count(),
                None => 0,
            };
        }

        for user in users.values_mut() {
            user.joined_games.retain(|id| games.contains_key(id));
            user.owned_games.retain(|id| games.contains_key(id));
        }

        let mut inboxes: HashMap<String, Vec<Notification>> =
            self.load_map(NOTIFICATIONS_FILE, "inbox");
        inboxes.retain(|username, _| users.contains_key(username));

        let stats = GlobalStats {
            kills: self.load_stats().kills,
            active: games
                .values()
                .filter(|game| game.state() == GameState::Active)
                .count() as u64,
        };

        PersistedState {
            users,
            sessions,
            games,
            inboxes,
            stats,
        }
    }

    pub fn save_users(&self, users: &HashMap<String, User>) {
        self.save_file(USERS_FILE, &MapFile { version: STORE_VERSION, entries: users });
    }

    pub fn save_sessions(&self, sessions: &HashMap<String, Session>) {
        self.save_file(SESSIONS_FILE, &MapFile { version: STORE_VERSION, entries: sessions });
    }

    pub fn save_games(&self, games: &HashMap<String, Game>) {
        self.save_file(GAMES_FILE, &MapFile { version: STORE_VERSION, entries: games });
    }

    pub fn save_inboxes(&self, inboxes: &HashMap<String, Vec<Notification>>) {
        self.save_file(
            NOTIFICATIONS_FILE,
            &MapFile { version: STORE_VERSION, entries: inboxes },
        );
    }

    pub fn save_stats(&self, stats: &GlobalStats) {
        self.save_file(
            STATS_FILE,
            &StatsFile {
                version: STORE_VERSION,
                kills: stats.kills,
                active: stats.active,
            },
        );
    }

    fn load_stats(&self) -> GlobalStats {
        let path = self.dir.join(STATS_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(value) => value,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to read {}: {error}", path.display());
                }
                return GlobalStats::default();
            }
        };
        match serde_json::from_str::<StatsFile>(&text) {
            Ok(file) if file.version == STORE_VERSION => GlobalStats {
                kills: file.kills,
                active: file.active,
            },
            Ok(file) => {
                warn!("unsupported stats file version {} at {}", file.version, path.display());
                GlobalStats::default()
            }
            Err(error) => {
                warn!("failed to parse {}: {error}", path.display());
                GlobalStats::default()
            }
        }
    }

    fn load_map<T: DeserializeOwned>(&self, name: &str, label: &str) -> HashMap<String, T> {
        load_map_file(&self.dir.join(name), label)
    }

    fn save_file<T: Serialize>(&self, name: &str, payload: &T) {
        if let Err(error) = fs::create_dir_all(&self.dir) {
            warn!("failed to create data dir {}: {error}", self.dir.display());
            return;
        }
        let path = self.dir.join(name);
        match serde_json::to_string_pretty(payload) {
            Ok(text) => {
                if let Err(error) = fs::write(&path, text) {
                    warn!("failed to write {}: {error}", path.display());
                }
            }
            Err(error) => {
                warn!("failed to serialize payload for {}: {error}", path.display());
            }
        }
    }
}

fn load_map_file<T: DeserializeOwned>(path: &Path, label: &str) -> HashMap<String, T> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to read {}: {error}", path.display());
            }
            return HashMap::new();
        }
    };
    let parsed: MapFileRaw = match serde_json::from_str::<MapFileRaw>(&text) {
        Ok(value) if value.version == STORE_VERSION => value,
        Ok(value) => {
            warn!(
                "unsupported {label} file version {} at {}",
                value.version,
                path.display()
            );
            return HashMap::new();
        }
        Err(error) => {
            warn!("failed to parse {}: {error}", path.display());
            return HashMap::new();
        }
    };

    let mut entries = HashMap::new();
    for (key, raw_value) in parsed.entries {
        match serde_json::from_value::<T>(raw_value) {
            Ok(entry) => {
                entries.insert(key, entry);
            }
            Err(error) => {
                warn!(
                    "skipping {label} entry '{key}' in {}: {error}",
                    path.display()
                );
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewGameInput, NotificationKind, Player};

    fn temp_store(name: &str) -> Store {
        let unique = format!(
            "manhunt-{}-{}-{}",
            name,
            std::process::id(),
            rand::random::<u32>()
        );
        Store::new(std::env::temp_dir().join(unique))
    }

    fn make_user(username: &str) -> User {
        User {
            username: username.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            name: username.to_uppercase(),
            email: format!("{username}@example.com"),
            bio: String::new(),
            joined_games: Vec::new(),
            owned_games: Vec::new(),
            email_notifs: false,
            is_admin: false,
            created_at_ms: 1,
            last_edited_ms: 1,
        }
    }

    fn make_game(id: &str) -> Game {
        let input = NewGameInput {
            name: "Dorm Wars".to_string(),
            description: String::new(),
            password: String::new(),
            join_disabled: false,
        };
        Game::new(id.to_string(), "alice".to_string(), &input, 5).expect("valid game")
    }

    #[test]
    fn round_trip_preserves_every_collection() {
        let store = temp_store("round-trip");
        let now = 1_000;

        let mut users = HashMap::new();
        users.insert("alice".to_string(), make_user("alice"));

        let mut sessions = HashMap::new();
        sessions.insert(
            "token-1".to_string(),
            Session {
                token: "token-1".to_string(),
                username: "alice".to_string(),
                expires_at_ms: now + 500,
            },
        );

        let mut game = make_game("aaaaa");
        game.players.insert("alice".to_string(), Player::new(6));
        let mut games = HashMap::new();
        games.insert("aaaaa".to_string(), game);

        let mut inboxes = HashMap::new();
        inboxes.insert(
            "alice".to_string(),
            vec![Notification {
                kind: NotificationKind::Killed {
                    by: "bob".to_string(),
                },
                game: "aaaaa".to_string(),
                time: 7,
                read: false,
            }],
        );

        store.save_users(&users);
        store.save_sessions(&sessions);
        store.save_games(&games);
        store.save_inboxes(&inboxes);
        store.save_stats(&GlobalStats { kills: 3, active: 9 });

        let state = store.load_all(now);
        assert_eq!(state.users.len(), 1);
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.games["aaaaa"].name, "Dorm Wars");
        assert_eq!(state.games["aaaaa"].players.len(), 1);
        assert_eq!(state.inboxes["alice"].len(), 1);
        assert_eq!(state.stats.kills, 3);
        // No game ever started, so nothing counts as active.
        assert_eq!(state.stats.active, 0);

        let _ = fs::remove_dir_all(store.dir);
    }

    #[test]
    fn missing_files_load_as_an_empty_state() {
        let store = temp_store("missing");
        let state = store.load_all(0);
        assert!(state.users.is_empty());
        assert!(state.sessions.is_empty());
        assert!(state.games.is_empty());
        assert!(state.inboxes.is_empty());
        assert_eq!(state.stats.kills, 0);
    }

    #[test]
    fn expired_and_orphaned_entries_are_dropped() {
        let store = temp_store("orphans");
        let now = 10_000;

        let mut users = HashMap::new();
        users.insert("alice".to_string(), make_user("alice"));

        let mut sessions = HashMap::new();
        for (token, username, expires) in [
            ("live", "alice", now + 1),
            ("expired", "alice", now),
            ("ghost", "bob", now + 1),
        ] {
            sessions.insert(
                token.to_string(),
                Session {
                    token: token.to_string(),
                    username: username.to_string(),
                    expires_at_ms: expires,
                },
            );
        }

        let mut inboxes = HashMap::new();
        inboxes.insert("bob".to_string(), Vec::new());

        store.save_users(&users);
        store.save_sessions(&sessions);
        store.save_inboxes(&inboxes);

        let state = store.load_all(now);
        assert_eq!(state.sessions.len(), 1);
        assert!(state.sessions.contains_key("live"));
        assert!(state.inboxes.is_empty());

        let _ = fs::remove_dir_all(store.dir);
    }

    #[test]
    fn derived_counters_are_recomputed_on_load() {
        let store = temp_store("recompute");

        let mut game = make_game("aaaaa");
        for username in ["alice", "bob", "carol"] {
            game.players.insert(username.to_string(), Player::new(6));
        }
        game.started_at_ms = Some(7);
        game.players.get_mut("carol").expect("exists").killed_at_ms = Some(8);
        game.alive_count = 99;

        let mut users = HashMap::new();
        users.insert("alice".to_string(), make_user("alice"));
        let mut games = HashMap::new();
        games.insert("aaaaa".to_string(), game);

        store.save_users(&users);
        store.save_games(&games);
        store.save_stats(&GlobalStats { kills: 5, active: 42 });

        let state = store.load_all(0);
        assert_eq!(state.games["aaaaa"].alive_count, 2);
        assert_eq!(state.stats.active, 1);
        assert_eq!(state.stats.kills, 5);

        let _ = fs::remove_dir_all(store.dir);
    }

    #[test]
    fn broken_entries_are_skipped_and_versions_checked() {
        let store = temp_store("partial");
        fs::create_dir_all(&store.dir).expect("create dir");

        let raw = r#"{
  "version": 1,
  "entries": {
    "alice": {
      "username": "alice",
      "passwordHash": "$argon2id$stub",
      "name": "Alice",
      "email": "alice@example.com",
      "createdAtMs": 1,
      "lastEditedMs": 1
    },
    "broken": { "username": 42 }
  }
}"#;
        fs::write(store.dir.join(USERS_FILE), raw).expect("write users");
        fs::write(
            store.dir.join(GAMES_FILE),
            r#"{ "version": 2, "entries": {} }"#,
        )
        .expect("write games");

        let state = store.load_all(0);
        assert_eq!(state.users.len(), 1);
        assert!(state.users.contains_key("alice"));
        assert!(state.games.is_empty());

        let _ = fs::remove_dir_all(store.dir);
    }
}
