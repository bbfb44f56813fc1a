use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub bio: String,
    #[serde(rename = "joinedGames", default)]
    pub joined_games: Vec<String>,
    #[serde(rename = "ownedGames", default)]
    pub owned_games: Vec<String>,
    #[serde(rename = "emailNotifs", default)]
    pub email_notifs: bool,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
    #[serde(rename = "createdAtMs")]
    pub created_at_ms: u64,
    #[serde(rename = "lastEditedMs")]
    pub last_edited_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    #[serde(rename = "expiresAtMs")]
    pub expires_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Forming,
    Active,
    Ended,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    #[serde(default)]
    pub kills: u32,
    #[serde(rename = "joinedAtMs")]
    pub joined_at_ms: u64,
    #[serde(rename = "killedAtMs", default)]
    pub killed_at_ms: Option<u64>,
    #[serde(rename = "killedBy", default)]
    pub killed_by: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub assassin: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl Player {
    pub fn new(now_ms: u64) -> Self {
        Self {
            kills: 0,
            joined_at_ms: now_ms,
            killed_at_ms: None,
            killed_by: None,
            target: None,
            assassin: None,
            code: None,
        }
    }

    pub fn alive(&self) -> bool {
        self.killed_at_ms.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationKind {
    GameStarted { target: String },
    Shuffle { target: String },
    Killed { by: String },
    KilledSelf { victim: String },
    Kicked { reason: String },
    KickedNewTarget { target: String },
    GameEnded { winner: String },
}

impl NotificationKind {
    pub fn enriched(&self, mut resolve_name: impl FnMut(&str) -> String) -> NotificationKindView {
        match self {
            NotificationKind::GameStarted { target } => NotificationKindView::GameStarted {
                target: target.clone(),
                target_name: resolve_name(target),
            },
            NotificationKind::Shuffle { target } => NotificationKindView::Shuffle {
                target: target.clone(),
                target_name: resolve_name(target),
            },
            NotificationKind::Killed { by } => NotificationKindView::Killed {
                by: by.clone(),
                by_name: resolve_name(by),
            },
            NotificationKind::KilledSelf { victim } => NotificationKindView::KilledSelf {
                victim: victim.clone(),
                victim_name: resolve_name(victim),
            },
            NotificationKind::Kicked { reason } => NotificationKindView::Kicked {
                reason: reason.clone(),
            },
            NotificationKind::KickedNewTarget { target } => NotificationKindView::KickedNewTarget {
                target: target.clone(),
                target_name: resolve_name(target),
            },
            NotificationKind::GameEnded { winner } => NotificationKindView::GameEnded {
                winner: winner.clone(),
                winner_name: resolve_name(winner),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub game: String,
    pub time: u64,
    pub read: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationKindView {
    GameStarted {
        target: String,
        #[serde(rename = "targetName")]
        target_name: String,
    },
    Shuffle {
        target: String,
        #[serde(rename = "targetName")]
        target_name: String,
    },
    Killed {
        by: String,
        #[serde(rename = "byName")]
        by_name: String,
    },
    KilledSelf {
        victim: String,
        #[serde(rename = "victimName")]
        victim_name: String,
    },
    Kicked {
        reason: String,
    },
    KickedNewTarget {
        target: String,
        #[serde(rename = "targetName")]
        target_name: String,
    },
    GameEnded {
        winner: String,
        #[serde(rename = "winnerName")]
        winner_name: String,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub kind: NotificationKindView,
    pub game: String,
    #[serde(rename = "gameName")]
    pub game_name: String,
    pub time: u64,
    pub read: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct NotificationPageView {
    pub notifications: Vec<NotificationView>,
    pub unread: usize,
    pub end: bool,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct GlobalStats {
    pub kills: u64,
    pub active: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub session: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserSettingsView {
    pub username: String,
    pub name: String,
    pub email: String,
    pub bio: String,
    #[serde(rename = "emailNotifs")]
    pub email_notifs: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct OwnedGameBrief {
    pub game: String,
    pub name: String,
    pub state: GameState,
    #[serde(rename = "playerCount")]
    pub player_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct JoinedGameBrief {
    pub game: String,
    pub name: String,
    pub state: GameState,
    pub kills: u32,
    pub alive: bool,
    pub updated: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicUserView {
    pub user: String,
    pub name: String,
    pub bio: String,
    pub created: u64,
    pub owned: Vec<OwnedGameBrief>,
    pub joined: Vec<JoinedGameBrief>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerEntryView {
    pub user: String,
    pub alive: bool,
    pub kills: u32,
    pub joined: u64,
    #[serde(rename = "killTime")]
    pub kill_time: Option<u64>,
    pub killer: Option<String>,
    #[serde(rename = "killerName")]
    pub killer_name: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GameView {
    pub game: String,
    pub name: String,
    pub description: String,
    pub state: GameState,
    pub creator: String,
    #[serde(rename = "playerCount")]
    pub player_count: usize,
    #[serde(rename = "aliveCount")]
    pub alive_count: usize,
    pub created: u64,
    pub started: Option<u64>,
    pub ended: Option<u64>,
    pub winner: Option<String>,
    #[serde(rename = "joinDisabled")]
    pub join_disabled: bool,
    #[serde(rename = "hasPassword")]
    pub has_password: bool,
    pub players: Vec<PlayerEntryView>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GameListItem {
    pub game: String,
    pub name: String,
    pub description: String,
    pub state: GameState,
    #[serde(rename = "playerCount")]
    pub player_count: usize,
    pub created: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct GameSettingsView {
    pub game: String,
    pub name: String,
    pub description: String,
    pub password: String,
    #[serde(rename = "joinDisabled")]
    pub join_disabled: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusView {
    pub game: String,
    pub name: String,
    pub target: String,
    #[serde(rename = "targetName")]
    pub target_name: String,
    pub code: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct OtherStatusView {
    pub game: String,
    pub name: String,
    pub state: GameState,
    pub eliminated: bool,
    pub time: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusesView {
    pub active: Vec<StatusView>,
    pub others: Vec<OtherStatusView>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsView {
    pub kills: u64,
    pub active: u64,
    pub games: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct NamesView {
    pub games: BTreeMap<String, String>,
    pub users: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUserInput {
    pub username: String,
    pub name: String,
    pub password: String,
    pub email: String,
    #[serde(default)]
    pub bio: String,
    #[serde(rename = "emailNotifs", default)]
    pub email_notifs: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserSettingsPatch {
    pub name: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "oldPassword")]
    pub old_password: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    #[serde(rename = "emailNotifs")]
    pub email_notifs: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewGameInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "joinDisabled", default)]
    pub join_disabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GameSettingsPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "joinDisabled")]
    pub join_disabled: Option<bool>,
}
