use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::directory::Directory;
use crate::errors::{invalid_input, ApiError};
use crate::game::{ActionOutcome, Game};
use crate::inbox::{InboxManager, InboxOptions};
use crate::registry::Registry;
use crate::store::Store;
use crate::types::{
    GameListItem, GameSettingsPatch, GameSettingsView, GameState, GameView, GlobalStats,
    JoinedGameBrief, LoginInput, NamesView, NewGameInput, NewUserInput, NotificationPageView,
    NotificationView, OtherStatusView, OwnedGameBrief, PublicUserView, SessionView, StatsView,
    StatusView, StatusesView, UserSettingsPatch, UserSettingsView,
};

pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// The whole server state behind four locks. When several are held at once
/// they are taken in this order: registry, game, directory, inboxes, stats.
pub struct App {
    directory: Mutex<Directory>,
    registry: Mutex<Registry>,
    inboxes: Mutex<InboxManager>,
    stats: Mutex<GlobalStats>,
    store: Store,
}

impl App {
    pub fn new(store: Store, now_ms: u64) -> Self {
        let state = store.load_all(now_ms);
        Self {
            directory: Mutex::new(Directory::new(state.users, state.sessions)),
            registry: Mutex::new(Registry::new(state.games)),
            inboxes: Mutex::new(InboxManager::new(InboxOptions::default(), state.inboxes)),
            stats: Mutex::new(state.stats),
            store,
        }
    }

    pub fn create_user(
        &self,
        input: &NewUserInput,
        now_ms: u64,
    ) -> Result<SessionView, ApiError> {
        let session = self.directory().register(input, now_ms)?;
        self.persist_users();
        self.persist_sessions();
        Ok(SessionView { session })
    }

    pub fn login(&self, input: &LoginInput, now_ms: u64) -> Result<SessionView, ApiError> {
        let session = self
            .directory()
            .login(&input.username, &input.password, now_ms)?;
        self.persist_sessions();
        Ok(SessionView { session })
    }

    pub fn logout(&self, token: Option<&str>) {
        if let Some(token) = token {
            self.directory().logout(token);
            self.persist_sessions();
        }
    }

    pub fn user_settings(
        &self,
        token: Option<&str>,
        now_ms: u64,
    ) -> Result<UserSettingsView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        self.directory().settings_view(&actor)
    }

    pub fn update_user_settings(
        &self,
        token: Option<&str>,
        patch: &UserSettingsPatch,
        now_ms: u64,
    ) -> Result<UserSettingsView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        self.directory().update_settings(&actor, patch, now_ms)?;
        self.persist_users();
        self.directory().settings_view(&actor)
    }

    pub fn public_user(&self, username: &str) -> Result<PublicUserView, ApiError> {
        let (name, bio, created, owned_ids, joined_ids) = {
            let directory = self.directory();
            let user = directory.require(username)?;
            (
                user.name.clone(),
                user.bio.clone(),
                user.created_at_ms,
                user.owned_games.clone(),
                user.joined_games.clone(),
            )
        };

        let mut owned = Vec::new();
        let mut joined = Vec::new();
        let registry = self.registry();
        for id in owned_ids {
            let Ok(handle) = registry.get(&id) else { continue };
            let game = handle.lock().expect("game lock poisoned");
            owned.push(OwnedGameBrief {
                game: id,
                name: game.name.clone(),
                state: game.state(),
                player_count: game.players.len(),
            });
        }
        for id in joined_ids {
            let Ok(handle) = registry.get(&id) else { continue };
            let game = handle.lock().expect("game lock poisoned");
            let Some(player) = game.players.get(username) else {
                continue;
            };
            joined.push(JoinedGameBrief {
                game: id,
                name: game.name.clone(),
                state: game.state(),
                kills: player.kills,
                alive: player.alive(),
                updated: game.last_edited_ms,
            });
        }

        Ok(PublicUserView {
            user: username.to_string(),
            name,
            bio,
            created,
            owned,
            joined,
        })
    }

    pub fn create_game(
        &self,
        token: Option<&str>,
        input: &NewGameInput,
        now_ms: u64,
    ) -> Result<GameSettingsView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let mut rng = StdRng::from_os_rng();

        let view = {
            let mut registry = self.registry();
            let id = registry.allocate_id(&mut rng)?;
            let game = Game::new(id, actor.clone(), input, now_ms)?;
            let view = game.settings_view();
            registry.insert(game);
            view
        };
        self.directory().add_owned(&actor, &view.game);
        self.persist_games();
        self.persist_users();
        Ok(view)
    }

    pub fn game_settings(
        &self,
        token: Option<&str>,
        game_id: &str,
        now_ms: u64,
    ) -> Result<GameSettingsView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let admin = self.directory().is_admin(&actor);
        let handle = self.registry().get(game_id)?;
        let game = handle.lock().expect("game lock poisoned");
        game.ensure_owner(&actor, admin)?;
        Ok(game.settings_view())
    }

    pub fn update_game_settings(
        &self,
        token: Option<&str>,
        game_id: &str,
        patch: &GameSettingsPatch,
        now_ms: u64,
    ) -> Result<GameSettingsView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let admin = self.directory().is_admin(&actor);
        let handle = self.registry().get(game_id)?;
        let view = {
            let mut game = handle.lock().expect("game lock poisoned");
            game.ensure_owner(&actor, admin)?;
            game.apply_settings(patch, now_ms)?;
            game.settings_view()
        };
        self.persist_games();
        Ok(view)
    }

    pub fn delete_game(
        &self,
        token: Option<&str>,
        game_id: &str,
        now_ms: u64,
    ) -> Result<(), ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let admin = self.directory().is_admin(&actor);

        let creator = {
            let mut registry = self.registry();
            let handle = registry.get(game_id)?;
            let creator = {
                let game = handle.lock().expect("game lock poisoned");
                game.ensure_owner(&actor, admin)?;
                if game.state() != GameState::Forming {
                    return Err(ApiError::PreconditionFailed(
                        "only a game that has not started can be deleted",
                    ));
                }
                if !game.players.is_empty() {
                    return Err(ApiError::PreconditionFailed(
                        "all players must leave before the game is deleted",
                    ));
                }
                game.creator.clone()
            };
            registry.remove(game_id);
            creator
        };
        self.directory().remove_owned(&creator, game_id);
        self.persist_games();
        self.persist_users();
        Ok(())
    }

    pub fn game_view(&self, game_id: &str) -> Result<GameView, ApiError> {
        let handle = self.registry().get(game_id)?;
        let view = {
            let game = handle.lock().expect("game lock poisoned");
            game.public_view()
        };
        Ok(self.enrich_game_view(view))
    }

    pub fn list_games(&self, query: Option<&str>) -> Vec<GameListItem> {
        let needle = query.unwrap_or("").trim().to_lowercase();

        let handles = self.registry().handles();
        let mut items = Vec::new();
        for handle in handles {
            let game = handle.lock().expect("game lock poisoned");
            // Only names are searched, not descriptions.
            if needle.is_empty() || game.name.to_lowercase().contains(&needle) {
                items.push(game.list_item());
            }
        }
        items.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.game.cmp(&b.game)));
        items
    }

    /// Bulk id-to-display-name lookup. Unknown ids are left out instead of
    /// failing the whole request.
    pub fn names(&self, game_ids: &[String], usernames: &[String]) -> NamesView {
        let mut view = NamesView::default();
        {
            let registry = self.registry();
            for id in game_ids {
                let Ok(handle) = registry.get(id) else { continue };
                let game = handle.lock().expect("game lock poisoned");
                view.games.insert(id.clone(), game.name.clone());
            }
        }
        {
            let directory = self.directory();
            for username in usernames {
                let Some(user) = directory.get(username) else {
                    continue;
                };
                view.users.insert(username.clone(), user.name.clone());
            }
        }
        view
    }

    pub fn join(
        &self,
        token: Option<&str>,
        game_id: &str,
        password: Option<&str>,
        now_ms: u64,
    ) -> Result<GameView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let handle = self.registry().get(game_id)?;
        let view = {
            let mut game = handle.lock().expect("game lock poisoned");
            game.join(&actor, password, now_ms)?;
            self.directory().add_joined(&actor, game_id);
            game.public_view()
        };
        self.persist_games();
        self.persist_users();
        Ok(view)
    }

    /// Without a user parameter this is a voluntary leave, allowed only while
    /// the game is forming. Naming another player makes it a kick, which the
    /// owner may do at any point before the game ends; the reason, when
    /// given, lands in the kicked player's notification.
    pub fn leave(
        &self,
        token: Option<&str>,
        game_id: &str,
        target_user: Option<&str>,
        reason: Option<&str>,
        now_ms: u64,
    ) -> Result<(), ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let admin = self.directory().is_admin(&actor);
        let handle = self.registry().get(game_id)?;

        let outcome = {
            let mut game = handle.lock().expect("game lock poisoned");
            let (username, kick_reason) = match target_user {
                Some(user) if user != actor => {
                    game.ensure_owner(&actor, admin)?;
                    (user, Some(reason.unwrap_or("")))
                }
                _ => {
                    if game.state() != GameState::Forming {
                        return Err(ApiError::Conflict(
                            "you cannot leave a game that has started",
                        ));
                    }
                    (actor.as_str(), None)
                }
            };
            let outcome = game.remove_player(username, kick_reason, now_ms)?;
            self.directory().remove_joined(username, game_id);
            outcome
        };
        self.apply_outcome(outcome);
        self.persist_games();
        self.persist_users();
        Ok(())
    }

    pub fn start(
        &self,
        token: Option<&str>,
        game_id: &str,
        now_ms: u64,
    ) -> Result<GameView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let admin = self.directory().is_admin(&actor);
        let handle = self.registry().get(game_id)?;
        let mut rng = StdRng::from_os_rng();

        let (outcome, view) = {
            let mut game = handle.lock().expect("game lock poisoned");
            game.ensure_owner(&actor, admin)?;
            let outcome = game.start(&mut rng, now_ms)?;
            (outcome, game.public_view())
        };
        self.stats().active += 1;
        self.persist_stats();
        self.apply_outcome(outcome);
        self.persist_games();
        Ok(view)
    }

    pub fn shuffle(
        &self,
        token: Option<&str>,
        game_id: &str,
        now_ms: u64,
    ) -> Result<(), ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let admin = self.directory().is_admin(&actor);
        let handle = self.registry().get(game_id)?;
        let mut rng = StdRng::from_os_rng();

        let outcome = {
            let mut game = handle.lock().expect("game lock poisoned");
            game.ensure_owner(&actor, admin)?;
            game.shuffle(&mut rng, now_ms)?
        };
        self.apply_outcome(outcome);
        self.persist_games();
        Ok(())
    }

    pub fn status(
        &self,
        token: Option<&str>,
        game_id: &str,
        now_ms: u64,
    ) -> Result<StatusView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let handle = self.registry().get(game_id)?;
        let (name, target, code) = {
            let game = handle.lock().expect("game lock poisoned");
            let (target, code) = game.status_of(&actor)?;
            (game.name.clone(), target, code)
        };
        let target_name = self.directory().display_name(&target);
        Ok(StatusView {
            game: game_id.to_string(),
            name,
            target,
            target_name,
            code,
        })
    }

    /// One sweep over everything the caller joined: running games where they
    /// are alive come back with target and code, the rest come back as plain
    /// state lines.
    pub fn statuses(&self, token: Option<&str>, now_ms: u64) -> Result<StatusesView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let joined = {
            self.directory()
                .get(&actor)
                .map(|user| user.joined_games.clone())
                .unwrap_or_default()
        };

        let mut raw_active = Vec::new();
        let mut others = Vec::new();
        {
            let registry = self.registry();
            for id in joined {
                let Ok(handle) = registry.get(&id) else { continue };
                let game = handle.lock().expect("game lock poisoned");
                match game.status_of(&actor) {
                    Ok((target, code)) => raw_active.push((id, game.name.clone(), target, code)),
                    Err(_) => {
                        let player = game.players.get(&actor);
                        // Forming entries show the join time and settled games
                        // their finish time; an eliminated player sees the
                        // time of their death.
                        let time = match game.state() {
                            GameState::Forming => player.map(|entry| entry.joined_at_ms),
                            GameState::Active => player
                                .and_then(|entry| entry.killed_at_ms)
                                .or(game.started_at_ms),
                            GameState::Ended => game.ended_at_ms,
                        }
                        .unwrap_or(game.created_at_ms);
                        others.push(OtherStatusView {
                            game: id,
                            name: game.name.clone(),
                            state: game.state(),
                            eliminated: player.map(|entry| !entry.alive()).unwrap_or(false),
                            time,
                        });
                    }
                }
            }
        }

        let directory = self.directory();
        let active = raw_active
            .into_iter()
            .map(|(game, name, target, code)| {
                let target_name = directory.display_name(&target);
                StatusView {
                    game,
                    name,
                    target,
                    target_name,
                    code,
                }
            })
            .collect();
        Ok(StatusesView { active, others })
    }

    pub fn kill(
        &self,
        token: Option<&str>,
        game_id: &str,
        code: Option<&str>,
        self_report: bool,
        now_ms: u64,
    ) -> Result<(), ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let handle = self.registry().get(game_id)?;

        let outcome = {
            let mut game = handle.lock().expect("game lock poisoned");
            if self_report {
                game.report_own_death(&actor, now_ms)?
            } else {
                let code = code
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .ok_or_else(|| invalid_input("a kill code is required"))?;
                game.kill(&actor, code, now_ms)?
            }
        };
        self.apply_outcome(outcome);
        self.persist_games();
        Ok(())
    }

    pub fn notifications(
        &self,
        token: Option<&str>,
        from: Option<usize>,
        limit: Option<usize>,
        now_ms: u64,
    ) -> Result<NotificationPageView, ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        let page = self.inboxes().page(&actor, from.unwrap_or(0), limit)?;
        self.persist_inboxes();

        // Names are resolved after the inbox lock is gone.
        let mut game_names: BTreeMap<String, String> = BTreeMap::new();
        {
            let registry = self.registry();
            for entry in &page.notifications {
                if game_names.contains_key(&entry.game) {
                    continue;
                }
                let name = match registry.get(&entry.game) {
                    Ok(handle) => handle.lock().expect("game lock poisoned").name.clone(),
                    Err(_) => entry.game.clone(),
                };
                game_names.insert(entry.game.clone(), name);
            }
        }

        let directory = self.directory();
        let notifications = page
            .notifications
            .iter()
            .map(|entry| NotificationView {
                kind: entry
                    .kind
                    .enriched(|username| directory.display_name(username)),
                game: entry.game.clone(),
                game_name: game_names
                    .get(&entry.game)
                    .cloned()
                    .unwrap_or_else(|| entry.game.clone()),
                time: entry.time,
                read: entry.read,
            })
            .collect();
        Ok(NotificationPageView {
            notifications,
            unread: page.unread,
            end: page.end,
        })
    }

    pub fn mark_read(&self, token: Option<&str>, now_ms: u64) -> Result<(), ApiError> {
        let actor = self.authenticate(token, now_ms)?;
        self.inboxes().mark_all_read(&actor);
        self.persist_inboxes();
        Ok(())
    }

    pub fn stats_view(&self) -> StatsView {
        let games = self.registry().len();
        let stats = *self.stats();
        StatsView {
            kills: stats.kills,
            active: stats.active,
            games,
        }
    }

    fn authenticate(&self, token: Option<&str>, now_ms: u64) -> Result<String, ApiError> {
        let Some(token) = token else {
            return Err(ApiError::Unauthorized("missing session header"));
        };
        self.directory().verify(token, now_ms)
    }

    fn enrich_game_view(&self, mut view: GameView) -> GameView {
        let directory = self.directory();
        for entry in &mut view.players {
            entry.killer_name = entry
                .killer
                .as_deref()
                .map(|killer| directory.display_name(killer));
        }
        view
    }

    fn apply_outcome(&self, outcome: ActionOutcome) {
        if !outcome.deliveries.is_empty() {
            self.inboxes().deliver_all(outcome.deliveries);
            self.persist_inboxes();
        }
        if outcome.kill_recorded || outcome.ended {
            {
                let mut stats = self.stats();
                if outcome.kill_recorded {
                    stats.kills += 1;
                }
                if outcome.ended {
                    stats.active = stats.active.saturating_sub(1);
                }
            }
            self.persist_stats();
        }
    }

    fn directory(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().expect("directory lock poisoned")
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().expect("registry lock poisoned")
    }

    fn inboxes(&self) -> MutexGuard<'_, InboxManager> {
        self.inboxes.lock().expect("inbox lock poisoned")
    }

    fn stats(&self) -> MutexGuard<'_, GlobalStats> {
        self.stats.lock().expect("stats lock poisoned")
    }

    fn persist_users(&self) {
        let users = self.directory().snapshot_users();
        self.store.save_users(&users);
    }

    fn persist_sessions(&self) {
        let sessions = self.directory().snapshot_sessions();
        self.store.save_sessions(&sessions);
    }

    fn persist_games(&self) {
        let games = self.registry().snapshot();
        self.store.save_games(&games);
    }

    fn persist_inboxes(&self) {
        let inboxes = self.inboxes().snapshot();
        self.store.save_inboxes(&inboxes);
    }

    fn persist_stats(&self) {
        let stats = *self.stats();
        self.store.save_stats(&stats);
    }
}
