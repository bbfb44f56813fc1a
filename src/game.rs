use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::codes;
use crate::constants::{
    GAME_DESCRIPTION_MAX, GAME_NAME_MAX, GAME_PASSWORD_MAX, MIN_PLAYERS_TO_START,
};
use crate::cycle;
use crate::errors::{invalid_input, ApiError};
use crate::types::{
    GameListItem, GameSettingsPatch, GameSettingsView, GameState, GameView, NewGameInput,
    Notification, NotificationKind, Player, PlayerEntryView,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub creator: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "joinDisabled", default)]
    pub join_disabled: bool,
    #[serde(rename = "createdAtMs")]
    pub created_at_ms: u64,
    #[serde(rename = "startedAtMs", default)]
    pub started_at_ms: Option<u64>,
    #[serde(rename = "endedAtMs", default)]
    pub ended_at_ms: Option<u64>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(rename = "aliveCount", default)]
    pub alive_count: usize,
    #[serde(default)]
    pub players: BTreeMap<String, Player>,
    #[serde(rename = "lastEditedMs")]
    pub last_edited_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Delivery {
    pub to: String,
    pub notification: Notification,
}

#[derive(Clone, Debug, Default)]
pub struct ActionOutcome {
    pub deliveries: Vec<Delivery>,
    pub kill_recorded: bool,
    pub ended: bool,
}

impl Game {
    pub fn new(
        id: String,
        creator: String,
        input: &NewGameInput,
        now_ms: u64,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            id,
            creator,
            name: check_game_name(&input.name)?,
            description: check_game_description(&input.description)?,
            password: check_game_password(&input.password)?,
            join_disabled: input.join_disabled,
            created_at_ms: now_ms,
            started_at_ms: None,
            ended_at_ms: None,
            winner: None,
            alive_count: 0,
            players: BTreeMap::new(),
            last_edited_ms: now_ms,
        })
    }

    pub fn state(&self) -> GameState {
        if self.ended_at_ms.is_some() {
            GameState::Ended
        } else if self.started_at_ms.is_some() {
            GameState::Active
        } else {
            GameState::Forming
        }
    }

    pub fn ensure_owner(&self, actor: &str, admin: bool) -> Result<(), ApiError> {
        if self.creator != actor && !admin {
            return Err(ApiError::Forbidden("only the game owner can do this"));
        }
        Ok(())
    }

    pub fn join(
        &mut self,
        username: &str,
        password: Option<&str>,
        now_ms: u64,
    ) -> Result<(), ApiError> {
        if self.state() != GameState::Forming {
            return Err(ApiError::Conflict("game has already started"));
        }
        if self.join_disabled {
            return Err(ApiError::PreconditionFailed("joining this game is disabled"));
        }
        if self.players.contains_key(username) {
            return Err(ApiError::Conflict("you have already joined this game"));
        }
        if !self.password.trim().is_empty()
            && !codes::join_password_matches(&self.password, password.unwrap_or(""))
        {
            return Err(ApiError::Forbidden("wrong game password"));
        }

        self.players.insert(username.to_string(), Player::new(now_ms));
        self.touch(now_ms);
        Ok(())
    }

    pub fn start(&mut self, rng: &mut impl Rng, now_ms: u64) -> Result<ActionOutcome, ApiError> {
        match self.state() {
            GameState::Active => return Err(ApiError::Conflict("game has already started")),
            GameState::Ended => {
                return Err(ApiError::PreconditionFailed("game has already ended"))
            }
            GameState::Forming => {}
        }
        if self.players.len() < MIN_PLAYERS_TO_START {
            return Err(ApiError::PreconditionFailed(
                "at least two players are needed to start",
            ));
        }

        cycle::assign_targets(&mut self.players, rng);
        self.started_at_ms = Some(now_ms);
        self.alive_count = self.players.len();
        self.touch(now_ms);

        let deliveries = self
            .players
            .iter()
            .map(|(username, player)| {
                let target = player
                    .target
                    .clone()
                    .expect("every player holds a target after assignment");
                self.notify(username, NotificationKind::GameStarted { target }, now_ms)
            })
            .collect();
        Ok(ActionOutcome {
            deliveries,
            ..ActionOutcome::default()
        })
    }

    pub fn shuffle(&mut self, rng: &mut impl Rng, now_ms: u64) -> Result<ActionOutcome, ApiError> {
        self.ensure_active()?;

        cycle::assign_targets(&mut self.players, rng);
        self.touch(now_ms);

        let deliveries = self
            .players
            .iter()
            .filter(|(_, player)| player.alive())
            .map(|(username, player)| {
                let target = player
                    .target
                    .clone()
                    .expect("every alive player holds a target after assignment");
                self.notify(username, NotificationKind::Shuffle { target }, now_ms)
            })
            .collect();
        Ok(ActionOutcome {
            deliveries,
            ..ActionOutcome::default()
        })
    }

    pub fn kill(
        &mut self,
        killer: &str,
        submitted_code: &str,
        now_ms: u64,
    ) -> Result<ActionOutcome, ApiError> {
        self.ensure_active()?;
        let Some(killer_entry) = self.players.get(killer) else {
            return Err(ApiError::Forbidden("you are not in this game"));
        };
        if !killer_entry.alive() {
            return Err(ApiError::PreconditionFailed(
                "you have already been eliminated",
            ));
        }
        let victim = killer_entry
            .target
            .clone()
            .expect("alive players in an active game hold a target");
        let victim_code = self
            .players
            .get(&victim)
            .expect("targets refer to players in the game")
            .code
            .clone()
            .expect("alive players in an active game hold a code");
        if !codes::kill_codes_match(&victim_code, submitted_code) {
            return Err(ApiError::InvalidCode);
        }

        self.players
            .get_mut(killer)
            .expect("killer checked above")
            .kills += 1;
        let mut deliveries = vec![self.notify(
            &victim,
            NotificationKind::Killed {
                by: killer.to_string(),
            },
            now_ms,
        )];
        let (ended, end_deliveries) = self.eliminate(&victim, Some(killer), now_ms);
        deliveries.extend(end_deliveries);
        self.touch(now_ms);
        Ok(ActionOutcome {
            deliveries,
            kill_recorded: true,
            ended,
        })
    }

    // The victim announces their own death; the hunter gets the credit.
    pub fn report_own_death(
        &mut self,
        victim: &str,
        now_ms: u64,
    ) -> Result<ActionOutcome, ApiError> {
        self.ensure_active()?;
        let Some(victim_entry) = self.players.get(victim) else {
            return Err(ApiError::Forbidden("you are not in this game"));
        };
        if !victim_entry.alive() {
            return Err(ApiError::PreconditionFailed(
                "you have already been eliminated",
            ));
        }
        let assassin = victim_entry
            .assassin
            .clone()
            .expect("alive players in an active game have a hunter");

        self.players
            .get_mut(&assassin)
            .expect("the hunter is a player in the game")
            .kills += 1;
        let mut deliveries = vec![self.notify(
            &assassin,
            NotificationKind::KilledSelf {
                victim: victim.to_string(),
            },
            now_ms,
        )];
        let (ended, end_deliveries) = self.eliminate(victim, Some(&assassin), now_ms);
        deliveries.extend(end_deliveries);
        self.touch(now_ms);
        Ok(ActionOutcome {
            deliveries,
            kill_recorded: true,
            ended,
        })
    }

    // Kick or voluntary leave. The record is removed outright and nobody is
    // credited; if the game is running the ring is repaired first.
    pub fn remove_player(
        &mut self,
        username: &str,
        kick_reason: Option<&str>,
        now_ms: u64,
    ) -> Result<ActionOutcome, ApiError> {
        if self.state() == GameState::Ended {
            return Err(ApiError::PreconditionFailed("game has already ended"));
        }
        let Some(entry) = self.players.get(username) else {
            return Err(ApiError::NotFound("player"));
        };
        let was_alive = entry.alive();
        let assassin = entry.assassin.clone();

        let mut deliveries = Vec::new();
        if let Some(reason) = kick_reason {
            deliveries.push(self.notify(
                username,
                NotificationKind::Kicked {
                    reason: reason.to_string(),
                },
                now_ms,
            ));
        }

        let mut ended = false;
        if self.state() == GameState::Active && was_alive {
            let (now_ended, end_deliveries) = self.eliminate(username, None, now_ms);
            ended = now_ended;
            if !ended {
                if let Some(assassin) = assassin {
                    if let Some(hunter) = self.players.get(&assassin) {
                        if hunter.alive() {
                            let target = hunter
                                .target
                                .clone()
                                .expect("the hunter inherited a target from the splice");
                            deliveries.push(self.notify(
                                &assassin,
                                NotificationKind::KickedNewTarget { target },
                                now_ms,
                            ));
                        }
                    }
                }
            }
            deliveries.extend(end_deliveries);
        }

        self.players.remove(username);
        self.touch(now_ms);
        Ok(ActionOutcome {
            deliveries,
            kill_recorded: false,
            ended,
        })
    }

    pub fn status_of(&self, username: &str) -> Result<(String, String), ApiError> {
        self.ensure_active()?;
        let Some(entry) = self.players.get(username) else {
            return Err(ApiError::Forbidden("you are not in this game"));
        };
        if !entry.alive() {
            return Err(ApiError::PreconditionFailed("you have been eliminated"));
        }
        let target = entry
            .target
            .clone()
            .expect("alive players in an active game hold a target");
        let code = entry
            .code
            .clone()
            .expect("alive players in an active game hold a code");
        Ok((target, code))
    }

    pub fn apply_settings(
        &mut self,
        patch: &GameSettingsPatch,
        now_ms: u64,
    ) -> Result<(), ApiError> {
        let name = patch.name.as_deref().map(check_game_name).transpose()?;
        let description = patch
            .description
            .as_deref()
            .map(check_game_description)
            .transpose()?;
        let password = patch.password.as_deref().map(check_game_password).transpose()?;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(password) = password {
            self.password = password;
        }
        if let Some(join_disabled) = patch.join_disabled {
            self.join_disabled = join_disabled;
        }
        self.touch(now_ms);
        Ok(())
    }

    pub fn settings_view(&self) -> GameSettingsView {
        GameSettingsView {
            game: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            password: self.password.clone(),
            join_disabled: self.join_disabled,
        }
    }

    pub fn public_view(&self) -> GameView {
        GameView {
            game: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            state: self.state(),
            creator: self.creator.clone(),
            player_count: self.players.len(),
            alive_count: self.alive_count,
            created: self.created_at_ms,
            started: self.started_at_ms,
            ended: self.ended_at_ms,
            winner: self.winner.clone(),
            join_disabled: self.join_disabled,
            has_password: !self.password.trim().is_empty(),
            players: self
                .players
                .iter()
                .map(|(username, player)| PlayerEntryView {
                    user: username.clone(),
                    alive: player.alive(),
                    kills: player.kills,
                    joined: player.joined_at_ms,
                    kill_time: player.killed_at_ms,
                    killer: player.killed_by.clone(),
                    // Display names are resolved a layer up.
                    killer_name: None,
                })
                .collect(),
        }
    }

    pub fn list_item(&self) -> GameListItem {
        GameListItem {
            game: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            state: self.state(),
            player_count: self.players.len(),
            created: self.created_at_ms,
        }
    }

    // Every elimination funnels through here: splice the ring, drop the
    // alive count, and settle the game once a single player remains.
    fn eliminate(
        &mut self,
        victim: &str,
        killed_by: Option<&str>,
        now_ms: u64,
    ) -> (bool, Vec<Delivery>) {
        cycle::splice_out(&mut self.players, victim);
        if let Some(entry) = self.players.get_mut(victim) {
            entry.killed_at_ms = Some(now_ms);
            entry.killed_by = killed_by.map(str::to_string);
        }
        self.alive_count = self.alive_count.saturating_sub(1);
        if self.alive_count > 1 {
            return (false, Vec::new());
        }

        let winner = cycle::alive_usernames(&self.players)
            .into_iter()
            .next()
            .expect("one player outlives every elimination");
        let survivor = self
            .players
            .get_mut(&winner)
            .expect("the winner is a player in the game");
        survivor.target = None;
        survivor.assassin = None;
        survivor.code = None;
        self.ended_at_ms = Some(now_ms);
        self.winner = Some(winner.clone());

        let deliveries = self
            .players
            .keys()
            .map(|username| {
                self.notify(
                    username,
                    NotificationKind::GameEnded {
                        winner: winner.clone(),
                    },
                    now_ms,
                )
            })
            .collect();
        (true, deliveries)
    }

    fn ensure_active(&self) -> Result<(), ApiError> {
        match self.state() {
            GameState::Forming => Err(ApiError::PreconditionFailed("game has not started")),
            GameState::Ended => Err(ApiError::PreconditionFailed("game has already ended")),
            GameState::Active => Ok(()),
        }
    }

    fn notify(&self, to: &str, kind: NotificationKind, now_ms: u64) -> Delivery {
        Delivery {
            to: to.to_string(),
            notification: Notification {
                kind,
                game: self.id.clone(),
                time: now_ms,
                read: false,
            },
        }
    }

    fn touch(&mut self, now_ms: u64) {
        self.last_edited_ms = now_ms;
    }
}

fn check_game_name(value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > GAME_NAME_MAX {
        return Err(invalid_input(format!(
            "game name must be 1 to {GAME_NAME_MAX} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn check_game_description(value: &str) -> Result<String, ApiError> {
    if value.len() > GAME_DESCRIPTION_MAX {
        return Err(invalid_input(format!(
            "game description must be at most {GAME_DESCRIPTION_MAX} characters"
        )));
    }
    Ok(value.to_string())
}

fn check_game_password(value: &str) -> Result<String, ApiError> {
    if value.len() > GAME_PASSWORD_MAX {
        return Err(invalid_input(format!(
            "game password must be at most {GAME_PASSWORD_MAX} characters"
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::{cycle_anomalies, is_valid_cycle};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_input(name: &str) -> NewGameInput {
        NewGameInput {
            name: name.to_string(),
            description: String::new(),
            password: String::new(),
            join_disabled: false,
        }
    }

    fn started_game(player_count: usize, seed: u64) -> Game {
        let mut game = Game::new(
            "ab12c".to_string(),
            "owner".to_string(),
            &make_input("Campus Manhunt"),
            1_000,
        )
        .expect("settings are valid");
        for index in 0..player_count {
            game.join(&format!("p{index:02}"), None, 1_100 + index as u64)
                .expect("joining a forming game works");
        }
        game.start(&mut StdRng::seed_from_u64(seed), 2_000)
            .expect("start succeeds with enough players");
        game
    }

    fn code_of(game: &Game, username: &str) -> String {
        game.players[username].code.clone().expect("code is set")
    }

    #[test]
    fn join_rules() {
        let mut game = Game::new(
            "ab12c".to_string(),
            "owner".to_string(),
            &NewGameInput {
                name: "Secret Game".to_string(),
                description: String::new(),
                password: "Hunters".to_string(),
                join_disabled: false,
            },
            0,
        )
        .expect("settings are valid");

        assert_eq!(
            game.join("alice", None, 1),
            Err(ApiError::Forbidden("wrong game password"))
        );
        assert!(game.join("alice", Some(" hunters "), 1).is_ok());
        assert_eq!(
            game.join("alice", Some("hunters"), 2),
            Err(ApiError::Conflict("you have already joined this game"))
        );

        game.join_disabled = true;
        assert!(matches!(
            game.join("bob", Some("hunters"), 3),
            Err(ApiError::PreconditionFailed(_))
        ));
        game.join_disabled = false;

        game.join("bob", Some("hunters"), 4).expect("bob joins");
        game.start(&mut StdRng::seed_from_u64(1), 5)
            .expect("two players start");
        assert_eq!(
            game.join("carol", Some("hunters"), 6),
            Err(ApiError::Conflict("game has already started"))
        );
    }

    #[test]
    fn start_needs_two_players_and_happens_once() {
        let mut game = Game::new(
            "ab12c".to_string(),
            "owner".to_string(),
            &make_input("Tiny"),
            0,
        )
        .expect("settings are valid");
        game.join("solo", None, 1).expect("join works");
        assert!(matches!(
            game.start(&mut StdRng::seed_from_u64(0), 2),
            Err(ApiError::PreconditionFailed(_))
        ));

        game.join("duo", None, 3).expect("join works");
        let outcome = game
            .start(&mut StdRng::seed_from_u64(0), 4)
            .expect("start succeeds");
        assert_eq!(game.state(), GameState::Active);
        assert_eq!(game.alive_count, 2);
        assert_eq!(outcome.deliveries.len(), 2);
        assert!(outcome.deliveries.iter().all(|delivery| matches!(
            delivery.notification.kind,
            NotificationKind::GameStarted { .. }
        )));
        assert!(is_valid_cycle(&game.players));

        assert!(matches!(
            game.start(&mut StdRng::seed_from_u64(0), 5),
            Err(ApiError::Conflict("game has already started"))
        ));
    }

    #[test]
    fn kill_with_correct_code_moves_exactly_one_elimination() {
        for seed in 0..40u64 {
            let mut game = started_game(6, seed);
            let killer = "p00";
            let victim = game.players[killer].target.clone().expect("target set");
            let outcome = game
                .kill(killer, &code_of(&game, &victim), 3_000)
                .expect("correct code kills");

            assert!(outcome.kill_recorded);
            assert!(!outcome.ended);
            assert_eq!(game.alive_count, 5);
            assert_eq!(game.players[killer].kills, 1);
            let corpse = &game.players[&victim];
            assert_eq!(corpse.killed_at_ms, Some(3_000));
            assert_eq!(corpse.killed_by.as_deref(), Some(killer));
            assert!(corpse.target.is_none());
            let anomalies = cycle_anomalies(&game.players);
            assert!(anomalies.is_empty(), "seed {seed}: {anomalies:?}");
            // The killer inherits the victim's prey and keeps their own code.
            assert_eq!(
                game.players[killer].target,
                game.players
                    .iter()
                    .find(|(_, player)| player.alive()
                        && player.assassin.as_deref() == Some(killer))
                    .map(|(username, _)| username.clone())
            );
        }
    }

    #[test]
    fn kill_with_wrong_code_changes_nothing() {
        let mut game = started_game(4, 5);
        let result = game.kill("p00", "definitely wrong words", 3_000);
        assert!(matches!(result, Err(ApiError::InvalidCode)));
        assert_eq!(game.alive_count, 4);
        assert_eq!(game.players["p00"].kills, 0);
        assert!(game.players.values().all(|player| player.alive()));
        assert!(is_valid_cycle(&game.players));
    }

    #[test]
    fn public_view_attributes_each_elimination() {
        let mut game = started_game(4, 11);
        let killer = "p00";
        let victim = game.players[killer].target.clone().expect("target set");
        game.kill(killer, &code_of(&game, &victim), 3_000)
            .expect("correct code kills");

        let view = game.public_view();
        let fallen = view
            .players
            .iter()
            .find(|entry| entry.user == victim)
            .expect("the victim stays listed");
        assert!(!fallen.alive);
        assert_eq!(fallen.kill_time, Some(3_000));
        assert_eq!(fallen.killer.as_deref(), Some(killer));
        assert!(fallen.killer_name.is_none());

        let standing = view
            .players
            .iter()
            .find(|entry| entry.user == killer)
            .expect("the killer stays listed");
        assert!(standing.alive);
        assert!(standing.kill_time.is_none());
        assert!(standing.killer.is_none());
    }

    #[test]
    fn eliminated_player_cannot_kill() {
        let mut game = started_game(3, 7);
        let victim = game.players["p00"].target.clone().expect("target set");
        game.kill("p00", &code_of(&game, &victim), 3_000)
            .expect("first kill works");
        assert!(matches!(
            game.kill(&victim, "apple anchor bell", 3_100),
            Err(ApiError::PreconditionFailed(_))
        ));
        assert!(matches!(
            game.kill("stranger", "apple anchor bell", 3_200),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn last_kill_ends_the_game_and_clears_the_winner_links() {
        let mut game = started_game(2, 9);
        let victim = game.players["p00"].target.clone().expect("target set");
        assert_eq!(victim, "p01");

        let outcome = game
            .kill("p00", &code_of(&game, "p01"), 3_000)
            .expect("kill works");
        assert!(outcome.ended);
        assert_eq!(game.state(), GameState::Ended);
        assert_eq!(game.winner.as_deref(), Some("p00"));
        assert_eq!(game.alive_count, 1);
        let winner = &game.players["p00"];
        assert!(winner.target.is_none());
        assert!(winner.assassin.is_none());
        assert!(winner.code.is_none());

        // Everyone still on the roster hears about the ending, corpse included.
        let ended: Vec<&str> = outcome
            .deliveries
            .iter()
            .filter(|delivery| {
                matches!(
                    delivery.notification.kind,
                    NotificationKind::GameEnded { .. }
                )
            })
            .map(|delivery| delivery.to.as_str())
            .collect();
        assert_eq!(ended, vec!["p00", "p01"]);

        assert!(matches!(
            game.kill("p00", "apple anchor bell", 4_000),
            Err(ApiError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn self_report_credits_the_hunter() {
        let mut game = started_game(4, 11);
        let victim = "p02";
        let hunter = game.players[victim].assassin.clone().expect("assassin set");

        let outcome = game
            .report_own_death(victim, 3_000)
            .expect("self report works");
        assert!(outcome.kill_recorded);
        assert_eq!(game.players[&hunter].kills, 1);
        assert_eq!(game.players[victim].killed_by.as_deref(), Some(hunter.as_str()));
        assert!(matches!(
            outcome.deliveries[0].notification.kind,
            NotificationKind::KilledSelf { .. }
        ));
        assert_eq!(outcome.deliveries[0].to, hunter);
        assert!(is_valid_cycle(&game.players));
    }

    #[test]
    fn kick_mid_game_repairs_the_ring_without_credit() {
        for seed in 0..40u64 {
            let mut game = started_game(5, seed);
            let kicked = "p02";
            let hunter = game.players[kicked].assassin.clone().expect("assassin set");
            let outcome = game
                .remove_player(kicked, Some("being unsporting"), 3_000)
                .expect("kick works");

            assert!(!outcome.ended);
            assert!(!outcome.kill_recorded);
            assert!(!game.players.contains_key(kicked));
            assert_eq!(game.alive_count, 4);
            assert!(game.players.values().all(|player| player.kills == 0));
            let anomalies = cycle_anomalies(&game.players);
            assert!(anomalies.is_empty(), "seed {seed}: {anomalies:?}");

            assert!(matches!(
                outcome.deliveries[0].notification.kind,
                NotificationKind::Kicked { .. }
            ));
            assert_eq!(outcome.deliveries[0].to, kicked);
            let follow_up = &outcome.deliveries[1];
            assert_eq!(follow_up.to, hunter);
            match &follow_up.notification.kind {
                NotificationKind::KickedNewTarget { target } => {
                    assert_eq!(game.players[&hunter].target.as_deref(), Some(target.as_str()));
                }
                other => panic!("expected a new-target notice, got {other:?}"),
            }
        }
    }

    #[test]
    fn kick_while_forming_just_drops_the_record() {
        let mut game = Game::new(
            "ab12c".to_string(),
            "owner".to_string(),
            &make_input("Forming"),
            0,
        )
        .expect("settings are valid");
        game.join("alice", None, 1).expect("join works");
        game.join("bob", None, 2).expect("join works");

        let outcome = game
            .remove_player("alice", Some("made a duplicate account"), 10)
            .expect("kick works");
        assert!(!game.players.contains_key("alice"));
        assert_eq!(outcome.deliveries.len(), 1);
        assert!(matches!(
            outcome.deliveries[0].notification.kind,
            NotificationKind::Kicked { .. }
        ));
        assert_eq!(game.alive_count, 0);
    }

    #[test]
    fn kicking_the_second_to_last_player_ends_the_game() {
        let mut game = started_game(2, 13);
        let outcome = game
            .remove_player("p01", Some("no-show"), 3_000)
            .expect("kick works");
        assert!(outcome.ended);
        assert_eq!(game.winner.as_deref(), Some("p00"));
        assert_eq!(game.state(), GameState::Ended);
        assert!(game.players["p00"].target.is_none());
        assert_eq!(game.players["p00"].kills, 0);
        // The kicked player was still on the roster for the ending notice.
        assert!(outcome
            .deliveries
            .iter()
            .any(|delivery| delivery.to == "p01"
                && matches!(
                    delivery.notification.kind,
                    NotificationKind::GameEnded { .. }
                )));
        assert!(!game.players.contains_key("p01"));
    }

    #[test]
    fn shuffle_redeals_targets_and_codes_for_the_living() {
        let mut game = started_game(6, 17);
        let victim = game.players["p00"].target.clone().expect("target set");
        game.kill("p00", &code_of(&game, &victim), 3_000)
            .expect("kill works");
        let code_before = code_of(&game, "p00");

        let outcome = game
            .shuffle(&mut StdRng::seed_from_u64(99), 4_000)
            .expect("shuffle works");
        assert!(is_valid_cycle(&game.players));
        assert_eq!(outcome.deliveries.len(), 5);
        assert!(outcome
            .deliveries
            .iter()
            .all(|delivery| delivery.to != victim));
        assert_ne!(code_of(&game, "p00"), code_before);
        assert!(game.players[&victim].target.is_none());
    }

    #[test]
    fn status_depends_on_game_and_player_state() {
        let mut game = Game::new(
            "ab12c".to_string(),
            "owner".to_string(),
            &make_input("Status"),
            0,
        )
        .expect("settings are valid");
        game.join("alice", None, 1).expect("join works");
        game.join("bob", None, 2).expect("join works");
        game.join("carol", None, 3).expect("join works");
        assert!(matches!(
            game.status_of("alice"),
            Err(ApiError::PreconditionFailed("game has not started"))
        ));

        game.start(&mut StdRng::seed_from_u64(3), 10)
            .expect("start works");
        let (target, code) = game.status_of("alice").expect("status works");
        assert_eq!(game.players["alice"].target.as_deref(), Some(target.as_str()));
        assert!(!code.is_empty());
        assert!(matches!(
            game.status_of("stranger"),
            Err(ApiError::Forbidden(_))
        ));

        game.kill("alice", &code_of(&game, &target), 20)
            .expect("kill works");
        assert_eq!(game.state(), GameState::Active);
        assert!(matches!(
            game.status_of(&target),
            Err(ApiError::PreconditionFailed("you have been eliminated"))
        ));
    }

    #[test]
    fn settings_patch_validates_each_supplied_field() {
        let mut game = Game::new(
            "ab12c".to_string(),
            "owner".to_string(),
            &make_input("Before"),
            0,
        )
        .expect("settings are valid");

        let patch = GameSettingsPatch {
            name: Some("  After  ".to_string()),
            description: Some("north campus only".to_string()),
            password: None,
            join_disabled: Some(true),
        };
        game.apply_settings(&patch, 50).expect("patch applies");
        assert_eq!(game.name, "After");
        assert_eq!(game.description, "north campus only");
        assert!(game.join_disabled);
        assert_eq!(game.last_edited_ms, 50);

        let bad = GameSettingsPatch {
            name: Some("   ".to_string()),
            ..GameSettingsPatch::default()
        };
        assert!(matches!(
            game.apply_settings(&bad, 60),
            Err(ApiError::InvalidInput(_))
        ));
        assert_eq!(game.name, "After");

        // A rejected patch applies nothing, even the fields that were fine.
        let half_bad = GameSettingsPatch {
            name: Some("Fresh".to_string()),
            description: Some("x".repeat(GAME_DESCRIPTION_MAX + 1)),
            ..GameSettingsPatch::default()
        };
        assert!(matches!(
            game.apply_settings(&half_bad, 70),
            Err(ApiError::InvalidInput(_))
        ));
        assert_eq!(game.name, "After");
        assert_eq!(game.description, "north campus only");
    }
}
