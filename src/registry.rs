use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::codes;
use crate::constants::GAME_ID_ATTEMPTS;
use crate::errors::ApiError;
use crate::game::Game;

/// All games by id. Each game sits behind its own lock so two games never
/// wait on each other.
pub struct Registry {
    games: HashMap<String, Arc<Mutex<Game>>>,
}

impl Registry {
    pub fn new(games: HashMap<String, Game>) -> Self {
        Self {
            games: games
                .into_iter()
                .map(|(id, game)| (id, Arc::new(Mutex::new(game))))
                .collect(),
        }
    }

    pub fn allocate_id(&self, rng: &mut impl Rng) -> Result<String, ApiError> {
        for _ in 0..GAME_ID_ATTEMPTS {
            let id = codes::game_id(rng);
            if !self.games.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(ApiError::Conflict("could not allocate a fresh game id"))
    }

    pub fn insert(&mut self, game: Game) -> Arc<Mutex<Game>> {
        let handle = Arc::new(Mutex::new(game));
        self.games.insert(id_of(&handle), handle.clone());
        handle
    }

    pub fn get(&self, id: &str) -> Result<Arc<Mutex<Game>>, ApiError> {
        self.games
            .get(id)
            .cloned()
            .ok_or(ApiError::NotFound("game"))
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Mutex<Game>>> {
        self.games.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.games.contains_key(id)
    }

    pub fn handles(&self) -> Vec<Arc<Mutex<Game>>> {
        self.games.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Game> {
        self.games
            .iter()
            .map(|(id, handle)| {
                let game = handle.lock().expect("game lock poisoned");
                (id.clone(), game.clone())
            })
            .collect()
    }
}

fn id_of(handle: &Arc<Mutex<Game>>) -> String {
    handle.lock().expect("game lock poisoned").id.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewGameInput;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_game(id: &str) -> Game {
        let input = NewGameInput {
            name: "Campus Manhunt".to_string(),
            description: String::new(),
            password: String::new(),
            join_disabled: false,
        };
        Game::new(id.to_string(), "owner".to_string(), &input, 0).expect("valid game")
    }

    #[test]
    fn allocate_avoids_existing_ids() {
        let mut registry = Registry::new(HashMap::new());

        // Pre-claim every id the rng is about to draw.
        let mut preview = StdRng::seed_from_u64(7);
        for _ in 0..GAME_ID_ATTEMPTS {
            let id = codes::game_id(&mut preview);
            registry.insert(make_game(&id));
        }

        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            registry.allocate_id(&mut rng),
            Err(ApiError::Conflict("could not allocate a fresh game id"))
        );

        // A fresh draw beyond the claimed block succeeds.
        assert!(registry.allocate_id(&mut rng).is_ok());
    }

    #[test]
    fn get_and_remove_round_trip() {
        let mut registry = Registry::new(HashMap::new());
        registry.insert(make_game("aaaaa"));

        assert!(registry.contains("aaaaa"));
        let handle = registry.get("aaaaa").expect("game exists");
        assert_eq!(handle.lock().expect("lock works").name, "Campus Manhunt");
        assert!(matches!(registry.get("zzzzz"), Err(ApiError::NotFound("game"))));

        assert!(registry.remove("aaaaa").is_some());
        assert!(registry.remove("aaaaa").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_clones_every_game() {
        let mut registry = Registry::new(HashMap::new());
        registry.insert(make_game("aaaaa"));
        registry.insert(make_game("bbbbb"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 2);
        assert!(snapshot.contains_key("aaaaa") && snapshot.contains_key("bbbbb"));
    }
}
