use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::codes;
use crate::types::Player;

// Deals every alive player a target so that the whole group forms one ring:
// a random ordering is drawn and each player hunts the next one in it. Every
// alive player also receives a fresh kill code.
pub fn assign_targets(players: &mut BTreeMap<String, Player>, rng: &mut impl Rng) {
    let mut order = alive_usernames(players);
    assert!(
        order.len() >= 2,
        "target assignment needs at least two alive players"
    );

    order.shuffle(rng);
    let count = order.len();
    for index in 0..count {
        let target = order[(index + 1) % count].clone();
        let assassin = order[(index + count - 1) % count].clone();
        let code = codes::kill_code(rng);
        let player = players
            .get_mut(&order[index])
            .expect("alive player is present in the map");
        player.target = Some(target);
        player.assassin = Some(assassin);
        player.code = Some(code);
    }
}

// Removes the victim from the ring in O(1): their hunter inherits their
// target. When only two players remain this briefly points the survivor at
// themselves; the caller resolves the game before that state is observable.
pub fn splice_out(players: &mut BTreeMap<String, Player>, victim: &str) {
    let Some(victim_entry) = players.get_mut(victim) else {
        return;
    };
    let Some(target) = victim_entry.target.take() else {
        return;
    };
    let Some(assassin) = victim_entry.assassin.clone() else {
        return;
    };

    if let Some(hunter) = players.get_mut(&assassin) {
        hunter.target = Some(target.clone());
    }
    if let Some(prey) = players.get_mut(&target) {
        prey.assassin = Some(assassin);
    }
}

pub fn alive_usernames(players: &BTreeMap<String, Player>) -> Vec<String> {
    players
        .iter()
        .filter(|(_, player)| player.alive())
        .map(|(username, _)| username.clone())
        .collect()
}

// Structural check used by tests and the simulation binary: among alive
// players the target relation must be a single ring with intact inverse
// links, and with fewer than two alive players it must be empty.
pub fn cycle_anomalies(players: &BTreeMap<String, Player>) -> Vec<String> {
    let mut anomalies = Vec::new();
    let alive = alive_usernames(players);

    if alive.len() < 2 {
        for username in &alive {
            if players[username].target.is_some() {
                anomalies.push(format!("{username} holds a target in a settled game"));
            }
        }
        return anomalies;
    }

    for username in &alive {
        let player = &players[username];
        let Some(target) = player.target.as_ref() else {
            anomalies.push(format!("{username} has no target"));
            continue;
        };
        if target == username {
            anomalies.push(format!("{username} targets themselves"));
            continue;
        }
        match players.get(target) {
            None => anomalies.push(format!("{username} targets unknown player {target}")),
            Some(prey) if !prey.alive() => {
                anomalies.push(format!("{username} targets eliminated player {target}"));
            }
            Some(prey) => {
                if prey.assassin.as_deref() != Some(username.as_str()) {
                    anomalies.push(format!("inverse link broken between {username} and {target}"));
                }
            }
        }
        if player.code.is_none() {
            anomalies.push(format!("{username} has no kill code"));
        }
    }
    if !anomalies.is_empty() {
        return anomalies;
    }

    let start = &alive[0];
    let mut cursor = players[start]
        .target
        .clone()
        .expect("checked above that every alive player has a target");
    let mut steps = 1;
    while cursor != *start {
        if steps > alive.len() {
            anomalies.push("target walk does not return to its start".to_string());
            return anomalies;
        }
        cursor = players[&cursor]
            .target
            .clone()
            .expect("walk only visits alive players");
        steps += 1;
    }
    if steps != alive.len() {
        anomalies.push(format!(
            "ring covers {steps} of {} alive players",
            alive.len()
        ));
    }
    anomalies
}

pub fn is_valid_cycle(players: &BTreeMap<String, Player>) -> bool {
    cycle_anomalies(players).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_players(count: usize) -> BTreeMap<String, Player> {
        (0..count)
            .map(|index| (format!("p{index:02}"), Player::new(0)))
            .collect()
    }

    #[test]
    fn assignment_forms_a_single_ring_for_all_sizes_and_seeds() {
        for size in 2..=12usize {
            for seed in 0..200u64 {
                let mut players = make_players(size);
                let mut rng = StdRng::seed_from_u64(seed);
                assign_targets(&mut players, &mut rng);

                let anomalies = cycle_anomalies(&players);
                assert!(
                    anomalies.is_empty(),
                    "size {size} seed {seed}: {anomalies:?}"
                );
            }
        }
    }

    #[test]
    fn assignment_is_deterministic_per_seed() {
        let mut first = make_players(8);
        let mut second = make_players(8);
        assign_targets(&mut first, &mut StdRng::seed_from_u64(42));
        assign_targets(&mut second, &mut StdRng::seed_from_u64(42));
        for (username, player) in &first {
            assert_eq!(player.target, second[username].target);
            assert_eq!(player.code, second[username].code);
        }
    }

    #[test]
    fn two_players_hunt_each_other() {
        for seed in 0..50u64 {
            let mut players = make_players(2);
            assign_targets(&mut players, &mut StdRng::seed_from_u64(seed));
            assert_eq!(players["p00"].target.as_deref(), Some("p01"));
            assert_eq!(players["p01"].target.as_deref(), Some("p00"));
        }
    }

    #[test]
    fn assignment_skips_eliminated_players() {
        let mut players = make_players(6);
        players.get_mut("p02").expect("exists").killed_at_ms = Some(5);
        players.get_mut("p04").expect("exists").killed_at_ms = Some(6);
        assign_targets(&mut players, &mut StdRng::seed_from_u64(3));

        assert!(is_valid_cycle(&players));
        assert!(players["p02"].target.is_none());
        assert!(players["p04"].target.is_none());
        let targets: Vec<&str> = players
            .values()
            .filter_map(|player| player.target.as_deref())
            .collect();
        assert!(!targets.contains(&"p02"));
        assert!(!targets.contains(&"p04"));
    }

    #[test]
    fn splice_of_any_member_leaves_a_smaller_ring() {
        for seed in 0..100u64 {
            for victim_index in 0..7usize {
                let mut players = make_players(7);
                assign_targets(&mut players, &mut StdRng::seed_from_u64(seed));

                let victim = format!("p{victim_index:02}");
                let hunter = players[&victim].assassin.clone().expect("assassin set");
                let prey = players[&victim].target.clone().expect("target set");
                splice_out(&mut players, &victim);
                players.get_mut(&victim).expect("exists").killed_at_ms = Some(1);

                let anomalies = cycle_anomalies(&players);
                assert!(
                    anomalies.is_empty(),
                    "seed {seed} victim {victim}: {anomalies:?}"
                );
                assert_eq!(players[&hunter].target.as_deref(), Some(prey.as_str()));
                assert!(players[&victim].target.is_none());
            }
        }
    }

    #[test]
    fn repeated_splices_shrink_down_to_a_self_loop() {
        let mut players = make_players(5);
        assign_targets(&mut players, &mut StdRng::seed_from_u64(9));

        for round in 0..4 {
            let victim = alive_usernames(&players)
                .first()
                .cloned()
                .expect("someone is alive");
            splice_out(&mut players, &victim);
            players.get_mut(&victim).expect("exists").killed_at_ms = Some(round + 1);
        }

        let survivors = alive_usernames(&players);
        assert_eq!(survivors.len(), 1);
        // Before the game-end cleanup the survivor points at themselves.
        let survivor = &survivors[0];
        assert_eq!(players[survivor].target.as_ref(), Some(survivor));
    }

    #[test]
    fn validator_flags_a_split_ring() {
        let mut players = make_players(4);
        // Two separate two-rings instead of one four-ring.
        let pairs = [("p00", "p01"), ("p01", "p00"), ("p02", "p03"), ("p03", "p02")];
        for (username, target) in pairs {
            let player = players.get_mut(username).expect("exists");
            player.target = Some(target.to_string());
            player.code = Some("apple anchor bell".to_string());
        }
        for (username, target) in pairs {
            players.get_mut(target).expect("exists").assassin = Some(username.to_string());
        }

        let anomalies = cycle_anomalies(&players);
        assert!(!anomalies.is_empty());
        assert!(anomalies.iter().any(|message| message.contains("ring covers")));
    }
}
