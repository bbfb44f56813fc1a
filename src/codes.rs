use rand::distr::Alphanumeric;
use rand::Rng;

use crate::constants::{GAME_ID_LENGTH, KILL_CODE_WORDS, SESSION_TOKEN_LENGTH};

pub const CODE_WORDS: &[&str] = &[
    "acorn", "anchor", "apple", "arrow", "badge", "banana", "basket", "beacon", "bell", "bottle",
    "bridge", "brush", "bucket", "button", "cabin", "cactus", "camera", "candle", "canoe",
    "carpet", "castle", "cherry", "clover", "comet", "coral", "crayon", "daisy", "domino",
    "donut", "eagle", "ember", "engine", "falcon", "feather", "fiddle", "flint", "garden",
    "goblet", "hammer", "harbor", "helmet", "igloo", "island", "jacket", "jigsaw", "kettle",
    "ladder", "lantern", "lemon", "magnet", "maple", "marble", "meadow", "mirror", "nutmeg",
    "orchid", "otter", "pebble", "pencil", "pepper", "piano", "pillow", "planet", "pocket",
    "pretzel", "quartz", "rabbit", "raisin", "ribbon", "rocket", "saddle", "sandal", "shadow",
    "shovel", "spider", "sprout", "stable", "summit", "teapot", "thimble", "tiger", "toffee",
    "trumpet", "tunnel", "turnip", "umbrella", "violet", "walnut", "whistle", "willow", "window",
    "wizard", "yarn", "zebra",
];

const GAME_ID_CHARS: &[u8] = b"0123456789abcdef";

pub fn session_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SESSION_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub fn game_id(rng: &mut impl Rng) -> String {
    (0..GAME_ID_LENGTH)
        .map(|_| GAME_ID_CHARS[rng.random_range(0..GAME_ID_CHARS.len())] as char)
        .collect()
}

pub fn kill_code(rng: &mut impl Rng) -> String {
    (0..KILL_CODE_WORDS)
        .map(|_| CODE_WORDS[rng.random_range(0..CODE_WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

// Codes are compared ignoring case and every whitespace character, so a code
// read out loud survives retyping.
pub fn kill_codes_match(expected: &str, submitted: &str) -> bool {
    normalize_kill_code(expected) == normalize_kill_code(submitted)
}

fn normalize_kill_code(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn join_password_matches(expected: &str, submitted: &str) -> bool {
    expected.trim().to_lowercase() == submitted.trim().to_lowercase()
}
