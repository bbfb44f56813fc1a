pub const SESSION_TTL_MS: u64 = 21 * 24 * 60 * 60 * 1000;
pub const SESSION_TOKEN_LENGTH: usize = 48;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 20;
pub const DISPLAY_NAME_MIN: usize = 1;
pub const DISPLAY_NAME_MAX: usize = 50;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 200;
pub const EMAIL_MIN: usize = 3;
pub const EMAIL_MAX: usize = 320;
pub const BIO_MAX: usize = 2_000;

pub const GAME_ID_LENGTH: usize = 5;
pub const GAME_ID_ATTEMPTS: usize = 64;
pub const GAME_NAME_MIN: usize = 1;
pub const GAME_NAME_MAX: usize = 100;
pub const GAME_DESCRIPTION_MAX: usize = 2_000;
pub const GAME_PASSWORD_MAX: usize = 200;
pub const MIN_PLAYERS_TO_START: usize = 2;

pub const KILL_CODE_WORDS: usize = 3;

pub const SHUFFLE_MERGE_WINDOW_MS: u64 = 30 * 60 * 1000;
pub const NOTIFICATION_PAGE_DEFAULT: usize = 10;
pub const NOTIFICATION_PAGE_MAX: usize = 40;

pub fn is_valid_username(value: &str) -> bool {
    if value.len() < USERNAME_MIN || value.len() > USERNAME_MAX {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

pub fn is_valid_email(value: &str) -> bool {
    value.len() >= EMAIL_MIN && value.len() <= EMAIL_MAX && value.contains('@')
}
