use std::collections::HashMap;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::codes;
use crate::constants::{
    is_valid_email, is_valid_username, BIO_MAX, DISPLAY_NAME_MAX, PASSWORD_MAX, PASSWORD_MIN,
    SESSION_TTL_MS, USERNAME_MAX, USERNAME_MIN,
};
use crate::errors::{invalid_input, ApiError};
use crate::types::{NewUserInput, Session, User, UserSettingsPatch, UserSettingsView};

pub struct Directory {
    users: HashMap<String, User>,
    sessions: HashMap<String, Session>,
}

impl Directory {
    pub fn new(users: HashMap<String, User>, sessions: HashMap<String, Session>) -> Self {
        Self { users, sessions }
    }

    pub fn register(&mut self, input: &NewUserInput, now_ms: u64) -> Result<String, ApiError> {
        if !is_valid_username(&input.username) {
            return Err(invalid_input(format!(
                "username must be {USERNAME_MIN} to {USERNAME_MAX} characters of a-z, 0-9, - and _"
            )));
        }
        let name = check_display_name(&input.name)?;
        check_password(&input.password)?;
        check_email(&input.email)?;
        check_bio(&input.bio)?;
        if self.users.contains_key(&input.username) {
            return Err(ApiError::Conflict("username is already taken"));
        }

        let user = User {
            username: input.username.clone(),
            password_hash: hash_password(&input.password)?,
            name,
            email: input.email.trim().to_string(),
            bio: input.bio.clone(),
            joined_games: Vec::new(),
            owned_games: Vec::new(),
            email_notifs: input.email_notifs,
            is_admin: false,
            created_at_ms: now_ms,
            last_edited_ms: now_ms,
        };
        self.users.insert(input.username.clone(), user);
        Ok(self.issue_session(&input.username, now_ms))
    }

    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        now_ms: u64,
    ) -> Result<String, ApiError> {
        let Some(user) = self.users.get(username) else {
            return Err(ApiError::Unauthorized("unknown username or wrong password"));
        };
        if !verify_password(&user.password_hash, password)? {
            return Err(ApiError::Unauthorized("unknown username or wrong password"));
        }
        Ok(self.issue_session(username, now_ms))
    }

    pub fn logout(&mut self, token: &str) {
        self.sessions.remove(token);
    }

    // Expired sessions are dropped the first time they fail verification.
    pub fn verify(&mut self, token: &str, now_ms: u64) -> Result<String, ApiError> {
        let Some(session) = self.sessions.get(token) else {
            return Err(ApiError::Unauthorized("invalid session"));
        };
        if session.expires_at_ms <= now_ms {
            self.sessions.remove(token);
            return Err(ApiError::Unauthorized("session expired"));
        }
        Ok(session.username.clone())
    }

    pub fn update_settings(
        &mut self,
        username: &str,
        patch: &UserSettingsPatch,
        now_ms: u64,
    ) -> Result<(), ApiError> {
        let user = self
            .users
            .get(username)
            .ok_or(ApiError::NotFound("user"))?;

        let name = patch.name.as_deref().map(check_display_name).transpose()?;
        if let Some(email) = patch.email.as_deref() {
            check_email(email)?;
        }
        if let Some(bio) = patch.bio.as_deref() {
            check_bio(bio)?;
        }
        let password_hash = match patch.password.as_deref() {
            None => None,
            Some(new_password) => {
                check_password(new_password)?;
                let old_password = patch.old_password.as_deref().ok_or_else(|| {
                    invalid_input("the current password is required to change it")
                })?;
                if !verify_password(&user.password_hash, old_password)? {
                    return Err(ApiError::Unauthorized("wrong password"));
                }
                Some(hash_password(new_password)?)
            }
        };

        let user = self
            .users
            .get_mut(username)
            .expect("user existed at the start of the update");
        if let Some(name) = name {
            user.name = name;
        }
        if let Some(email) = patch.email.as_deref() {
            user.email = email.trim().to_string();
        }
        if let Some(bio) = patch.bio.clone() {
            user.bio = bio;
        }
        if let Some(password_hash) = password_hash {
            user.password_hash = password_hash;
        }
        if let Some(email_notifs) = patch.email_notifs {
            user.email_notifs = email_notifs;
        }
        user.last_edited_ms = now_ms;
        Ok(())
    }

    pub fn settings_view(&self, username: &str) -> Result<UserSettingsView, ApiError> {
        let user = self.require(username)?;
        Ok(UserSettingsView {
            username: user.username.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            bio: user.bio.clone(),
            email_notifs: user.email_notifs,
        })
    }

    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub fn require(&self, username: &str) -> Result<&User, ApiError> {
        self.users.get(username).ok_or(ApiError::NotFound("user"))
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.users
            .get(username)
            .map(|user| user.is_admin)
            .unwrap_or(false)
    }

    pub fn display_name(&self, username: &str) -> String {
        self.users
            .get(username)
            .map(|user| user.name.clone())
            .unwrap_or_else(|| username.to_string())
    }

    pub fn add_joined(&mut self, username: &str, game_id: &str) {
        if let Some(user) = self.users.get_mut(username) {
            if !user.joined_games.iter().any(|id| id == game_id) {
                user.joined_games.push(game_id.to_string());
            }
        }
    }

    pub fn remove_joined(&mut self, username: &str, game_id: &str) {
        if let Some(user) = self.users.get_mut(username) {
            user.joined_games.retain(|id| id != game_id);
        }
    }

    pub fn add_owned(&mut self, username: &str, game_id: &str) {
        if let Some(user) = self.users.get_mut(username) {
            if !user.owned_games.iter().any(|id| id == game_id) {
                user.owned_games.push(game_id.to_string());
            }
        }
    }

    pub fn remove_owned(&mut self, username: &str, game_id: &str) {
        if let Some(user) = self.users.get_mut(username) {
            user.owned_games.retain(|id| id != game_id);
        }
    }

    pub fn snapshot_users(&self) -> HashMap<String, User> {
        self.users.clone()
    }

    pub fn snapshot_sessions(&self) -> HashMap<String, Session> {
        self.sessions.clone()
    }

    fn issue_session(&mut self, username: &str, now_ms: u64) -> String {
        let token = codes::session_token();
        self.sessions.insert(
            token.clone(),
            Session {
                token: token.clone(),
                username: username.to_string(),
                expires_at_ms: now_ms + SESSION_TTL_MS,
            },
        );
        token
    }
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| ApiError::Internal(format!("password hashing failed: {error}")))
}

fn verify_password(stored_hash: &str, password: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|error| ApiError::Internal(format!("stored password hash is unreadable: {error}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn check_display_name(value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > DISPLAY_NAME_MAX {
        return Err(invalid_input(format!(
            "name must be 1 to {DISPLAY_NAME_MAX} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn check_password(value: &str) -> Result<(), ApiError> {
    if value.len() < PASSWORD_MIN || value.len() > PASSWORD_MAX {
        return Err(invalid_input(format!(
            "password must be {PASSWORD_MIN} to {PASSWORD_MAX} characters"
        )));
    }
    Ok(())
}

fn check_email(value: &str) -> Result<(), ApiError> {
    if !is_valid_email(value.trim()) {
        return Err(invalid_input("email address looks invalid"));
    }
    Ok(())
}

fn check_bio(value: &str) -> Result<(), ApiError> {
    if value.len() > BIO_MAX {
        return Err(invalid_input(format!(
            "bio must be at most {BIO_MAX} characters"
        )));
    }
    Ok(())
}
