use regex::Regex;
use std::sync::LazyLock;

use crate::error::{ClientError, Result};

/// Usernames and chat names share the same rule
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{5,16}$").expect("valid name pattern"));

pub const MIN_PASSWORD_LEN: usize = 7;
pub const MAX_PASSWORD_LEN: usize = 32;
pub const MAX_CHAT_PASSWORD_LEN: usize = 32;

pub fn validate_username(username: &str) -> Result<()> {
    if !NAME_PATTERN.is_match(username) {
        return Err(ClientError::Validation(
            "username must be 5-16 characters of letters, digits, '_' or '-'".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(ClientError::Validation(format!(
            "password must be {}-{} characters",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_chat_credentials(chat_name: &str, chat_password: &str) -> Result<()> {
    if !NAME_PATTERN.is_match(chat_name) {
        return Err(ClientError::Validation(
            "chat name must be 5-16 characters of letters, digits, '_' or '-'".to_string(),
        ));
    }
    if chat_password.chars().count() > MAX_CHAT_PASSWORD_LEN {
        return Err(ClientError::Validation(format!(
            "chat password must be at most {} characters",
            MAX_CHAT_PASSWORD_LEN
        )));
    }
    Ok(())
}
