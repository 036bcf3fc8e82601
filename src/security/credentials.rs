use rand::seq::SliceRandom;
use rand::Rng;

use super::auth;
use crate::db::{self, Database, DbError};
use crate::models::session::Session;
use crate::models::user::{NewUser, User, ROLES};

pub const DEFAULT_PASSWORD_LENGTH: usize = 20;
pub const MIN_PASSWORD_LENGTH: usize = 8;

const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnpqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%&*-_+=";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no user with sysmail '{0}'")]
    UnknownUser(String),
    #[error("password must be at least 8 characters")]
    TooShort,
    #[error("invalid role '{0}'")]
    InvalidRole(String),
    #[error("could not hash password: {0}")]
    Hash(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Random password with at least one upper, lower, digit and symbol
/// character. Look-alike characters (0/O, 1/l/I) are left out.
pub fn generate_password(length: usize) -> String {
    let length = length.max(MIN_PASSWORD_LENGTH);
    let mut rng = rand::thread_rng();
    let classes = [UPPER, LOWER, DIGITS, SYMBOLS];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .filter_map(|class| class.choose(&mut rng).copied())
        .collect();
    while chars.len() < length {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);
    String::from_utf8_lossy(&chars).into_owned()
}

pub fn validate_password(password: &str) -> Result<(), CredentialError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(CredentialError::TooShort);
    }
    Ok(())
}

/// Hash and store `password` for `user_id`, ending the user's sessions.
pub fn set_password(
    db: &dyn Database,
    user_id: i64,
    password: &str,
    cost: u32,
) -> Result<(), CredentialError> {
    validate_password(password)?;
    let hash = auth::hash_password(password, cost).map_err(CredentialError::Hash)?;
    db::with_transaction(db, |tx| {
        User::update_password(tx, user_id, &hash)?;
        Session::delete_for_user(tx, user_id)?;
        Ok::<(), DbError>(())
    })?;
    Ok(())
}

/// Replace the password of the account with `sysmail` by a generated one
/// and return it.
pub fn reset_password(db: &dyn Database, sysmail: &str, cost: u32) -> Result<String, CredentialError> {
    let user = User::get_by_sysmail(db, sysmail)?
        .ok_or_else(|| CredentialError::UnknownUser(sysmail.to_string()))?;
    let password = generate_password(DEFAULT_PASSWORD_LENGTH);
    set_password(db, user.id, &password, cost)?;
    log::info!("[auth] Password reset for user {} ({})", user.id, user.username);
    Ok(password)
}

/// Create an account. Without a password one is generated and returned.
pub fn create_user(
    db: &dyn Database,
    sysmail: &str,
    username: &str,
    role: &str,
    password: Option<&str>,
    cost: u32,
) -> Result<(i64, Option<String>), CredentialError> {
    if !ROLES.contains(&role) {
        return Err(CredentialError::InvalidRole(role.to_string()));
    }
    let generated = match password {
        Some(p) => {
            validate_password(p)?;
            None
        }
        None => Some(generate_password(DEFAULT_PASSWORD_LENGTH)),
    };
    let clear = password.or(generated.as_deref()).unwrap_or_default();
    let hash = auth::hash_password(clear, cost).map_err(CredentialError::Hash)?;

    let id = User::create(
        db,
        &NewUser {
            sysmail,
            username,
            password_hash: &hash,
            role,
        },
    )?;
    log::info!("[auth] Created user {} ({}, role {})", id, username, role);
    Ok((id, generated))
}
