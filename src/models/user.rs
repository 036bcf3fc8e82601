use serde::{Deserialize, Serialize};

use crate::db::{self, Database, DbResult};
use crate::params;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub sysmail: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: String, // user, admin
    pub partner_id: Option<i64>,
    pub img_id: Option<i64>,
    #[serde(default)]
    pub status_val: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub sysmail: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
}

pub const ROLES: &[&str] = &["user", "admin"];

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    // ── Lookups ──

    pub fn get_by_id(db: &dyn Database, id: i64) -> DbResult<Option<User>> {
        db::fetch_one(db, "SELECT * FROM users WHERE id = ?", &params![id])
    }

    pub fn get_by_sysmail(db: &dyn Database, sysmail: &str) -> DbResult<Option<User>> {
        db::fetch_one(
            db,
            "SELECT * FROM users WHERE LOWER(sysmail) = LOWER(?)",
            &params![sysmail.trim()],
        )
    }

    /// Login accepts either the username or the sysmail address.
    pub fn get_by_login(db: &dyn Database, login: &str) -> DbResult<Option<User>> {
        let login = login.trim();
        db::fetch_one(
            db,
            "SELECT * FROM users WHERE username = ? OR LOWER(sysmail) = LOWER(?)",
            &params![login, login],
        )
    }

    // ── Writes ──

    pub fn create(db: &dyn Database, new: &NewUser) -> DbResult<i64> {
        let now = db::now();
        let result = db.run(
            "INSERT INTO users (sysmail, username, password, role, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            &params![
                new.sysmail.trim(),
                new.username.trim(),
                new.password_hash,
                new.role,
                &now,
                &now
            ],
        )?;
        result
            .last_id
            .ok_or_else(|| db::DbError::Query("insert returned no id".to_string()))
    }

    pub fn update_password(db: &dyn Database, id: i64, password_hash: &str) -> DbResult<bool> {
        let result = db.run(
            "UPDATE users SET password = ?, updated_at = ? WHERE id = ?",
            &params![password_hash, db::now(), id],
        )?;
        Ok(result.changes > 0)
    }

    pub fn count(db: &dyn Database) -> DbResult<i64> {
        Ok(db::scalar_i64(db, "SELECT COUNT(*) AS n FROM users", &[])?.unwrap_or(0))
    }
}
