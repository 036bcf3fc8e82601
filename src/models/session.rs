use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{self, Database, DbResult};
use crate::params;

/// Server-side login session. The id is the value of the private cookie.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub active_project_id: Option<i64>,
    pub ip_address: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

fn timestamp(t: chrono::DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

impl Session {
    pub fn create(db: &dyn Database, user_id: i64, ip: Option<&str>, ttl_hours: i64) -> DbResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires = now + Duration::hours(ttl_hours.max(1));
        db.run(
            "INSERT INTO sessions (id, user_id, ip_address, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
            &params![&id, user_id, ip, timestamp(now), timestamp(expires)],
        )?;
        Ok(id)
    }

    /// The session if it exists and has not expired.
    pub fn get_valid(db: &dyn Database, id: &str) -> DbResult<Option<Session>> {
        db::fetch_one(
            db,
            "SELECT * FROM sessions WHERE id = ? AND expires_at > ?",
            &params![id, db::now()],
        )
    }

    pub fn delete(db: &dyn Database, id: &str) -> DbResult<()> {
        db.run("DELETE FROM sessions WHERE id = ?", &params![id])?;
        Ok(())
    }

    pub fn delete_for_user(db: &dyn Database, user_id: i64) -> DbResult<u64> {
        Ok(db
            .run("DELETE FROM sessions WHERE user_id = ?", &params![user_id])?
            .changes)
    }

    pub fn set_active_project(db: &dyn Database, id: &str, project_id: Option<i64>) -> DbResult<()> {
        db.run(
            "UPDATE sessions SET active_project_id = ? WHERE id = ?",
            &params![project_id, id],
        )?;
        Ok(())
    }

    pub fn cleanup_expired(db: &dyn Database) -> DbResult<u64> {
        Ok(db
            .run("DELETE FROM sessions WHERE expires_at <= ?", &params![db::now()])?
            .changes)
    }
}
