use serde::{Deserialize, Serialize};

use super::user::User;
use crate::db::{self, Database, DbResult};
use crate::params;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Project {
    pub id: i64,
    pub domaincode: String,
    pub name: String,
    pub owner_id: Option<i64>,
    pub heading: Option<String>,
    pub description: Option<String>,
    pub teaser: Option<String>,
    pub theme: Option<i64>,
    pub config: Option<String>,
    #[serde(default)]
    pub status_val: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Member {
    pub user_id: i64,
    pub username: String,
    pub role: String,
    pub added_at: String,
}

/// Fields accepted by `PATCH /api/projects/<domaincode>`.
pub const PATCHABLE: &[&str] = &["status_val", "heading", "description", "teaser", "theme", "config"];

impl Project {
    pub fn list_all(db: &dyn Database) -> DbResult<Vec<Project>> {
        db::fetch_all(db, "SELECT * FROM projects ORDER BY domaincode ASC", &[])
    }

    pub fn get_by_id(db: &dyn Database, id: i64) -> DbResult<Option<Project>> {
        db::fetch_one(db, "SELECT * FROM projects WHERE id = ?", &params![id])
    }

    pub fn get_by_domaincode(db: &dyn Database, domaincode: &str) -> DbResult<Option<Project>> {
        db::fetch_one(
            db,
            "SELECT * FROM projects WHERE domaincode = ?",
            &params![domaincode],
        )
    }

    pub fn create(
        db: &dyn Database,
        domaincode: &str,
        name: &str,
        owner_id: Option<i64>,
    ) -> DbResult<i64> {
        let now = db::now();
        db.run(
            "INSERT INTO projects (domaincode, name, owner_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
            &params![domaincode, name, owner_id, &now, &now],
        )?
        .last_id
        .ok_or_else(|| db::DbError::Query("insert returned no id".to_string()))
    }

    pub fn is_owner(&self, user: &User) -> bool {
        self.owner_id == Some(user.id)
    }

    // ── Members ──

    pub fn members(db: &dyn Database, project_id: i64) -> DbResult<Vec<Member>> {
        db::fetch_all(
            db,
            "SELECT pm.user_id, u.username, pm.role, pm.added_at
             FROM project_members pm
             JOIN users u ON u.id = pm.user_id
             WHERE pm.project_id = ?
             ORDER BY u.username ASC",
            &params![project_id],
        )
    }

    pub fn is_member(db: &dyn Database, project_id: i64, user_id: i64) -> DbResult<bool> {
        Ok(db
            .get(
                "SELECT 1 AS present FROM project_members WHERE project_id = ? AND user_id = ?",
                &params![project_id, user_id],
            )?
            .is_some())
    }

    /// Insert or change a member's role.
    pub fn add_member(db: &dyn Database, project_id: i64, user_id: i64, role: &str) -> DbResult<()> {
        db.run(
            "INSERT INTO project_members (project_id, user_id, role, added_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (project_id, user_id) DO UPDATE SET role = excluded.role",
            &params![project_id, user_id, role, db::now()],
        )?;
        Ok(())
    }

    /// Owners, members and admins may work in a project.
    pub fn can_access(&self, db: &dyn Database, user: &User) -> DbResult<bool> {
        if user.is_admin() || self.is_owner(user) {
            return Ok(true);
        }
        Project::is_member(db, self.id, user.id)
    }
}
