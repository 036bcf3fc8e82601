use serde::{Deserialize, Serialize};

use crate::db::{self, Database, DbResult, SqlValue};
use crate::params;

pub const STATUSES: &[&str] = &["todo", "in-progress", "done", "archived"];
pub const PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub record_type: Option<String>,
    pub record_id: Option<String>,
    pub assigned_to: Option<i64>,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub record_type: Option<String>,
    pub record_id: Option<String>,
    pub assigned_to: Option<i64>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub record_type: Option<String>,
    pub record_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub done: usize,
    pub archived: usize,
}

impl TaskCounts {
    pub fn of(tasks: &[Task]) -> Self {
        let count = |s: &str| tasks.iter().filter(|t| t.status == s).count();
        TaskCounts {
            total: tasks.len(),
            todo: count("todo"),
            in_progress: count("in-progress"),
            done: count("done"),
            archived: count("archived"),
        }
    }
}

pub fn valid_status(s: &str) -> bool {
    STATUSES.contains(&s)
}

pub fn valid_priority(s: &str) -> bool {
    PRIORITIES.contains(&s)
}

impl Task {
    /// Urgent first, then newest.
    pub fn list(db: &dyn Database, filter: &TaskFilter) -> DbResult<Vec<Task>> {
        let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(s) = &filter.status {
            sql.push_str(" AND status = ?");
            args.push(s.into());
        }
        if let Some(rt) = &filter.record_type {
            sql.push_str(" AND record_type = ?");
            args.push(rt.into());
        }
        if let Some(rid) = &filter.record_id {
            sql.push_str(" AND record_id = ?");
            args.push(rid.into());
        }
        sql.push_str(
            " ORDER BY CASE priority WHEN 'urgent' THEN 1 WHEN 'high' THEN 2 WHEN 'medium' THEN 3 WHEN 'low' THEN 4 ELSE 5 END,
              created_at DESC, id DESC",
        );
        db::fetch_all(db, &sql, &args)
    }

    pub fn get_by_id(db: &dyn Database, id: i64) -> DbResult<Option<Task>> {
        db::fetch_one(db, "SELECT * FROM tasks WHERE id = ?", &params![id])
    }

    pub fn create(db: &dyn Database, title: &str, new: &NewTask) -> DbResult<i64> {
        let now = db::now();
        db.run(
            "INSERT INTO tasks (title, description, priority, record_type, record_id, assigned_to,
                                due_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            &params![
                title,
                new.description.as_deref().filter(|s| !s.is_empty()),
                new.priority.as_deref().unwrap_or("medium"),
                new.record_type.as_deref().filter(|s| !s.is_empty()),
                new.record_id.as_deref().filter(|s| !s.is_empty()),
                new.assigned_to,
                new.due_date.as_deref().filter(|s| !s.is_empty()),
                &now,
                &now
            ],
        )?
        .last_id
        .ok_or_else(|| db::DbError::Query("insert returned no id".to_string()))
    }
}
