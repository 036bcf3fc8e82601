use serde::{Deserialize, Serialize};

use crate::db::{self, Database, DbResult, SqlValue};
use crate::params;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub id: i64,
    pub xmlid: Option<String>,
    pub name: String,
    pub project_id: Option<i64>,
    pub event_type: String,
    pub isbase: i64,
    pub date_begin: Option<String>,
    pub date_end: Option<String>,
    pub teaser: Option<String>,
    pub description: Option<String>,
    pub cimg: Option<String>,
    pub creator_id: Option<i64>,
    #[serde(default)]
    pub status_val: i64,
    pub created_at: String,
    pub updated_at: String,
    /// Owning project's domaincode, filled by list queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domaincode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEvent {
    pub xmlid: Option<String>,
    pub name: String,
    pub project_id: Option<i64>,
    pub event_type: Option<String>,
    pub isbase: Option<i64>,
    pub date_begin: Option<String>,
    pub date_end: Option<String>,
    pub teaser: Option<String>,
    pub description: Option<String>,
    pub cimg: Option<String>,
    pub creator_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub isbase: Option<i64>,
    pub project_id: Option<i64>,
}

pub const DEFAULT_EVENT_TYPE: &str = "workshop";

/// Fields accepted by `PATCH /api/events/<id>`.
pub const PATCHABLE: &[&str] = &[
    "name",
    "xmlid",
    "event_type",
    "isbase",
    "date_begin",
    "date_end",
    "teaser",
    "description",
    "cimg",
    "status_val",
];

impl Event {
    pub fn list(db: &dyn Database, filter: &EventFilter) -> DbResult<Vec<Event>> {
        let mut sql = String::from(
            "SELECT e.*, p.domaincode AS domaincode
             FROM events e
             LEFT JOIN projects p ON e.project_id = p.id
             WHERE 1=1",
        );
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(isbase) = filter.isbase {
            sql.push_str(" AND e.isbase = ?");
            args.push(isbase.into());
        }
        if let Some(project_id) = filter.project_id {
            sql.push_str(" AND e.project_id = ?");
            args.push(project_id.into());
        }
        sql.push_str(" ORDER BY e.id");
        db::fetch_all(db, &sql, &args)
    }

    pub fn get_by_id(db: &dyn Database, id: i64) -> DbResult<Option<Event>> {
        db::fetch_one(
            db,
            "SELECT e.*, p.domaincode AS domaincode
             FROM events e LEFT JOIN projects p ON e.project_id = p.id
             WHERE e.id = ?",
            &params![id],
        )
    }

    pub fn create(db: &dyn Database, new: &NewEvent) -> DbResult<i64> {
        let now = db::now();
        db.run(
            "INSERT INTO events (xmlid, name, project_id, event_type, isbase, date_begin, date_end,
                                 teaser, description, cimg, creator_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            &params![
                new.xmlid.as_deref(),
                new.name.trim(),
                new.project_id,
                new.event_type.as_deref().unwrap_or(DEFAULT_EVENT_TYPE),
                new.isbase.unwrap_or(0),
                new.date_begin.as_deref(),
                new.date_end.as_deref(),
                new.teaser.as_deref(),
                new.description.as_deref(),
                new.cimg.as_deref(),
                new.creator_id,
                &now,
                &now
            ],
        )?
        .last_id
        .ok_or_else(|| db::DbError::Query("insert returned no id".to_string()))
    }

    pub fn xmlid_exists(db: &dyn Database, xmlid: &str) -> DbResult<bool> {
        Ok(db
            .get("SELECT id FROM events WHERE xmlid = ?", &params![xmlid])?
            .is_some())
    }
}
