use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{self, Database, DbResult};
use crate::params;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Page {
    pub id: i64,
    pub project: i64,
    pub page_type: String,
    pub header_type: String,
    pub header_size: String,
    #[serde(deserialize_with = "super::json_text")]
    pub page_options: Value,
    #[serde(deserialize_with = "super::json_text")]
    pub header_options: Value,
    #[serde(deserialize_with = "super::json_text")]
    pub aside_options: Value,
    #[serde(deserialize_with = "super::json_text")]
    pub footer_options: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPage {
    pub project: Option<i64>,
    pub project_id: Option<i64>,
    pub page_type: Option<String>,
    pub header_type: Option<String>,
    pub header_size: Option<String>,
    pub page_options: Option<Value>,
    pub header_options: Option<Value>,
    pub aside_options: Option<Value>,
    pub footer_options: Option<Value>,
}

pub const DEFAULT_HEADER_TYPE: &str = "simple";
pub const DEFAULT_HEADER_SIZE: &str = "mini";

/// Plain text columns accepted by `PUT /api/pages/<id>`.
pub const TEXT_FIELDS: &[&str] = &["header_type", "header_size"];
/// JSON option columns accepted by `PUT /api/pages/<id>`, stored as TEXT.
pub const OPTION_FIELDS: &[&str] = &["page_options", "header_options", "aside_options", "footer_options"];

/// Serialize an options object for its TEXT column. Missing means `{}`.
pub fn options_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::Null) | None => "{}".to_string(),
        Some(v) => v.to_string(),
    }
}

/// Page types are short lowercase identifiers (`landing`, `events`, `team_page`).
pub fn valid_page_type(page_type: &str) -> bool {
    !page_type.is_empty()
        && page_type.len() <= 64
        && page_type
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl Page {
    pub fn get_by_id(db: &dyn Database, id: i64) -> DbResult<Option<Page>> {
        db::fetch_one(db, "SELECT * FROM pages WHERE id = ?", &params![id])
    }

    pub fn get_by_type(db: &dyn Database, project: i64, page_type: &str) -> DbResult<Option<Page>> {
        db::fetch_one(
            db,
            "SELECT * FROM pages WHERE project = ? AND page_type = ?",
            &params![project, page_type],
        )
    }

    pub fn create(db: &dyn Database, project: i64, page_type: &str, new: &NewPage) -> DbResult<i64> {
        let now = db::now();
        db.run(
            "INSERT INTO pages (project, page_type, header_type, header_size, page_options,
                                header_options, aside_options, footer_options, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            &params![
                project,
                page_type,
                new.header_type.as_deref().unwrap_or(DEFAULT_HEADER_TYPE),
                new.header_size.as_deref().unwrap_or(DEFAULT_HEADER_SIZE),
                options_text(new.page_options.as_ref()),
                options_text(new.header_options.as_ref()),
                options_text(new.aside_options.as_ref()),
                options_text(new.footer_options.as_ref()),
                &now,
                &now
            ],
        )?
        .last_id
        .ok_or_else(|| db::DbError::Query("insert returned no id".to_string()))
    }
}
