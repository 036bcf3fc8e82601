use serde::{Deserialize, Serialize};

use crate::db::{self, Database, DbResult, SqlValue};
use crate::params;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Image {
    pub id: i64,
    pub xmlid: Option<String>,
    pub name: String,
    pub url: String,
    pub fileformat: String,
    pub mediaformat: Option<String>,
    pub alt_text: Option<String>,
    pub title: Option<String>,
    pub copyright: Option<String>,
    pub domaincode: Option<String>,
    pub owner_id: Option<i64>,
    #[serde(deserialize_with = "super::int_bool")]
    pub is_public: bool,
    pub width: Option<i64>,
    pub height: Option<i64>,
    #[serde(default)]
    pub status_val: i64,
    #[serde(default)]
    pub blurhash: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewImage {
    pub xmlid: Option<String>,
    pub name: String,
    pub url: String,
    pub fileformat: Option<String>,
    pub mediaformat: Option<String>,
    pub alt_text: Option<String>,
    pub title: Option<String>,
    pub copyright: Option<String>,
    pub domaincode: Option<String>,
    pub owner_id: Option<i64>,
    #[serde(default)]
    pub is_public: bool,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub domaincode: Option<String>,
    pub status_val: Option<i64>,
    pub owner_id: Option<i64>,
}

/// Fields accepted by `PATCH /api/images/<id>`.
pub const PATCHABLE: &[&str] = &[
    "xmlid",
    "name",
    "url",
    "fileformat",
    "mediaformat",
    "alt_text",
    "title",
    "copyright",
    "domaincode",
    "owner_id",
    "is_public",
    "width",
    "height",
    "status_val",
];

impl Image {
    pub fn list(db: &dyn Database, filter: &ImageFilter) -> DbResult<Vec<Image>> {
        let mut sql = String::from("SELECT * FROM images WHERE 1=1");
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(dc) = &filter.domaincode {
            sql.push_str(" AND domaincode = ?");
            args.push(dc.into());
        }
        if let Some(status) = filter.status_val {
            sql.push_str(" AND status_val = ?");
            args.push(status.into());
        }
        if let Some(owner) = filter.owner_id {
            sql.push_str(" AND owner_id = ?");
            args.push(owner.into());
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        db::fetch_all(db, &sql, &args)
    }

    pub fn get_by_id(db: &dyn Database, id: i64) -> DbResult<Option<Image>> {
        db::fetch_one(db, "SELECT * FROM images WHERE id = ?", &params![id])
    }

    pub fn get_by_xmlid(db: &dyn Database, xmlid: &str) -> DbResult<Option<Image>> {
        db::fetch_one(db, "SELECT * FROM images WHERE xmlid = ?", &params![xmlid])
    }

    pub fn create(db: &dyn Database, new: &NewImage) -> DbResult<i64> {
        let now = db::now();
        db.run(
            "INSERT INTO images (xmlid, name, url, fileformat, mediaformat, alt_text, title, copyright,
                                 domaincode, owner_id, is_public, width, height, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            &params![
                new.xmlid.as_deref(),
                new.name.trim(),
                new.url.trim(),
                new.fileformat.as_deref().unwrap_or("none"),
                new.mediaformat.as_deref(),
                new.alt_text.as_deref(),
                new.title.as_deref(),
                new.copyright.as_deref(),
                new.domaincode.as_deref(),
                new.owner_id,
                new.is_public,
                new.width,
                new.height,
                &now,
                &now
            ],
        )?
        .last_id
        .ok_or_else(|| db::DbError::Query("insert returned no id".to_string()))
    }

    /// Images without a stored blurhash, oldest first. `force` selects every
    /// image.
    pub fn needing_blurhash(db: &dyn Database, force: bool, limit: i64) -> DbResult<Vec<Image>> {
        let sql = if force {
            "SELECT * FROM images ORDER BY id LIMIT ?"
        } else {
            "SELECT * FROM images WHERE blurhash IS NULL OR blurhash = '' ORDER BY id LIMIT ?"
        };
        db::fetch_all(db, sql, &params![limit])
    }

    pub fn delete(db: &dyn Database, id: i64) -> DbResult<bool> {
        Ok(db.run("DELETE FROM images WHERE id = ?", &params![id])?.changes > 0)
    }

    pub fn set_blurhash(db: &dyn Database, id: i64, hash: &str) -> DbResult<bool> {
        let result = db.run(
            "UPDATE images SET blurhash = ?, updated_at = ? WHERE id = ?",
            &params![hash, db::now(), id],
        )?;
        Ok(result.changes > 0)
    }
}
