use rocket::serde::json::Json;
use rocket::State;

use super::{with_db, ApiResult};
use crate::db::SharedDb;
use crate::models::status::StatusRow;

/// Rows of the status registry. Databases migrated below the registry
/// table fall back to the compiled-in table.
#[get("/status/all")]
pub async fn status_all(db: &State<SharedDb>) -> ApiResult<Vec<StatusRow>> {
    let rows = with_db(db, |db| match StatusRow::list_all(db) {
        Ok(rows) if !rows.is_empty() => Ok(rows),
        Ok(_) => Ok(StatusRow::builtin()),
        Err(e) => {
            log::warn!("[status] Registry table unavailable, using builtin table: {}", e);
            Ok(StatusRow::builtin())
        }
    })
    .await?;
    Ok(Json(rows))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![status_all]
}
