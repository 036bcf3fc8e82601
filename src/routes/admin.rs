use rocket::serde::json::Json;
use rocket::State;

use super::{with_db, ApiError, ApiResult};
use crate::db::SharedDb;
use crate::migrations::{self, MigrationStatus};
use crate::security::auth::AdminUser;

#[get("/admin/migrations")]
pub async fn migrations_status(_admin: AdminUser, db: &State<SharedDb>) -> ApiResult<MigrationStatus> {
    let status = with_db(db, |db| {
        migrations::status(db, &migrations::registry()).map_err(|e| {
            log::error!("[migrate] Status lookup failed: {}", e);
            ApiError::Internal("Could not read migration status".to_string())
        })
    })
    .await?;
    Ok(Json(status))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![migrations_status]
}
