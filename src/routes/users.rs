use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use super::{body_object, changes_from, with_db, ApiError, ApiResult};
use crate::config::Config;
use crate::db::{self, DbError, SharedDb};
use crate::models::session::Session;
use crate::models::user::{User, ROLES};
use crate::security::auth::{self, AdminUser, AuthenticatedUser};
use crate::security::credentials;

/// Plain columns an admin may change. `password` is handled separately.
const PATCHABLE: &[&str] = &["username", "role", "partner_id", "status_val", "img_id"];

#[get("/users/<id>")]
pub async fn user_get(id: i64, _current: AuthenticatedUser, db: &State<SharedDb>) -> ApiResult<User> {
    let user = with_db(db, move |db| Ok(User::get_by_id(db, id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user))
}

/// A new password is hashed and ends the user's sessions.
#[patch("/users/<id>", data = "<body>")]
pub async fn user_update(
    id: i64,
    body: Json<Value>,
    admin: AdminUser,
    db: &State<SharedDb>,
    config: &State<Config>,
) -> ApiResult<Value> {
    let fields = body_object(&body)?;
    let mut changes = changes_from(fields, PATCHABLE);

    if let Some(role) = fields.get("role") {
        if !role.as_str().is_some_and(|r| ROLES.contains(&r)) {
            return Err(ApiError::bad_request(format!(
                "Invalid role. Must be one of: {}",
                ROLES.join(", ")
            )));
        }
    }
    if let Some(username) = fields.get("username") {
        if username.as_str().map_or(true, |u| u.trim().is_empty()) {
            return Err(ApiError::bad_request("username must not be empty"));
        }
    }

    let password = match fields.get("password") {
        Some(Value::String(p)) => Some(p.clone()),
        Some(_) => return Err(ApiError::bad_request("password must be a string")),
        None => None,
    };
    if let Some(password) = &password {
        credentials::validate_password(password).map_err(|e| ApiError::bad_request(e.to_string()))?;
        let hash = auth::hash_password(password, config.bcrypt_cost).map_err(|e| {
            log::error!("[auth] Password hashing failed: {}", e);
            ApiError::Internal("Could not hash password".to_string())
        })?;
        changes.set("password", hash);
    }

    if changes.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }
    let updated_fields: Vec<String> = changes
        .columns()
        .into_iter()
        .map(str::to_string)
        .collect();

    let password_changed = password.is_some();
    let user = with_db(db, move |db| {
        if User::get_by_id(db, id)?.is_none() {
            return Err(ApiError::not_found("User not found"));
        }
        db::with_transaction(db, |tx| {
            changes.apply(tx, "users", id)?;
            if password_changed {
                Session::delete_for_user(tx, id)?;
            }
            Ok::<(), DbError>(())
        })?;
        Ok(User::get_by_id(db, id)?)
    })
    .await?;

    log::info!(
        "[auth] User {} updated by {} ({})",
        id,
        admin.user.username,
        updated_fields.join(", ")
    );
    Ok(Json(json!({ "success": true, "user": user })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![user_get, user_update]
}
